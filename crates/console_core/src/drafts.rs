use std::{collections::BTreeMap, path::Path};

use shared::{
    domain::{
        is_canonical_field, KnowledgeSourceType, SchemaSourceType, CANONICAL_FIELDS,
        REQUIRED_CANONICAL_FIELD,
    },
    protocol::{CreateKnowledgeRequest, CreateSchemaMappingRequest, LoginRequest},
};

use crate::{
    error::{ConsoleError, Result},
    transport::TicketUpload,
};

fn required(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConsoleError::validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub fn validate_question(question: &str) -> Result<String> {
    required(question, "question")
}

pub fn login_request(email: &str, password: &str) -> Result<LoginRequest> {
    let email = required(email, "email")?;
    if password.is_empty() {
        return Err(ConsoleError::validation("password must not be empty"));
    }
    Ok(LoginRequest {
        email,
        password: password.to_string(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeDraft {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub source_type: KnowledgeSourceType,
}

impl KnowledgeDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_type(mut self, source_type: KnowledgeSourceType) -> Self {
        self.source_type = source_type;
        self
    }

    /// Tags are trimmed and de-duplicated, first occurrence kept.
    pub fn into_request(self) -> Result<CreateKnowledgeRequest> {
        let title = required(&self.title, "title")?;
        let content = required(&self.content, "content")?;
        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|seen| seen == tag) {
                tags.push(tag.to_string());
            }
        }
        Ok(CreateKnowledgeRequest {
            title,
            content,
            tags,
            source_type: self.source_type,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SchemaMappingDraft {
    pub name: String,
    pub source_type: SchemaSourceType,
    pub field_mappings: BTreeMap<String, String>,
}

impl SchemaMappingDraft {
    pub fn new(name: impl Into<String>, source_type: SchemaSourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
            field_mappings: BTreeMap::new(),
        }
    }

    pub fn map(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.field_mappings.insert(field.into(), column.into());
        self
    }

    pub fn into_request(self) -> Result<CreateSchemaMappingRequest> {
        let name = required(&self.name, "mapping name")?;
        let mut field_mappings = BTreeMap::new();
        for (field, column) in self.field_mappings {
            let field = field.trim().to_string();
            if !is_canonical_field(&field) {
                return Err(ConsoleError::validation(format!(
                    "unknown canonical field {field:?}; expected one of {}",
                    CANONICAL_FIELDS.join(", ")
                )));
            }
            let column = required(&column, &format!("source column for {field}"))?;
            field_mappings.insert(field, column);
        }
        if !field_mappings.contains_key(REQUIRED_CANONICAL_FIELD) {
            return Err(ConsoleError::validation(format!(
                "'{REQUIRED_CANONICAL_FIELD}' field mapping is required"
            )));
        }
        Ok(CreateSchemaMappingRequest {
            name,
            source_type: self.source_type,
            field_mappings,
        })
    }
}

/// Checks an upload before it is sent and reports the format it will be
/// parsed as.
pub fn validate_upload(upload: &TicketUpload) -> Result<SchemaSourceType> {
    let extension = Path::new(upload.filename.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let source_type = SchemaSourceType::from_extension(extension).ok_or_else(|| {
        ConsoleError::validation(format!(
            "{} is not a supported ticket export (.csv, .xlsx, .xls or .json)",
            upload.filename
        ))
    })?;
    if upload.bytes.is_empty() {
        return Err(ConsoleError::validation(format!(
            "{} is empty",
            upload.filename
        )));
    }
    Ok(source_type)
}

#[cfg(test)]
#[path = "tests/drafts_tests.rs"]
mod tests;
