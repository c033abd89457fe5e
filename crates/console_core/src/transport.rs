use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, Response,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::domain::SchemaMappingId;
use tracing::debug;
use url::Url;

use crate::error::{ConsoleError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A ticket export about to be uploaded.
#[derive(Debug, Clone)]
pub struct TicketUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub schema_mapping_id: Option<SchemaMappingId>,
}

/// HTTP seam to the remote triage API. Carries credentials and base routing,
/// nothing else.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value>;
    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value>;
    async fn post_multipart(&self, path: &str, upload: TicketUpload) -> Result<Value>;
    fn set_token(&self, token: Option<String>);
    fn has_token(&self) -> bool;
}

pub struct HttpTransport {
    http: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConsoleError::NetworkFailure(err.to_string()))?;
        Ok(Self {
            http,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        debug!(path, "GET");
        let response = self
            .authorize(self.http.get(self.url(path)))
            .query(query)
            .send()
            .await?;
        read_response(response).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        debug!(path, "POST");
        let mut request = self.authorize(self.http.post(self.url(path)));
        if let Some(body) = body {
            request = request.json(&body);
        }
        read_response(request.send().await?).await
    }

    async fn post_multipart(&self, path: &str, upload: TicketUpload) -> Result<Value> {
        debug!(path, filename = %upload.filename, size = upload.bytes.len(), "POST multipart");
        let mut form = Form::new().part(
            "file",
            Part::bytes(upload.bytes).file_name(upload.filename),
        );
        if let Some(mapping_id) = upload.schema_mapping_id {
            form = form.text("schema_mapping_id", mapping_id.to_string());
        }
        let response = self
            .authorize(self.http.post(self.url(path)))
            .multipart(form)
            .send()
            .await?;
        read_response(response).await
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

async fn read_response(response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ConsoleError::from_status(status.as_u16(), &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

/// Trims and validates an API base URL, dropping any trailing `/`.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed)
        .map_err(|err| ConsoleError::validation(format!("invalid API base URL {raw:?}: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConsoleError::validation(format!(
            "API base URL must be http or https, got {}",
            parsed.scheme()
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
