use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Server-assigned identifiers are opaque strings. Locally minted ones are
// random UUIDs, but nothing relies on that shape.
macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = s.trim();
                if id.is_empty() {
                    return Err(format!("{} must not be empty", stringify!($name)));
                }
                Ok(Self(id.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(OrgId);
id_newtype!(TicketId);
id_newtype!(ClusterId);
id_newtype!(AssessmentId);
id_newtype!(FeedbackId);
id_newtype!(KnowledgeId);
id_newtype!(SchemaMappingId);

/// Review lifecycle of a cluster. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Pending,
    Reviewed,
    Approved,
    Rejected,
}

impl ClusterStatus {
    pub const ALL: [ClusterStatus; 4] = [
        ClusterStatus::Pending,
        ClusterStatus::Reviewed,
        ClusterStatus::Approved,
        ClusterStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Pending => "pending",
            ClusterStatus::Reviewed => "reviewed",
            ClusterStatus::Approved => "approved",
            ClusterStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClusterStatus::Approved | ClusterStatus::Rejected)
    }

    /// Full transition table, including the system-driven `pending -> reviewed`.
    pub fn can_transition_to(self, next: ClusterStatus) -> bool {
        use ClusterStatus::*;
        matches!(
            (self, next),
            (Pending, Reviewed)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Reviewed, Approved)
                | (Reviewed, Rejected)
        )
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClusterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClusterStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown cluster status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRating {
    Helpful,
    NotHelpful,
    Incorrect,
}

impl FeedbackRating {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackRating::Helpful => "helpful",
            FeedbackRating::NotHelpful => "not_helpful",
            FeedbackRating::Incorrect => "incorrect",
        }
    }
}

impl fmt::Display for FeedbackRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeedbackRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "helpful" => Ok(FeedbackRating::Helpful),
            "not_helpful" => Ok(FeedbackRating::NotHelpful),
            "incorrect" => Ok(FeedbackRating::Incorrect),
            other => Err(format!("unknown feedback rating: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSourceType {
    Feedback,
    Document,
    #[default]
    Manual,
}

impl std::str::FromStr for KnowledgeSourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feedback" => Ok(KnowledgeSourceType::Feedback),
            "document" => Ok(KnowledgeSourceType::Document),
            "manual" => Ok(KnowledgeSourceType::Manual),
            other => Err(format!("unknown knowledge source type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSourceType {
    Csv,
    Excel,
    Json,
}

impl SchemaSourceType {
    /// Maps an upload file extension onto the format it is parsed as.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(SchemaSourceType::Csv),
            "xlsx" | "xls" => Some(SchemaSourceType::Excel),
            "json" => Some(SchemaSourceType::Json),
            _ => None,
        }
    }
}

impl std::str::FromStr for SchemaSourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(SchemaSourceType::Csv),
            "excel" | "xlsx" | "xls" => Ok(SchemaSourceType::Excel),
            "json" => Ok(SchemaSourceType::Json),
            other => Err(format!("unknown schema source type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Po,
    Sme,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Upload,
    Cluster,
    Approval,
    Feedback,
}

/// Canonical ticket fields a schema mapping may target.
pub const CANONICAL_FIELDS: [&str; 8] = [
    "ticket_id",
    "description",
    "category",
    "subcategory",
    "priority",
    "created_date",
    "resolved_date",
    "resolution",
];

/// The one canonical field every schema mapping must provide.
pub const REQUIRED_CANONICAL_FIELD: &str = "description";

pub fn is_canonical_field(field: &str) -> bool {
    CANONICAL_FIELDS.contains(&field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in [ClusterStatus::Approved, ClusterStatus::Rejected] {
            assert!(from.is_terminal());
            for to in ClusterStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn review_only_moves_forward() {
        assert!(ClusterStatus::Pending.can_transition_to(ClusterStatus::Reviewed));
        assert!(ClusterStatus::Reviewed.can_transition_to(ClusterStatus::Rejected));
        assert!(!ClusterStatus::Reviewed.can_transition_to(ClusterStatus::Pending));
        assert!(!ClusterStatus::Pending.can_transition_to(ClusterStatus::Pending));
    }

    #[test]
    fn ids_are_opaque_strings() {
        let id: ClusterId = serde_json::from_str("\"cl_42\"").expect("non-uuid id");
        assert_eq!(id.as_str(), "cl_42");
        assert_eq!(" cl_42 ".parse::<ClusterId>(), Ok(id));
        assert!("  ".parse::<ClusterId>().is_err());
        assert_ne!(ClusterId::new(), ClusterId::new());
    }

    #[test]
    fn wire_names_parse_back() {
        assert_eq!("Approved".parse::<ClusterStatus>(), Ok(ClusterStatus::Approved));
        assert_eq!("not-helpful".parse::<FeedbackRating>(), Ok(FeedbackRating::NotHelpful));
        assert_eq!(
            serde_json::to_string(&FeedbackRating::NotHelpful).expect("json"),
            "\"not_helpful\""
        );
        assert_eq!(SchemaSourceType::from_extension("XLS"), Some(SchemaSourceType::Excel));
        assert!(is_canonical_field(REQUIRED_CANONICAL_FIELD));
        assert!(!is_canonical_field("severity"));
    }
}
