use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    IllegalTransition,
    RateLimited,
    Internal,
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Best-effort code for a bare HTTP status when the body carries none.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            400 | 422 => ErrorCode::Validation,
            409 => ErrorCode::Conflict,
            429 => ErrorCode::RateLimited,
            500..=599 => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Decodes an error body. Accepts the `{code, message}` envelope and the
    /// `{detail}` shape, where `detail` is either a string or a list of
    /// validation items carrying `msg`.
    pub fn from_body(status: u16, body: &str) -> Option<Self> {
        if let Ok(err) = serde_json::from_str::<ApiError>(body) {
            return Some(err);
        }

        #[derive(Deserialize)]
        struct DetailBody {
            detail: serde_json::Value,
        }

        let detail = serde_json::from_str::<DetailBody>(body).ok()?.detail;
        let message = match detail {
            serde_json::Value::String(text) => text,
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|msg| msg.as_str()))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        };
        Some(Self::new(ErrorCode::from_status(status), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_code_message_envelope() {
        let err = ApiError::from_body(409, r#"{"code":"illegal_transition","message":"cluster already approved"}"#)
            .expect("envelope");
        assert_eq!(err.code, ErrorCode::IllegalTransition);
        assert_eq!(err.message, "cluster already approved");
    }

    #[test]
    fn decodes_string_detail_with_status_code() {
        let err = ApiError::from_body(404, r#"{"detail":"Cluster not found"}"#).expect("detail");
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.message, "Cluster not found");
    }

    #[test]
    fn joins_validation_detail_messages() {
        let err = ApiError::from_body(
            422,
            r#"{"detail":[{"msg":"field required"},{"msg":"value is not a valid uuid"}]}"#,
        )
        .expect("detail list");
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "field required; value is not a valid uuid");
    }

    #[test]
    fn unknown_codes_do_not_fail_decoding() {
        let err = ApiError::from_body(418, r#"{"code":"teapot","message":"short and stout"}"#)
            .expect("envelope");
        assert_eq!(err.code, ErrorCode::Unknown);
    }

    #[test]
    fn non_json_bodies_are_not_decoded() {
        assert!(ApiError::from_body(502, "<html>bad gateway</html>").is_none());
    }
}
