use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

/// Failure classes surfaced by the console core.
///
/// The type is `Clone` because a single failed fetch is handed to every caller
/// that was deduplicated onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    /// Transport unreachable or timed out. Retriable by user action only.
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// The bearer token was missing or refused (401).
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// A client-side precondition failed; no request was sent.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    /// The workflow action is not legal from the entity's current state.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    /// Any other non-2xx response, message kept verbatim.
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },
    /// A 2xx response whose body did not decode.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type Result<T, E = ConsoleError> = std::result::Result<T, E>;

impl ConsoleError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn illegal(message: impl Into<String>) -> Self {
        Self::IllegalTransition(message.into())
    }

    /// Classifies a non-2xx response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let api = ApiError::from_body(status, body);
        if status == 401 {
            let message = api
                .map(|err| err.message)
                .unwrap_or_else(|| "session is no longer valid".to_string());
            return Self::AuthRejected(message);
        }
        match api {
            Some(err) => Self::RemoteRejected {
                status,
                code: Some(err.code),
                message: err.message,
            },
            None => Self::RemoteRejected {
                status,
                code: None,
                message: if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body.trim().to_string()
                },
            },
        }
    }

    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }

    /// Whether the server refused a workflow action because of current state.
    pub fn is_state_conflict(&self) -> bool {
        match self {
            Self::IllegalTransition(_) => true,
            Self::RemoteRejected { status, code, .. } => {
                *status == 409 || matches!(code, Some(ErrorCode::IllegalTransition))
            }
            _ => false,
        }
    }

    /// The single line shown to the operator at the point of action.
    pub fn notification(&self, action: &str) -> String {
        match self {
            Self::NetworkFailure(_) => {
                format!("Failed to {action}: the server could not be reached. Try again.")
            }
            Self::AuthRejected(_) => {
                format!("Failed to {action}: your session expired. Please sign in again.")
            }
            Self::ValidationFailed(reason) => format!("Cannot {action}: {reason}"),
            Self::IllegalTransition(reason) => format!("Cannot {action}: {reason}"),
            Self::RemoteRejected { message, .. } => format!("Failed to {action}: {message}"),
            Self::UnexpectedResponse(_) => {
                format!("Failed to {action}: the server sent an unexpected response.")
            }
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(value: reqwest::Error) -> Self {
        if let Some(status) = value.status() {
            return Self::from_status(status.as_u16(), "");
        }
        if value.is_decode() {
            return Self::UnexpectedResponse(value.to_string());
        }
        Self::NetworkFailure(value.to_string())
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(value: serde_json::Error) -> Self {
        Self::UnexpectedResponse(value.to_string())
    }
}
