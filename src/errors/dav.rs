use thiserror::Error;

use super::{AppError, ErrorClass};

/// Errors produced by remote WebDAV operations and the atomic writer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DavError {
    #[error("Connection failed: {details}")]
    Connection { details: String },

    #[error("Network timeout talking to '{url}' after {timeout_seconds} seconds")]
    NetworkTimeout { url: String, timeout_seconds: u64 },

    #[error("Authentication failed for '{url}': HTTP {status}")]
    AuthenticationFailed { url: String, status: u16 },

    #[error("Server error from '{url}': {status} - {message}")]
    ServerError { url: String, status: u16, message: String },

    #[error("Malformed server response: {details}")]
    InvalidResponse { details: String },

    #[error("Conflict at '{url}': {reason}")]
    Conflict { url: String, reason: String },

    #[error("Resource not found: {url}")]
    NotFound { url: String },

    #[error("Resource already exists: {url}")]
    AlreadyExists { url: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Write to '{url}' was cancelled before publishing")]
    Cancelled { url: String },
}

impl DavError {
    pub fn conflict(url: impl Into<String>, reason: impl Into<String>) -> Self {
        DavError::Conflict {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(url: impl Into<String>) -> Self {
        DavError::NotFound { url: url.into() }
    }

    pub fn already_exists(url: impl Into<String>) -> Self {
        DavError::AlreadyExists { url: url.into() }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        DavError::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DavError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, DavError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DavError::Conflict { .. })
    }
}

impl From<reqwest::Error> for DavError {
    fn from(err: reqwest::Error) -> Self {
        DavError::Connection {
            details: err.to_string(),
        }
    }
}

impl From<quick_xml::Error> for DavError {
    fn from(err: quick_xml::Error) -> Self {
        DavError::InvalidResponse {
            details: format!("XML parsing error: {}", err),
        }
    }
}

impl AppError for DavError {
    fn error_class(&self) -> ErrorClass {
        match self {
            DavError::Connection { .. }
            | DavError::NetworkTimeout { .. }
            | DavError::AuthenticationFailed { .. }
            | DavError::ServerError { .. }
            | DavError::InvalidResponse { .. } => ErrorClass::Connection,
            DavError::Conflict { .. } => ErrorClass::Conflict,
            DavError::NotFound { .. } => ErrorClass::NotFound,
            DavError::AlreadyExists { .. } => ErrorClass::AlreadyExists,
            DavError::InvalidUrl { .. } => ErrorClass::Usage,
            DavError::Cancelled { .. } => ErrorClass::Cancelled,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            DavError::Connection { .. } => "DAV_CONNECTION_FAILED",
            DavError::NetworkTimeout { .. } => "DAV_NETWORK_TIMEOUT",
            DavError::AuthenticationFailed { .. } => "DAV_AUTH_FAILED",
            DavError::ServerError { .. } => "DAV_SERVER_ERROR",
            DavError::InvalidResponse { .. } => "DAV_INVALID_RESPONSE",
            DavError::Conflict { .. } => "DAV_CONFLICT",
            DavError::NotFound { .. } => "DAV_NOT_FOUND",
            DavError::AlreadyExists { .. } => "DAV_ALREADY_EXISTS",
            DavError::InvalidUrl { .. } => "DAV_INVALID_URL",
            DavError::Cancelled { .. } => "DAV_CANCELLED",
        }
    }

    fn user_message(&self) -> String {
        match self {
            DavError::Connection { .. } => "Unable to reach the WebDAV server".to_string(),
            DavError::NetworkTimeout { .. } => "Connection timed out".to_string(),
            DavError::AuthenticationFailed { .. } => {
                "Authentication failed - please check credentials".to_string()
            }
            DavError::ServerError { status, .. } => format!("Server returned HTTP {}", status),
            DavError::InvalidResponse { .. } => "Server sent an unreadable response".to_string(),
            DavError::Conflict { reason, .. } => format!("Remote conflict: {}", reason),
            DavError::NotFound { url } => format!("Not found: {}", url),
            DavError::AlreadyExists { url } => format!("Already exists: {}", url),
            DavError::InvalidUrl { reason, .. } => format!("Invalid URL: {}", reason),
            DavError::Cancelled { .. } => "Write cancelled".to_string(),
        }
    }

    fn suggested_action(&self) -> Option<String> {
        match self {
            DavError::Connection { .. } | DavError::NetworkTimeout { .. } => {
                Some("Check connectivity and retry the operation".to_string())
            }
            DavError::AuthenticationFailed { .. } => {
                Some("Verify the username and password".to_string())
            }
            DavError::Conflict { .. } => {
                Some("Choose a different name or retry with overwrite enabled".to_string())
            }
            _ => None,
        }
    }
}
