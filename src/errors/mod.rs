pub mod dav;

pub use dav::DavError;

/// Coarse classification used by callers to pick a recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transport, authentication, timeout or server failure. Retrying the
    /// whole logical operation from scratch is safe.
    Connection,
    /// Another actor changed relevant remote state concurrently.
    Conflict,
    /// The addressed resource (or a parent container) does not exist.
    NotFound,
    /// The addressed resource already exists.
    AlreadyExists,
    /// The caller passed arguments the operation cannot work with.
    Usage,
    /// The operation was abandoned before it published anything.
    Cancelled,
}

/// Common trait for the crate's error types
pub trait AppError: std::error::Error + Send + Sync + 'static {
    /// Get the classification for this error
    fn error_class(&self) -> ErrorClass;

    /// Get a short, stable error code for logs and scripts
    fn error_code(&self) -> &'static str;

    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get optional suggested action for the user
    fn suggested_action(&self) -> Option<String> {
        None
    }

    /// Whether the whole logical operation may be retried from scratch
    fn is_retryable(&self) -> bool {
        self.error_class() == ErrorClass::Connection
    }
}
