use anyhow::{anyhow, Result};

/// WebDAV server configuration
#[derive(Debug, Clone)]
pub struct WebDAVConfig {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
    pub server_type: Option<String>, // "nextcloud", "owncloud", "generic"
}

/// Retry configuration for WebDAV operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub rate_limit_backoff_ms: u64, // Additional backoff for 429 responses
}

/// How an `overwrite` write replaces existing content at its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplaceStrategy {
    /// `MOVE` with `Overwrite: T`. Only safe when the server replaces the
    /// destination atomically.
    #[default]
    AtomicMove,
    /// Park the old destination under an aside name, move the staged file in,
    /// then delete the aside copy. Interrupted replaces are recoverable.
    MoveAside,
}

/// Settings for the atomic writer
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub replace_strategy: ReplaceStrategy,
    /// Appended to staged uploads inside the temporary directory
    pub staging_suffix: String,
    /// Appended to a destination's name while it is parked during a replace
    pub aside_suffix: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000, // 1 second
            max_delay_ms: 30000,    // 30 seconds
            backoff_multiplier: 2.0,
            rate_limit_backoff_ms: 5000, // 5 seconds
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            replace_strategy: ReplaceStrategy::default(),
            staging_suffix: ".davwrite-staging".to_string(),
            aside_suffix: ".davwrite-aside".to_string(),
        }
    }
}

impl std::str::FromStr for ReplaceStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" | "atomic-move" | "atomic_move" => Ok(ReplaceStrategy::AtomicMove),
            "aside" | "move-aside" | "move_aside" => Ok(ReplaceStrategy::MoveAside),
            other => Err(anyhow!("Unknown replace strategy '{}'", other)),
        }
    }
}

impl WebDAVConfig {
    /// Creates a new WebDAV configuration
    pub fn new(server_url: String, username: String, password: String) -> Self {
        Self {
            server_url,
            username,
            password,
            timeout_seconds: 30,
            server_type: None,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(anyhow!("Server URL cannot be empty"));
        }

        if self.username.is_empty() {
            return Err(anyhow!("Username cannot be empty"));
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(anyhow!("Server URL must start with http:// or https://"));
        }

        if self.timeout_seconds == 0 {
            return Err(anyhow!("Timeout must be at least one second"));
        }

        Ok(())
    }

    /// Returns the base URL of the account's WebDAV namespace
    pub fn webdav_url(&self) -> String {
        let mut url = self.server_url.trim_end_matches('/').to_string();

        match self.server_type.as_deref() {
            Some("nextcloud") => {
                if !url.contains("/remote.php/dav/files/") {
                    url.push_str(&format!("/remote.php/dav/files/{}", self.username));
                }
            }
            Some("owncloud") => {
                if !url.contains("/remote.php/webdav") {
                    url.push_str("/remote.php/webdav");
                }
            }
            _ => {
                // Generic WebDAV - use the URL as provided
            }
        }

        url
    }

    /// Gets the timeout duration
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}
