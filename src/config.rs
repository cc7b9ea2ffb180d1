use anyhow::{anyhow, Result};
use std::env;

use crate::services::webdav::{ReplaceStrategy, RetryConfig, WebDAVConfig, WriterConfig};

/// Process configuration, read from `DAVWRITE_*` environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
    pub server_type: Option<String>,
    /// Account-relative directory that receives staged uploads
    pub staging_dir: String,
    pub replace_strategy: ReplaceStrategy,
    pub max_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let server_url = env::var("DAVWRITE_SERVER_URL")
            .map_err(|_| anyhow!("DAVWRITE_SERVER_URL must be set"))?;

        let replace_strategy = match env::var("DAVWRITE_REPLACE_STRATEGY") {
            Ok(value) => value.parse()?,
            Err(_) => ReplaceStrategy::default(),
        };

        Ok(Config {
            server_url,
            username: env::var("DAVWRITE_USERNAME").unwrap_or_default(),
            password: env::var("DAVWRITE_PASSWORD").unwrap_or_default(),
            timeout_seconds: env::var("DAVWRITE_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            server_type: env::var("DAVWRITE_SERVER_TYPE")
                .ok()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
            staging_dir: env::var("DAVWRITE_STAGING_DIR")
                .unwrap_or_else(|_| ".staging/".to_string()),
            replace_strategy,
            max_retries: env::var("DAVWRITE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| RetryConfig::default().max_retries),
        })
    }

    pub fn webdav_config(&self) -> WebDAVConfig {
        WebDAVConfig {
            server_url: self.server_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout_seconds: self.timeout_seconds,
            server_type: self.server_type.clone(),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            ..RetryConfig::default()
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            replace_strategy: self.replace_strategy,
            ..WriterConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 8] = [
        "DAVWRITE_SERVER_URL",
        "DAVWRITE_USERNAME",
        "DAVWRITE_PASSWORD",
        "DAVWRITE_TIMEOUT_SECONDS",
        "DAVWRITE_SERVER_TYPE",
        "DAVWRITE_STAGING_DIR",
        "DAVWRITE_REPLACE_STRATEGY",
        "DAVWRITE_MAX_RETRIES",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_from_env_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("DAVWRITE_SERVER_URL", "https://cloud.example.com");

        let config = Config::from_env().unwrap();
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.staging_dir, ".staging/");
        assert_eq!(config.replace_strategy, ReplaceStrategy::AtomicMove);
        assert_eq!(config.server_type, None);
        assert_eq!(config.retry_config().max_retries, 3);

        clear_env();
    }

    #[test]
    fn test_from_env_reads_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("DAVWRITE_SERVER_URL", "https://cloud.example.com");
        env::set_var("DAVWRITE_USERNAME", "alice");
        env::set_var("DAVWRITE_SERVER_TYPE", "Nextcloud");
        env::set_var("DAVWRITE_TIMEOUT_SECONDS", "5");
        env::set_var("DAVWRITE_REPLACE_STRATEGY", "move-aside");
        env::set_var("DAVWRITE_MAX_RETRIES", "0");

        let config = Config::from_env().unwrap();
        assert_eq!(config.writer_config().replace_strategy, ReplaceStrategy::MoveAside);
        assert_eq!(config.retry_config().max_retries, 0);

        let webdav = config.webdav_config();
        assert_eq!(webdav.timeout_seconds, 5);
        assert_eq!(
            webdav.webdav_url(),
            "https://cloud.example.com/remote.php/dav/files/alice"
        );

        clear_env();
    }

    #[test]
    fn test_from_env_rejects_unknown_strategy() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("DAVWRITE_SERVER_URL", "https://cloud.example.com");
        env::set_var("DAVWRITE_REPLACE_STRATEGY", "yolo");

        assert!(Config::from_env().is_err());

        clear_env();
    }
}
