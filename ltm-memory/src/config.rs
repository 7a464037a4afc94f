//! Configuration for ltm-memory

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default Anthropic model used for reconciliation and chat
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Configuration for the memory system
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Explicit database path; overrides `data_dir` when set
    pub db_path: Option<PathBuf>,

    /// API key for the completion service
    pub anthropic_api_key: Option<String>,

    /// Model name sent to the completion service
    pub model: String,

    /// Upper bound on generated tokens per completion
    pub max_tokens: u32,

    /// Deadline for a single completion call made during a merge
    pub completion_timeout: Duration,

    /// Reject merges whose output is shorter than this share of the old memory (0.0 - 1.0)
    pub min_retained_ratio: Option<f32>,

    /// HTTP server bind address
    pub server_host: String,

    /// HTTP server port
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ltm-memory");

        Self {
            data_dir,
            db_path: None,
            anthropic_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            completion_timeout: Duration::from_secs(60),
            min_retained_ratio: None,
            server_host: "127.0.0.1".to_string(),
            server_port: 8000,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Build a config from the process environment, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("LTM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("LTM_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        config.anthropic_api_key = lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty());
        if let Some(model) = lookup("LTM_ANTHROPIC_MODEL") {
            config.model = model;
        }
        if let Some(raw) = lookup("LTM_MAX_TOKENS") {
            config.max_tokens = parse_var("LTM_MAX_TOKENS", &raw)?;
        }
        if let Some(raw) = lookup("LTM_COMPLETION_TIMEOUT_SECS") {
            let secs: u64 = parse_var("LTM_COMPLETION_TIMEOUT_SECS", &raw)?;
            config.completion_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("LTM_MIN_RETAINED_RATIO") {
            let ratio: f32 = parse_var("LTM_MIN_RETAINED_RATIO", &raw)?;
            if !(0.0..=1.0).contains(&ratio) {
                return Err(Error::config(format!(
                    "LTM_MIN_RETAINED_RATIO must be between 0 and 1, got {}",
                    ratio
                )));
            }
            config.min_retained_ratio = Some(ratio);
        }
        if let Some(host) = lookup("LTM_HOST") {
            config.server_host = host;
        }
        if let Some(raw) = lookup("LTM_PORT") {
            config.server_port = parse_var("LTM_PORT", &raw)?;
        }

        Ok(config)
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("memory.db"))
    }

    /// Ensure the database's parent directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        match self.sqlite_path().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    /// The `host:port` string the server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("Invalid value for {}: {:?}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_data_dir() {
        let config = Config::with_data_dir("/tmp/ltm");
        assert_eq!(config.sqlite_path(), PathBuf::from("/tmp/ltm/memory.db"));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert!(config.min_retained_ratio.is_none());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("LTM_DB_PATH", "custom.db"),
            ("LTM_ANTHROPIC_MODEL", "claude-test"),
            ("LTM_COMPLETION_TIMEOUT_SECS", "5"),
            ("LTM_MIN_RETAINED_RATIO", "0.5"),
            ("LTM_PORT", "9001"),
            ("ANTHROPIC_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.sqlite_path(), PathBuf::from("custom.db"));
        assert_eq!(config.model, "claude-test");
        assert_eq!(config.completion_timeout, Duration::from_secs(5));
        assert_eq!(config.min_retained_ratio, Some(0.5));
        assert_eq!(config.server_port, 9001);
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let config = Config::from_lookup(lookup_from(&[("ANTHROPIC_API_KEY", "  ")])).unwrap();
        assert!(config.anthropic_api_key.is_none());
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let err = Config::from_lookup(lookup_from(&[("LTM_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err =
            Config::from_lookup(lookup_from(&[("LTM_MIN_RETAINED_RATIO", "1.5")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
