//! Configuration management for Trebble
//!
//! Configuration is read once at process start and passed explicitly to every
//! component; nothing in the library reads credentials or endpoints from
//! globals afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Largest image accepted for a post (5 MiB)
pub const MAX_IMAGE_BYTES: u64 = 5_242_880;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub linkedin: LinkedInConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedInConfig {
    pub register_upload_url: String,
    pub publish_url: String,
    pub restli_protocol_version: String,
    /// Per-request timeout for every call to the network
    pub timeout_secs: u64,
}

impl Default for LinkedInConfig {
    fn default() -> Self {
        Self {
            register_upload_url: "https://api.linkedin.com/v2/assets?action=registerUpload"
                .to_string(),
            publish_url: "https://api.linkedin.com/v2/ugcPosts".to_string(),
            restli_protocol_version: "2.0.0".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory where inbound images are stored
    pub root: String,
    /// Prefix under which stored images are served
    pub url_prefix: String,
    pub max_image_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: "~/.local/share/trebble/media".to_string(),
            url_prefix: "/media/".to_string(),
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }
}

impl MediaConfig {
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.root).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Minimum distance between now and a requested schedule time
    pub min_lead_secs: i64,
    pub poll_interval_ms: u64,
    /// Entries left in `firing` longer than this are reclaimed
    pub stale_after_secs: i64,
    /// Due entries claimed per dispatcher tick
    pub batch_size: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_lead_secs: 60,
            poll_interval_ms: 1000,
            stale_after_secs: 600,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// Run the deferred-post dispatcher inside the API process
    pub run_dispatcher: bool,
    pub page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            run_dispatcher: true,
            page_size: 9,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// `TREBBLE_DB_PATH` overrides the database path from the file.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = Self::load_from_path(&config_path)?;
        if let Ok(db_path) = std::env::var("TREBBLE_DB_PATH") {
            config.database.path = db_path;
        }
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/trebble/posts.db".to_string(),
            },
            linkedin: LinkedInConfig::default(),
            media: MediaConfig::default(),
            scheduling: SchedulingConfig::default(),
            api: ApiConfig::default(),
        }
    }

    /// Config for a throwaway database, used by tests and tooling
    pub fn for_database(path: &str) -> Self {
        let mut config = Self::default_config();
        config.database.path = path.to_string();
        config
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.linkedin.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "linkedin.timeout_secs".to_string(),
                reason: "network calls need a bounded, non-zero timeout".to_string(),
            }
            .into());
        }
        if self.media.max_image_bytes > MAX_IMAGE_BYTES {
            return Err(ConfigError::InvalidValue {
                field: "media.max_image_bytes".to_string(),
                reason: format!("cannot exceed {} bytes", MAX_IMAGE_BYTES),
            }
            .into());
        }
        if self.scheduling.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.poll_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        // A publish makes up to four bounded calls (register, upload, publish
        // and the image fetch); its claim must outlive all of them
        let min_stale = 4 * self.linkedin.timeout_secs as i64;
        if self.scheduling.stale_after_secs < min_stale {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.stale_after_secs".to_string(),
                reason: format!(
                    "must be at least {} (4 x linkedin.timeout_secs)",
                    min_stale
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("TREBBLE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("trebble").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/trebble.db"
"#,
        )
        .unwrap();

        assert_eq!(config.media.max_image_bytes, MAX_IMAGE_BYTES);
        assert_eq!(config.scheduling.min_lead_secs, 60);
        assert_eq!(config.api.page_size, 9);
        assert!(config.linkedin.publish_url.ends_with("/v2/ugcPosts"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/trebble.db"

[linkedin]
timeout_secs = 5
"#,
        )
        .unwrap();

        assert_eq!(config.linkedin.timeout_secs, 5);
        assert_eq!(config.linkedin.restli_protocol_version, "2.0.0");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = Config::from_toml(
            r#"
[database]
path = "/tmp/trebble.db"

[linkedin]
timeout_secs = 0
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_image_limit_cannot_be_raised() {
        let result = Config::from_toml(
            r#"
[database]
path = "/tmp/trebble.db"

[media]
max_image_bytes = 10485760
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stale_window_must_cover_publish_timeouts() {
        let result = Config::from_toml(
            r#"
[database]
path = "/tmp/trebble.db"

[linkedin]
timeout_secs = 30

[scheduling]
stale_after_secs = 119
"#,
        );
        assert!(matches!(
            result,
            Err(crate::TrebbleError::Config(ConfigError::InvalidValue { ref field, .. }))
                if field == "scheduling.stale_after_secs"
        ));

        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/trebble.db"

[linkedin]
timeout_secs = 30

[scheduling]
stale_after_secs = 120
"#,
        )
        .unwrap();
        assert_eq!(config.scheduling.stale_after_secs, 120);
    }

    #[test]
    fn test_missing_database_section_is_parse_error() {
        let result = Config::from_toml("[api]\nbind = \"0.0.0.0:80\"\n");
        assert!(matches!(
            result,
            Err(crate::TrebbleError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_load_respects_env_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "[database]\npath = \"/tmp/from-file.db\"\n").unwrap();

        std::env::set_var("TREBBLE_CONFIG", &config_path);
        std::env::set_var("TREBBLE_DB_PATH", "/tmp/from-env.db");

        let config = Config::load().unwrap();

        std::env::remove_var("TREBBLE_CONFIG");
        std::env::remove_var("TREBBLE_DB_PATH");

        assert_eq!(config.database.path, "/tmp/from-env.db");
    }
}
