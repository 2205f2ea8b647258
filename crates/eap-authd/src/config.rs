use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use eap_proto::tprf::PAC_KEY_LEN;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// Shared secret. Plaintext unless `password_hashed` is set.
    pub password: String,
    /// True if `password` holds a pre-hashed form. Methods that need the
    /// plaintext will fail exchanges for this user and log an operator error.
    #[serde(default)]
    pub password_hashed: bool,
    /// Tunnel provisioning key (PAC-Key) as hex, 32 bytes. Required for the
    /// tunneled method.
    #[serde(default)]
    pub pac_key: Option<String>,
}

impl User {
    /// Decode the configured PAC-Key
    pub fn parse_pac_key(&self) -> Result<Option<[u8; PAC_KEY_LEN]>, ConfigError> {
        let Some(ref hex_key) = self.pac_key else {
            return Ok(None);
        };

        let bytes = hex::decode(hex_key).map_err(|e| {
            ConfigError::Invalid(format!("Invalid pac_key for {}: {}", self.username, e))
        })?;

        let key: [u8; PAC_KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            ConfigError::Invalid(format!(
                "Invalid pac_key length for {}: expected {} bytes, got {}",
                self.username,
                PAC_KEY_LEN,
                b.len()
            ))
        })?;

        Ok(Some(key))
    }
}

/// Authenticator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// List of users for authentication
    #[serde(default)]
    pub users: Vec<User>,

    /// Default EAP method offered to peers: "md5" or "fast"
    #[serde(default = "default_method")]
    pub default_method: String,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    /// Session timeout in seconds (default: 300)
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,

    /// Maximum authentication attempts per session (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_method() -> String {
    "md5".to_string()
}

fn default_session_timeout() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Config {
            users: vec![],
            default_method: default_method(),
            log_level: None,
            session_timeout: default_session_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.default_method.as_str() {
            "md5" | "fast" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown default_method: {}",
                    other
                )))
            }
        }

        for user in &self.users {
            if user.username.is_empty() {
                return Err(ConfigError::Invalid("Empty username".to_string()));
            }
            user.parse_pac_key()?;
        }

        if self.default_method == "fast" {
            for user in &self.users {
                if user.pac_key.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "User {} has no pac_key but default_method is \"fast\"",
                        user.username
                    )));
                }
            }
        }

        Ok(())
    }

    /// Example configuration written on first start
    pub fn example() -> Self {
        Config {
            users: vec![
                User {
                    username: "alice".to_string(),
                    password: "password123".to_string(),
                    password_hashed: false,
                    pac_key: None,
                },
                User {
                    username: "bob".to_string(),
                    password: "changeme".to_string(),
                    password_hashed: false,
                    pac_key: Some("00".repeat(PAC_KEY_LEN)),
                },
            ],
            default_method: default_method(),
            log_level: Some("info".to_string()),
            session_timeout: default_session_timeout(),
            max_attempts: default_max_attempts(),
        }
    }

    /// Find a user by name
    pub fn find_user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }
}
