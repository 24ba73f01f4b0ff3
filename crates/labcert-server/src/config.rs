//! Environment configuration.

use std::env;
use std::path::PathBuf;

use labcert_core::LabConfig;

/// Shortest accepted token secret, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything the HTTP server reads from its environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub bind: String,
    pub db_path: PathBuf,
    /// Directory holding report files from older deployments
    pub files_dir: PathBuf,
    pub lab_name: String,
    pub token_secret: String,
    pub token_ttl_secs: u64,
    pub max_upload_bytes: usize,
    /// Expose internal error messages to clients
    pub diagnostics: bool,
    pub log_json: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4000".to_string(),
            db_path: PathBuf::from("data/labcert.sqlite"),
            files_dir: PathBuf::from("uploads"),
            lab_name: LabConfig::default().lab_name,
            token_secret: String::new(),
            token_ttl_secs: 8 * 60 * 60,
            max_upload_bytes: 10 * 1024 * 1024,
            diagnostics: false,
            log_json: false,
        }
    }
}

impl ApiConfig {
    /// Read the `LABCERT_*` variables, falling back to defaults. Call
    /// [`ApiConfig::validate`] before serving or signing tokens.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env_string("LABCERT_BIND", &defaults.bind),
            db_path: PathBuf::from(env_string(
                "LABCERT_DB_PATH",
                &defaults.db_path.to_string_lossy(),
            )),
            files_dir: PathBuf::from(env_string(
                "LABCERT_FILES_DIR",
                &defaults.files_dir.to_string_lossy(),
            )),
            lab_name: env_string("LABCERT_LAB_NAME", &defaults.lab_name),
            token_secret: env::var("LABCERT_TOKEN_SECRET").unwrap_or_default(),
            token_ttl_secs: env_u64("LABCERT_TOKEN_TTL_SECS", defaults.token_ttl_secs),
            max_upload_bytes: env_usize("LABCERT_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            diagnostics: env_bool("LABCERT_DIAGNOSTICS", false),
            log_json: env_bool("LABCERT_LOG_JSON", false),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_secret.is_empty() {
            return Err(ConfigError::Missing("LABCERT_TOKEN_SECRET"));
        }
        if self.token_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "LABCERT_TOKEN_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "LABCERT_TOKEN_TTL_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "LABCERT_MAX_UPLOAD_BYTES",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// The part of the configuration the core library needs.
    pub fn lab_config(&self) -> LabConfig {
        LabConfig {
            lab_name: self.lab_name.clone(),
            files_dir: self.files_dir.clone(),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
