use std::path::PathBuf;

use celine_core::error::TriageError;

pub const ENCRYPTION_KEY_ENV: &str = "CELINE_ENCRYPTION_KEY";
pub const DATABASE_URL_ENV: &str = "CELINE_DATABASE_URL";
pub const RULES_PATH_ENV: &str = "CELINE_RULES_PATH";

const DEFAULT_DATABASE_URL: &str = "sqlite://celine.db";
const DEFAULT_RULES_PATH: &str = "config/clinical_rules.json";

/// Process-wide immutable configuration, loaded once at startup and passed
/// explicitly into the engines that need it. No hidden globals.
#[derive(Clone)]
pub struct EngineConfig {
    /// Key material for at-rest encryption. Required; the process fails
    /// fast when it is absent.
    pub encryption_key: String,
    pub database_url: String,
    /// Clinical rules configuration document (rules are data, not code).
    pub rules_path: PathBuf,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("encryption_key", &"<redacted>")
            .field("database_url", &self.database_url)
            .field("rules_path", &self.rules_path)
            .finish()
    }
}

impl EngineConfig {
    /// Read configuration from the environment. Missing encryption key is a
    /// startup failure, never a silent fallback to a well-known key.
    pub fn from_env() -> Result<Self, TriageError> {
        let encryption_key = std::env::var(ENCRYPTION_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                TriageError::Storage(format!("{ENCRYPTION_KEY_ENV} must be set and non-empty"))
            })?;

        let database_url = std::env::var(DATABASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let rules_path = std::env::var(RULES_PATH_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_PATH));

        Ok(EngineConfig {
            encryption_key,
            database_url,
            rules_path,
        })
    }

    pub fn new(
        encryption_key: impl Into<String>,
        database_url: impl Into<String>,
        rules_path: impl Into<PathBuf>,
    ) -> Self {
        EngineConfig {
            encryption_key: encryption_key.into(),
            database_url: database_url.into(),
            rules_path: rules_path.into(),
        }
    }
}
