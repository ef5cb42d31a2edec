//! Cart sync configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CART_GUEST_KEY` - Key-value store key of the guest cart (default: `guest_cart`)
//! - `CART_STORAGE_DIR` - Directory of the file-backed key-value store (default: `.cart-storage`)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Sentry error event sample rate, 0.0 to 1.0 (default: 1.0)

use std::path::PathBuf;

use thiserror::Error;

use crate::services::cart::DEFAULT_GUEST_CART_KEY;

const DEFAULT_STORAGE_DIR: &str = ".cart-storage";
const DEFAULT_SAMPLE_RATE: &str = "1.0";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart sync configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CartSyncConfig {
    /// Key-value store key the guest cart is stored under
    pub guest_cart_key: String,
    /// Root directory of the file-backed key-value store
    pub storage_dir: PathBuf,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Sentry error event sample rate
    pub sentry_sample_rate: f32,
}

impl Default for CartSyncConfig {
    fn default() -> Self {
        Self {
            guest_cart_key: DEFAULT_GUEST_CART_KEY.to_string(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
        }
    }
}

impl CartSyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let guest_cart_key = get_env_or_default(&lookup, "CART_GUEST_KEY", DEFAULT_GUEST_CART_KEY);
        validate_key(&guest_cart_key, "CART_GUEST_KEY")?;

        let storage_dir =
            PathBuf::from(get_env_or_default(&lookup, "CART_STORAGE_DIR", DEFAULT_STORAGE_DIR));

        let sentry_sample_rate = get_env_or_default(&lookup, "SENTRY_SAMPLE_RATE", DEFAULT_SAMPLE_RATE)
            .parse::<f32>()
            .map_err(|e| ConfigError::InvalidEnvVar("SENTRY_SAMPLE_RATE".to_string(), e.to_string()))?;
        if !(0.0..=1.0).contains(&sentry_sample_rate) {
            return Err(ConfigError::InvalidEnvVar(
                "SENTRY_SAMPLE_RATE".to_string(),
                format!("must be between 0.0 and 1.0 (got {sentry_sample_rate})"),
            ));
        }

        Ok(Self {
            guest_cart_key,
            storage_dir,
            sentry_dsn: get_optional_env(&lookup, "SENTRY_DSN"),
            sentry_environment: get_optional_env(&lookup, "SENTRY_ENVIRONMENT"),
            sentry_sample_rate,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    get_optional_env(lookup, key).unwrap_or_else(|| default.to_string())
}

/// Validate that a store key only uses characters every store accepts.
fn validate_key(key: &str, var_name: &str) -> Result<(), ConfigError> {
    if key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Ok(());
    }
    Err(ConfigError::InvalidEnvVar(
        var_name.to_string(),
        "only ASCII letters, digits, '-' and '_' are allowed".to_string(),
    ))
}
