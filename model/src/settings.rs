use crate::query::QueryOptions;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Wrapper that keeps credentials out of logs and debug output.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum Authenticator {
    #[default]
    #[serde(rename = "SNOWFLAKE")]
    Snowflake,
    #[serde(rename = "externalbrowser")]
    ExternalBrowser,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("password is required when authenticator is SNOWFLAKE")]
    MissingPassword,
}

/// Account-level connection settings, consumed by a concrete
/// `ConnectionProvider`. Loading from TOML/env happens outside this crate.
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionSettings {
    pub account: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<Secret>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub authenticator: Authenticator,
    #[serde(default)]
    pub client_store_temporary_credential: bool,
}

impl ConnectionSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.authenticator == Authenticator::Snowflake && self.password.is_none() {
            return Err(SettingsError::MissingPassword);
        }
        Ok(())
    }
}

/// Process-wide registry configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub default_poll_interval: Duration,
    pub default_max_inline_rows: usize,
    /// Grace period before a record becomes prunable.
    pub ttl: Duration,
    /// Upper bound applied to per-query `query_timeout`.
    pub max_query_timeout: Option<Duration>,
    /// Worker threads of the blocking executor.
    pub executor_threads: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            default_poll_interval: Duration::from_secs(1),
            default_max_inline_rows: 1000,
            ttl: Duration::from_secs(24 * 60 * 60),
            max_query_timeout: Some(Duration::from_secs(60 * 60)),
            executor_threads: 8,
        }
    }
}

impl RegistrySettings {
    pub fn default_options(&self) -> QueryOptions {
        QueryOptions {
            query_timeout: None,
            max_inline_rows: self.default_max_inline_rows,
            poll_interval: self.default_poll_interval,
        }
    }

    /// Clamp a per-query timeout to the configured maximum.
    pub fn clamp_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        match (requested, self.max_query_timeout) {
            (Some(requested), Some(max)) => Some(requested.min(max)),
            (Some(requested), None) => Some(requested),
            (None, _) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn password_required_for_default_authenticator() {
        let settings = ConnectionSettings {
            account: "acme-eu".into(),
            user: "svc".into(),
            password: None,
            warehouse: None,
            role: None,
            authenticator: Authenticator::Snowflake,
            client_store_temporary_credential: false,
        };
        assert_eq!(settings.validate(), Err(SettingsError::MissingPassword));

        let settings = ConnectionSettings {
            authenticator: Authenticator::ExternalBrowser,
            ..settings
        };
        assert_eq!(settings.validate(), Ok(()));
    }

    #[test]
    fn timeout_clamped_to_configured_maximum() {
        let settings = RegistrySettings {
            max_query_timeout: Some(Duration::from_secs(60)),
            ..RegistrySettings::default()
        };
        assert_eq!(
            settings.clamp_timeout(Some(Duration::from_secs(3600))),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            settings.clamp_timeout(Some(Duration::from_secs(30))),
            Some(Duration::from_secs(30))
        );
        assert_eq!(settings.clamp_timeout(None), None);
    }
}
