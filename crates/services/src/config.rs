use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

const ENV_PREFIX: &str = "LABDESK";
const DEFAULT_CONFIG_FILE: &str = "labdesk";

/// Client settings, layered from defaults, an optional `labdesk.toml` and
/// `LABDESK__*` environment variables (later layers win).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub time_sync_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub drafts_db_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            time_sync_interval_secs: 10,
            request_timeout_secs: 15,
            drafts_db_url: "sqlite://labdesk-drafts.sqlite3".into(),
            username: None,
            password: None,
        }
    }
}

impl ClientConfig {
    /// Load from `.env`, `labdesk.toml` in the working directory and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_sources(Path::new(DEFAULT_CONFIG_FILE), None)
    }

    /// Load from an explicit config file path (extension optional) and,
    /// when given, an environment map used instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or a value is invalid.
    pub fn from_sources(
        file: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("base_url", defaults.base_url)?
            .set_default("time_sync_interval_secs", defaults.time_sync_interval_secs)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs)?
            .set_default("drafts_db_url", defaults.drafts_db_url)?
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an unusable URL or zero durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url cannot be empty".into()));
        }
        Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("base_url: {err}")))?;
        if self.time_sync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "time_sync_interval_secs must be positive".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.drafts_db_url.trim().is_empty() {
            return Err(ConfigError::Invalid("drafts_db_url cannot be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn time_sync_interval(&self) -> Duration {
        Duration::from_secs(self.time_sync_interval_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Username and password, when both are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_file() -> &'static Path {
        Path::new("does-not-exist/labdesk")
    }

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = ClientConfig::from_sources(missing_file(), env(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.time_sync_interval(), Duration::from_secs(10));
        assert!(config.credentials().is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ClientConfig::from_sources(
            missing_file(),
            env(&[
                ("LABDESK__BASE_URL", "https://labs.example.org"),
                ("LABDESK__TIME_SYNC_INTERVAL_SECS", "30"),
                ("LABDESK__USERNAME", "student"),
                ("LABDESK__PASSWORD", "student123"),
            ]),
        )
        .unwrap();
        assert_eq!(config.base_url, "https://labs.example.org");
        assert_eq!(config.time_sync_interval_secs, 30);
        assert_eq!(config.credentials(), Some(("student", "student123")));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = ClientConfig::from_sources(
            missing_file(),
            env(&[("LABDESK__TIME_SYNC_INTERVAL_SECS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_url_is_rejected() {
        let config = ClientConfig {
            base_url: "not a url".into(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
