use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

use crate::services::orchestrator::OrchestratorSettings;
use crate::services::poller::PollConfig;

/// Errors raised while loading [`AppConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Base URL of the remote processing service (e.g., "https://restyle.example.com/api").
    #[garde(length(min = 1))]
    pub service_url: String,

    /// Delay between status checks while the room is being emptied.
    #[serde(default = "default_first_stage_interval_ms")]
    #[garde(skip)]
    pub first_stage_poll_interval_ms: u64,

    /// Maximum status checks before the first stage times out.
    #[serde(default = "default_first_stage_max_attempts")]
    #[garde(skip)]
    pub first_stage_max_attempts: u32,

    /// Delay between status checks while a style is being applied.
    #[serde(default = "default_second_stage_interval_ms")]
    #[garde(skip)]
    pub second_stage_poll_interval_ms: u64,

    /// Maximum status checks before the second stage times out.
    #[serde(default = "default_second_stage_max_attempts")]
    #[garde(skip)]
    pub second_stage_max_attempts: u32,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    #[garde(skip)]
    pub request_timeout_secs: u64,

    /// Synthetic progress added for each intermediate status.
    #[serde(default = "default_progress_step")]
    #[garde(custom(is_progress_step))]
    pub progress_step: f32,

    /// Synthetic progress never passes this value before a stage succeeds.
    #[serde(default = "default_progress_ceiling")]
    #[garde(custom(is_progress_ceiling))]
    pub progress_ceiling: f32,

    /// PostgreSQL connection string. Results are kept in memory when unset.
    #[garde(skip)]
    pub database_url: Option<String>,

    /// Prometheus exporter listen address (e.g., "0.0.0.0:9000").
    #[garde(skip)]
    pub metrics_addr: Option<String>,
}

fn default_first_stage_interval_ms() -> u64 {
    3000
}

fn default_first_stage_max_attempts() -> u32 {
    40
}

fn default_second_stage_interval_ms() -> u64 {
    2000
}

fn default_second_stage_max_attempts() -> u32 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_progress_step() -> f32 {
    0.05
}

fn default_progress_ceiling() -> f32 {
    0.9
}

/// A step must be positive and no larger than a whole stage.
fn is_progress_step(value: &f32, _ctx: &()) -> garde::Result {
    if *value > 0.0 && *value <= 1.0 {
        Ok(())
    } else {
        Err(garde::Error::new("progress step must be in (0, 1]"))
    }
}

/// The ceiling must stay below 1.0, which is reserved for stage success.
fn is_progress_ceiling(value: &f32, _ctx: &()) -> garde::Result {
    if (0.0..1.0).contains(value) {
        Ok(())
    } else {
        Err(garde::Error::new("progress ceiling must be in [0, 1)"))
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Deserialize from `(NAME, value)` pairs and validate the result.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Orchestrator timing and progress settings derived from this config.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            first_stage: PollConfig {
                interval: Duration::from_millis(self.first_stage_poll_interval_ms),
                max_attempts: self.first_stage_max_attempts,
            },
            second_stage: PollConfig {
                interval: Duration::from_millis(self.second_stage_poll_interval_ms),
                max_attempts: self.second_stage_max_attempts,
            },
            progress_step: self.progress_step,
            progress_ceiling: self.progress_ceiling,
        }
    }
}

/// Inputs for a single run of the `restyle` binary.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Path of the room photo to upload.
    pub image_path: String,

    /// Style applied once the room has been emptied.
    pub style_id: String,

    pub room_type: Option<String>,
}

impl RunConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_service_url_is_set() {
        let vars = vec![("SERVICE_URL".to_string(), "http://localhost:8080".to_string())];
        let config = AppConfig::from_vars(vars).unwrap();

        assert_eq!(config.service_url, "http://localhost:8080");
        assert_eq!(config.first_stage_max_attempts, 40);
        assert_eq!(config.second_stage_max_attempts, 30);
        assert!(config.database_url.is_none());

        let settings = config.orchestrator_settings();
        assert_eq!(settings.first_stage.interval, Duration::from_millis(3000));
        assert_eq!(settings.second_stage.interval, Duration::from_millis(2000));
    }

    #[test]
    fn overrides_are_read_from_environment_names() {
        let vars = vec![
            ("SERVICE_URL".to_string(), "http://svc".to_string()),
            ("SECOND_STAGE_POLL_INTERVAL_MS".to_string(), "500".to_string()),
            ("SECOND_STAGE_MAX_ATTEMPTS".to_string(), "4".to_string()),
            ("DATABASE_URL".to_string(), "postgres://localhost/restyle".to_string()),
        ];
        let config = AppConfig::from_vars(vars).unwrap();

        let settings = config.orchestrator_settings();
        assert_eq!(settings.second_stage.interval, Duration::from_millis(500));
        assert_eq!(settings.second_stage.max_attempts, 4);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/restyle"));
    }

    #[test]
    fn missing_service_url_is_an_error() {
        let vars: Vec<(String, String)> = Vec::new();
        assert!(matches!(AppConfig::from_vars(vars), Err(ConfigError::Env(_))));
    }

    fn with_progress(step: &str, ceiling: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_vars(vec![
            ("SERVICE_URL".to_string(), "http://svc".to_string()),
            ("PROGRESS_STEP".to_string(), step.to_string()),
            ("PROGRESS_CEILING".to_string(), ceiling.to_string()),
        ])
    }

    #[test]
    fn progress_settings_must_stay_below_completion() {
        assert!(matches!(with_progress("0.6", "1.8"), Err(ConfigError::Invalid(_))));
        assert!(matches!(with_progress("0.1", "1.0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(with_progress("0", "0.9"), Err(ConfigError::Invalid(_))));
        assert!(matches!(with_progress("-0.1", "0.9"), Err(ConfigError::Invalid(_))));
        assert!(matches!(with_progress("0.1", "-0.5"), Err(ConfigError::Invalid(_))));

        let config = with_progress("0.2", "0.95").unwrap();
        assert_eq!(config.orchestrator_settings().progress_ceiling, 0.95);
    }

    #[test]
    fn empty_service_url_is_invalid() {
        let vars = vec![("SERVICE_URL".to_string(), String::new())];
        assert!(matches!(AppConfig::from_vars(vars), Err(ConfigError::Invalid(_))));
    }
}
