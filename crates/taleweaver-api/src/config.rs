//! Server configuration.
//!
//! Settings come from an optional YAML file named by `TALEWEAVER_CONFIG`,
//! then individual environment variables override single fields. Every
//! field has a default, so an empty environment starts a working server.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taleweaver_orchestration::application::coordinator::CoordinatorConfig;
use taleweaver_orchestration::application::settings::{EngineSettings, SessionPolicy};
use taleweaver_orchestration::domain::detector::DetectorConfig;

use crate::error::AppError;

/// Environment variable naming the YAML configuration file.
pub const CONFIG_PATH_VAR: &str = "TALEWEAVER_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
        }
    }
}

/// Where agent calls go. Without a URL the server answers with canned
/// replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: taleweaver_event_bus::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub ttl_secs: u64,
    /// How often the sweeper looks for expired sessions.
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: SessionPolicy::default().ttl_secs,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Idle seconds before an event stream sends a heartbeat.
    pub heartbeat_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { heartbeat_secs: 30 }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub coordinator: CoordinatorConfig,
    pub detector: DetectorConfig,
    pub bus: BusConfig,
    pub sessions: SessionsConfig,
    pub events: EventsConfig,
}

impl EngineConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// `AppError::Config` if the file cannot be read or parsed, or an
    /// override does not parse.
    pub fn load() -> Result<Self, AppError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads a YAML configuration file.
    ///
    /// # Errors
    ///
    /// `AppError::Config` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Parses a YAML document. Missing sections and fields keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// `AppError::Config` on malformed YAML or mistyped fields.
    pub fn from_yaml(text: &str) -> Result<Self, AppError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| AppError::Config(format!("invalid config: {e}")))
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// `DECISION_TIMEOUT_SECS=0` disables decision expiry.
    ///
    /// # Errors
    ///
    /// `AppError::Config` naming the variable that failed to parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "PORT")? {
            self.server.port = port;
        }
        if let Some(url) = lookup("GENERATION_URL").filter(|url| !url.trim().is_empty()) {
            self.generation.url = Some(url);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "AGENT_TIMEOUT_SECS")? {
            self.coordinator.call_timeout_ms = secs.saturating_mul(1_000);
        }
        if let Some(retries) = parse_var(&lookup, "AGENT_MAX_RETRIES")? {
            self.coordinator.max_retries = retries;
        }
        if let Some(threshold) = parse_var::<f64, _>(&lookup, "TENSION_THRESHOLD")? {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AppError::Config(format!(
                    "TENSION_THRESHOLD must be within 0..=1, got {threshold}"
                )));
            }
            self.detector.tension_threshold = threshold;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "DECISION_TIMEOUT_SECS")? {
            self.detector.decision_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(secs) = parse_var(&lookup, "HEARTBEAT_SECS")? {
            self.events.heartbeat_secs = secs;
        }
        Ok(())
    }

    /// The orchestrator's share of the configuration.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            coordinator: self.coordinator.clone(),
            detector: self.detector.clone(),
            sessions: SessionPolicy {
                ttl_secs: self.sessions.ttl_secs,
            },
        }
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.events.heartbeat_secs.max(1))
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs.max(1))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| AppError::Config(format!("{key} is invalid: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config = EngineConfig::from_yaml("").unwrap();

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.bus.capacity, 256);
        assert_eq!(config.events.heartbeat_secs, 30);
    }

    #[test]
    fn test_yaml_sections_override_defaults() {
        // Arrange
        let yaml = r"
server:
  port: 8080
coordinator:
  persona_quorum: 2
detector:
  tension_threshold: 0.5
sessions:
  ttl_secs: 120
";

        // Act
        let config = EngineConfig::from_yaml(yaml).unwrap();

        // Assert
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.coordinator.persona_quorum, 2);
        assert_eq!(config.coordinator.max_retries, 2);
        assert!((config.detector.tension_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.engine_settings().sessions.ttl_secs, 120);
    }

    #[test]
    fn test_malformed_yaml_is_a_config_error() {
        let result = EngineConfig::from_yaml("server: [unclosed");

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_environment_overrides_apply() {
        // Arrange
        let mut config = EngineConfig::default();
        let lookup = env(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("GENERATION_URL", "http://localhost:8081/generate"),
            ("AGENT_TIMEOUT_SECS", "5"),
            ("AGENT_MAX_RETRIES", "4"),
            ("TENSION_THRESHOLD", "0.6"),
            ("DECISION_TIMEOUT_SECS", "0"),
            ("HEARTBEAT_SECS", "10"),
        ]);

        // Act
        config.apply_overrides(lookup).unwrap();

        // Assert
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.generation.url.as_deref(),
            Some("http://localhost:8081/generate")
        );
        assert_eq!(config.coordinator.call_timeout_ms, 5_000);
        assert_eq!(config.coordinator.max_retries, 4);
        assert!((config.detector.tension_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.detector.decision_timeout_secs, None);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_unparseable_override_names_the_variable() {
        let mut config = EngineConfig::default();

        let err = config
            .apply_overrides(env(&[("PORT", "eighty")]))
            .unwrap_err();

        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_tension_threshold_out_of_range_is_rejected() {
        let mut config = EngineConfig::default();

        let result = config.apply_overrides(env(&[("TENSION_THRESHOLD", "1.5")]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
