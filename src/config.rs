//! Configuration management for Helion
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. The config file location can be overridden
//! with the `HELION_CONFIG` environment variable.

use crate::error::{HelionError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

mod defaults;

const REDACTED: &str = "***";

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct Config {
    /// Default IANA timezone for systems that do not set their own
    pub timezone: String,

    /// Telemetry database location
    pub database: DatabaseConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Poller loop and backfill pacing
    pub poller: PollerConfig,

    /// Dawn/dusk-aware schedule for Enphase systems
    pub schedule: ScheduleConfig,

    /// Enphase Enlighten v4 API application credentials
    pub enphase: EnphaseConfig,

    /// Selectronic Select.Live account
    pub selectronic: SelectronicConfig,

    /// Monitored systems
    pub systems: Vec<SystemConfig>,
}

/// Telemetry vendor of a system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Enphase,
    Selectronic,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enphase => "enphase",
            Self::Selectronic => "selectronic",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "enphase" => Some(Self::Enphase),
            "selectronic" | "selectlive" | "select.live" => Some(Self::Selectronic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitored solar/battery installation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
pub struct SystemConfig {
    /// Local identifier used in the API and database
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Vendor API used to fetch telemetry
    pub vendor: Vendor,

    /// Vendor-side system id (Enphase system_id, Select.Live device id)
    pub site_id: String,

    /// Latitude in decimal degrees (north positive)
    pub latitude: f64,

    /// Longitude in decimal degrees (east positive)
    pub longitude: f64,

    /// Timezone override; falls back to the global timezone
    #[serde(default)]
    pub timezone: Option<String>,

    /// Whether the poller should visit this system
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Enphase refresh token used only until the store holds credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite file
    pub path: String,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console level override
    pub console_level: Option<String>,

    /// Optional file level override
    pub file_level: Option<String>,

    /// Optional level for the web log stream
    pub web_level: Option<String>,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Poller loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct PollerConfig {
    /// How often every system's schedule is evaluated
    pub tick_seconds: u64,

    /// Timeout for a single vendor HTTP request
    pub request_timeout_seconds: u64,

    /// Walk history backwards one day at a time when idle
    pub backfill_enabled: bool,

    /// How far back history backfill goes
    pub backfill_max_days: u32,

    /// Minimum spacing between backfill requests for one system
    pub backfill_interval_seconds: u64,

    /// Pause after a 429 when the vendor sends no Retry-After
    pub rate_limit_cooldown_seconds: u64,

    /// First retry delay after a failed live poll; doubles per consecutive failure
    pub retry_backoff_seconds: u64,
}

/// Dawn/dusk-aware schedule parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes after civil dawn the active window opens
    pub dawn_offset_minutes: i64,

    /// Minutes after civil dusk the active window closes
    pub dusk_offset_minutes: i64,

    /// Poll cadence inside the active window; must divide a day
    pub active_interval_minutes: u32,

    /// First local hour of the previous-day correction window
    pub correction_start_hour: u32,

    /// Local hour the correction window ends (exclusive)
    pub correction_end_hour: u32,
}

/// Enphase Enlighten v4 application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct EnphaseConfig {
    /// API root, overridable for tests
    pub base_url: String,

    /// Application API key
    pub api_key: String,

    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// Refresh the access token this long before it expires
    pub token_refresh_margin_seconds: u64,
}

/// Selectronic Select.Live account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct SelectronicConfig {
    /// Portal root, overridable for tests
    pub base_url: String,

    /// Account email
    pub email: String,

    /// Account password
    pub password: String,

    /// Fixed poll interval
    pub poll_interval_seconds: u64,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `HELION_CONFIG` or the default locations
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("HELION_CONFIG")
            && !path.trim().is_empty()
        {
            return Self::from_file(path.trim());
        }

        let default_paths = [
            "helion.yaml",
            "/data/helion.yaml",
            "/etc/helion/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Look up a configured system
    pub fn system(&self, id: &str) -> Option<&SystemConfig> {
        self.systems.iter().find(|s| s.id == id)
    }

    /// Timezone that applies to a system
    pub fn system_timezone(&self, system: &SystemConfig) -> Result<Tz> {
        let name = system
            .timezone
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.timezone);
        parse_timezone(name)
    }

    /// Copy of the configuration safe to hand out over the API
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        mask(&mut cfg.enphase.api_key);
        mask(&mut cfg.enphase.client_secret);
        mask(&mut cfg.selectronic.password);
        for system in &mut cfg.systems {
            if system.refresh_token.is_some() {
                system.refresh_token = Some(REDACTED.to_string());
            }
        }
        cfg
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        parse_timezone(&self.timezone)?;

        if self.database.path.trim().is_empty() {
            return Err(HelionError::validation(
                "database.path",
                "Path cannot be empty",
            ));
        }

        if self.web.port == 0 {
            return Err(HelionError::validation(
                "web.port",
                "Port must be greater than 0",
            ));
        }

        crate::logging::parse_log_level(&self.logging.level)
            .map_err(|_| HelionError::validation("logging.level", "Unknown log level"))?;

        if self.poller.tick_seconds == 0 {
            return Err(HelionError::validation(
                "poller.tick_seconds",
                "Must be greater than 0",
            ));
        }

        for (name, value) in [
            (
                "poller.backfill_interval_seconds",
                self.poller.backfill_interval_seconds,
            ),
            (
                "poller.rate_limit_cooldown_seconds",
                self.poller.rate_limit_cooldown_seconds,
            ),
            ("poller.retry_backoff_seconds", self.poller.retry_backoff_seconds),
        ] {
            if value == 0 {
                return Err(HelionError::validation(name, "Must be greater than 0"));
            }
        }

        if self.poller.request_timeout_seconds == 0 {
            return Err(HelionError::validation(
                "poller.request_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        let interval = self.schedule.active_interval_minutes;
        if interval == 0 || 1440 % interval != 0 {
            return Err(HelionError::validation(
                "schedule.active_interval_minutes",
                "Must be a positive divisor of 1440",
            ));
        }

        if self.schedule.correction_start_hour >= self.schedule.correction_end_hour
            || self.schedule.correction_end_hour > 24
        {
            return Err(HelionError::validation(
                "schedule.correction_start_hour",
                "Correction window must satisfy start < end <= 24",
            ));
        }

        let mut seen = HashSet::new();
        for (idx, system) in self.systems.iter().enumerate() {
            let field = |name: &str| format!("systems[{}].{}", idx, name);

            if system.id.trim().is_empty() {
                return Err(HelionError::validation(field("id"), "Cannot be empty"));
            }
            if !seen.insert(system.id.as_str()) {
                return Err(HelionError::validation(
                    field("id"),
                    format!("Duplicate system id '{}'", system.id),
                ));
            }
            if system.site_id.trim().is_empty() {
                return Err(HelionError::validation(field("site_id"), "Cannot be empty"));
            }
            if !(-90.0..=90.0).contains(&system.latitude) {
                return Err(HelionError::validation(
                    field("latitude"),
                    "Must be within -90..=90",
                ));
            }
            if !(-180.0..=180.0).contains(&system.longitude) {
                return Err(HelionError::validation(
                    field("longitude"),
                    "Must be within -180..=180",
                ));
            }
            if let Some(tz) = system.timezone.as_deref()
                && !tz.trim().is_empty()
            {
                parse_timezone(tz).map_err(|_| {
                    HelionError::validation(field("timezone"), format!("Unknown timezone '{}'", tz))
                })?;
            }
        }

        let uses = |vendor: Vendor| self.systems.iter().any(|s| s.enabled && s.vendor == vendor);

        if uses(Vendor::Enphase) {
            if self.enphase.api_key.trim().is_empty() {
                return Err(HelionError::validation(
                    "enphase.api_key",
                    "Required when Enphase systems are configured",
                ));
            }
            if self.enphase.client_id.trim().is_empty()
                || self.enphase.client_secret.trim().is_empty()
            {
                return Err(HelionError::validation(
                    "enphase.client_id",
                    "OAuth client id and secret are required for Enphase systems",
                ));
            }
        }

        if uses(Vendor::Selectronic) {
            if self.selectronic.email.trim().is_empty() || self.selectronic.password.is_empty() {
                return Err(HelionError::validation(
                    "selectronic.email",
                    "Email and password are required for Select.Live systems",
                ));
            }
            if self.selectronic.poll_interval_seconds == 0 {
                return Err(HelionError::validation(
                    "selectronic.poll_interval_seconds",
                    "Must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| HelionError::validation("timezone", format!("Unknown timezone '{}'", name)))
}

fn mask(value: &mut String) {
    if !value.is_empty() {
        *value = REDACTED.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enphase_system() -> SystemConfig {
        SystemConfig {
            id: "roof".to_string(),
            name: "Roof".to_string(),
            vendor: Vendor::Enphase,
            site_id: "123456".to_string(),
            latitude: -37.81,
            longitude: 144.96,
            timezone: None,
            enabled: true,
            refresh_token: Some("seed".to_string()),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.web.port, 8090);
        assert_eq!(config.poller.tick_seconds, 60);
        assert_eq!(config.schedule.active_interval_minutes, 30);
        assert!(config.systems.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.systems.push(enphase_system());
        // Enphase system without application credentials
        assert!(config.validate().is_err());

        config.enphase.api_key = "key".into();
        config.enphase.client_id = "id".into();
        config.enphase.client_secret = "secret".into();
        assert!(config.validate().is_ok());

        config.systems[0].latitude = 91.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_must_divide_day() {
        let mut config = Config::default();
        config.schedule.active_interval_minutes = 7;
        assert!(config.validate().is_err());
        config.schedule.active_interval_minutes = 15;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = Config::default();
        config.enphase.client_secret = "very-secret".into();
        config.selectronic.password = "hunter2".into();
        config.systems.push(enphase_system());

        let red = config.redacted();
        assert_eq!(red.enphase.client_secret, "***");
        assert_eq!(red.selectronic.password, "***");
        assert_eq!(red.systems[0].refresh_token.as_deref(), Some("***"));
        // Empty secrets stay empty so the UI can tell them apart
        assert!(red.enphase.api_key.is_empty());
    }

    #[test]
    fn test_system_timezone_fallback() {
        let mut config = Config::default();
        config.timezone = "Australia/Sydney".into();
        let mut system = enphase_system();
        assert_eq!(
            config.system_timezone(&system).unwrap(),
            chrono_tz::Australia::Sydney
        );
        system.timezone = Some("Europe/London".into());
        assert_eq!(
            config.system_timezone(&system).unwrap(),
            chrono_tz::Europe::London
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.web.port, deserialized.web.port);
    }
}
