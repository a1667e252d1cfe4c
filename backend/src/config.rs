//! Tunable constants for the navigation session and the routing client.
//!
//! Every threshold defaults to the value the map page has always used. They
//! are kept overridable because none of them were derived from measurements.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize)]
pub struct NavConfig {
    /// Distance to destination under which the session counts as arrived.
    #[serde(default = "default_arrival_radius")]
    pub arrival_radius_m: f64,

    /// Distance to a maneuver point under which guidance moves on.
    #[serde(default = "default_maneuver_radius")]
    pub maneuver_radius_m: f64,

    /// Assumed pace for estimated routes.
    #[serde(default = "default_fallback_seconds_per_km")]
    pub fallback_seconds_per_km: f64,

    /// Inactivity window before an active session expires.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Period of the timer that advances guidance without GPS progress.
    #[serde(default = "default_advance_interval")]
    pub advance_interval_secs: u64,

    /// How often the driver checks for expiry.
    #[serde(default = "default_timeout_check_interval")]
    pub timeout_check_interval_secs: u64,

    /// Freshness window of the last-known-position cache.
    #[serde(default = "default_location_cache_ttl")]
    pub location_cache_ttl_secs: u64,

    #[serde(default = "default_destination_zoom")]
    pub destination_zoom: f64,

    #[serde(default = "default_follow_zoom")]
    pub follow_zoom: f64,

    #[serde(default = "default_fly_duration")]
    pub fly_duration_secs: f64,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            arrival_radius_m: default_arrival_radius(),
            maneuver_radius_m: default_maneuver_radius(),
            fallback_seconds_per_km: default_fallback_seconds_per_km(),
            session_timeout_secs: default_session_timeout(),
            advance_interval_secs: default_advance_interval(),
            timeout_check_interval_secs: default_timeout_check_interval(),
            location_cache_ttl_secs: default_location_cache_ttl(),
            destination_zoom: default_destination_zoom(),
            follow_zoom: default_follow_zoom(),
            fly_duration_secs: default_fly_duration(),
        }
    }
}

impl NavConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: NavConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.arrival_radius_m > 0.0) || !(self.maneuver_radius_m > 0.0) {
            return Err(ConfigError::Invalid(
                "arrival and maneuver radii must be positive".into(),
            ));
        }
        if !(self.fallback_seconds_per_km > 0.0) {
            return Err(ConfigError::Invalid(
                "fallback_seconds_per_km must be positive".into(),
            ));
        }
        if self.session_timeout_secs == 0
            || self.advance_interval_secs == 0
            || self.timeout_check_interval_secs == 0
        {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_timeout_secs as i64)
    }

    pub fn location_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.location_cache_ttl_secs as i64)
    }

    pub fn advance_interval(&self) -> Duration {
        Duration::from_secs(self.advance_interval_secs)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_check_interval_secs)
    }
}

/// Settings for the OSRM client.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_osrm_url")]
    pub base_url: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_osrm_url(),
            profile: default_profile(),
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_arrival_radius() -> f64 {
    50.0
}
fn default_maneuver_radius() -> f64 {
    20.0
}
fn default_fallback_seconds_per_km() -> f64 {
    90.0
}
fn default_session_timeout() -> u64 {
    5 * 60
}
fn default_advance_interval() -> u64 {
    30
}
fn default_timeout_check_interval() -> u64 {
    5
}
fn default_location_cache_ttl() -> u64 {
    24 * 60 * 60
}
fn default_destination_zoom() -> f64 {
    15.0
}
fn default_follow_zoom() -> f64 {
    17.0
}
fn default_fly_duration() -> f64 {
    1.5
}
fn default_osrm_url() -> String {
    "https://router.project-osrm.org".to_string()
}
fn default_profile() -> String {
    "driving".to_string()
}
fn default_request_timeout() -> u64 {
    8_000
}
fn default_max_retries() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_map_page_constants() {
        let config = NavConfig::default();
        assert_eq!(config.arrival_radius_m, 50.0);
        assert_eq!(config.maneuver_radius_m, 20.0);
        assert_eq!(config.fallback_seconds_per_km, 90.0);
        assert_eq!(config.session_timeout(), chrono::Duration::minutes(5));
        assert_eq!(config.advance_interval(), Duration::from_secs(30));
        assert_eq!(config.location_cache_ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: NavConfig = serde_json::from_str(r#"{"arrival_radius_m": 30.0}"#).unwrap();
        assert_eq!(config.arrival_radius_m, 30.0);
        assert_eq!(config.maneuver_radius_m, 20.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_intervals() {
        let config = NavConfig {
            advance_interval_secs: 0,
            ..NavConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_path_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nav.json");
        fs::write(&path, r#"{"session_timeout_secs": 120}"#).unwrap();
        let config = NavConfig::from_path(&path).unwrap();
        assert_eq!(config.session_timeout(), chrono::Duration::minutes(2));
    }
}
