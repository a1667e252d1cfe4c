use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("no position fix available, enable location to navigate")]
    NoPosition,
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("navigation service is not running")]
    ServiceUnavailable,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}
