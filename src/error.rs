use crate::config::ConfigError;
use crate::weather_data::error::RefreshError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TiempoError {
    /// No snapshot was ever produced and the refresh just attempted failed.
    #[error("No weather data available")]
    NoData(#[source] Arc<RefreshError>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
}
