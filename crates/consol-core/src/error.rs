use thiserror::Error;

use crate::types::{Period, RateType};

#[derive(Debug, Error)]
pub enum ConsolError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Missing {rate_type} rate for {pair} in {period} (direct and inverse pair unavailable)")]
    MissingRate {
        pair: String,
        rate_type: RateType,
        period: Period,
    },

    #[error("Intersection store failure at {pov}: {reason}")]
    Store { pov: String, reason: String },

    #[error("Malformed POV token '{token}': {reason}")]
    PovParse { token: String, reason: String },

    #[error("Error threshold exceeded: {count} errors during bulk processing (limit {limit})")]
    ErrorThreshold { count: usize, limit: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ConsolError {
    fn from(e: serde_json::Error) -> Self {
        ConsolError::SerializationError(e.to_string())
    }
}
