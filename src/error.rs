//! Error taxonomy for the catalog core.
//!
//! Every operation returns one of these descriptors instead of panicking.
//! Errors kept as UI state (store error flag, image error state) are `Clone`.

use thiserror::Error;

use crate::state::data::AnimeId;

/// Failure reported by a backend gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        GatewayError::Unavailable(err.to_string())
    }
}

/// List or get failed. The store keeps its previous data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not load catalog: {0}")]
pub struct LoadError(#[from] pub GatewayError);

/// Create, update or delete failed, or never reached the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("mutation failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("score {score} is outside the 0..={max} scale")]
    ScoreOutOfRange { score: u8, max: u8 },

    #[error("a change to {0} is already in flight")]
    AlreadyPending(AnimeId),

    #[error("window is closed")]
    WindowClosed,
}

/// Image fetch or decode failed. Only affects the image slot, never entity data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageFetchError {
    #[error("image request failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("unsupported link: {0}")]
    UnsupportedLink(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("could not decode image: {0}")]
    Decode(String),
}

/// The import document is not a sequence of entity-shaped records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportFormatError {
    #[error("document is not valid JSON: {0}")]
    Syntax(String),

    #[error("document must be an array of records")]
    NotAnArray,

    #[error("record {index} is malformed: {message}")]
    Record { index: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error(transparent)]
    Format(#[from] ImportFormatError),

    #[error("window is closed")]
    WindowClosed,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("could not encode export document: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config value out of range: {0}")]
    OutOfRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_mentions_cause() {
        let err = LoadError(GatewayError::Unavailable("socket closed".into()));
        assert!(err.to_string().contains("socket closed"));
    }

    #[test]
    fn test_mutation_error_from_gateway() {
        let err: MutationError = GatewayError::NotFound("7".into()).into();
        assert_eq!(err, MutationError::Gateway(GatewayError::NotFound("7".into())));
    }
}
