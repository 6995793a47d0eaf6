use thiserror::Error;

use crate::config::ConfigError;
use crate::stackup::StackupError;
use crate::straps::abutment::AbutmentError;
use crate::straps::by_tracks::OrderingError;

pub type Result<T> = std::result::Result<T, Error>;

/// The top-level error type for PDN strap generation.
///
/// Only fatal conditions surface here. Non-fatal placement and density
/// findings are collected as [`Diagnostic`](crate::straps::Diagnostic)s
/// on the run result instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("layer ordering error: {0}")]
    Ordering(#[from] OrderingError),

    #[error("abutment error: {0}")]
    Abutment(#[from] AbutmentError),

    #[error("stackup error: {0}")]
    Stackup(#[from] StackupError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error serializing JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("error parsing TOML: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
