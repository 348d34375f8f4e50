//! Encoding error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Input is not valid hexadecimal.
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    /// Invalid key components.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serializing key material failed.
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
}
