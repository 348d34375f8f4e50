//! HSM error types.

use std::path::PathBuf;

use beacon_crypto::{CryptoError, KeyClass};
use thiserror::Error;

/// Errors that can occur during an HSM operation.
///
/// Variants follow the session lifecycle: loading the module, authenticating,
/// resolving a key, then the operation itself.
#[derive(Debug, Error)]
pub enum HsmError {
    /// The module library could not be loaded or initialized.
    #[error("failed to load module {location}: {reason}")]
    ModuleLoad {
        /// Filesystem location of the module library.
        location: String,
        /// Underlying failure.
        reason: String,
    },

    /// No slot with a token at the requested index.
    #[error("no token at slot index {index} ({available} slots with a token)")]
    SlotNotFound {
        /// Requested slot index.
        index: usize,
        /// Number of slots that hold a token.
        available: usize,
    },

    /// The PIN was rejected or the session is not logged in.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// No key object carries the label.
    #[error("{class} key not found: {label}")]
    KeyNotFound {
        /// Label that was looked up.
        label: String,
        /// Key class that was looked up.
        class: KeyClass,
    },

    /// Searching for a key failed inside the module.
    #[error("key lookup failed for {label}: {reason}")]
    KeyLookup {
        /// Label that was looked up.
        label: String,
        /// Underlying failure.
        reason: String,
    },

    /// Keypair generation failed.
    #[error("key generation failed for {label}: {reason}")]
    KeyGeneration {
        /// Label of the keypair.
        label: String,
        /// Underlying failure.
        reason: String,
    },

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Verification could not be carried out, or a signature self-check was
    /// rejected.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Input could not be decoded (for example malformed hex).
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// The module random number generator failed.
    #[error("random generation failed: {0}")]
    Rng(String),

    /// Public key material could not be read or encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Writing an exported artifact failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An argument was rejected before contacting the module.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl HsmError {
    /// Whether the error comes from caller input rather than from the module.
    pub fn is_input_error(&self) -> bool {
        matches!(self, HsmError::Decoding(_) | HsmError::InvalidArgument(_))
    }
}

impl From<CryptoError> for HsmError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidHex(msg) => HsmError::Decoding(msg),
            CryptoError::InvalidInput(msg) => HsmError::InvalidArgument(msg),
            CryptoError::InvalidKey(msg) | CryptoError::EncodingFailed(msg) => {
                HsmError::Serialization(msg)
            },
        }
    }
}
