//! # Beacon Crypto
//!
//! Encoding helpers and key conventions shared by the Beacon HSM crates.
//!
//! Nothing in this crate talks to a module. It covers:
//! - Hex encoding of signatures and random output
//! - PEM (SubjectPublicKeyInfo) encoding of RSA public keys
//! - PIN handling with automatic zeroization
//! - The `<label>` / `<label>-public` key label convention

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod encoding;
pub mod error;
pub mod keys;
pub mod pem;

pub use encoding::{decode_hex, encode_hex, Signature};
pub use error::CryptoError;
pub use keys::{KeyClass, KeyLabel, Pin, PUBLIC_LABEL_SUFFIX};
pub use pem::RsaPublicComponents;
