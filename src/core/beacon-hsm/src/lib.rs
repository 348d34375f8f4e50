//! # Beacon HSM
//!
//! Session manager for Hardware Security Modules reached through PKCS#11.
//!
//! Each operation is one complete lifecycle: load the module, open a session
//! on a slot, log in with the PIN, resolve a key by label, perform a single
//! cryptographic call, then log out and release the module. Resources are
//! released on every exit path.
//!
//! ## Operations
//!
//! - RSA keypair generation (`<label>` / `<label>-public`)
//! - SHA-512 / PKCS#1 v1.5 signing, with an optional self-check
//! - Signature verification
//! - Random bytes from the module RNG
//! - Public key export as PEM
//! - Listing private key labels

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod module;
pub mod pkcs11;
pub mod session;
#[cfg(any(test, feature = "soft-token"))]
pub mod soft;

pub use client::{default_pem_path, HsmClient, DEFAULT_RANDOM_LENGTH};
pub use error::HsmError;
pub use module::{KeyPairSpec, Module, ModuleConfig, ModuleLoader, Session};
pub use pkcs11::{Pkcs11Loader, Pkcs11Module, Pkcs11Session};
pub use session::{ActiveSession, SessionGuard, Stage};

pub use beacon_crypto::{KeyClass, KeyLabel, Pin, Signature};
