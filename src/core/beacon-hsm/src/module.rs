//! Module and session traits.
//!
//! A [`ModuleLoader`] turns a filesystem location into a loaded [`Module`].
//! A module opens [`Session`]s on a slot. All key and cryptographic calls go
//! through a session that has been logged in.

use std::fmt::Debug;

use beacon_crypto::{KeyClass, KeyLabel, Pin, RsaPublicComponents};

use crate::error::HsmError;

/// Default RSA modulus size for generated keypairs.
pub const DEFAULT_MODULUS_BITS: u32 = 2048;

/// Default RSA public exponent (F4).
pub const DEFAULT_PUBLIC_EXPONENT: u32 = 65537;

/// Smallest modulus accepted for keypair generation.
pub const MIN_MODULUS_BITS: u32 = 1024;

/// Largest modulus accepted for keypair generation.
pub const MAX_MODULUS_BITS: u32 = 16384;

/// Loads a module library from a location.
pub trait ModuleLoader {
    /// The loaded module type.
    type Module: Module;

    /// Loads and initializes the module at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`HsmError::ModuleLoad`] if the location is unusable.
    fn load(&self, location: &str) -> Result<Self::Module, HsmError>;
}

/// A loaded module. Dropping it releases the library.
pub trait Module {
    /// Session type opened by this module.
    type Session: Session;

    /// Opens a read-write session on the `slot_index`-th slot holding a token.
    ///
    /// # Errors
    ///
    /// Returns [`HsmError::SlotNotFound`] if there is no such slot.
    fn open_session(&self, slot_index: usize) -> Result<Self::Session, HsmError>;
}

/// An open session on a module slot. Dropping it closes the session.
pub trait Session {
    /// Opaque reference to an object inside the token.
    type Handle: Copy + Debug;

    /// Logs the normal user in.
    fn login(&mut self, pin: &Pin) -> Result<(), HsmError>;

    /// Logs the user out.
    fn logout(&mut self) -> Result<(), HsmError>;

    /// Finds the first key object of `class` carrying `label`.
    fn find_key(&self, label: &KeyLabel, class: KeyClass)
        -> Result<Option<Self::Handle>, HsmError>;

    /// Generates an RSA keypair. The private key is stored under `label`, the
    /// public key under `label.public()`.
    fn generate_key_pair(&self, label: &KeyLabel, spec: &KeyPairSpec) -> Result<(), HsmError>;

    /// Signs `message` with SHA-512 and PKCS#1 v1.5 padding.
    fn sign(&self, key: Self::Handle, message: &[u8]) -> Result<Vec<u8>, HsmError>;

    /// Verifies a SHA-512 / PKCS#1 v1.5 signature.
    ///
    /// Returns `Ok(false)` when the signature does not match.
    fn verify(&self, key: Self::Handle, message: &[u8], signature: &[u8])
        -> Result<bool, HsmError>;

    /// Draws `len` bytes from the token random number generator.
    fn generate_random(&self, len: usize) -> Result<Vec<u8>, HsmError>;

    /// Reads the modulus and public exponent of a public key object.
    fn public_components(&self, key: Self::Handle) -> Result<RsaPublicComponents, HsmError>;

    /// Labels of every private key object visible to the session.
    fn private_key_labels(&self) -> Result<Vec<String>, HsmError>;
}

/// Where the module lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    /// Filesystem location of the PKCS#11 library.
    pub location: String,
    /// User PIN for the partition.
    pub pin: Pin,
    /// Index among the slots holding a token.
    pub slot: usize,
}

impl ModuleConfig {
    /// Creates a configuration for the first slot holding a token.
    pub fn new(location: impl Into<String>, pin: Pin) -> Self {
        Self {
            location: location.into(),
            pin,
            slot: 0,
        }
    }

    /// Selects a different slot index.
    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = slot;
        self
    }
}

/// Parameters for RSA keypair generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPairSpec {
    /// Modulus size in bits.
    pub modulus_bits: u32,
    /// Public exponent.
    pub public_exponent: u32,
}

impl Default for KeyPairSpec {
    fn default() -> Self {
        Self {
            modulus_bits: DEFAULT_MODULUS_BITS,
            public_exponent: DEFAULT_PUBLIC_EXPONENT,
        }
    }
}

impl KeyPairSpec {
    /// Creates a spec with the default exponent.
    pub fn rsa(modulus_bits: u32) -> Self {
        Self {
            modulus_bits,
            ..Self::default()
        }
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), HsmError> {
        if !(MIN_MODULUS_BITS..=MAX_MODULUS_BITS).contains(&self.modulus_bits) {
            return Err(HsmError::InvalidArgument(format!(
                "modulus must be between {} and {} bits, got {}",
                MIN_MODULUS_BITS, MAX_MODULUS_BITS, self.modulus_bits
            )));
        }
        if self.modulus_bits % 8 != 0 {
            return Err(HsmError::InvalidArgument(format!(
                "modulus bits must be a multiple of 8, got {}",
                self.modulus_bits
            )));
        }
        if self.public_exponent < 3 || self.public_exponent % 2 == 0 {
            return Err(HsmError::InvalidArgument(format!(
                "public exponent must be odd and >= 3, got {}",
                self.public_exponent
            )));
        }
        Ok(())
    }

    /// Public exponent as a minimal big-endian byte string.
    pub fn public_exponent_bytes(&self) -> Vec<u8> {
        let bytes = self.public_exponent.to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        bytes[start..].to_vec()
    }
}
