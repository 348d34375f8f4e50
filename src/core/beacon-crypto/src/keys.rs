//! Key references and authentication material.
//!
//! Keys inside the module are looked up by label. A keypair generated under
//! `label` stores its private half as `label` and its public half as
//! `label-public`.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Suffix appended to a keypair label to name its public half.
pub const PUBLIC_LABEL_SUFFIX: &str = "-public";

/// Which half of a keypair a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// The private (signing) key.
    Private,
    /// The public (verification) key.
    Public,
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyClass::Private => f.write_str("private"),
            KeyClass::Public => f.write_str("public"),
        }
    }
}

/// A validated, non-empty key label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyLabel(String);

impl KeyLabel {
    /// Creates a key label.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidInput`] if the label is empty or only
    /// whitespace.
    pub fn new(label: impl Into<String>) -> Result<Self, CryptoError> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(CryptoError::InvalidInput("key label cannot be empty".into()));
        }
        Ok(Self(label))
    }

    /// The label as given.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this label already names a public key.
    pub fn is_public(&self) -> bool {
        self.0.ends_with(PUBLIC_LABEL_SUFFIX)
    }

    /// Label of the public half of this keypair.
    ///
    /// Idempotent: a label that already ends in `-public` is returned as is.
    pub fn public(&self) -> KeyLabel {
        if self.is_public() {
            self.clone()
        } else {
            KeyLabel(format!("{}{}", self.0, PUBLIC_LABEL_SUFFIX))
        }
    }
}

impl fmt::Display for KeyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A module PIN, erased from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pin {
    value: String,
}

impl Pin {
    /// Wraps a PIN value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Returns the PIN as a string slice.
    ///
    /// Use with caution - copies of the returned slice are not zeroized.
    #[inline]
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Whether the PIN is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pin").field("value", &"[REDACTED]").finish()
    }
}
