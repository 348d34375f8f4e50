//! Hexadecimal encoding for signatures and random output.
//!
//! Every binary value that crosses the command line (signatures in, signatures
//! and random bytes out) is exchanged as a hex string.

use std::fmt;

use crate::error::CryptoError;

/// Encodes bytes as lowercase hexadecimal.
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hexadecimal string.
///
/// Surrounding whitespace is ignored. Both cases are accepted.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidHex`] on odd length or non-hex characters.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(input.trim()).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Raw signature bytes as produced by the module.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Wraps raw signature bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decodes a signature from its hex form.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHex`] if the input is not hex or decodes
    /// to nothing.
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let bytes = decode_hex(input)?;
        if bytes.is_empty() {
            return Err(CryptoError::InvalidHex("empty signature".into()));
        }
        Ok(Self(bytes))
    }

    /// Encodes the signature as lowercase hex.
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    /// Returns the raw signature bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the signature, returning the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length of the signature in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the signature holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Signature {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.to_hex()).finish()
    }
}
