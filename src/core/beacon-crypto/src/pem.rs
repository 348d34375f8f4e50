//! PEM encoding of RSA public keys read out of the module.
//!
//! The module hands back the raw `CKA_MODULUS` and `CKA_PUBLIC_EXPONENT`
//! attributes (big-endian integers). They are wrapped into a
//! SubjectPublicKeyInfo structure and armored as `PUBLIC KEY`.

use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};

use crate::error::CryptoError;

/// Largest modulus accepted for export, in bits.
pub const MAX_MODULUS_BITS: usize = 16384;

/// Public components of an RSA key as stored by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicComponents {
    /// Big-endian modulus `n`.
    pub modulus: Vec<u8>,
    /// Big-endian public exponent `e`.
    pub public_exponent: Vec<u8>,
}

impl RsaPublicComponents {
    /// Size of the modulus in bits, ignoring leading zero bytes.
    pub fn modulus_bits(&self) -> usize {
        BigUint::from_bytes_be(&self.modulus).bits()
    }

    /// Length in bytes of a signature made with this key.
    pub fn signature_len(&self) -> usize {
        (self.modulus_bits() + 7) / 8
    }

    /// Builds an [`RsaPublicKey`] from the components.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the modulus or exponent is out
    /// of range.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, CryptoError> {
        if self.modulus.is_empty() || self.public_exponent.is_empty() {
            return Err(CryptoError::InvalidKey("missing modulus or exponent".into()));
        }

        RsaPublicKey::new_with_max_size(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.public_exponent),
            MAX_MODULUS_BITS,
        )
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Encodes the key as a PEM `PUBLIC KEY` document with LF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] for unusable components and
    /// [`CryptoError::EncodingFailed`] if DER serialization fails.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.to_rsa_public_key()?
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::EncodingFailed(e.to_string()))
    }
}

impl From<&RsaPublicKey> for RsaPublicComponents {
    fn from(key: &RsaPublicKey) -> Self {
        Self {
            modulus: key.n().to_bytes_be(),
            public_exponent: key.e().to_bytes_be(),
        }
    }
}
