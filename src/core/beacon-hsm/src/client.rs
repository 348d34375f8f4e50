//! HSM session manager.
//!
//! [`HsmClient`] runs each operation as one complete lifecycle against the
//! module: load, open and log in, resolve the key, perform a single
//! cryptographic call, then release everything. Sessions are never reused
//! between operations.

use std::fs;
use std::path::{Path, PathBuf};

use beacon_crypto::{KeyClass, KeyLabel, Signature};
use tracing::{debug, info, warn};

use crate::error::HsmError;
use crate::module::{KeyPairSpec, Module, ModuleConfig, ModuleLoader, Session};
use crate::pkcs11::Pkcs11Loader;
use crate::session::{ActiveSession, SessionGuard, Stage};

/// Default number of random bytes (512 bits).
pub const DEFAULT_RANDOM_LENGTH: usize = 64;

type SessionOf<L> = <<L as ModuleLoader>::Module as Module>::Session;

/// Entry point for the five HSM operations.
pub struct HsmClient<L: ModuleLoader = Pkcs11Loader> {
    loader: L,
    config: ModuleConfig,
}

impl HsmClient<Pkcs11Loader> {
    /// Creates a client that loads PKCS#11 libraries from disk.
    pub fn new(config: ModuleConfig) -> Self {
        Self::with_loader(Pkcs11Loader, config)
    }
}

impl<L: ModuleLoader> HsmClient<L> {
    /// Creates a client using a custom module loader.
    pub fn with_loader(loader: L, config: ModuleConfig) -> Self {
        Self { loader, config }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Generates an RSA keypair labelled `label` (private) and
    /// `label-public` (public).
    ///
    /// # Errors
    ///
    /// Fails with [`HsmError::KeyGeneration`] if either label is already in
    /// use or the module rejects the request.
    pub fn generate_key_pair(&self, label: &str, spec: &KeyPairSpec) -> Result<(), HsmError> {
        let label = KeyLabel::new(label)?;
        if label.is_public() {
            return Err(HsmError::InvalidArgument(format!(
                "keypair label {} must not carry the public suffix",
                label
            )));
        }
        spec.validate()?;

        self.run("keygen", |active| {
            let session = active.session();
            for (candidate, class) in [
                (label.clone(), KeyClass::Private),
                (label.public(), KeyClass::Public),
            ] {
                if session.find_key(&candidate, class)?.is_some() {
                    return Err(HsmError::KeyGeneration {
                        label: label.to_string(),
                        reason: format!("a {} key labelled {} already exists", class, candidate),
                    });
                }
            }

            session.generate_key_pair(&label, spec)?;
            active.complete();
            info!(
                label = %label,
                public_label = %label.public(),
                bits = spec.modulus_bits,
                "keypair generated"
            );
            Ok(())
        })
    }

    /// Signs `message` with the private key `label` (SHA-512, PKCS#1 v1.5).
    pub fn sign(&self, label: &str, message: &[u8]) -> Result<Signature, HsmError> {
        let label = KeyLabel::new(label)?;

        self.run("sign", |active| {
            let key = active.resolve(&label, KeyClass::Private)?;
            let signature = active.session().sign(key, message)?;
            active.complete();
            Ok(Signature::new(signature))
        })
    }

    /// Signs `message`, then verifies the signature in a separate session.
    ///
    /// The check uses `check_label` when given, otherwise the public half of
    /// `label`.
    ///
    /// # Errors
    ///
    /// Fails with [`HsmError::Verification`] if the check rejects the
    /// signature.
    pub fn sign_checked(
        &self,
        label: &str,
        message: &[u8],
        check_label: Option<&str>,
    ) -> Result<Signature, HsmError> {
        let check = match check_label {
            Some(check) => KeyLabel::new(check)?,
            None => KeyLabel::new(label)?.public(),
        };

        let signature = self.sign(label, message)?;
        if !self.verify(check.as_str(), &signature, message)? {
            return Err(HsmError::Verification(format!(
                "self-check against {} rejected the signature",
                check
            )));
        }

        debug!(check_label = %check, "signature self-check passed");
        Ok(signature)
    }

    /// Verifies `signature` over `message` with the public key for `label`.
    ///
    /// `label` may name the public key directly or the keypair, in which case
    /// `label-public` is used. Returns `Ok(false)` for a signature that does
    /// not match.
    ///
    /// # Errors
    ///
    /// Fails with [`HsmError::Decoding`] if the signature length differs from
    /// the key modulus length.
    pub fn verify(
        &self,
        label: &str,
        signature: &Signature,
        message: &[u8],
    ) -> Result<bool, HsmError> {
        let label = KeyLabel::new(label)?;
        if signature.is_empty() {
            return Err(HsmError::Decoding("empty signature".into()));
        }

        self.run("verify", |active| {
            let key = active.resolve_public(&label)?;
            let expected = active.session().public_components(key)?.signature_len();
            if signature.len() != expected {
                return Err(HsmError::Decoding(format!(
                    "signature is {} bytes, key {} expects {}",
                    signature.len(),
                    label,
                    expected
                )));
            }
            let valid = active.session().verify(key, message, signature.as_bytes())?;
            active.complete();
            Ok(valid)
        })
    }

    /// Decodes a hex signature, then verifies it.
    ///
    /// Malformed hex fails with [`HsmError::Decoding`] before the module is
    /// loaded.
    pub fn verify_hex(
        &self,
        label: &str,
        signature_hex: &str,
        message: &[u8],
    ) -> Result<bool, HsmError> {
        let signature = Signature::from_hex(signature_hex)?;
        self.verify(label, &signature, message)
    }

    /// Draws `length` bytes from the module random number generator.
    pub fn generate_random(&self, length: usize) -> Result<Vec<u8>, HsmError> {
        if length == 0 {
            return Err(HsmError::InvalidArgument(
                "random length must be greater than zero".into(),
            ));
        }

        self.run("random", |active| {
            let bytes = active.session().generate_random(length)?;
            if bytes.len() != length {
                return Err(HsmError::Rng(format!(
                    "module returned {} bytes, expected {}",
                    bytes.len(),
                    length
                )));
            }
            active.complete();
            Ok(bytes)
        })
    }

    /// Exports the public key for `label` as a PEM file.
    ///
    /// Writes to `destination`, or `<label>.pem` in the working directory.
    /// Nothing is written unless the key was found and encoded.
    pub fn export_public_key(
        &self,
        label: &str,
        destination: Option<&Path>,
    ) -> Result<PathBuf, HsmError> {
        let label = KeyLabel::new(label)?;
        let path = destination
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_pem_path(&label));

        let pem = self.run("extract-key", |active| {
            let key = active.resolve_public(&label)?;
            let components = active.session().public_components(key)?;
            let pem = components.to_pem()?;
            active.complete();
            debug!(bits = components.modulus_bits(), "public key encoded");
            Ok(pem)
        })?;

        fs::write(&path, pem.as_bytes()).map_err(|source| HsmError::Write {
            path: path.clone(),
            source,
        })?;

        info!(label = %label, path = %path.display(), "public key exported");
        Ok(path)
    }

    /// Labels of the private keys on the token, sorted.
    pub fn list_keys(&self) -> Result<Vec<String>, HsmError> {
        self.run("list-keys", |active| {
            let mut labels = active.session().private_key_labels()?;
            labels.sort();
            labels.dedup();
            active.complete();
            Ok(labels)
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn run<T, F>(&self, operation: &'static str, op: F) -> Result<T, HsmError>
    where
        F: FnOnce(&mut ActiveSession<'_, SessionOf<L>>) -> Result<T, HsmError>,
    {
        let mut stage = Stage::Unopened;
        let result = self.run_stages(&mut stage, op);

        match &result {
            Ok(_) => debug!(operation, stage = %stage, "session released"),
            Err(e) => warn!(
                operation,
                reached = %stage,
                error = %e,
                "operation aborted, session released"
            ),
        }

        result
    }

    fn run_stages<T, F>(&self, stage: &mut Stage, op: F) -> Result<T, HsmError>
    where
        F: FnOnce(&mut ActiveSession<'_, SessionOf<L>>) -> Result<T, HsmError>,
    {
        let module = self.loader.load(&self.config.location)?;
        *stage = Stage::ModuleLoaded;
        debug!(location = %self.config.location, "module loaded");

        let guard = SessionGuard::open(&module, self.config.slot, &self.config.pin)?;
        *stage = Stage::Authenticated;

        let result = op(&mut ActiveSession::new(&*guard, stage));
        drop(guard);
        drop(module);

        if result.is_ok() {
            *stage = Stage::Closed;
        }
        result
    }
}

/// Default export path: `<label>.pem` with path separators replaced.
pub fn default_pem_path(label: &KeyLabel) -> PathBuf {
    let name: String = label
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    PathBuf::from(format!("{}.pem", name))
}
