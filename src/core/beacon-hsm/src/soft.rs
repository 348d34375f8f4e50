//! In-memory token implementing the module traits.
//!
//! Keys are held as software RSA keys and signatures use SHA-512 with
//! PKCS#1 v1.5, matching the PKCS#11 backend. The token counts loaded modules
//! and open sessions so callers can check that every lifecycle released its
//! resources.

use std::sync::{Arc, Mutex, MutexGuard};

use beacon_crypto::{KeyClass, KeyLabel, Pin, RsaPublicComponents};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};

use crate::error::HsmError;
use crate::module::{KeyPairSpec, Module, ModuleLoader, Session};

#[derive(Clone)]
enum SoftKey {
    Private(RsaPrivateKey),
    Public(RsaPublicKey),
}

#[derive(Clone)]
struct TokenObject {
    label: String,
    key: SoftKey,
}

impl TokenObject {
    fn class(&self) -> KeyClass {
        match self.key {
            SoftKey::Private(_) => KeyClass::Private,
            SoftKey::Public(_) => KeyClass::Public,
        }
    }
}

#[derive(Default)]
struct TokenState {
    location: String,
    pin: String,
    objects: Vec<TokenObject>,
    unavailable: bool,
    loads: usize,
    open_modules: usize,
    open_sessions: usize,
    logged_in: usize,
}

/// Shared handle to an in-memory token.
#[derive(Clone)]
pub struct SoftToken {
    state: Arc<Mutex<TokenState>>,
}

impl SoftToken {
    /// Creates an empty token reachable at `location` and unlocked by `pin`.
    pub fn new(location: impl Into<String>, pin: &Pin) -> Self {
        let state = TokenState {
            location: location.into(),
            pin: pin.expose().to_string(),
            ..TokenState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A loader that opens this token.
    pub fn loader(&self) -> SoftLoader {
        SoftLoader {
            token: self.clone(),
        }
    }

    /// Makes every subsequent load fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Number of times the module was loaded.
    pub fn load_count(&self) -> usize {
        self.state().loads
    }

    /// Modules currently loaded.
    pub fn open_modules(&self) -> usize {
        self.state().open_modules
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    /// Sessions currently logged in.
    pub fn logged_in_sessions(&self) -> usize {
        self.state().logged_in
    }

    /// Whether an object of `class` carries `label`.
    pub fn contains(&self, label: &str, class: KeyClass) -> bool {
        self.state()
            .objects
            .iter()
            .any(|o| o.label == label && o.class() == class)
    }

    /// Number of key objects on the token.
    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Stores an existing private key as a keypair under `label`.
    pub fn import_key_pair(&self, label: &KeyLabel, private: RsaPrivateKey) {
        let public = RsaPublicKey::from(&private);
        let mut state = self.state();
        state.objects.push(TokenObject {
            label: label.to_string(),
            key: SoftKey::Private(private),
        });
        state.objects.push(TokenObject {
            label: label.public().to_string(),
            key: SoftKey::Public(public),
        });
    }
}

/// Loader for a [`SoftToken`].
#[derive(Clone)]
pub struct SoftLoader {
    token: SoftToken,
}

impl ModuleLoader for SoftLoader {
    type Module = SoftModule;

    fn load(&self, location: &str) -> Result<SoftModule, HsmError> {
        let mut state = self.token.state();
        if state.unavailable || location != state.location {
            return Err(HsmError::ModuleLoad {
                location: location.to_string(),
                reason: "no module at this location".into(),
            });
        }
        state.loads += 1;
        state.open_modules += 1;
        drop(state);

        Ok(SoftModule {
            token: self.token.clone(),
        })
    }
}

/// A loaded [`SoftToken`]. The token exposes a single slot.
pub struct SoftModule {
    token: SoftToken,
}

impl Module for SoftModule {
    type Session = SoftSession;

    fn open_session(&self, slot_index: usize) -> Result<SoftSession, HsmError> {
        if slot_index != 0 {
            return Err(HsmError::SlotNotFound {
                index: slot_index,
                available: 1,
            });
        }
        self.token.state().open_sessions += 1;
        Ok(SoftSession {
            token: self.token.clone(),
            logged_in: false,
        })
    }
}

impl Drop for SoftModule {
    fn drop(&mut self) {
        let mut state = self.token.state();
        state.open_modules = state.open_modules.saturating_sub(1);
    }
}

/// Handle to an object on a [`SoftToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftHandle(usize);

/// An open session on a [`SoftToken`].
pub struct SoftSession {
    token: SoftToken,
    logged_in: bool,
}

impl SoftSession {
    fn require_login(&self) -> Result<(), HsmError> {
        if self.logged_in {
            Ok(())
        } else {
            Err(HsmError::Authentication("user not logged in".into()))
        }
    }

    fn object(&self, handle: SoftHandle) -> Result<TokenObject, HsmError> {
        self.token
            .state()
            .objects
            .get(handle.0)
            .cloned()
            .ok_or_else(|| HsmError::KeyLookup {
                label: format!("#{}", handle.0),
                reason: "object handle invalid".into(),
            })
    }
}

fn scheme() -> Pkcs1v15Sign {
    Pkcs1v15Sign::new::<Sha512>()
}

impl Session for SoftSession {
    type Handle = SoftHandle;

    fn login(&mut self, pin: &Pin) -> Result<(), HsmError> {
        let mut state = self.token.state();
        if state.pin != pin.expose() {
            return Err(HsmError::Authentication("PIN incorrect".into()));
        }
        if !self.logged_in {
            self.logged_in = true;
            state.logged_in += 1;
        }
        Ok(())
    }

    fn logout(&mut self) -> Result<(), HsmError> {
        if !self.logged_in {
            return Err(HsmError::Authentication("user not logged in".into()));
        }
        self.logged_in = false;
        let mut state = self.token.state();
        state.logged_in = state.logged_in.saturating_sub(1);
        Ok(())
    }

    fn find_key(&self, label: &KeyLabel, class: KeyClass) -> Result<Option<SoftHandle>, HsmError> {
        self.require_login()?;
        Ok(self
            .token
            .state()
            .objects
            .iter()
            .position(|o| o.label == label.as_str() && o.class() == class)
            .map(SoftHandle))
    }

    fn generate_key_pair(&self, label: &KeyLabel, spec: &KeyPairSpec) -> Result<(), HsmError> {
        self.require_login()?;
        let exponent = BigUint::from(spec.public_exponent);
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, spec.modulus_bits as usize, &exponent)
            .map_err(|e| HsmError::KeyGeneration {
                label: label.to_string(),
                reason: e.to_string(),
            })?;
        self.token.import_key_pair(label, private);
        Ok(())
    }

    fn sign(&self, key: SoftHandle, message: &[u8]) -> Result<Vec<u8>, HsmError> {
        self.require_login()?;
        let SoftKey::Private(private) = self.object(key)?.key else {
            return Err(HsmError::Signing("object is not a private key".into()));
        };
        let digest = Sha512::digest(message);
        private
            .sign(scheme(), &digest)
            .map_err(|e| HsmError::Signing(e.to_string()))
    }

    fn verify(&self, key: SoftHandle, message: &[u8], signature: &[u8]) -> Result<bool, HsmError> {
        self.require_login()?;
        let public = match self.object(key)?.key {
            SoftKey::Public(public) => public,
            SoftKey::Private(_) => {
                return Err(HsmError::Verification("object is not a public key".into()))
            },
        };
        let digest = Sha512::digest(message);
        match public.verify(scheme(), &digest, signature) {
            Ok(()) => Ok(true),
            Err(rsa::Error::Verification) => Ok(false),
            Err(e) => Err(HsmError::Verification(e.to_string())),
        }
    }

    fn generate_random(&self, len: usize) -> Result<Vec<u8>, HsmError> {
        self.require_login()?;
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| HsmError::Rng(e.to_string()))?;
        Ok(bytes)
    }

    fn public_components(&self, key: SoftHandle) -> Result<RsaPublicComponents, HsmError> {
        self.require_login()?;
        match self.object(key)?.key {
            SoftKey::Public(public) => Ok(RsaPublicComponents::from(&public)),
            SoftKey::Private(_) => Err(HsmError::Serialization(
                "object is not a public key".into(),
            )),
        }
    }

    fn private_key_labels(&self) -> Result<Vec<String>, HsmError> {
        self.require_login()?;
        Ok(self
            .token
            .state()
            .objects
            .iter()
            .filter(|o| o.class() == KeyClass::Private)
            .map(|o| o.label.clone())
            .collect())
    }
}

impl Drop for SoftSession {
    fn drop(&mut self) {
        let mut state = self.token.state();
        if self.logged_in {
            state.logged_in = state.logged_in.saturating_sub(1);
        }
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}
