//! PKCS#11 backend built on cryptoki.
//!
//! Keys are RSA, identified by CKA_LABEL and looked up on every call.
//! Signatures use CKM_SHA512_RSA_PKCS so hashing happens inside the module.

use beacon_crypto::{KeyClass, KeyLabel, Pin, RsaPublicComponents};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::UserType;
use cryptoki::types::AuthPin;
use tracing::debug;

use crate::error::HsmError;
use crate::module::{KeyPairSpec, Module, ModuleLoader, Session};

/// Loads PKCS#11 libraries from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pkcs11Loader;

impl ModuleLoader for Pkcs11Loader {
    type Module = Pkcs11Module;

    fn load(&self, location: &str) -> Result<Pkcs11Module, HsmError> {
        let load_error = |reason: String| HsmError::ModuleLoad {
            location: location.to_string(),
            reason,
        };

        if location.trim().is_empty() {
            return Err(load_error("module location is empty".into()));
        }

        let pkcs11 = Pkcs11::new(location).map_err(|e| load_error(e.to_string()))?;
        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| load_error(e.to_string()))?;

        debug!(location, "PKCS#11 library initialized");
        Ok(Pkcs11Module {
            pkcs11,
            location: location.to_string(),
        })
    }
}

/// A loaded PKCS#11 library. The library is finalized when dropped.
pub struct Pkcs11Module {
    pkcs11: Pkcs11,
    location: String,
}

impl Module for Pkcs11Module {
    type Session = Pkcs11Session;

    fn open_session(&self, slot_index: usize) -> Result<Pkcs11Session, HsmError> {
        let slots = self
            .pkcs11
            .get_slots_with_token()
            .map_err(|e| HsmError::ModuleLoad {
                location: self.location.clone(),
                reason: format!("unable to list slots: {}", e),
            })?;

        let slot = slots
            .get(slot_index)
            .copied()
            .ok_or(HsmError::SlotNotFound {
                index: slot_index,
                available: slots.len(),
            })?;

        let session = self
            .pkcs11
            .open_rw_session(slot)
            .map_err(|e| HsmError::ModuleLoad {
                location: self.location.clone(),
                reason: format!("unable to open session: {}", e),
            })?;

        Ok(Pkcs11Session { session })
    }
}

/// An open cryptoki session. Closed when dropped.
pub struct Pkcs11Session {
    session: cryptoki::session::Session,
}

fn object_class(class: KeyClass) -> ObjectClass {
    match class {
        KeyClass::Private => ObjectClass::PRIVATE_KEY,
        KeyClass::Public => ObjectClass::PUBLIC_KEY,
    }
}

fn verify_outcome(result: Result<(), CryptokiError>) -> Result<bool, HsmError> {
    match result {
        Ok(()) => Ok(true),
        Err(CryptokiError::Pkcs11(RvError::SignatureInvalid, _)) => Ok(false),
        Err(CryptokiError::Pkcs11(RvError::SignatureLenRange, _)) => Err(HsmError::Decoding(
            "signature length does not match the key".into(),
        )),
        Err(e) => Err(HsmError::Verification(e.to_string())),
    }
}

fn label_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl Session for Pkcs11Session {
    type Handle = ObjectHandle;

    fn login(&mut self, pin: &Pin) -> Result<(), HsmError> {
        match self
            .session
            .login(UserType::User, Some(&AuthPin::new(pin.expose().into())))
        {
            Ok(()) => Ok(()),
            Err(CryptokiError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => Ok(()),
            Err(e) => Err(HsmError::Authentication(e.to_string())),
        }
    }

    fn logout(&mut self) -> Result<(), HsmError> {
        self.session
            .logout()
            .map_err(|e| HsmError::Authentication(e.to_string()))
    }

    fn find_key(&self, label: &KeyLabel, class: KeyClass) -> Result<Option<ObjectHandle>, HsmError> {
        let template = vec![
            Attribute::Class(object_class(class)),
            Attribute::Label(label.as_str().as_bytes().to_vec()),
        ];

        let handles = self
            .session
            .find_objects(&template)
            .map_err(|e| HsmError::KeyLookup {
                label: label.to_string(),
                reason: e.to_string(),
            })?;

        Ok(handles.into_iter().next())
    }

    fn generate_key_pair(&self, label: &KeyLabel, spec: &KeyPairSpec) -> Result<(), HsmError> {
        let public_label = label.public();

        let pub_template = vec![
            Attribute::Class(ObjectClass::PUBLIC_KEY),
            Attribute::KeyType(KeyType::RSA),
            Attribute::Token(true),
            Attribute::Private(false),
            Attribute::Verify(true),
            Attribute::ModulusBits(u64::from(spec.modulus_bits).into()),
            Attribute::PublicExponent(spec.public_exponent_bytes()),
            Attribute::Label(public_label.as_str().as_bytes().to_vec()),
        ];

        let priv_template = vec![
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::KeyType(KeyType::RSA),
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
            Attribute::Sign(true),
            Attribute::Label(label.as_str().as_bytes().to_vec()),
        ];

        self.session
            .generate_key_pair(&Mechanism::RsaPkcsKeyPairGen, &pub_template, &priv_template)
            .map(|_| ())
            .map_err(|e| HsmError::KeyGeneration {
                label: label.to_string(),
                reason: e.to_string(),
            })
    }

    fn sign(&self, key: ObjectHandle, message: &[u8]) -> Result<Vec<u8>, HsmError> {
        self.session
            .sign(&Mechanism::Sha512RsaPkcs, key, message)
            .map_err(|e| HsmError::Signing(e.to_string()))
    }

    fn verify(&self, key: ObjectHandle, message: &[u8], signature: &[u8]) -> Result<bool, HsmError> {
        verify_outcome(
            self.session
                .verify(&Mechanism::Sha512RsaPkcs, key, message, signature),
        )
    }

    fn generate_random(&self, len: usize) -> Result<Vec<u8>, HsmError> {
        let mut bytes = vec![0u8; len];
        self.session
            .generate_random_slice(&mut bytes)
            .map_err(|e| HsmError::Rng(e.to_string()))?;
        Ok(bytes)
    }

    fn public_components(&self, key: ObjectHandle) -> Result<RsaPublicComponents, HsmError> {
        let attrs = self
            .session
            .get_attributes(key, &[AttributeType::Modulus, AttributeType::PublicExponent])
            .map_err(|e| HsmError::Serialization(format!("unable to read public key: {}", e)))?;

        let mut modulus = None;
        let mut public_exponent = None;
        for attr in attrs {
            match attr {
                Attribute::Modulus(bytes) => modulus = Some(bytes),
                Attribute::PublicExponent(bytes) => public_exponent = Some(bytes),
                _ => {},
            }
        }

        match (modulus, public_exponent) {
            (Some(modulus), Some(public_exponent)) => Ok(RsaPublicComponents {
                modulus,
                public_exponent,
            }),
            _ => Err(HsmError::Serialization(
                "public key object has no RSA modulus or exponent".into(),
            )),
        }
    }

    fn private_key_labels(&self) -> Result<Vec<String>, HsmError> {
        let template = vec![Attribute::Class(ObjectClass::PRIVATE_KEY)];
        let handles = self
            .session
            .find_objects(&template)
            .map_err(|e| HsmError::KeyLookup {
                label: "*".into(),
                reason: e.to_string(),
            })?;

        let mut labels = Vec::with_capacity(handles.len());
        for handle in handles {
            let attrs = self
                .session
                .get_attributes(handle, &[AttributeType::Label])
                .map_err(|e| HsmError::KeyLookup {
                    label: format!("{:?}", handle),
                    reason: format!("unable to read label: {}", e),
                })?;
            labels.extend(attrs.into_iter().find_map(|attr| match attr {
                Attribute::Label(bytes) => Some(label_text(&bytes)),
                _ => None,
            }));
        }

        Ok(labels)
    }
}
