//! Integration tests for Beacon HSM.
//!
//! Scenarios run end to end against the in-memory token. When
//! `BEACON_HSM_TEST_MODULE` and `BEACON_HSM_TEST_PIN` point at a real PKCS#11
//! module (for example SoftHSM2), the same workflow also runs against it.
//! CLI tests drive the `beacon-hsm` binary when it has been built.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{bail, Context, Result};
use beacon_hsm::soft::{SoftLoader, SoftToken};
use beacon_hsm::{HsmClient, ModuleConfig, Pin};

/// Module location used by the in-memory token.
pub const SOFT_LOCATION: &str = "/opt/beacon/libbeacon-soft.so";

/// PIN used by the in-memory token.
pub const SOFT_PIN: &str = "98765432";

// ============================================================================
// Soft Token Harness
// ============================================================================

/// An in-memory token together with a client bound to it.
pub struct SoftHsm {
    pub token: SoftToken,
    pub client: HsmClient<SoftLoader>,
}

impl SoftHsm {
    /// Creates an empty token and a client that authenticates with the right PIN.
    pub fn new() -> Self {
        Self::with_client_pin(SOFT_PIN)
    }

    /// Creates an empty token and a client that authenticates with `pin`.
    pub fn with_client_pin(pin: &str) -> Self {
        let token = SoftToken::new(SOFT_LOCATION, &Pin::new(SOFT_PIN));
        let client =
            HsmClient::with_loader(token.loader(), ModuleConfig::new(SOFT_LOCATION, Pin::new(pin)));
        Self { token, client }
    }

    /// Whether every module and session has been released.
    pub fn is_released(&self) -> bool {
        self.token.open_modules() == 0
            && self.token.open_sessions() == 0
            && self.token.logged_in_sessions() == 0
    }
}

impl Default for SoftHsm {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Real Module
// ============================================================================

/// Configuration for a real PKCS#11 module, if the environment provides one.
pub fn real_module_config() -> Option<ModuleConfig> {
    let location = std::env::var("BEACON_HSM_TEST_MODULE").ok()?;
    let pin = std::env::var("BEACON_HSM_TEST_PIN").ok()?;
    let slot = std::env::var("BEACON_HSM_TEST_SLOT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    Some(ModuleConfig::new(location, Pin::new(pin)).with_slot(slot))
}

// ============================================================================
// CLI Runner
// ============================================================================

/// Runs the `beacon-hsm` binary with a clean environment.
pub struct CliRunner {
    binary: PathBuf,
}

impl CliRunner {
    /// Locates the binary in the target directory.
    pub fn find() -> Result<Self> {
        Ok(Self {
            binary: find_cli_binary()?,
        })
    }

    /// Runs the binary with `args`.
    pub fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.binary)
            .args(args)
            .env_remove("BEACON_HSM_MODULE")
            .env_remove("BEACON_HSM_PIN")
            .env_remove("BEACON_HSM_SLOT")
            .env("RUST_LOG", "debug")
            .output()
            .with_context(|| format!("Failed to run {:?}", self.binary))
    }
}

/// Find the CLI binary in the target directory.
fn find_cli_binary() -> Result<PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());

    // Try debug build first, then release
    let candidates = [
        Path::new(&manifest_dir).join("../../target/debug/beacon-hsm"),
        Path::new(&manifest_dir).join("../../target/debug/beacon-hsm.exe"),
        Path::new(&manifest_dir).join("../../target/release/beacon-hsm"),
        Path::new(&manifest_dir).join("../../target/release/beacon-hsm.exe"),
    ];

    for candidate in &candidates {
        if candidate.exists() {
            return Ok(candidate.canonicalize()?);
        }
    }

    bail!(
        "Could not find beacon-hsm binary. Run 'cargo build -p beacon-cli' first. Searched in: {:?}",
        candidates
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_crypto::{KeyClass, Signature};
    use beacon_hsm::{HsmError, KeyPairSpec, DEFAULT_RANDOM_LENGTH};
    use rsa::pkcs8::DecodePublicKey;
    use rsa::{Pkcs1v15Sign, RsaPublicKey};
    use sha2::{Digest, Sha512};
    use tempfile::TempDir;

    fn spec() -> KeyPairSpec {
        KeyPairSpec::rsa(1024)
    }

    #[test]
    fn test_keygen_sign_verify_scenario() {
        let hsm = SoftHsm::new();

        hsm.client.generate_key_pair("K1", &spec()).unwrap();
        let signature = hsm.client.sign("K1", b"hello").unwrap();
        let valid = hsm.client.verify("K1-public", &signature, b"hello").unwrap();

        assert!(valid);
        assert!(hsm.is_released());
        assert_eq!(hsm.token.load_count(), 3, "one lifecycle per operation");
    }

    #[test]
    fn test_signatures_verify_for_many_messages() {
        let hsm = SoftHsm::new();
        hsm.client.generate_key_pair("beacon", &spec()).unwrap();

        for message in ["", "a", "hello", "pulse 1024", "\u{00e9}t\u{00e9}"] {
            let signature = hsm.client.sign("beacon", message.as_bytes()).unwrap();
            assert!(hsm
                .client
                .verify("beacon-public", &signature, message.as_bytes())
                .unwrap());
        }
        assert!(hsm.is_released());
    }

    #[test]
    fn test_flipped_bits_verify_false() {
        let hsm = SoftHsm::new();
        hsm.client.generate_key_pair("K1", &spec()).unwrap();
        let signature = hsm.client.sign("K1", b"hello").unwrap();

        for position in [0, 1, 63, 64, 127] {
            for bit in [0x01u8, 0x80] {
                let mut bytes = signature.clone().into_bytes();
                bytes[position] ^= bit;
                let result = hsm.client.verify("K1-public", &Signature::new(bytes), b"hello");
                assert!(
                    matches!(result, Ok(false)),
                    "flip at byte {position} bit {bit:#x} should verify false"
                );
            }
        }
    }

    #[test]
    fn test_wrong_length_signature_is_decoding_error() {
        let hsm = SoftHsm::new();
        hsm.client.generate_key_pair("K1", &spec()).unwrap();
        let signature = hsm.client.sign("K1", b"hello").unwrap();

        let mut bytes = signature.into_bytes();
        bytes.pop();
        let result = hsm
            .client
            .verify("K1-public", &Signature::new(bytes), b"hello");
        assert!(matches!(result, Err(HsmError::Decoding(_))));

        let result = hsm.client.verify_hex("K1-public", "00", b"hello");
        assert!(matches!(result, Err(HsmError::Decoding(_))));
        assert!(hsm.is_released());
    }

    #[test]
    fn test_malformed_hex_is_decoding_error() {
        let hsm = SoftHsm::new();

        for input in ["zz", "0", "12 34", "g0", "--"] {
            let result = hsm.client.verify_hex("K1-public", input, b"hello");
            assert!(matches!(result, Err(HsmError::Decoding(_))), "{input:?}");
        }
        assert_eq!(hsm.token.load_count(), 0);
    }

    #[test]
    fn test_random_bytes() {
        let hsm = SoftHsm::new();

        let a = hsm.client.generate_random(DEFAULT_RANDOM_LENGTH).unwrap();
        let b = hsm.client.generate_random(DEFAULT_RANDOM_LENGTH).unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(b.len(), 64);
        assert_ne!(a, b);

        assert_eq!(hsm.client.generate_random(1).unwrap().len(), 1);
        assert_eq!(hsm.client.generate_random(4096).unwrap().len(), 4096);
    }

    #[test]
    fn test_exported_pem_verifies_module_signature() {
        let hsm = SoftHsm::new();
        hsm.client.generate_key_pair("K1", &spec()).unwrap();
        let signature = hsm.client.sign("K1", b"hello").unwrap();

        let dir = TempDir::new().unwrap();
        let path = hsm
            .client
            .export_public_key("K1-public", Some(&dir.path().join("K1.pem")))
            .unwrap();

        let pem = std::fs::read_to_string(path).unwrap();
        let public = RsaPublicKey::from_public_key_pem(&pem).unwrap();
        let digest = Sha512::digest(b"hello");
        public
            .verify(Pkcs1v15Sign::new::<Sha512>(), &digest, signature.as_bytes())
            .unwrap();
    }

    #[test]
    fn test_export_missing_label_writes_no_file() {
        let hsm = SoftHsm::new();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ghost.pem");

        let result = hsm.client.export_public_key("ghost", Some(&dest));

        assert!(matches!(
            result,
            Err(HsmError::KeyNotFound {
                class: KeyClass::Public,
                ..
            })
        ));
        assert!(!dest.exists());
        assert!(hsm.is_released());
    }

    #[test]
    fn test_wrong_pin_releases_everything() {
        let hsm = SoftHsm::with_client_pin("00000000");

        assert!(matches!(
            hsm.client.sign("K1", b"hello"),
            Err(HsmError::Authentication(_))
        ));
        assert!(matches!(
            hsm.client.generate_random(64),
            Err(HsmError::Authentication(_))
        ));
        assert!(hsm.is_released());
    }

    #[test]
    fn test_self_check_default_label() {
        let hsm = SoftHsm::new();
        hsm.client.generate_key_pair("MyRSAKey", &spec()).unwrap();

        let signature = hsm.client.sign_checked("MyRSAKey", b"pulse", None).unwrap();
        assert!(hsm
            .client
            .verify("MyRSAKey", &signature, b"pulse")
            .unwrap());
    }

    #[test]
    fn test_list_keys_after_keygen() {
        let hsm = SoftHsm::new();
        assert!(hsm.client.list_keys().unwrap().is_empty());

        hsm.client.generate_key_pair("K2", &spec()).unwrap();
        hsm.client.generate_key_pair("K1", &spec()).unwrap();

        assert_eq!(hsm.client.list_keys().unwrap(), vec!["K1", "K2"]);
    }

    /// Runs against the module named by `BEACON_HSM_TEST_MODULE`.
    ///
    /// The `beacon-it-<pid>` keypair is left on the token: the tool has no
    /// delete operation. Point the test at a scratch token.
    #[test]
    fn test_real_module_workflow() {
        let Some(config) = real_module_config() else {
            eprintln!("BEACON_HSM_TEST_MODULE not set, skipping real module test");
            return;
        };
        let client = HsmClient::new(config);
        let label = format!("beacon-it-{}", std::process::id());

        client.generate_key_pair(&label, &KeyPairSpec::default()).unwrap();
        let signature = client.sign_checked(&label, b"hello", None).unwrap();
        assert!(client
            .verify(&format!("{label}-public"), &signature, b"hello")
            .unwrap());

        let mut tampered = signature.into_bytes();
        tampered[0] ^= 0x01;
        assert!(!client
            .verify(&label, &Signature::new(tampered), b"hello")
            .unwrap());

        assert_eq!(client.generate_random(64).unwrap().len(), 64);
        assert!(client.list_keys().unwrap().contains(&label));

        let dir = TempDir::new().unwrap();
        let path = client
            .export_public_key(&label, Some(&dir.path().join("key.pem")))
            .unwrap();
        assert!(path.exists());
    }

    // ------------------------------------------------------------------------
    // CLI
    // ------------------------------------------------------------------------

    fn cli() -> Option<CliRunner> {
        match CliRunner::find() {
            Ok(runner) => Some(runner),
            Err(e) => {
                eprintln!("skipping CLI test: {e}");
                None
            },
        }
    }

    #[test]
    fn test_cli_help_lists_commands() {
        let Some(cli) = cli() else { return };
        let output = cli.run(&["--help"]).unwrap();

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        for command in ["keygen", "sign", "verify", "random", "extract-key", "list-keys"] {
            assert!(stdout.contains(command), "help should mention {command}");
        }
    }

    #[test]
    fn test_cli_requires_location() {
        let Some(cli) = cli() else { return };
        let output = cli.run(&["random", "-p", "1234"]).unwrap();

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("module location required"));
    }

    #[test]
    fn test_cli_malformed_signature_fails_before_loading() {
        let Some(cli) = cli() else { return };
        let output = cli
            .run(&[
                "verify",
                "-l",
                "/nonexistent/libpkcs11.so",
                "-p",
                "1234",
                "-k",
                "K1-public",
                "-m",
                "hello",
                "-s",
                "zz",
            ])
            .unwrap();

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("decoding failed"));
        assert!(!stderr.contains("failed to load module"));
    }

    #[test]
    fn test_cli_missing_module_is_load_error() {
        let Some(cli) = cli() else { return };
        let output = cli
            .run(&["random", "-l", "/nonexistent/libpkcs11.so", "-p", "1234"])
            .unwrap();

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("failed to load module"));
    }
}
