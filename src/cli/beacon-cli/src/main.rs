//! Beacon HSM CLI - Command line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use beacon_crypto::encode_hex;
use beacon_hsm::{HsmClient, HsmError, KeyPairSpec, ModuleConfig, Pin, DEFAULT_RANDOM_LENGTH};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code when a signature does not verify.
const EXIT_INVALID_SIGNATURE: u8 = 1;

/// Exit code when a command fails.
const EXIT_FAILURE: u8 = 2;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "beacon-hsm")]
#[command(about = "HSM scripts for PKCS#1 v1.5 / SHA-512 signatures and random number generation")]
#[command(version)]
struct Cli {
    /// HSM module location (path to the PKCS#11 library)
    #[arg(short = 'l', long, env = "BEACON_HSM_MODULE", global = true)]
    location: Option<String>,

    /// HSM partition PIN
    #[arg(short, long, env = "BEACON_HSM_PIN", hide_env_values = true, global = true)]
    pin: Option<String>,

    /// Index of the slot holding the token
    #[arg(long, default_value_t = 0, env = "BEACON_HSM_SLOT", global = true)]
    slot: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new keypair in the HSM
    Keygen {
        /// HSM key label
        #[arg(short = 'k', long = "keylabel")]
        key_label: String,
        /// RSA modulus size in bits
        #[arg(long, default_value_t = 2048)]
        bits: u32,
    },
    /// Sign a message with a key in the HSM
    Sign {
        /// HSM key label
        #[arg(short = 'k', long = "keylabel")]
        key_label: String,
        /// Message to sign
        #[arg(short, long)]
        message: String,
        /// Verify the signature right after signing
        #[arg(long)]
        self_check: bool,
        /// Public key label for the self-check (defaults to <keylabel>-public)
        #[arg(long, requires = "self_check")]
        check_label: Option<String>,
    },
    /// Verify a message with a key in the HSM
    Verify {
        /// HSM key label (public key, or keypair label)
        #[arg(short = 'k', long = "keylabel")]
        key_label: String,
        /// Message that was signed
        #[arg(short, long)]
        message: String,
        /// Signature to verify (hex)
        #[arg(short, long)]
        signature: String,
    },
    /// Generate random bytes in the HSM
    Random {
        /// Number of bytes
        #[arg(short = 'n', long, default_value_t = DEFAULT_RANDOM_LENGTH)]
        length: usize,
    },
    /// Extract a public key (.pem) from the HSM
    ExtractKey {
        /// HSM key label
        #[arg(short = 'k', long = "keylabel")]
        key_label: String,
        /// Output file (defaults to <keylabel>.pem)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List private key labels in the HSM
    ListKeys,
}

fn module_config(location: Option<String>, pin: Option<String>, slot: usize) -> Result<ModuleConfig> {
    let location = location
        .filter(|l| !l.trim().is_empty())
        .context("HSM module location required. Set BEACON_HSM_MODULE or use --location")?;
    let pin = pin
        .filter(|p| !p.is_empty())
        .context("HSM partition PIN required. Set BEACON_HSM_PIN or use --pin")?;

    Ok(ModuleConfig::new(location, Pin::new(pin)).with_slot(slot))
}

// ============================================================================
// Command Handlers
// ============================================================================

fn cmd_keygen(client: &HsmClient, label: &str, bits: u32) -> Result<ExitCode> {
    info!("Generating keypair in HSM with key label {}", label);

    client
        .generate_key_pair(label, &KeyPairSpec::rsa(bits))
        .with_context(|| format!("Key generation failed for label {}", label))?;

    info!("Keypair {} generated (public key {}-public)", label, label);
    Ok(ExitCode::SUCCESS)
}

fn cmd_sign(
    client: &HsmClient,
    label: &str,
    message: &str,
    self_check: bool,
    check_label: Option<&str>,
) -> Result<ExitCode> {
    info!("Signing message {} with key label {}", message, label);

    let signature = if self_check {
        client.sign_checked(label, message.as_bytes(), check_label)
    } else {
        client.sign(label, message.as_bytes())
    }
    .with_context(|| format!("Signing failed for label {}", label))?;

    info!("Signature: {}", signature);
    println!("{}", signature);

    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(client: &HsmClient, label: &str, message: &str, signature: &str) -> Result<ExitCode> {
    info!(
        "Verifying signature with message {} and key label {}",
        message, label
    );
    info!("Signature: {}", signature);

    let valid = client
        .verify_hex(label, signature, message.as_bytes())
        .with_context(|| format!("Verify failed for label {}", label))?;

    println!("{}", valid);
    if valid {
        info!("Signature verified successfully");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Signature verification failed: signature does not match");
        Ok(ExitCode::from(EXIT_INVALID_SIGNATURE))
    }
}

fn cmd_random(client: &HsmClient, length: usize) -> Result<ExitCode> {
    info!("Generating random number ({} bytes)", length);

    let bytes = client
        .generate_random(length)
        .context("Random generation failed")?;

    let encoded = encode_hex(&bytes);
    info!("Random number: {}", encoded);
    println!("{}", encoded);

    Ok(ExitCode::SUCCESS)
}

fn cmd_extract_key(client: &HsmClient, label: &str, output: Option<PathBuf>) -> Result<ExitCode> {
    info!("Extracting public key (.pem) with key label {}", label);

    let path = client
        .export_public_key(label, output.as_deref())
        .with_context(|| format!("Public key export failed for label {}", label))?;

    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_list_keys(client: &HsmClient) -> Result<ExitCode> {
    let labels = client.list_keys().context("Listing keys failed")?;

    if labels.is_empty() {
        info!("No private keys found");
    } else {
        for label in &labels {
            println!("{}", label);
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Main
// ============================================================================

/// Log line for a failed command. Rejected input is worded apart from module
/// failures.
fn describe_failure(e: &anyhow::Error) -> String {
    match e.downcast_ref::<HsmError>() {
        Some(hsm) if hsm.is_input_error() => format!("Invalid input: {:#}", e),
        _ => format!("{:#}", e),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = module_config(cli.location, cli.pin, cli.slot)?;
    let client = HsmClient::new(config);

    match cli.command {
        Commands::Keygen { key_label, bits } => cmd_keygen(&client, &key_label, bits),
        Commands::Sign {
            key_label,
            message,
            self_check,
            check_label,
        } => cmd_sign(
            &client,
            &key_label,
            &message,
            self_check,
            check_label.as_deref(),
        ),
        Commands::Verify {
            key_label,
            message,
            signature,
        } => cmd_verify(&client, &key_label, &message, &signature),
        Commands::Random { length } => cmd_random(&client, length),
        Commands::ExtractKey { key_label, output } => cmd_extract_key(&client, &key_label, output),
        Commands::ListKeys => cmd_list_keys(&client),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", describe_failure(&e));
            ExitCode::from(EXIT_FAILURE)
        },
    }
}
