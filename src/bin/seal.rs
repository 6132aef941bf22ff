//! Publishing helper: seals a payload script for payload-updater agents.
//!
//! Writes `script.js.enc` and `version.json` into the output directory,
//! ready to be uploaded to the agents' base URL.
//!
//! Usage:
//!   payload-seal --version 1.2.0 --key <secret> script.js [--output dist]

use clap::Parser;
use payload_updater::cipher;
use payload_updater::config::{PAYLOAD_DOCUMENT, VERSION_DOCUMENT};
use payload_updater::descriptor::VersionDescriptor;
use payload_updater::Credential;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Seal a payload script and write the matching version document.
#[derive(Parser, Debug)]
#[command(name = "payload-seal")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Plaintext payload script.
    script: PathBuf,

    /// Version to publish.
    #[arg(long)]
    version: String,

    /// Encryption key shared with the agents.
    #[arg(long, env = "PAYLOAD_UPDATER_KEY", hide_env_values = true)]
    key: String,

    /// Output directory.
    #[arg(long, short, default_value = ".")]
    output: PathBuf,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let key = Credential::new(args.key);
    if key.is_empty() {
        color_eyre::eyre::bail!("encryption key must not be empty");
    }

    // Reject anything the agent would refuse to install.
    let descriptor = VersionDescriptor {
        version: args.version,
    };
    let document = serde_json::to_vec_pretty(&descriptor)?;
    VersionDescriptor::parse(&document)?;

    let plaintext = std::fs::read(&args.script)?;
    let sealed = cipher::seal(&plaintext, &key)?;

    std::fs::create_dir_all(&args.output)?;
    let payload_path = args.output.join(PAYLOAD_DOCUMENT);
    let descriptor_path = args.output.join(VERSION_DOCUMENT);
    std::fs::write(&payload_path, &sealed)?;
    std::fs::write(&descriptor_path, &document)?;

    println!("Sealed version {}", descriptor.version);
    println!("  {} ({} bytes)", payload_path.display(), sealed.len());
    println!("  {}", descriptor_path.display());
    println!("  plaintext sha256: {}", hex::encode(Sha256::digest(&plaintext)));
    Ok(())
}
