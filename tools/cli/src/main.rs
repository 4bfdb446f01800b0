//! DriftVault CLI - Command line interface for vault operations.
//!
//! Key material lives in an opaque 64-byte key file (32 bytes AES key, 32
//! bytes HMAC key). Key derivation from passwords is a separate concern and
//! deliberately not part of this tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use driftvault_crypto::integrity::DEFAULT_CHUNK_SIZE;
use driftvault_crypto::keys::{CipherKey, HashKey};
use driftvault_crypto::provider::ProviderKind;
use driftvault_sequence::{FileSequencer, NonceSequencer};
use driftvault_storage::LocalEntry;
use driftvault_vault::{export_file, import_file, Drive};

const KEY_FILE_SIZE: usize = 64;

#[derive(Parser)]
#[command(name = "driftvault")]
#[command(about = "DriftVault - Encrypted container management")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Nonce sequencer file (shared across vaults on this machine).
    #[arg(long, default_value = "driftvault-sequences.xml")]
    sequencer: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault and generate its key file.
    Init {
        /// Path for the vault root.
        #[arg(short, long)]
        path: PathBuf,

        /// Where to write the generated 64-byte key file.
        #[arg(short, long)]
        key_file: PathBuf,

        /// Integrity chunk size in bytes (0 disables tags).
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,
    },

    /// Encrypt a file into the vault.
    Import {
        /// Path to the vault root.
        #[arg(short, long)]
        path: PathBuf,

        /// Key file for this vault.
        #[arg(short, long)]
        key_file: PathBuf,

        /// Plaintext source file.
        #[arg(short, long)]
        source: PathBuf,

        /// Name inside the vault (defaults to the source file name).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Decrypt a file out of the vault.
    Export {
        /// Path to the vault root.
        #[arg(short, long)]
        path: PathBuf,

        /// Key file for this vault.
        #[arg(short, long)]
        key_file: PathBuf,

        /// Name inside the vault.
        #[arg(short, long)]
        name: String,

        /// Plaintext destination file.
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// List files in the vault.
    List {
        /// Path to the vault root.
        #[arg(short, long)]
        path: PathBuf,

        /// Key file for this vault.
        #[arg(short, long)]
        key_file: PathBuf,
    },

    /// Show vault metadata and sequence state.
    Info {
        /// Path to the vault root.
        #[arg(short, long)]
        path: PathBuf,

        /// Key file for this vault.
        #[arg(short, long)]
        key_file: PathBuf,
    },

    /// Remove a file from the vault.
    Remove {
        /// Path to the vault root.
        #[arg(short, long)]
        path: PathBuf,

        /// Key file for this vault.
        #[arg(short, long)]
        key_file: PathBuf,

        /// Name inside the vault.
        #[arg(short, long)]
        name: String,
    },

    /// Permanently revoke the vault's nonce sequence.
    Revoke {
        /// Path to the vault root.
        #[arg(short, long)]
        path: PathBuf,

        /// Key file for this vault.
        #[arg(short, long)]
        key_file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let sequencer = Arc::new(
        FileSequencer::open(&cli.sequencer).context("Failed to open sequencer file")?,
    );

    match cli.command {
        Commands::Init {
            path,
            key_file,
            chunk_size,
        } => cmd_init(sequencer, &path, &key_file, chunk_size),

        Commands::Import {
            path,
            key_file,
            source,
            name,
        } => cmd_import(sequencer, &path, &key_file, &source, name.as_deref()),

        Commands::Export {
            path,
            key_file,
            name,
            dest,
        } => cmd_export(sequencer, &path, &key_file, &name, &dest),

        Commands::List { path, key_file } => cmd_list(sequencer, &path, &key_file),

        Commands::Info { path, key_file } => cmd_info(sequencer, &path, &key_file),

        Commands::Remove {
            path,
            key_file,
            name,
        } => cmd_remove(sequencer, &path, &key_file, &name),

        Commands::Revoke { path, key_file } => cmd_revoke(sequencer, &path, &key_file),
    }
}

/// Read the 64-byte key file into the cipher and hash keys.
fn load_keys(key_file: &Path) -> Result<(CipherKey, HashKey)> {
    let bytes = fs::read(key_file)
        .with_context(|| format!("Failed to read key file {}", key_file.display()))?;
    if bytes.len() != KEY_FILE_SIZE {
        anyhow::bail!(
            "Key file must be exactly {} bytes, got {}",
            KEY_FILE_SIZE,
            bytes.len()
        );
    }
    let cipher = CipherKey::from_slice(&bytes[..32]).context("Invalid cipher key")?;
    let hash = HashKey::from_slice(&bytes[32..]).context("Invalid hash key")?;
    Ok((cipher, hash))
}

fn open_drive(
    sequencer: Arc<dyn NonceSequencer>,
    path: &Path,
    key_file: &Path,
) -> Result<Drive> {
    let (cipher, hash) = load_keys(key_file)?;
    Drive::open(
        Box::new(LocalEntry::new(path)),
        cipher,
        Some(hash),
        sequencer,
    )
    .with_context(|| format!("Failed to open vault at {}", path.display()))
}

fn cmd_init(
    sequencer: Arc<dyn NonceSequencer>,
    path: &Path,
    key_file: &Path,
    chunk_size: u32,
) -> Result<()> {
    if key_file.exists() {
        anyhow::bail!("Key file {} already exists", key_file.display());
    }

    let cipher = CipherKey::generate();
    let hash = HashKey::generate();
    let mut key_bytes = Vec::with_capacity(KEY_FILE_SIZE);
    key_bytes.extend_from_slice(cipher.as_bytes());
    key_bytes.extend_from_slice(hash.as_bytes());
    fs::write(key_file, &key_bytes)
        .with_context(|| format!("Failed to write key file {}", key_file.display()))?;

    let drive = Drive::create(
        Box::new(LocalEntry::new(path)),
        cipher,
        Some(hash),
        sequencer,
        ProviderKind::default(),
        chunk_size,
    )
    .context("Failed to create vault")?;

    info!("Vault created: {}", drive.drive_id());
    println!("Vault created at {}", path.display());
    println!("Key file written to {} - keep it safe", key_file.display());
    Ok(())
}

fn cmd_import(
    sequencer: Arc<dyn NonceSequencer>,
    path: &Path,
    key_file: &Path,
    source: &Path,
    name: Option<&str>,
) -> Result<()> {
    let drive = open_drive(sequencer, path, key_file)?;
    let default_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Source path has no file name")?;
    let name = name.unwrap_or(&default_name);

    let bytes = import_file(&drive, &LocalEntry::new(source), name, None)
        .with_context(|| format!("Failed to import {}", source.display()))?;
    println!("Imported {} ({} bytes)", name, bytes);
    Ok(())
}

fn cmd_export(
    sequencer: Arc<dyn NonceSequencer>,
    path: &Path,
    key_file: &Path,
    name: &str,
    dest: &Path,
) -> Result<()> {
    let drive = open_drive(sequencer, path, key_file)?;
    let bytes = export_file(&drive, name, &LocalEntry::new(dest), None)
        .with_context(|| format!("Failed to export {}", name))?;
    println!("Exported {} ({} bytes) to {}", name, bytes, dest.display());
    Ok(())
}

fn cmd_list(sequencer: Arc<dyn NonceSequencer>, path: &Path, key_file: &Path) -> Result<()> {
    let drive = open_drive(sequencer, path, key_file)?;
    let files = drive.list_files().context("Failed to list vault files")?;
    if files.is_empty() {
        println!("Vault is empty");
    } else {
        for name in files {
            println!("{}", name);
        }
    }
    Ok(())
}

fn cmd_info(sequencer: Arc<dyn NonceSequencer>, path: &Path, key_file: &Path) -> Result<()> {
    let drive = open_drive(sequencer, path, key_file)?;
    let meta = drive.meta();
    println!("Drive id:    {}", meta.drive_id);
    println!("Auth id:     {}", meta.auth_id);
    println!("Chunk size:  {}", meta.chunk_size);
    println!("Provider:    {:?}", meta.provider);
    match drive.sequence_status()? {
        Some(seq) => println!("Sequence:    {}", seq.status()),
        None => println!("Sequence:    not registered with this sequencer"),
    }
    Ok(())
}

fn cmd_remove(
    sequencer: Arc<dyn NonceSequencer>,
    path: &Path,
    key_file: &Path,
    name: &str,
) -> Result<()> {
    let drive = open_drive(sequencer, path, key_file)?;
    drive
        .delete_file(name)
        .with_context(|| format!("Failed to remove {}", name))?;
    println!("Removed {}", name);
    Ok(())
}

fn cmd_revoke(sequencer: Arc<dyn NonceSequencer>, path: &Path, key_file: &Path) -> Result<()> {
    let drive = open_drive(sequencer, path, key_file)?;
    drive.revoke().context("Failed to revoke vault sequence")?;
    println!(
        "Sequence revoked for vault {}; no new files can be created",
        drive.drive_id()
    );
    Ok(())
}
