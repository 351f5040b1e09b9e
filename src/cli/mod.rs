//! CLI command implementations
//!
//! This module contains all the business logic for CLI commands,
//! extracted from main.rs for testability. Handlers return values instead
//! of exiting; [`entrypoint`] translates them into exit behavior.

// CLI glue code - relaxed lint requirements
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::container::{Container, DuplicatePolicy};
use crate::error::Result;
use crate::modelspec::SPEC_VERSION;

/// Longest metadata value shown before eliding (thumbnails run to
/// kilobytes)
const VALUE_PREVIEW_CHARS: usize = 72;

/// Tensor rows shown by `show` before eliding
const TENSOR_PREVIEW_ROWS: usize = 10;

/// Rotular - safetensors metadata engine
///
/// Inspect, edit, validate, and atomically rewrite the metadata of
/// safetensors model files. The tensor payload is never modified.
#[derive(Parser)]
#[command(name = "rotular")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Refuse to load files whose raw header repeats a key
    #[arg(long, global = true)]
    pub strict_duplicates: bool,

    /// Selected subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Show header summary, tensors, and metadata
    Show {
        /// Container file
        file: PathBuf,
    },
    /// Print one metadata value
    Get {
        /// Container file
        file: PathBuf,
        /// Metadata key, e.g. modelspec.title
        key: String,
    },
    /// Set a metadata value and save
    Set {
        /// Container file
        file: PathBuf,
        /// Metadata key, e.g. modelspec.title
        key: String,
        /// Value to store
        value: String,
        /// Write to this path instead of saving in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove a metadata key and save
    Rm {
        /// Container file
        file: PathBuf,
        /// Metadata key to remove
        key: String,
        /// Write to this path instead of saving in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate metadata against ModelSpec 1.0.1
    Validate {
        /// Container file
        file: PathBuf,
    },
    /// Print the payload SHA-256
    Hash {
        /// Container file
        file: PathBuf,
        /// Also write the hash into modelspec.hash_sha256 and save
        #[arg(long)]
        stamp: bool,
    },
}

/// Main CLI entrypoint - dispatches commands to handlers
pub fn entrypoint(cli: Cli) -> Result<()> {
    let policy = if cli.strict_duplicates {
        DuplicatePolicy::Fatal
    } else {
        DuplicatePolicy::Advisory
    };
    match cli.command {
        Commands::Show { file } => handle_show(&file, policy),
        Commands::Get { file, key } => handle_get(&file, &key, policy),
        Commands::Set {
            file,
            key,
            value,
            output,
        } => handle_set(&file, &key, &value, output.as_deref(), policy),
        Commands::Rm { file, key, output } => {
            handle_rm(&file, &key, output.as_deref(), policy)
        },
        Commands::Validate { file } => {
            if !handle_validate(&file, policy)? {
                std::process::exit(1);
            }
            Ok(())
        },
        Commands::Hash { file, stamp } => handle_hash(&file, stamp, policy),
    }
}

/// Load and display container information
pub fn handle_show(file: &Path, policy: DuplicatePolicy) -> Result<()> {
    let container = Container::load_with_policy(file, policy)?;

    println!("Container: {}", file.display());
    println!("  Header bytes: {}", container.header_len());
    println!("  Payload bytes: {}", container.payload().len);
    println!();

    if !container.duplicates().is_empty() {
        println!("Duplicate keys in raw header:");
        for dup in container.duplicates() {
            println!("  - {dup}");
        }
        println!();
    }

    let tensors = container.tensors();
    if !tensors.is_empty() {
        println!("Tensors ({}):", tensors.len());
        for tensor in tensors.iter().take(TENSOR_PREVIEW_ROWS) {
            let dims: Vec<String> = tensor.shape.iter().map(ToString::to_string).collect();
            println!(
                "  - {} [{}, {}, {} bytes]",
                tensor.name,
                dims.join("x"),
                tensor.dtype,
                tensor.nbytes()
            );
        }
        if tensors.len() > TENSOR_PREVIEW_ROWS {
            println!("  ... and {} more", tensors.len() - TENSOR_PREVIEW_ROWS);
        }
        println!();
    }

    let metadata = container.metadata();
    if metadata.is_empty() {
        println!("No metadata.");
    } else {
        println!("Metadata ({} entries):", metadata.len());
        for (key, value) in metadata.iter() {
            println!("  {key} = {}", preview(value));
        }
    }
    Ok(())
}

/// Print one metadata value. Fails with `NotFound` when the key is absent.
pub fn handle_get(file: &Path, key: &str, policy: DuplicatePolicy) -> Result<()> {
    let container = Container::load_with_policy(file, policy)?;
    match container.field(key) {
        Some(value) => {
            println!("{value}");
            Ok(())
        },
        None => Err(crate::RotularError::NotFound {
            key: key.to_string(),
        }),
    }
}

/// Stage one value and save
pub fn handle_set(
    file: &Path,
    key: &str,
    value: &str,
    output: Option<&Path>,
    policy: DuplicatePolicy,
) -> Result<()> {
    let mut container = Container::load_with_policy(file, policy)?;
    container.set_field(key, value)?;
    let dst = output.unwrap_or(file);
    container.save(dst)?;
    println!("Set '{key}'");
    println!("Saved: {}", dst.display());
    Ok(())
}

/// Remove one key and save
pub fn handle_rm(
    file: &Path,
    key: &str,
    output: Option<&Path>,
    policy: DuplicatePolicy,
) -> Result<()> {
    let mut container = Container::load_with_policy(file, policy)?;
    container.remove_field(key)?;
    let dst = output.unwrap_or(file);
    container.save(dst)?;
    println!("Removed '{key}'");
    println!("Saved: {}", dst.display());
    Ok(())
}

/// Print the validation report. Returns whether the metadata is compliant.
pub fn handle_validate(file: &Path, policy: DuplicatePolicy) -> Result<bool> {
    let container = Container::load_with_policy(file, policy)?;
    let report = container.validate();

    if report.is_empty() {
        println!(
            "{}: compliant with ModelSpec {SPEC_VERSION}",
            file.display()
        );
        return Ok(true);
    }

    for violation in report.violations() {
        let marker = if violation.is_advisory() { "note" } else { "FAIL" };
        println!("[{marker}] {violation}");
    }
    if report.is_compliant() {
        println!(
            "{}: compliant with ModelSpec {SPEC_VERSION} (advisory findings above)",
            file.display()
        );
        Ok(true)
    } else {
        println!("{}: not compliant with ModelSpec {SPEC_VERSION}", file.display());
        Ok(false)
    }
}

/// Print the payload hash, optionally stamping it into the metadata
pub fn handle_hash(file: &Path, stamp: bool, policy: DuplicatePolicy) -> Result<()> {
    let mut container = Container::load_with_policy(file, policy)?;
    let hash = if stamp {
        let hash = container.stamp_hash()?;
        container.save(file)?;
        println!("Stamped modelspec.hash_sha256");
        hash
    } else {
        container.payload_sha256()?
    };
    println!("{hash}");
    Ok(())
}

/// Elide long values (thumbnails) for terminal display
fn preview(value: &str) -> String {
    if value.chars().count() <= VALUE_PREVIEW_CHARS {
        value.to_string()
    } else {
        let head: String = value.chars().take(VALUE_PREVIEW_CHARS).collect();
        format!("{head}... ({} chars)", value.chars().count())
    }
}
