//! Rotular CLI - safetensors metadata engine
//!
//! Inspect and edit the metadata block of safetensors model files
//! without touching the tensor payload.
//!
//! # Commands
//!
//! - `show` - Dump header summary, tensors, and metadata
//! - `get` - Print a single metadata value
//! - `set` - Set a metadata key and rewrite the file
//! - `rm` - Remove a metadata key and rewrite the file
//! - `validate` - Check metadata against ModelSpec 1.0.1
//! - `hash` - Compute (and optionally stamp) the payload SHA-256

use std::process::ExitCode;

use clap::Parser;

use rotular::cli::{entrypoint, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match entrypoint(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
