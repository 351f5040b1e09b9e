//! # Rotular
//!
//! Safetensors metadata engine. Rotular (Spanish: "to label") loads a
//! container file, stages metadata edits in memory, validates them against
//! ModelSpec 1.0.1, and rewrites the file atomically while streaming the
//! tensor payload bytes unchanged.
//!
//! ## Format
//!
//! ```text
//! [0:8)       uint64 N (little-endian) - header length
//! [8:8+N)     header JSON: tensor descriptors + optional "__metadata__"
//! [8+N:EOF)   payload bytes, never interpreted by this crate
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rotular::factory::ContainerBuilder;
//! use rotular::Container;
//!
//! # fn main() -> rotular::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("model.safetensors");
//! std::fs::write(&path, ContainerBuilder::minimal_model("Demo"))?;
//!
//! let mut model = Container::load(&path)?;
//! model.set_field("modelspec.author", "Ana")?;
//! assert!(model.validate().is_compliant());
//! model.save(&path)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Loading reads only the prefix and header; payload bytes stay on disk.
//! - Duplicate header keys are detected from the raw bytes and always
//!   surfaced, even though a standard JSON decode collapses them.
//! - Saves are all-or-nothing: temp file, sync, atomic rename. A failed
//!   save leaves the destination byte-identical to its pre-save state.
//! - An unedited load-save cycle reproduces the input file byte for byte.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::cast_possible_truncation)] // u64 -> usize after explicit min()
#![allow(clippy::cast_lossless)] // Allow usize -> u64 with `as`
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::iter_without_into_iter)] // MetadataMap::iter stands alone

/// CLI command implementations (extracted for testability)
pub mod cli;
pub mod container;
pub mod error;
pub mod factory;
pub mod header;
pub mod metadata;
pub mod modelspec;
pub mod scan;
pub mod writer;

// Re-exports for convenience
pub use container::{Container, DuplicatePolicy};
pub use error::{Result, RotularError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
