//! Container facade
//!
//! A [`Container`] is one open safetensors file: the parsed header, the
//! staged metadata edits, and the location of the payload bytes left on
//! disk. It is a plain caller-owned value; the crate keeps no process-wide
//! state about which file is "current".
//!
//! The lifecycle is load, edit, validate, save. Edits stage in memory and
//! reach disk only through [`Container::save`], which rewrites the file
//! atomically. After a successful save the handle re-points at the file it
//! just wrote, so further edits and saves remain valid.
//!
//! Duplicate header keys are always detected at load. Under the default
//! [`DuplicatePolicy::Advisory`] the report rides on the container and the
//! decoder's last-wins values are used; saving such a file writes the
//! collapsed map. [`DuplicatePolicy::Fatal`] refuses to load instead.

use std::cmp::min;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Result, RotularError};
use crate::header::{ContainerHeader, PayloadRegion, TensorDescriptor};
use crate::metadata::MetadataMap;
use crate::modelspec::{self, ValidationReport};
use crate::scan::DuplicateKey;
use crate::writer::{self, COPY_CHUNK};

/// Key the payload hash is staged under by [`Container::stamp_hash`]
pub const HASH_KEY: &str = "modelspec.hash_sha256";

/// How a load treats duplicate keys found in the raw header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep the report on the container and continue with the decoder's
    /// last-wins values
    #[default]
    Advisory,
    /// Abort the load with `DuplicateKeys`
    Fatal,
}

/// One open container file
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    header_len: u64,
    descriptors: Vec<TensorDescriptor>,
    metadata: MetadataMap,
    metadata_slot: Option<usize>,
    payload: PayloadRegion,
    duplicates: Vec<DuplicateKey>,
}

impl Container {
    /// Load a container under the default advisory duplicate policy.
    ///
    /// # Errors
    ///
    /// Returns `IoError` when the file cannot be opened, `FormatError` for
    /// structural damage, and `CorruptOffsets` for bad tensor geometry.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_policy(path, DuplicatePolicy::default())
    }

    /// Load a container with an explicit duplicate policy.
    ///
    /// # Errors
    ///
    /// As [`Container::load`], plus `DuplicateKeys` under
    /// [`DuplicatePolicy::Fatal`] when the raw header repeats a key.
    pub fn load_with_policy(path: impl AsRef<Path>, policy: DuplicatePolicy) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let header = ContainerHeader::from_file(&mut file)?;

        if policy == DuplicatePolicy::Fatal && !header.scan.is_clean() {
            return Err(RotularError::DuplicateKeys {
                keys: header.scan.duplicates,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            header_len: header.header_len,
            descriptors: header.descriptors,
            metadata: MetadataMap::from_entries(header.metadata),
            metadata_slot: header.metadata_slot,
            payload: header.payload,
            duplicates: header.scan.duplicates,
        })
    }

    /// File this container currently references
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared header length of the referenced file
    #[must_use]
    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Tensor descriptors in document order. Immutable after load.
    #[must_use]
    pub fn tensors(&self) -> &[TensorDescriptor] {
        &self.descriptors
    }

    /// Payload location within the referenced file
    #[must_use]
    pub fn payload(&self) -> PayloadRegion {
        self.payload
    }

    /// Duplicate keys found in the raw header at load, document order
    #[must_use]
    pub fn duplicates(&self) -> &[DuplicateKey] {
        &self.duplicates
    }

    /// The staged metadata map
    #[must_use]
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Mutable access to the staged metadata map
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// Look up one metadata value
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)
    }

    /// Stage one metadata value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for an empty key.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        self.metadata.set(key, value)
    }

    /// Remove one metadata value from the staged map.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent.
    pub fn remove_field(&mut self, key: &str) -> Result<String> {
        self.metadata.remove(key)
    }

    /// True when staged edits differ from the referenced file
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.metadata.is_dirty()
    }

    /// Validate the staged metadata against ModelSpec 1.0.1. Read-only;
    /// a non-compliant report does not block saving.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        modelspec::validate(&self.metadata)
    }

    /// Atomically save to `dst`, which may be the loaded path. The payload
    /// bytes are streamed unchanged; only the prefix and header are
    /// rebuilt. On success the handle re-points at `dst`.
    ///
    /// # Errors
    ///
    /// Returns `IoError` when the source cannot be read and `WriteError`
    /// when writing fails; either way `dst` is untouched on error.
    pub fn save(&mut self, dst: impl AsRef<Path>) -> Result<()> {
        let dst = dst.as_ref();
        let header =
            writer::serialize_header(&self.descriptors, &self.metadata, self.metadata_slot)?;
        writer::write_container(&self.path, dst, &header, self.payload)?;

        // The handle now describes the file just written.
        self.metadata_slot =
            writer::effective_slot(self.descriptors.len(), &self.metadata, self.metadata_slot);
        self.header_len = header.len() as u64;
        self.payload = PayloadRegion {
            offset: 8 + self.header_len,
            len: self.payload.len,
        };
        self.path = dst.to_path_buf();
        self.duplicates.clear();
        self.metadata.reset_dirty();
        Ok(())
    }

    /// Stream the payload through SHA-256, returning `0x` plus 64 lowercase
    /// hex digits, the spelling `modelspec.hash_sha256` expects.
    ///
    /// # Errors
    ///
    /// Returns `IoError` when the referenced file cannot be read or is
    /// shorter than the recorded payload region.
    pub fn payload_sha256(&self) -> Result<String> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.payload.offset))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut remaining = self.payload.len;
        while remaining > 0 {
            let want = usize::try_from(min(remaining, COPY_CHUNK as u64)).unwrap_or(COPY_CHUNK);
            let got = file.read(&mut buf[..want])?;
            if got == 0 {
                return Err(RotularError::IoError {
                    message: format!(
                        "payload truncated while hashing: {remaining} bytes missing"
                    ),
                });
            }
            hasher.update(&buf[..got]);
            remaining -= got as u64;
        }
        Ok(format!("0x{}", hex::encode(hasher.finalize())))
    }

    /// Compute the payload hash and stage it under `modelspec.hash_sha256`.
    /// Returns the hash.
    ///
    /// # Errors
    ///
    /// As [`Container::payload_sha256`].
    pub fn stamp_hash(&mut self) -> Result<String> {
        let hash = self.payload_sha256()?;
        self.metadata.set(HASH_KEY, &hash)?;
        Ok(hash)
    }
}
