//! Ordered metadata map
//!
//! The `__metadata__` section of a container header is a string-to-string
//! map whose key order is part of the file's identity: re-serializing in a
//! different order changes the bytes. This map keeps entries in insertion
//! order (document order for loaded files) with Vec-backed storage, which
//! is plenty at metadata scale and keeps iteration deterministic.
//!
//! All mutations are staged in memory; nothing touches storage until the
//! owning container saves. The dirty flag records whether the staged state
//! differs from the loaded state.
//!
//! Values are opaque strings. Collaborators that store structured data
//! (thumbnails, tag lists) encode it themselves.

use crate::error::{Result, RotularError};

/// Ordered string-to-string metadata map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMap {
    entries: Vec<(String, String)>,
    dirty: bool,
}

impl MetadataMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-ordered entries, e.g. a parsed header. The
    /// result starts clean.
    #[must_use]
    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        Self {
            entries,
            dirty: false,
        }
    }

    /// Look up a value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when the key is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a value. Replacing keeps the key's position; a new
    /// key appends at the end. Setting a key to its current value is a
    /// no-op and does not mark the map dirty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for an empty or all-whitespace key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(RotularError::InvalidKey {
                reason: "key is empty".to_string(),
            });
        }
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => {
                if v != value {
                    *v = value.to_string();
                    self.dirty = true;
                }
            },
            None => {
                self.entries.push((key.to_string(), value.to_string()));
                self.dirty = true;
            },
        }
        Ok(())
    }

    /// Remove a key, returning its value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent.
    pub fn remove(&mut self, key: &str) -> Result<String> {
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(at) => {
                let (_, value) = self.entries.remove(at);
                self.dirty = true;
                Ok(value)
            },
            None => Err(RotularError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    /// Iterate entries in insertion order. Each call starts a fresh pass.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the map has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when staged edits differ from the loaded state
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the current state as persisted. Called after a successful save.
    pub(crate) fn reset_dirty(&mut self) {
        self.dirty = false;
    }
}
