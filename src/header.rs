//! Container header parser
//!
//! Pure Rust reader for the safetensors container layout: an 8-byte
//! little-endian length prefix, a JSON header describing tensors plus an
//! optional `__metadata__` string map, and the raw payload bytes.
//!
//! ```text
//! [0:8)       uint64 N (little-endian) - header length in bytes
//! [8:8+N)     header JSON (UTF-8):
//!               "tensor_name": {
//!                 "dtype": "F32" | "F16" | ...,
//!                 "shape": [d0, d1, ...],
//!                 "data_offsets": [begin, end]
//!               },
//!               "__metadata__": { "key": "value", ... }
//! [8+N:EOF)   payload bytes, addressed by data_offsets relative to 8+N
//! ```
//!
//! Loading reads only the prefix and header region; payload bytes stay on
//! disk and are referenced by [`PayloadRegion`] until a save streams them.
//!
//! Every descriptor's byte range is checked against the payload size:
//! `begin < end`, `end <= payload`, and ranges never overlap. Violations
//! abort the load with `CorruptOffsets`, so no partially valid container
//! ever escapes this module.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RotularError};
use crate::scan::{scan_header, HeaderScan};

/// Upper bound on the declared header length. Prevents a hostile prefix
/// from driving a huge allocation before any parsing happens.
pub const MAX_HEADER_LEN: u64 = 100_000_000;

/// Key of the optional string map inside the header
pub const METADATA_KEY: &str = "__metadata__";

/// Tensor element type, spelled exactly as the wire format spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Dtype {
    /// 64-bit float
    F64,
    /// 32-bit float
    F32,
    /// 16-bit float
    F16,
    /// Brain float 16
    BF16,
    /// 8-bit float, 5 exponent bits
    #[serde(rename = "F8_E5M2")]
    F8E5M2,
    /// 8-bit float, 4 exponent bits
    #[serde(rename = "F8_E4M3")]
    F8E4M3,
    /// 64-bit signed integer
    I64,
    /// 32-bit signed integer
    I32,
    /// 16-bit signed integer
    I16,
    /// 8-bit signed integer
    I8,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit unsigned integer
    U32,
    /// 16-bit unsigned integer
    U16,
    /// 8-bit unsigned integer
    U8,
    /// Boolean
    #[serde(rename = "BOOL")]
    Bool,
}

impl Dtype {
    /// Wire spelling of this dtype
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::F64 => "F64",
            Dtype::F32 => "F32",
            Dtype::F16 => "F16",
            Dtype::BF16 => "BF16",
            Dtype::F8E5M2 => "F8_E5M2",
            Dtype::F8E4M3 => "F8_E4M3",
            Dtype::I64 => "I64",
            Dtype::I32 => "I32",
            Dtype::I16 => "I16",
            Dtype::I8 => "I8",
            Dtype::U64 => "U64",
            Dtype::U32 => "U32",
            Dtype::U16 => "U16",
            Dtype::U8 => "U8",
            Dtype::Bool => "BOOL",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor JSON shape (internal). Unknown fields are rejected rather
/// than ignored: a save re-emits exactly these three fields, so accepting
/// extras would drop them on the first rewrite.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    dtype: Dtype,
    shape: Vec<u64>,
    data_offsets: [u64; 2],
}

/// One tensor entry of the header. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    /// Tensor name (unique at top level)
    pub name: String,
    /// Element type
    pub dtype: Dtype,
    /// Dimensions in declaration order
    pub shape: Vec<u64>,
    /// Byte range `[begin, end)` relative to the payload region start
    pub data_offsets: [u64; 2],
}

impl TensorDescriptor {
    /// Size of the tensor's byte range
    #[must_use]
    pub fn nbytes(&self) -> u64 {
        self.data_offsets[1] - self.data_offsets[0]
    }
}

/// Location of the payload bytes within the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRegion {
    /// Absolute file offset of the first payload byte (`8 + N`)
    pub offset: u64,
    /// Payload length in bytes (`file size - 8 - N`)
    pub len: u64,
}

/// Parsed container header: descriptor table, metadata entries, raw bytes,
/// and the document-order information needed to re-serialize exactly.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    /// Declared header length N
    pub header_len: u64,
    /// Raw header bytes `[8, 8+N)`
    pub raw: Vec<u8>,
    /// Tensor descriptors in document order
    pub descriptors: Vec<TensorDescriptor>,
    /// Metadata entries in document order (decoder's last-wins values)
    pub metadata: Vec<(String, String)>,
    /// Position of `__metadata__` among the top-level keys, if present
    pub metadata_slot: Option<usize>,
    /// Raw key scan, including any duplicate-key findings
    pub scan: HeaderScan,
    /// Payload location for later streaming
    pub payload: PayloadRegion,
}

impl ContainerHeader {
    /// Parse a container held fully in memory.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` for a short file, a bad length prefix,
    /// invalid UTF-8, or malformed JSON, and `CorruptOffsets` for
    /// descriptor ranges that are inverted, out of range, or overlapping.
    ///
    /// # Examples
    ///
    /// ```
    /// use rotular::header::ContainerHeader;
    ///
    /// let json = br#"{"weight":{"dtype":"F32","shape":[2,3],"data_offsets":[0,24]}}"#;
    /// let mut data = Vec::new();
    /// data.extend_from_slice(&(json.len() as u64).to_le_bytes());
    /// data.extend_from_slice(json);
    /// data.extend_from_slice(&[0u8; 24]);
    ///
    /// let header = ContainerHeader::from_bytes(&data)?;
    /// assert_eq!(header.descriptors.len(), 1);
    /// assert_eq!(header.payload.len, 24);
    /// # Ok::<(), rotular::RotularError>(())
    /// ```
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let file_len = data.len() as u64;
        let header_len = parse_prefix(data.get(..8), file_len)?;
        let n = checked_len(header_len)?;
        let raw = data[8..8 + n].to_vec();
        Self::build(header_len, raw, file_len - 8 - header_len)
    }

    /// Parse a container header from an open file, reading only the prefix
    /// and the header region.
    ///
    /// The cursor is expected at the start of the file; on success it sits
    /// at the first payload byte.
    ///
    /// # Errors
    ///
    /// As [`ContainerHeader::from_bytes`], plus `IoError` for read
    /// failures.
    pub fn from_file(file: &mut File) -> Result<Self> {
        let file_len = file.metadata()?.len();
        let mut prefix = [0u8; 8];
        if file_len < 8 {
            return Err(RotularError::FormatError {
                reason: format!("file too short: {file_len} bytes, need at least 8"),
            });
        }
        file.read_exact(&mut prefix)?;
        let header_len = parse_prefix(Some(&prefix), file_len)?;
        let n = checked_len(header_len)?;
        let mut raw = vec![0u8; n];
        file.read_exact(&mut raw)?;
        Self::build(header_len, raw, file_len - 8 - header_len)
    }

    /// Validate and assemble from the raw header bytes.
    fn build(header_len: u64, raw: Vec<u8>, payload_len: u64) -> Result<Self> {
        if std::str::from_utf8(&raw).is_err() {
            return Err(RotularError::FormatError {
                reason: "header is not valid UTF-8".to_string(),
            });
        }

        // Standard decode first (last-wins values), raw scan second
        // (occurrence counts and document order).
        let parsed: HashMap<String, serde_json::Value> =
            serde_json::from_slice(&raw).map_err(|e| RotularError::FormatError {
                reason: format!("malformed header JSON: {e}"),
            })?;
        let scan = scan_header(&raw)?;

        let mut descriptors = Vec::new();
        let mut metadata = Vec::new();
        let mut metadata_slot = None;
        for (slot, key) in scan.top_level.iter().enumerate() {
            let value = parsed.get(key).ok_or_else(|| RotularError::FormatError {
                reason: format!("scanned key '{key}' missing from decoded header"),
            })?;
            if key == METADATA_KEY {
                metadata_slot = Some(slot);
                metadata = metadata_entries(value, &scan)?;
            } else {
                descriptors.push(descriptor_entry(key, value)?);
            }
        }

        validate_geometry(&descriptors, payload_len)?;

        Ok(Self {
            header_len,
            raw,
            descriptors,
            metadata,
            metadata_slot,
            scan,
            payload: PayloadRegion {
                offset: 8 + header_len,
                len: payload_len,
            },
        })
    }
}

/// Decode and bound-check the 8-byte length prefix.
fn parse_prefix(prefix: Option<&[u8]>, file_len: u64) -> Result<u64> {
    let Some(prefix) = prefix else {
        return Err(RotularError::FormatError {
            reason: format!("file too short: {file_len} bytes, need at least 8"),
        });
    };
    let mut buf = [0u8; 8];
    buf.copy_from_slice(prefix);
    let header_len = u64::from_le_bytes(buf);

    if header_len > MAX_HEADER_LEN {
        return Err(RotularError::FormatError {
            reason: format!("header length {header_len} exceeds maximum {MAX_HEADER_LEN}"),
        });
    }
    if header_len > file_len - 8 {
        return Err(RotularError::FormatError {
            reason: format!(
                "header length {header_len} exceeds file size {file_len} minus prefix"
            ),
        });
    }
    Ok(header_len)
}

fn checked_len(header_len: u64) -> Result<usize> {
    usize::try_from(header_len).map_err(|_| RotularError::FormatError {
        reason: format!("header length {header_len} exceeds platform usize limit"),
    })
}

/// Convert the `__metadata__` value into ordered entries, keeping the raw
/// scan's document order and the decoder's last-wins values.
fn metadata_entries(
    value: &serde_json::Value,
    scan: &HeaderScan,
) -> Result<Vec<(String, String)>> {
    let map = value.as_object().ok_or_else(|| RotularError::FormatError {
        reason: format!("'{METADATA_KEY}' is not a JSON object"),
    })?;
    let mut entries = Vec::with_capacity(map.len());
    for key in &scan.metadata_keys {
        let Some(v) = map.get(key) else {
            // A key from an earlier duplicated __metadata__ object that the
            // decoder's last-wins object no longer contains.
            continue;
        };
        let s = v.as_str().ok_or_else(|| RotularError::FormatError {
            reason: format!("metadata value for '{key}' is not a string"),
        })?;
        entries.push((key.clone(), s.to_string()));
    }
    Ok(entries)
}

fn descriptor_entry(name: &str, value: &serde_json::Value) -> Result<TensorDescriptor> {
    let raw: RawDescriptor =
        serde_json::from_value(value.clone()).map_err(|e| RotularError::FormatError {
            reason: format!("bad descriptor for tensor '{name}': {e}"),
        })?;
    Ok(TensorDescriptor {
        name: name.to_string(),
        dtype: raw.dtype,
        shape: raw.shape,
        data_offsets: raw.data_offsets,
    })
}

/// Check every descriptor range against the payload size and against each
/// other. Ranges are half-open `[begin, end)`.
fn validate_geometry(descriptors: &[TensorDescriptor], payload_len: u64) -> Result<()> {
    for d in descriptors {
        let [begin, end] = d.data_offsets;
        if begin >= end {
            return Err(RotularError::CorruptOffsets {
                tensor: d.name.clone(),
                reason: format!("begin {begin} >= end {end}"),
            });
        }
        if end > payload_len {
            return Err(RotularError::CorruptOffsets {
                tensor: d.name.clone(),
                reason: format!("end {end} exceeds payload size {payload_len}"),
            });
        }
    }

    let mut ranges: Vec<&TensorDescriptor> = descriptors.iter().collect();
    ranges.sort_by_key(|d| d.data_offsets[0]);
    for pair in ranges.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next.data_offsets[0] < prev.data_offsets[1] {
            return Err(RotularError::CorruptOffsets {
                tensor: next.name.clone(),
                reason: format!(
                    "range [{}, {}) overlaps '{}' [{}, {})",
                    next.data_offsets[0],
                    next.data_offsets[1],
                    prev.name,
                    prev.data_offsets[0],
                    prev.data_offsets[1]
                ),
            });
        }
    }
    Ok(())
}
