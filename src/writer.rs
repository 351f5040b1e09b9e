//! Container writer
//!
//! Rebuilds the header JSON and rewrites a container file without ever
//! touching the payload bytes: they are streamed from the source file's
//! payload region straight into the new file in bounded chunks.
//!
//! Serialization is deterministic compact JSON. Top-level keys keep their
//! document order from the loaded file, with `__metadata__` re-emitted at
//! its original slot, appended at the end when newly added, and omitted
//! when the map is empty. An unedited container therefore saves to
//! byte-identical output.
//!
//! The rewrite is all-or-nothing: prefix, header, and payload go to a
//! `<name>.tmp` file in the destination directory, which is synced and then
//! atomically renamed over the destination. Any failure before the rename
//! leaves the destination byte-identical to its pre-save state and removes
//! the temporary file best-effort.

use std::cmp::min;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::{Result, RotularError};
use crate::header::{Dtype, PayloadRegion, TensorDescriptor, METADATA_KEY};
use crate::metadata::MetadataMap;

/// Chunk size for streaming payload bytes. Bounds peak memory for
/// arbitrarily large tensors.
pub const COPY_CHUNK: usize = 1024 * 1024;

/// Descriptor body as it appears on the wire (the tensor name is the key)
#[derive(Serialize)]
struct DescriptorBody<'a> {
    dtype: Dtype,
    shape: &'a [u64],
    data_offsets: [u64; 2],
}

/// Metadata map serialized in insertion order
struct MetadataBody<'a>(&'a MetadataMap);

impl Serialize for MetadataBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in self.0.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Serialize a header from the descriptor table and the current metadata.
///
/// `metadata_slot` is the position `__metadata__` held among the top-level
/// keys of the loaded file, `None` when it was absent.
///
/// # Errors
///
/// Returns `FormatError` if JSON emission fails.
pub fn serialize_header(
    descriptors: &[TensorDescriptor],
    metadata: &MetadataMap,
    metadata_slot: Option<usize>,
) -> Result<Vec<u8>> {
    let slot = effective_slot(descriptors.len(), metadata, metadata_slot);

    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::new(&mut buf);
    let mut map = ser
        .serialize_map(None)
        .map_err(|e| emit_error(&e))?;

    let total = descriptors.len() + usize::from(slot.is_some());
    let mut next_descriptor = 0;
    for pos in 0..total {
        if slot == Some(pos) {
            map.serialize_entry(METADATA_KEY, &MetadataBody(metadata))
                .map_err(|e| emit_error(&e))?;
        } else {
            let d = &descriptors[next_descriptor];
            next_descriptor += 1;
            map.serialize_entry(
                &d.name,
                &DescriptorBody {
                    dtype: d.dtype,
                    shape: &d.shape,
                    data_offsets: d.data_offsets,
                },
            )
            .map_err(|e| emit_error(&e))?;
        }
    }
    map.end().map_err(|e| emit_error(&e))?;
    Ok(buf)
}

/// Slot `__metadata__` is emitted at: `None` when the map is empty, the
/// original slot when it existed, appended after the descriptors when new.
/// The clamp keeps the slot addressable if descriptors and slot ever come
/// from different headers.
pub(crate) fn effective_slot(
    descriptor_count: usize,
    metadata: &MetadataMap,
    metadata_slot: Option<usize>,
) -> Option<usize> {
    if metadata.is_empty() {
        None
    } else {
        Some(metadata_slot.map_or(descriptor_count, |s| min(s, descriptor_count)))
    }
}

fn emit_error(e: &serde_json::Error) -> RotularError {
    RotularError::FormatError {
        reason: format!("header serialization failed: {e}"),
    }
}

/// Atomically rewrite a container: new prefix and header, payload streamed
/// unchanged from `src`'s payload region.
///
/// `src` and `dst` may be the same path; the source is only ever read, and
/// the destination only changes at the final rename.
///
/// # Errors
///
/// Returns `IoError` when the source cannot be read and `WriteError` when
/// the temporary file cannot be written, synced, or renamed. On error the
/// destination is untouched.
pub fn write_container(
    src: &Path,
    dst: &Path,
    header: &[u8],
    payload: PayloadRegion,
) -> Result<()> {
    let tmp = temp_path(dst);
    if let Err(e) = write_temp(src, &tmp, dst, header, payload) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, dst).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        write_error(dst, format!("rename failed: {e}"))
    })
}

fn write_temp(
    src: &Path,
    tmp: &Path,
    dst: &Path,
    header: &[u8],
    payload: PayloadRegion,
) -> Result<()> {
    let mut reader = File::open(src)?;
    reader.seek(SeekFrom::Start(payload.offset))?;

    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)
        .map_err(|e| write_error(dst, format!("cannot create temporary file: {e}")))?;

    out.write_all(&(header.len() as u64).to_le_bytes())
        .map_err(|e| write_error(dst, format!("prefix write failed: {e}")))?;
    out.write_all(header)
        .map_err(|e| write_error(dst, format!("header write failed: {e}")))?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut remaining = payload.len;
    while remaining > 0 {
        let want = usize::try_from(min(remaining, COPY_CHUNK as u64)).unwrap_or(COPY_CHUNK);
        let got = reader.read(&mut buf[..want])?;
        if got == 0 {
            return Err(write_error(
                dst,
                format!("source payload truncated: {remaining} bytes missing"),
            ));
        }
        out.write_all(&buf[..got])
            .map_err(|e| write_error(dst, format!("payload write failed: {e}")))?;
        remaining -= got as u64;
    }

    out.flush()
        .map_err(|e| write_error(dst, format!("flush failed: {e}")))?;
    out.sync_all()
        .map_err(|e| write_error(dst, format!("sync failed: {e}")))?;
    Ok(())
}

fn write_error(dst: &Path, message: String) -> RotularError {
    RotularError::WriteError {
        path: dst.display().to_string(),
        message,
    }
}

/// `model.safetensors` saves through `model.safetensors.tmp` alongside it.
fn temp_path(dst: &Path) -> PathBuf {
    let mut name = dst
        .file_name()
        .map_or_else(|| OsString::from("container"), OsString::from);
    name.push(".tmp");
    dst.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ContainerHeader;

    fn descriptor(name: &str, begin: u64, end: u64) -> TensorDescriptor {
        TensorDescriptor {
            name: name.to_string(),
            dtype: Dtype::U8,
            shape: vec![end - begin],
            data_offsets: [begin, end],
        }
    }

    fn map_of(entries: &[(&str, &str)]) -> MetadataMap {
        let mut map = MetadataMap::new();
        for (k, v) in entries {
            map.set(k, v).unwrap();
        }
        map
    }

    // ===== Header serialization =====

    #[test]
    fn test_empty_header_serializes_to_empty_object() {
        let bytes = serialize_header(&[], &MetadataMap::new(), None).unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[test]
    fn test_compact_output_no_spaces() {
        let bytes = serialize_header(
            &[descriptor("w", 0, 4)],
            &map_of(&[("k", "v")]),
            None,
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains(' '));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn test_descriptor_field_order_canonical() {
        let bytes = serialize_header(&[descriptor("w", 0, 4)], &MetadataMap::new(), None).unwrap();
        assert_eq!(
            bytes,
            br#"{"w":{"dtype":"U8","shape":[4],"data_offsets":[0,4]}}"#
        );
    }

    #[test]
    fn test_empty_metadata_omitted_even_with_slot() {
        let bytes =
            serialize_header(&[descriptor("w", 0, 4)], &MetadataMap::new(), Some(0)).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains(METADATA_KEY));
    }

    #[test]
    fn test_metadata_keeps_original_slot() {
        let bytes = serialize_header(
            &[descriptor("a", 0, 4), descriptor("b", 4, 8)],
            &map_of(&[("k", "v")]),
            Some(1),
        )
        .unwrap();
        assert_eq!(
            bytes,
            br#"{"a":{"dtype":"U8","shape":[4],"data_offsets":[0,4]},"__metadata__":{"k":"v"},"b":{"dtype":"U8","shape":[4],"data_offsets":[4,8]}}"#
        );
    }

    #[test]
    fn test_new_metadata_appended_at_end() {
        let bytes = serialize_header(
            &[descriptor("a", 0, 4)],
            &map_of(&[("k", "v")]),
            None,
        )
        .unwrap();
        assert_eq!(
            bytes,
            br#"{"a":{"dtype":"U8","shape":[4],"data_offsets":[0,4]},"__metadata__":{"k":"v"}}"#
        );
    }

    #[test]
    fn test_metadata_insertion_order_preserved() {
        let bytes = serialize_header(
            &[],
            &map_of(&[("zz", "1"), ("aa", "2"), ("mm", "3")]),
            None,
        )
        .unwrap();
        assert_eq!(bytes, br#"{"__metadata__":{"zz":"1","aa":"2","mm":"3"}}"#);
    }

    #[test]
    fn test_reserialize_parsed_header_is_identity() {
        let json = r#"{"a":{"dtype":"F32","shape":[2,2],"data_offsets":[0,16]},"__metadata__":{"x":"1","y":"2"},"b":{"dtype":"U8","shape":[4],"data_offsets":[16,20]}}"#;
        let mut data = Vec::new();
        data.extend_from_slice(&(json.len() as u64).to_le_bytes());
        data.extend_from_slice(json.as_bytes());
        data.extend_from_slice(&[0u8; 20]);

        let parsed = ContainerHeader::from_bytes(&data).unwrap();
        let out = serialize_header(
            &parsed.descriptors,
            &MetadataMap::from_entries(parsed.metadata.clone()),
            parsed.metadata_slot,
        )
        .unwrap();
        assert_eq!(out, json.as_bytes());
    }

    #[test]
    fn test_unicode_metadata_round_trips() {
        let map = map_of(&[("autor", "José"), ("emoji", "🦀")]);
        let bytes = serialize_header(&[], &map, None).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["__metadata__"]["autor"], "José");
        assert_eq!(parsed["__metadata__"]["emoji"], "🦀");
    }

    // ===== Atomic rewrite =====

    fn sample_file(dir: &Path, name: &str) -> PathBuf {
        let json = r#"{"w":{"dtype":"U8","shape":[4],"data_offsets":[0,4]}}"#;
        let mut data = Vec::new();
        data.extend_from_slice(&(json.len() as u64).to_le_bytes());
        data.extend_from_slice(json.as_bytes());
        data.extend_from_slice(&[9, 8, 7, 6]);
        let path = dir.join(name);
        fs::write(&path, &data).unwrap();
        path
    }

    #[test]
    fn test_write_to_fresh_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_file(dir.path(), "in.safetensors");
        let dst = dir.path().join("out.safetensors");

        let header = ContainerHeader::from_bytes(&fs::read(&src).unwrap()).unwrap();
        let new_header = serialize_header(
            &header.descriptors,
            &map_of(&[("k", "v")]),
            header.metadata_slot,
        )
        .unwrap();
        write_container(&src, &dst, &new_header, header.payload).unwrap();

        let out = fs::read(&dst).unwrap();
        let n = u64::from_le_bytes(out[..8].try_into().unwrap());
        assert_eq!(n as usize, new_header.len());
        assert_eq!(&out[8..8 + new_header.len()], new_header.as_slice());
        assert_eq!(&out[8 + new_header.len()..], &[9, 8, 7, 6]);
        // no temporary left behind
        assert!(!temp_path(&dst).exists());
    }

    #[test]
    fn test_write_over_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_file(dir.path(), "model.safetensors");

        let header = ContainerHeader::from_bytes(&fs::read(&src).unwrap()).unwrap();
        let new_header = serialize_header(
            &header.descriptors,
            &map_of(&[("edited", "yes")]),
            header.metadata_slot,
        )
        .unwrap();
        write_container(&src, &src, &new_header, header.payload).unwrap();

        let reparsed = ContainerHeader::from_bytes(&fs::read(&src).unwrap()).unwrap();
        assert_eq!(
            reparsed.metadata,
            vec![("edited".to_string(), "yes".to_string())]
        );
        // payload untouched
        let out = fs::read(&src).unwrap();
        assert_eq!(&out[out.len() - 4..], &[9, 8, 7, 6]);
    }

    #[test]
    fn falsify_truncated_source_aborts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_file(dir.path(), "in.safetensors");
        let dst = dir.path().join("out.safetensors");

        let header = ContainerHeader::from_bytes(&fs::read(&src).unwrap()).unwrap();
        let new_header =
            serialize_header(&header.descriptors, &MetadataMap::new(), None).unwrap();

        // shrink the source after load so the payload stream runs dry
        let full = fs::read(&src).unwrap();
        fs::write(&src, &full[..full.len() - 2]).unwrap();

        let err = write_container(&src, &dst, &new_header, header.payload).unwrap_err();
        assert!(matches!(err, RotularError::WriteError { .. }));
        assert!(err.to_string().contains("truncated"));
        assert!(!dst.exists());
        assert!(!temp_path(&dst).exists());
    }

    #[test]
    fn falsify_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_container(
            &dir.path().join("ghost.safetensors"),
            &dir.path().join("out.safetensors"),
            b"{}",
            PayloadRegion { offset: 10, len: 0 },
        )
        .unwrap_err();
        assert!(matches!(err, RotularError::IoError { .. }));
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/x/model.safetensors")),
            Path::new("/x/model.safetensors.tmp")
        );
    }
}
