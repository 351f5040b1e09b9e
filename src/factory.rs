//! Container factory for tests and benches
//!
//! Builds valid containers in memory without touching disk. Tensors and
//! metadata keep insertion order, since key order is semantic for this
//! format; offsets are computed from the declared data lengths, so the
//! result always passes geometry validation.
//!
//! [`raw_container`] is the escape hatch for deliberately damaged fixtures
//! (duplicate keys, bad offsets, junk headers) that the builder refuses to
//! produce.

use crate::header::{Dtype, TensorDescriptor};
use crate::metadata::MetadataMap;
use crate::writer::serialize_header;

/// Builder for in-memory container files
///
/// ```
/// use rotular::factory::ContainerBuilder;
/// use rotular::header::{ContainerHeader, Dtype};
///
/// let data = ContainerBuilder::new()
///     .tensor("w", Dtype::U8, &[4], &[1, 2, 3, 4])
///     .meta("modelspec.title", "Fixture")
///     .build();
/// let header = ContainerHeader::from_bytes(&data).unwrap();
/// assert_eq!(header.descriptors.len(), 1);
/// ```
#[derive(Default)]
pub struct ContainerBuilder {
    tensors: Vec<(String, Dtype, Vec<u64>, Vec<u8>)>,
    metadata: Vec<(String, String)>,
}

impl ContainerBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tensor with raw bytes
    #[must_use]
    pub fn tensor(mut self, name: &str, dtype: Dtype, shape: &[u64], data: &[u8]) -> Self {
        self.tensors
            .push((name.to_string(), dtype, shape.to_vec(), data.to_vec()));
        self
    }

    /// Add an F32 tensor from values
    #[must_use]
    pub fn f32_tensor(mut self, name: &str, shape: &[u64], values: &[f32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.tensors
            .push((name.to_string(), Dtype::F32, shape.to_vec(), bytes));
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }

    /// Build the container as a byte vector. Metadata, when present, is
    /// emitted first, the way common writers lay out their headers.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut offset = 0u64;
        let mut descriptors = Vec::with_capacity(self.tensors.len());
        let mut payload = Vec::new();
        for (name, dtype, shape, data) in self.tensors {
            let end = offset + data.len() as u64;
            descriptors.push(TensorDescriptor {
                name,
                dtype,
                shape,
                data_offsets: [offset, end],
            });
            offset = end;
            payload.extend_from_slice(&data);
        }

        let map = MetadataMap::from_entries(self.metadata);
        let header =
            serialize_header(&descriptors, &map, Some(0)).expect("header serialization");

        let mut data = Vec::with_capacity(8 + header.len() + payload.len());
        data.extend_from_slice(&(header.len() as u64).to_le_bytes());
        data.extend_from_slice(&header);
        data.extend_from_slice(&payload);
        data
    }

    /// Build a small model with a title, one weight tensor, and one bias
    /// tensor
    #[must_use]
    pub fn minimal_model(title: &str) -> Vec<u8> {
        Self::new()
            .meta("modelspec.sai_model_spec", "1.0.1")
            .meta("modelspec.title", title)
            .meta("modelspec.architecture", "stable-diffusion-v1")
            .f32_tensor("model.weight", &[2, 3], &[0.5; 6])
            .f32_tensor("model.bias", &[3], &[0.1; 3])
            .build()
    }
}

/// Assemble a container from an arbitrary header string and payload. No
/// validation: this is how tests produce duplicate keys, corrupt offsets,
/// and other damage the builder cannot express.
#[must_use]
pub fn raw_container(header_json: &str, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + header_json.len() + payload.len());
    data.extend_from_slice(&(header_json.len() as u64).to_le_bytes());
    data.extend_from_slice(header_json.as_bytes());
    data.extend_from_slice(payload);
    data
}
