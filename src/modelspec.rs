//! ModelSpec field validation
//!
//! Validates container metadata against the ModelSpec 1.0.1 field table.
//! All specification keys live under the `modelspec.` namespace; keys
//! outside it are caller-private and never validated.
//!
//! Findings are collected into a [`ValidationReport`], never raised as
//! errors: a structurally valid file with non-compliant metadata still
//! loads and saves. Three finding kinds exist:
//!
//! - `MissingField`: a required key is absent
//! - `InvalidFormat`: a present value fails its field's format rule
//! - `Unrecognized`: a `modelspec.` key not in the table (advisory only,
//!   so files written against future spec revisions keep validating)
//!
//! The hash field is format-checked only. Computing a payload hash is the
//! caller's move, see [`Container::payload_sha256`](crate::Container::payload_sha256).

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::metadata::MetadataMap;

/// Specification version this table implements
pub const SPEC_VERSION: &str = "1.0.1";

/// Namespace prefix of all specification keys
pub const SPEC_PREFIX: &str = "modelspec.";

/// Character cap for ordinary text fields
pub const MAX_FIELD_CHARS: usize = 1000;

/// Character cap for the description field
pub const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Format rule applied to a present field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Must equal the supported specification version literal
    Marker,
    /// Must contain at least one non-whitespace character
    NonEmpty,
    /// Free-form text
    Text,
    /// ISO-8601 date or date-time
    Date,
    /// `epsilon` or `v`, meaningful only for stable-diffusion architectures
    PredictionType,
    /// `0x` followed by 64 lowercase hex digits
    Sha256,
    /// `data:image/...;base64,` URI
    DataUri,
}

/// Static definition of one specification field
#[derive(Debug, Clone, Copy)]
pub struct SpecField {
    /// Fully qualified key, e.g. `modelspec.title`
    pub key: &'static str,
    /// Whether absence is a violation
    pub required: bool,
    /// Format rule for present values
    pub rule: FieldRule,
    /// Character cap, `None` for uncapped values (thumbnails)
    pub max_chars: Option<usize>,
}

/// The ModelSpec 1.0.1 field table. Defined once, never mutated.
pub const SPEC_FIELDS: &[SpecField] = &[
    SpecField {
        key: "modelspec.sai_model_spec",
        required: true,
        rule: FieldRule::Marker,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.title",
        required: true,
        rule: FieldRule::NonEmpty,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.architecture",
        required: true,
        rule: FieldRule::Text,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.implementation",
        required: false,
        rule: FieldRule::Text,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.description",
        required: false,
        rule: FieldRule::Text,
        max_chars: Some(MAX_DESCRIPTION_CHARS),
    },
    SpecField {
        key: "modelspec.author",
        required: false,
        rule: FieldRule::Text,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.license",
        required: false,
        rule: FieldRule::Text,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.date",
        required: false,
        rule: FieldRule::Date,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.prediction_type",
        required: false,
        rule: FieldRule::PredictionType,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.hash_sha256",
        required: false,
        rule: FieldRule::Sha256,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.usage_hint",
        required: false,
        rule: FieldRule::Text,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.thumbnail",
        required: false,
        rule: FieldRule::DataUri,
        max_chars: None,
    },
    SpecField {
        key: "modelspec.tags",
        required: false,
        rule: FieldRule::Text,
        max_chars: Some(MAX_FIELD_CHARS),
    },
    SpecField {
        key: "modelspec.merged_from",
        required: false,
        rule: FieldRule::Text,
        max_chars: Some(MAX_FIELD_CHARS),
    },
];

fn spec_field(key: &str) -> Option<&'static SpecField> {
    SPEC_FIELDS.iter().find(|f| f.key == key)
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A required specification field is absent
    MissingField {
        /// The absent key
        field: &'static str,
    },
    /// A present value fails its field's format rule
    InvalidFormat {
        /// The offending key
        field: String,
        /// Which rule failed and how
        reason: String,
    },
    /// A namespaced key not in the field table (advisory)
    Unrecognized {
        /// The unknown key
        field: String,
    },
}

impl Violation {
    /// Key this finding concerns
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Violation::MissingField { field } => field,
            Violation::InvalidFormat { field, .. } | Violation::Unrecognized { field } => field,
        }
    }

    /// Advisory findings do not affect compliance
    #[must_use]
    pub fn is_advisory(&self) -> bool {
        matches!(self, Violation::Unrecognized { .. })
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingField { field } => {
                write!(f, "missing required field '{field}'")
            },
            Violation::InvalidFormat { field, reason } => {
                write!(f, "invalid '{field}': {reason}")
            },
            Violation::Unrecognized { field } => {
                write!(f, "unrecognized key '{field}' (not in ModelSpec {SPEC_VERSION})")
            },
        }
    }
}

/// Result of one validation pass. Built fresh per call, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    /// All findings, missing fields first, then per-entry findings in
    /// metadata order
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// True when nothing beyond advisory findings was recorded
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.violations.iter().all(Violation::is_advisory)
    }

    /// True when no findings at all were recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Validate metadata against the ModelSpec 1.0.1 table. Read-only: the
/// map is never mutated.
#[must_use]
pub fn validate(metadata: &MetadataMap) -> ValidationReport {
    let mut violations = Vec::new();

    for field in SPEC_FIELDS {
        if field.required && !metadata.contains_key(field.key) {
            violations.push(Violation::MissingField { field: field.key });
        }
    }

    for (key, value) in metadata.iter() {
        if !key.starts_with(SPEC_PREFIX) {
            continue;
        }
        match spec_field(key) {
            Some(field) => check_field(field, value, metadata, &mut violations),
            None => violations.push(Violation::Unrecognized {
                field: key.to_string(),
            }),
        }
    }

    ValidationReport { violations }
}

fn check_field(
    field: &SpecField,
    value: &str,
    metadata: &MetadataMap,
    violations: &mut Vec<Violation>,
) {
    if let Some(max) = field.max_chars {
        let chars = value.chars().count();
        if chars > max {
            violations.push(Violation::InvalidFormat {
                field: field.key.to_string(),
                reason: format!("too long: {chars} chars, max {max}"),
            });
        }
    }

    let reason = match field.rule {
        FieldRule::Marker => {
            if value == SPEC_VERSION {
                None
            } else {
                Some(format!(
                    "unsupported specification version '{value}', expected '{SPEC_VERSION}'"
                ))
            }
        },
        FieldRule::NonEmpty => {
            if value.trim().is_empty() {
                Some("must not be empty".to_string())
            } else {
                None
            }
        },
        FieldRule::Text => None,
        FieldRule::Date => {
            if is_iso8601(value) {
                None
            } else {
                Some(format!("'{value}' is not an ISO-8601 date"))
            }
        },
        FieldRule::PredictionType => check_prediction_type(value, metadata),
        FieldRule::Sha256 => {
            if is_sha256_hex(value) {
                None
            } else {
                Some("expected '0x' followed by 64 lowercase hex digits".to_string())
            }
        },
        FieldRule::DataUri => {
            if value.starts_with("data:image/") && value.contains(";base64,") {
                None
            } else {
                Some("expected a 'data:image/...;base64,' URI".to_string())
            }
        },
    };

    if let Some(reason) = reason {
        violations.push(Violation::InvalidFormat {
            field: field.key.to_string(),
            reason,
        });
    }
}

fn check_prediction_type(value: &str, metadata: &MetadataMap) -> Option<String> {
    if value != "epsilon" && value != "v" {
        return Some(format!("'{value}' is not one of 'epsilon', 'v'"));
    }
    if let Some(arch) = metadata.get("modelspec.architecture") {
        if !arch.starts_with("stable-diffusion") {
            return Some(format!("not applicable to architecture '{arch}'"));
        }
    }
    None
}

/// Accepts RFC 3339 (`2023-07-21T14:00:00Z`, offset forms), a bare
/// date-time, or a bare date.
fn is_iso8601(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

fn is_sha256_hex(value: &str) -> bool {
    value.strip_prefix("0x").is_some_and(|hex| {
        hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}
