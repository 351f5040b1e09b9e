//! Raw header key scanner
//!
//! A standard JSON decoder collapses repeated object keys (last write wins),
//! so duplicate keys in a container header vanish before any map-based code
//! can see them. This module re-walks the raw header bytes and records every
//! key occurrence at the two levels that matter for a container: the top
//! level (tensor names plus `__metadata__`) and the inside of the
//! `__metadata__` object.
//!
//! ```text
//! {"__metadata__":{"a":"1","a":"2"},"weight":{...}}
//!                      ^~~~~~~~~~^
//!                      collapsed by serde_json, reported here as
//!                      __metadata__.a (x2)
//! ```
//!
//! The scan also yields the document order of keys at both levels. The
//! writer replays that order so an unedited save reproduces the input bytes.
//!
//! Key spellings are decoded before counting, so `"\u0061"` and `"a"`
//! are the same key.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, RotularError};

/// Which object a scanned key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// Top level of the header (tensor names and `__metadata__` itself)
    Header,
    /// Inside the `__metadata__` object
    Metadata,
}

/// A key that occurred more than once in the raw header bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    /// Object the key was repeated in
    pub scope: KeyScope,
    /// Decoded key spelling
    pub name: String,
    /// Total number of occurrences (always >= 2)
    pub count: usize,
}

impl DuplicateKey {
    /// Render the key as a path, qualifying metadata keys with their parent
    #[must_use]
    pub fn path(&self) -> String {
        match self.scope {
            KeyScope::Header => self.name.clone(),
            KeyScope::Metadata => format!("__metadata__.{}", self.name),
        }
    }
}

impl fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (x{})", self.path(), self.count)
    }
}

/// Result of one raw header scan
#[derive(Debug, Clone, Default)]
pub struct HeaderScan {
    /// Top-level keys in document order, first occurrence wins
    pub top_level: Vec<String>,
    /// Keys of the `__metadata__` object in document order
    pub metadata_keys: Vec<String>,
    /// Keys occurring more than once, in order of first occurrence
    pub duplicates: Vec<DuplicateKey>,
}

impl HeaderScan {
    /// True when no key occurred more than once at either level
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty()
    }
}

/// Scan raw header bytes, recording key occurrences and document order.
///
/// The input is expected to be a JSON object (the bytes between the length
/// prefix and the payload). Structural damage surfaces as `FormatError`;
/// callers normally parse the bytes with `serde_json` first, so errors here
/// indicate a scanner/decoder disagreement on the same bytes.
///
/// # Errors
///
/// Returns `FormatError` if the bytes are not a single JSON object.
pub fn scan_header(bytes: &[u8]) -> Result<HeaderScan> {
    let mut scanner = Scanner { bytes, pos: 0 };
    let mut accum = Accumulator::default();

    scanner.skip_ws();
    scanner.expect(b'{')?;
    scanner.top_level_object(&mut accum)?;
    scanner.skip_ws();
    if scanner.pos != scanner.bytes.len() {
        return Err(RotularError::FormatError {
            reason: format!("trailing bytes after header JSON at offset {}", scanner.pos),
        });
    }

    Ok(accum.finish())
}

/// Occurrence bookkeeping: one entry per distinct (scope, key), in first
/// occurrence order, with a side index for O(1) repeat lookups.
#[derive(Default)]
struct Accumulator {
    entries: Vec<(KeyScope, String, usize)>,
    index: HashMap<(KeyScope, String), usize>,
}

impl Accumulator {
    fn record(&mut self, scope: KeyScope, name: &str) {
        let lookup = (scope, name.to_string());
        if let Some(&at) = self.index.get(&lookup) {
            self.entries[at].2 += 1;
        } else {
            self.entries.push((scope, name.to_string(), 1));
            self.index.insert(lookup, self.entries.len() - 1);
        }
    }

    fn finish(self) -> HeaderScan {
        let mut scan = HeaderScan::default();
        for (scope, name, count) in self.entries {
            match scope {
                KeyScope::Header => scan.top_level.push(name.clone()),
                KeyScope::Metadata => scan.metadata_keys.push(name.clone()),
            }
            if count > 1 {
                scan.duplicates.push(DuplicateKey { scope, name, count });
            }
        }
        scan
    }
}

/// Byte cursor over the raw header
struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Scanner<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        match self.bump() {
            Some(b) if b == want => Ok(()),
            Some(b) => Err(self.fail(format!(
                "expected '{}', found '{}'",
                want as char, b as char
            ))),
            None => Err(self.fail(format!("expected '{}', found end of input", want as char))),
        }
    }

    fn fail(&self, reason: String) -> RotularError {
        RotularError::FormatError {
            reason: format!("{reason} at offset {}", self.pos.saturating_sub(1)),
        }
    }

    /// Walk the top-level object, recording its keys and descending into a
    /// `__metadata__` object value when one appears. Cursor sits just past
    /// the opening brace on entry and just past the closing brace on exit.
    fn top_level_object(&mut self, accum: &mut Accumulator) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(());
        }
        loop {
            self.skip_ws();
            let key = self.string()?;
            accum.record(KeyScope::Header, &key);
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            if key == "__metadata__" && self.peek() == Some(b'{') {
                self.pos += 1;
                self.recorded_object(accum, KeyScope::Metadata)?;
            } else {
                self.skip_value()?;
            }
            self.skip_ws();
            match self.bump() {
                Some(b',') => {},
                Some(b'}') => return Ok(()),
                Some(b) => return Err(self.fail(format!("expected ',' or '}}', found '{}'", b as char))),
                None => return Err(self.fail("unterminated object".to_string())),
            }
        }
    }

    /// Walk an object recording every key into `scope`, skipping the values.
    fn recorded_object(&mut self, accum: &mut Accumulator, scope: KeyScope) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(());
        }
        loop {
            self.skip_ws();
            let key = self.string()?;
            accum.record(scope, &key);
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            self.skip_value()?;
            self.skip_ws();
            match self.bump() {
                Some(b',') => {},
                Some(b'}') => return Ok(()),
                Some(b) => return Err(self.fail(format!("expected ',' or '}}', found '{}'", b as char))),
                None => return Err(self.fail("unterminated object".to_string())),
            }
        }
    }

    /// Skip any JSON value without recording anything.
    fn skip_value(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'{') => {
                self.pos += 1;
                self.skip_object()
            },
            Some(b'[') => {
                self.pos += 1;
                self.skip_array()
            },
            Some(b'"') => self.skip_string(),
            Some(_) => self.skip_literal(),
            None => Err(self.fail("expected value, found end of input".to_string())),
        }
    }

    fn skip_object(&mut self) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(());
        }
        loop {
            self.skip_ws();
            self.skip_string()?;
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            self.skip_value()?;
            self.skip_ws();
            match self.bump() {
                Some(b',') => {},
                Some(b'}') => return Ok(()),
                Some(b) => return Err(self.fail(format!("expected ',' or '}}', found '{}'", b as char))),
                None => return Err(self.fail("unterminated object".to_string())),
            }
        }
    }

    fn skip_array(&mut self) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(());
        }
        loop {
            self.skip_ws();
            self.skip_value()?;
            self.skip_ws();
            match self.bump() {
                Some(b',') => {},
                Some(b']') => return Ok(()),
                Some(b) => return Err(self.fail(format!("expected ',' or ']', found '{}'", b as char))),
                None => return Err(self.fail("unterminated array".to_string())),
            }
        }
    }

    /// Find the end of a string token without decoding it.
    fn skip_string(&mut self) -> Result<()> {
        self.string_token().map(|_| ())
    }

    /// Decode a string token through serde_json so escape spellings
    /// normalize to one key.
    fn string(&mut self) -> Result<String> {
        let token = self.string_token()?;
        serde_json::from_slice(token).map_err(|e| RotularError::FormatError {
            reason: format!("invalid string token in header: {e}"),
        })
    }

    /// Consume a quoted string, returning the raw token including both
    /// quotes. A backslash escapes exactly one following byte, which is
    /// enough to find the closing quote (`\uXXXX` payloads contain no
    /// quote bytes).
    fn string_token(&mut self) -> Result<&[u8]> {
        let start = self.pos;
        self.expect(b'"')?;
        loop {
            match self.bump() {
                Some(b'"') => return Ok(&self.bytes[start..self.pos]),
                Some(b'\\') => {
                    if self.bump().is_none() {
                        return Err(self.fail("unterminated string escape".to_string()));
                    }
                },
                Some(_) => {},
                None => return Err(self.fail("unterminated string".to_string())),
            }
        }
    }

    /// Skip a number, `true`, `false`, or `null`.
    fn skip_literal(&mut self) -> Result<()> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'-' | b'+' | b'.' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            let found = self.peek().map_or("end of input".to_string(), |b| {
                format!("'{}'", b as char)
            });
            return Err(self.fail(format!("expected value, found {found}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(json: &str) -> HeaderScan {
        scan_header(json.as_bytes()).unwrap()
    }

    // ===== Clean documents =====

    #[test]
    fn test_empty_header_is_clean() {
        let scan = scan("{}");
        assert!(scan.is_clean());
        assert!(scan.top_level.is_empty());
        assert!(scan.metadata_keys.is_empty());
    }

    #[test]
    fn test_single_tensor_no_duplicates() {
        let scan = scan(r#"{"weight":{"dtype":"F32","shape":[2,3],"data_offsets":[0,24]}}"#);
        assert!(scan.is_clean());
        assert_eq!(scan.top_level, vec!["weight"]);
    }

    #[test]
    fn test_document_order_preserved() {
        let scan = scan(
            r#"{"zz":{"dtype":"F32","shape":[1],"data_offsets":[0,4]},"__metadata__":{"b":"2","a":"1"},"aa":{"dtype":"F32","shape":[1],"data_offsets":[4,8]}}"#,
        );
        assert_eq!(scan.top_level, vec!["zz", "__metadata__", "aa"]);
        assert_eq!(scan.metadata_keys, vec!["b", "a"]);
    }

    // ===== Duplicate detection =====

    #[test]
    fn test_metadata_duplicate_reported_with_count() {
        let scan = scan(r#"{"__metadata__": {"a": "1", "a": "2"}}"#);
        assert_eq!(scan.duplicates.len(), 1);
        let dup = &scan.duplicates[0];
        assert_eq!(dup.scope, KeyScope::Metadata);
        assert_eq!(dup.name, "a");
        assert_eq!(dup.count, 2);
        assert_eq!(dup.path(), "__metadata__.a");
    }

    #[test]
    fn test_top_level_duplicate_reported() {
        let scan = scan(
            r#"{"w":{"dtype":"F32","shape":[1],"data_offsets":[0,4]},"w":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}}"#,
        );
        assert_eq!(scan.duplicates.len(), 1);
        assert_eq!(scan.duplicates[0].scope, KeyScope::Header);
        assert_eq!(scan.duplicates[0].name, "w");
        assert_eq!(scan.duplicates[0].count, 2);
        // first occurrence wins the order slot, listed once
        assert_eq!(scan.top_level, vec!["w"]);
    }

    #[test]
    fn test_triple_occurrence_counted() {
        let scan = scan(r#"{"__metadata__":{"k":"1","k":"2","k":"3"}}"#);
        assert_eq!(scan.duplicates[0].count, 3);
    }

    #[test]
    fn test_escaped_spelling_counts_as_same_key() {
        // "\u0061" decodes to "a"
        let scan = scan(r#"{"__metadata__":{"a":"1","\u0061":"2"}}"#);
        assert_eq!(scan.duplicates.len(), 1);
        assert_eq!(scan.duplicates[0].name, "a");
        assert_eq!(scan.duplicates[0].count, 2);
    }

    #[test]
    fn test_same_key_in_both_scopes_is_not_a_duplicate() {
        let scan = scan(
            r#"{"title":{"dtype":"F32","shape":[1],"data_offsets":[0,4]},"__metadata__":{"title":"x"}}"#,
        );
        assert!(scan.is_clean());
    }

    #[test]
    fn test_duplicates_in_first_occurrence_order() {
        let scan = scan(r#"{"__metadata__":{"b":"1","a":"1","b":"2","a":"2"}}"#);
        let names: Vec<&str> = scan.duplicates.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    // ===== Values that must not confuse the scanner =====

    #[test]
    fn test_braces_and_quotes_inside_string_values() {
        let scan = scan(r#"{"__metadata__":{"desc":"a \"quoted\" value with { and } and [","x":"1"}}"#);
        assert!(scan.is_clean());
        assert_eq!(scan.metadata_keys, vec!["desc", "x"]);
    }

    #[test]
    fn test_nested_descriptor_keys_not_recorded() {
        // dtype/shape/data_offsets repeat across descriptors but are not
        // top-level or metadata keys
        let scan = scan(
            r#"{"a":{"dtype":"F32","shape":[1],"data_offsets":[0,4]},"b":{"dtype":"F32","shape":[1],"data_offsets":[4,8]}}"#,
        );
        assert!(scan.is_clean());
    }

    #[test]
    fn test_whitespace_tolerated() {
        let scan = scan("{ \"__metadata__\" : { \"a\" : \"1\" ,\n\t\"a\" : \"2\" } }");
        assert_eq!(scan.duplicates[0].count, 2);
    }

    #[test]
    fn test_metadata_with_non_object_value_scanned_as_plain_key() {
        // A bogus non-object __metadata__ still records the top-level key;
        // the parser rejects the document separately
        let scan = scan(r#"{"__metadata__":"oops"}"#);
        assert_eq!(scan.top_level, vec!["__metadata__"]);
        assert!(scan.metadata_keys.is_empty());
    }

    #[test]
    fn test_duplicated_metadata_object_aggregates_keys() {
        let scan = scan(r#"{"__metadata__":{"a":"1"},"__metadata__":{"a":"2"}}"#);
        let meta_dup = scan
            .duplicates
            .iter()
            .find(|d| d.scope == KeyScope::Header)
            .unwrap();
        assert_eq!(meta_dup.name, "__metadata__");
        assert_eq!(meta_dup.count, 2);
        let key_dup = scan
            .duplicates
            .iter()
            .find(|d| d.scope == KeyScope::Metadata)
            .unwrap();
        assert_eq!(key_dup.name, "a");
        assert_eq!(key_dup.count, 2);
    }

    // ===== Malformed input =====

    #[test]
    fn falsify_trailing_garbage_rejected() {
        let err = scan_header(br#"{} extra"#).unwrap_err();
        assert!(err.to_string().contains("trailing bytes"));
    }

    #[test]
    fn falsify_non_object_top_level_rejected() {
        assert!(scan_header(b"[1,2,3]").is_err());
        assert!(scan_header(b"42").is_err());
        assert!(scan_header(b"").is_err());
    }

    #[test]
    fn falsify_unterminated_string_rejected() {
        assert!(scan_header(br#"{"abc"#).is_err());
    }

    #[test]
    fn falsify_unterminated_object_rejected() {
        assert!(scan_header(br#"{"a":"1""#).is_err());
    }

    #[test]
    fn falsify_missing_colon_rejected() {
        assert!(scan_header(br#"{"a" "1"}"#).is_err());
    }
}
