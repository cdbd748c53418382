//! Field-vector codec for raw action payloads
//!
//! Ledger actions arrive as an ordered vector of field strings. Field 0 is
//! always the action tag; the rest follow the per-domain schema. Lists are
//! length-prefixed.

use crate::domain::DomainKind;
use crate::types::{Hash32, MirrorError, Result};

/// Prefix separating payload hashes from tree leaves and nodes
const PAYLOAD_PREFIX: u8 = 0x02;

/// Hash of a raw payload. Pure function of the fields, nothing else.
pub fn hash_payload(fields: &[String]) -> Hash32 {
    let mut buf = Vec::with_capacity(1 + fields.len() * 16);
    buf.push(PAYLOAD_PREFIX);
    for field in fields {
        buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
        buf.extend_from_slice(field.as_bytes());
    }
    Hash32::digest(&[&buf])
}

/// Sequential reader over a payload
pub struct FieldReader<'a> {
    domain: DomainKind,
    fields: &'a [String],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(domain: DomainKind, fields: &'a [String]) -> Self {
        Self {
            domain,
            fields,
            pos: 0,
        }
    }

    fn next(&mut self, name: &str) -> Result<&'a str> {
        let field = self.fields.get(self.pos).ok_or_else(|| {
            MirrorError::Decode(format!(
                "{} payload truncated: missing field '{}' at position {}",
                self.domain, name, self.pos
            ))
        })?;
        self.pos += 1;
        Ok(field.as_str())
    }

    pub fn u64(&mut self, name: &str) -> Result<u64> {
        let raw = self.next(name)?;
        raw.parse().map_err(|_| {
            MirrorError::Decode(format!(
                "{} field '{}' is not an unsigned integer: {:?}",
                self.domain, name, raw
            ))
        })
    }

    pub fn u32(&mut self, name: &str) -> Result<u32> {
        let value = self.u64(name)?;
        u32::try_from(value).map_err(|_| {
            MirrorError::Decode(format!("{} field '{}' out of range: {}", self.domain, name, value))
        })
    }

    pub fn string(&mut self, name: &str) -> Result<String> {
        self.next(name).map(str::to_string)
    }

    /// Length-prefixed list of strings
    pub fn list(&mut self, name: &str) -> Result<Vec<String>> {
        let len = self.u64(name)? as usize;
        let remaining = self.fields.len().saturating_sub(self.pos);
        if len > remaining {
            return Err(MirrorError::Decode(format!(
                "{} list '{}' declares {} items but only {} fields remain",
                self.domain, name, len, remaining
            )));
        }
        let items = self.fields[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(items)
    }

    /// Reject trailing fields
    pub fn finish(self) -> Result<()> {
        if self.pos != self.fields.len() {
            return Err(MirrorError::Decode(format!(
                "{} payload has {} unexpected trailing fields",
                self.domain,
                self.fields.len() - self.pos
            )));
        }
        Ok(())
    }

    pub fn unknown_tag(&self, tag: u64) -> MirrorError {
        MirrorError::Decode(format!("{} payload has unknown action tag {}", self.domain, tag))
    }
}

/// Builder for payloads, the inverse of [`FieldReader`]
#[derive(Debug, Default)]
pub struct FieldWriter {
    fields: Vec<String>,
}

impl FieldWriter {
    pub fn tag(tag: u64) -> Self {
        Self {
            fields: vec![tag.to_string()],
        }
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.fields.push(value.to_string());
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        self.fields.push(value.to_string());
        self
    }

    pub fn list(mut self, values: &[String]) -> Self {
        self.fields.push(values.len().to_string());
        self.fields.extend(values.iter().cloned());
        self
    }

    pub fn build(self) -> Vec<String> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reader_consumes_schema() {
        let payload = FieldWriter::tag(0)
            .u64(2)
            .list(&fields(&["a", "b"]))
            .string("ipfs")
            .build();
        let mut r = FieldReader::new(DomainKind::Committee, &payload);
        assert_eq!(r.u64("tag").unwrap(), 0);
        assert_eq!(r.u32("threshold").unwrap(), 2);
        assert_eq!(r.list("members").unwrap(), fields(&["a", "b"]));
        assert_eq!(r.string("ipfs").unwrap(), "ipfs");
        r.finish().unwrap();
    }

    #[test]
    fn test_list_longer_than_payload() {
        let payload = fields(&["5", "a"]);
        let mut r = FieldReader::new(DomainKind::Project, &payload);
        assert!(matches!(r.list("members"), Err(MirrorError::Decode(_))));
    }

    #[test]
    fn test_trailing_fields_rejected() {
        let payload = fields(&["0", "extra"]);
        let mut r = FieldReader::new(DomainKind::Round1, &payload);
        r.u64("tag").unwrap();
        assert!(r.finish().is_err());
    }

    #[test]
    fn test_payload_hash_is_length_prefixed() {
        // ["ab", "c"] and ["a", "bc"] must not collide
        assert_ne!(hash_payload(&fields(&["ab", "c"])), hash_payload(&fields(&["a", "bc"])));
        assert_eq!(hash_payload(&fields(&["1"])), hash_payload(&fields(&["1"])));
    }
}
