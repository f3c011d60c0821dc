//! Cache key computation.
//!
//! A [`CacheKey`] digests everything that affects the rendered bytes: the
//! language, the source text, the engine-specific options, and the output
//! mime type. Two blocks with an identical digest are treated as producing
//! identical output.
//!
//! Every field is framed by its byte length before hashing, so distinct
//! tuples can never collide through concatenation (`"ab" + "c"` vs
//! `"a" + "bc"`). The digest is hex-encoded SHA-256 and doubles as the
//! storage filename in the artifact store.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::language::MimeType;
use crate::options::OptValue;
use crate::resolve::EngineConfig;

/// Cache key over one renderable unit.
#[derive(Debug)]
pub struct CacheKey<'a> {
    /// Canonical language identifier.
    pub language: &'a str,
    /// Diagram source text.
    pub source: &'a str,
    /// Engine-specific options (already merged; sorted by key).
    pub options: &'a BTreeMap<String, OptValue>,
    /// Negotiated output format.
    pub mime: MimeType,
}

impl<'a> CacheKey<'a> {
    /// The key for a resolved block.
    #[must_use]
    pub fn for_block(config: &'a EngineConfig, source: &'a str) -> Self {
        Self {
            language: config.language.id(),
            source,
            options: &config.options,
            mime: config.format,
        }
    }

    /// Compute the hex-encoded SHA-256 digest of this key.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        update_framed(&mut hasher, self.language.as_bytes());
        update_framed(&mut hasher, self.source.as_bytes());
        update_framed(&mut hasher, self.mime.as_mime().as_bytes());
        for (key, value) in self.options {
            update_framed(&mut hasher, key.as_bytes());
            update_framed(&mut hasher, value.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Feed one length-delimited field into the hasher.
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(
        language: &'a str,
        source: &'a str,
        options: &'a BTreeMap<String, OptValue>,
        mime: MimeType,
    ) -> CacheKey<'a> {
        CacheKey {
            language,
            source,
            options,
            mime,
        }
    }

    #[test]
    fn test_digest_is_deterministic() {
        let options = BTreeMap::from([("dpi".to_owned(), OptValue::Int(192))]);
        let a = key("plantuml", "A -> B", &options, MimeType::Svg).digest();
        let b = key("plantuml", "A -> B", &options, MimeType::Svg).digest();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_single_character_change_changes_digest() {
        let options = BTreeMap::new();
        let a = key("plantuml", "A -> B", &options, MimeType::Svg).digest();
        let b = key("plantuml", "A -> C", &options, MimeType::Svg).digest();
        assert_ne!(a, b);
    }

    #[test]
    fn test_every_field_matters() {
        let options = BTreeMap::new();
        let with_opt = BTreeMap::from([("scale".to_owned(), OptValue::Int(2))]);
        let base = key("plantuml", "A -> B", &options, MimeType::Svg).digest();

        assert_ne!(
            base,
            key("mermaid", "A -> B", &options, MimeType::Svg).digest()
        );
        assert_ne!(
            base,
            key("plantuml", "A -> B", &options, MimeType::Png).digest()
        );
        assert_ne!(
            base,
            key("plantuml", "A -> B", &with_opt, MimeType::Svg).digest()
        );
    }

    #[test]
    fn test_field_boundaries_cannot_shift() {
        // Without length framing these two would hash identical bytes.
        let options = BTreeMap::new();
        let a = key("plantumlA", " -> B", &options, MimeType::Svg).digest();
        let b = key("plantuml", "A -> B", &options, MimeType::Svg).digest();
        assert_ne!(a, b);
    }

    #[test]
    fn test_option_boundaries_cannot_shift() {
        let ab = BTreeMap::from([("ab".to_owned(), OptValue::Str("c".to_owned()))]);
        let a = BTreeMap::from([("a".to_owned(), OptValue::Str("bc".to_owned()))]);
        let left = key("d2", "x", &ab, MimeType::Svg).digest();
        let right = key("d2", "x", &a, MimeType::Svg).digest();
        assert_ne!(left, right);
    }
}
