use crate::transform::TransformRequest;
use sha2::{Digest, Sha256};
use std::fmt;

const DELIMITER: char = '-';

/// Hex SHA-256 over the canonical parameter string; addresses a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strong entity tag derived from a [`CacheKey`], serialized with its quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator(String);

impl Validator {
    pub fn for_key(key: &CacheKey) -> Self {
        Validator(format!("\"{}\"", key.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `url-width-height-quality-format`, absent dimensions rendered as empty strings.
pub fn canonical_string(req: &TransformRequest) -> String {
    let dim = |d: Option<u32>| d.map(|v| v.to_string()).unwrap_or_default();
    format!(
        "{url}{d}{w}{d}{h}{d}{q}{d}{f}",
        url = req.url,
        w = dim(req.width),
        h = dim(req.height),
        q = req.quality,
        f = req.format,
        d = DELIMITER,
    )
}

pub fn digest(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derives the cache key and its HTTP validator for a normalized request.
pub fn derive(req: &TransformRequest) -> (CacheKey, Validator) {
    let key = CacheKey(digest(&canonical_string(req)));
    let validator = Validator::for_key(&key);
    (key, validator)
}
