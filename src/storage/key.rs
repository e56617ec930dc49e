//! Content-addressed keys

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const KEY_LEN: usize = 64;
const LEGACY_KEY_LEN: usize = 32;

/// SHA-256 of the stored bytes, lowercase hex.
///
/// The key is both the dedup identity and the public retrieval token, so it is
/// only ever constructed by hashing or by strict parsing. Records written before
/// the switch to SHA-256 are keyed by 32-char MD5 hex; such keys can be parsed
/// for lookups with [`ContentKey::parse_for_lookup`] but are never minted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    /// Hash raw bytes into a key
    pub fn hash(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a key received from outside; rejects anything but 64 lowercase hex chars
    pub fn parse(raw: &str) -> Option<Self> {
        (raw.len() == KEY_LEN && is_lower_hex(raw)).then(|| Self(raw.to_string()))
    }

    /// Like [`ContentKey::parse`], but also accepts legacy 32-char keys
    pub fn parse_for_lookup(raw: &str) -> Option<Self> {
        let valid = (raw.len() == KEY_LEN || raw.len() == LEGACY_KEY_LEN) && is_lower_hex(raw);
        valid.then(|| Self(raw.to_string()))
    }

    /// Whether this key predates content hashing with SHA-256
    pub fn is_legacy(&self) -> bool {
        self.0.len() == LEGACY_KEY_LEN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_lower_hex(raw: &str) -> bool {
    raw.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid content key: {}", value))
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}
