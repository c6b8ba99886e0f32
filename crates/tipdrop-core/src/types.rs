use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TipdropError, TipdropResult};

/// Length in characters of an encoded source identifier (32 bytes, hex)
pub const SOURCE_ID_LEN: usize = 64;

/// Length in characters of a key fingerprint (20 bytes, hex)
pub const FINGERPRINT_LEN: usize = 40;

/// Pseudonymous source identifier.
///
/// Uppercase hex of a slow one-way hash of the source's passphrase. Doubles as
/// the record-store key, the blob-store directory name and the keyring tag, so
/// it is restricted to `[0-9A-F]` and always safe as a path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(hex::encode_upper(digest))
    }

    pub fn parse(s: &str) -> TipdropResult<Self> {
        if s.len() != SOURCE_ID_LEN || !s.bytes().all(is_upper_hex) {
            return Err(TipdropError::path(format!(
                "malformed source identifier ({} chars)",
                s.len()
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SourceId {
    type Error = TipdropError;

    fn try_from(s: String) -> TipdropResult<Self> {
        Self::parse(&s)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> String {
        id.0
    }
}

/// Public-key fingerprint: uppercase hex of the first 20 bytes of BLAKE3 over
/// the age recipient string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_recipient(recipient: &str) -> Self {
        let hash = blake3::hash(recipient.as_bytes());
        Self(hex::encode_upper(&hash.as_bytes()[..FINGERPRINT_LEN / 2]))
    }

    /// Parse a fingerprint as a human may have pasted it.
    ///
    /// Display formatting commonly groups hex into blocks, so all whitespace
    /// is removed and case is ignored.
    pub fn parse(s: &str) -> TipdropResult<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if normalized.len() != FINGERPRINT_LEN || !normalized.bytes().all(is_upper_hex) {
            return Err(TipdropError::crypto(format!(
                "malformed fingerprint ({} chars after normalization)",
                normalized.len()
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = TipdropError;

    fn try_from(s: String) -> TipdropResult<Self> {
        Self::parse(&s)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> String {
        fp.0
    }
}

/// What a ciphertext blob holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobKind {
    /// Text message from a source
    Message,
    /// Uploaded file from a source (zstd-compressed before encryption)
    Document,
    /// Journalist reply to a source
    Reply,
}

impl BlobKind {
    /// File name suffix following the `<index>-<designation>-` prefix
    pub fn suffix(self) -> &'static str {
        match self {
            BlobKind::Message => "msg.age",
            BlobKind::Document => "doc.zst.age",
            BlobKind::Reply => "reply.age",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "msg.age" => Some(BlobKind::Message),
            "doc.zst.age" => Some(BlobKind::Document),
            "reply.age" => Some(BlobKind::Reply),
            _ => None,
        }
    }
}

fn is_upper_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}
