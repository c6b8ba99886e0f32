//! Blob file names: `<index>-<designation>-<kind suffix>`

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use tipdrop_core::{BlobKind, TipdropError, TipdropResult};

/// Longest designation accepted in a blob name
pub const MAX_DESIGNATION_LEN: usize = 64;

static BLOB_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<index>[1-9][0-9]{0,18})-(?P<designation>[a-z0-9_-]*)-(?P<kind>msg\.age|doc\.zst\.age|reply\.age)$")
        .expect("blob name regex is valid")
});

static DESIGNATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_-]*$").expect("designation regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobName {
    /// Position in the source's sequence, starting at 1
    pub index: u64,
    /// Human-facing label shared with the journalist UI (e.g. "lazy-oxygen")
    pub designation: String,
    pub kind: BlobKind,
}

impl BlobName {
    pub fn new(index: u64, designation: &str, kind: BlobKind) -> TipdropResult<Self> {
        if index == 0 {
            return Err(TipdropError::path("blob index starts at 1"));
        }
        if designation.len() > MAX_DESIGNATION_LEN || !DESIGNATION_RE.is_match(designation) {
            return Err(TipdropError::path(format!(
                "invalid designation: {designation:?}"
            )));
        }
        Ok(Self {
            index,
            designation: designation.to_string(),
            kind,
        })
    }

    pub fn parse(name: &str) -> TipdropResult<Self> {
        let caps = BLOB_NAME_RE
            .captures(name)
            .ok_or_else(|| TipdropError::path(format!("invalid blob name: {name:?}")))?;
        let index = caps["index"]
            .parse::<u64>()
            .map_err(|e| TipdropError::path(format!("invalid blob index in {name:?}: {e}")))?;
        let kind = BlobKind::from_suffix(&caps["kind"])
            .ok_or_else(|| TipdropError::path(format!("invalid blob kind in {name:?}")))?;
        Self::new(index, &caps["designation"], kind)
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.index, self.designation, self.kind.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse() {
        let name = BlobName::new(3, "lazy-oxygen", BlobKind::Document).unwrap();
        assert_eq!(name.file_name(), "3-lazy-oxygen-doc.zst.age");
        assert_eq!(BlobName::parse("3-lazy-oxygen-doc.zst.age").unwrap(), name);
    }

    #[test]
    fn test_parse_each_kind() {
        assert_eq!(BlobName::parse("1-a-msg.age").unwrap().kind, BlobKind::Message);
        assert_eq!(BlobName::parse("12-b_c-reply.age").unwrap().index, 12);
        assert_eq!(BlobName::parse("7--msg.age").unwrap().designation, "");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for bad in [
            "0-a-msg.age",
            "a-msg.age",
            "1-a-msg.gpg",
            "1-A-msg.age",
            "1-a/../b-msg.age",
            "../1-a-msg.age",
            "1-a-msg.age.tmp",
            "99999999999999999999-a-msg.age",
        ] {
            assert!(BlobName::parse(bad).unwrap_err().is_path(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_new_rejects_bad_designation() {
        assert!(BlobName::new(1, "Upper", BlobKind::Reply).is_err());
        assert!(BlobName::new(1, "with space", BlobKind::Reply).is_err());
        assert!(BlobName::new(1, &"x".repeat(MAX_DESIGNATION_LEN + 1), BlobKind::Reply).is_err());
    }
}
