//! Document paths and the fixed-width shard key codec.
//!
//! Shard documents live in a subcollection next to the counter they feed:
//!
//! ```text
//! pages/home                                <- root counter document
//! pages/home/_counter_shards_/4f1c…         <- leaf shard (one increment)
//! pages/home/_counter_shards_/\t\t4f1       <- partial shard (pre-aggregated)
//! ```
//!
//! The codec guarantees one load-bearing property: **partial shard keys sort
//! before every leaf shard key they summarize**. Keys have a fixed width of
//! [`WIDTH`] characters; shorter semantic prefixes are left-padded with
//! [`PARTIAL_PAD`], a control character that precedes every character a leaf
//! key can contain. Because all keys share the same width, keys of different
//! semantic prefix lengths remain comparably ordered with no ambiguity, and a
//! whole aggregation pass can operate on contiguous key ranges.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Fixed width of an encoded shard key, in characters.
pub const WIDTH: usize = 5;

/// Padding character for partial shard keys.
///
/// Deliberately a control character (`0x09`): it sorts before `-`, `0`-`9`
/// and `a`-`f`, the characters leaf shard keys are drawn from, so a padded
/// key always precedes the leaves sharing its semantic prefix. The ordering
/// of the whole engine rests on this constant; it is part of the on-disk
/// format and must never change for an existing counter.
pub const PARTIAL_PAD: char = '\t';

/// Left-pads `prefix` with [`PARTIAL_PAD`] up to [`WIDTH`] characters.
///
/// An empty prefix encodes to a key made entirely of padding, the earliest
/// possible key in the collection.
///
/// # Examples
///
/// ```rust
/// use sommatori::keys::encode_shard;
///
/// assert_eq!(encode_shard("4f1"), "\t\t4f1");
/// assert_eq!(encode_shard(""), "\t\t\t\t\t");
/// assert_eq!(encode_shard("4f1c9"), "4f1c9");
/// ```
pub fn encode_shard(prefix: &str) -> String {
    let len = prefix.chars().count();
    let mut key = String::with_capacity(WIDTH.max(len));
    for _ in len..WIDTH {
        key.push(PARTIAL_PAD);
    }
    key.push_str(prefix);
    key
}

/// Strips leading [`PARTIAL_PAD`] characters, recovering the semantic prefix.
///
/// ```rust
/// use sommatori::keys::decode_shard;
///
/// assert_eq!(decode_shard("\t\t4f1"), "4f1");
/// assert_eq!(decode_shard("4f1c9"), "4f1c9");
/// assert_eq!(decode_shard("\t\t\t\t\t"), "");
/// ```
pub fn decode_shard(key: &str) -> &str {
    key.trim_start_matches(PARTIAL_PAD)
}

/// Whether `path` names a partial shard, i.e. its last segment starts with
/// the padding character.
pub fn is_partial_shard(path: &DocPath) -> bool {
    path.leaf().starts_with(PARTIAL_PAD)
}

/// A `/`-separated document path, ordered lexicographically by bytes.
///
/// Matches the ordering the backing store applies to document names, which
/// is what slice bounds and range queries are expressed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocPath(String);

impl DocPath {
    /// Wraps a path string as-is; no normalization is performed.
    pub fn new(path: impl Into<String>) -> Self {
        DocPath(path.into())
    }

    /// The raw path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment.
    pub fn leaf(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((_, leaf)) => leaf,
            None => &self.0,
        }
    }

    /// The path with its last segment removed, or `None` for a single
    /// segment.
    pub fn parent(&self) -> Option<DocPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocPath(parent.to_string()))
    }

    /// Appends one segment.
    pub fn child(&self, segment: &str) -> DocPath {
        if self.0.is_empty() {
            DocPath(segment.to_string())
        } else {
            DocPath(format!("{}/{}", self.0, segment))
        }
    }

    /// The name of the collection this document sits in (its parent's last
    /// segment). For a shard document this is the shard collection id.
    pub fn collection_id(&self) -> Option<&str> {
        let (parent, _) = self.0.rsplit_once('/')?;
        Some(match parent.rsplit_once('/') {
            Some((_, id)) => id,
            None => parent,
        })
    }
}

impl Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocPath {
    fn from(path: &str) -> Self {
        DocPath::new(path)
    }
}

impl From<String> for DocPath {
    fn from(path: String) -> Self {
        DocPath(path)
    }
}

impl AsRef<str> for DocPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_to_width() {
        assert_eq!(encode_shard(""), "\t\t\t\t\t");
        assert_eq!(encode_shard("4"), "\t\t\t\t4");
        assert_eq!(encode_shard("4f"), "\t\t\t4f");
        assert_eq!(encode_shard("4f1c9"), "4f1c9");
    }

    #[test]
    fn test_decode_strips_padding() {
        assert_eq!(decode_shard("\t\t\t\t\t"), "");
        assert_eq!(decode_shard("\t\t\t\t4"), "4");
        assert_eq!(decode_shard("4f1c9"), "4f1c9");
        // Interior padding is not touched.
        assert_eq!(decode_shard("\t4\t1"), "4\t1");
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for prefix in ["", "0", "ab", "4f1", "abcd", "4f1c9"] {
            assert_eq!(decode_shard(&encode_shard(prefix)), prefix);
        }
    }

    #[test]
    fn test_partial_keys_sort_before_their_leaves() {
        // The padded encoding of any proper prefix of a leaf key must sort
        // before the leaf key itself.
        let leaf = "4f1c9";
        for n in 0..WIDTH {
            let partial = encode_shard(&leaf[..n]);
            assert!(partial.as_str() < leaf, "{partial:?} !< {leaf:?}");
        }
    }

    #[test]
    fn test_pad_precedes_leaf_alphabet() {
        for c in "-0123456789abcdef".chars() {
            assert!(PARTIAL_PAD < c);
        }
    }

    #[test]
    fn test_is_partial_shard() {
        assert!(is_partial_shard(&DocPath::new("pages/home/shards/\t\t4f1")));
        assert!(!is_partial_shard(&DocPath::new("pages/home/shards/4f1c9")));
        assert!(!is_partial_shard(&DocPath::new("4f1c9")));
    }

    #[test]
    fn test_leaf_and_parent() {
        let path = DocPath::new("pages/home/shards/4f1c9");
        assert_eq!(path.leaf(), "4f1c9");
        assert_eq!(path.parent(), Some(DocPath::new("pages/home/shards")));
        assert_eq!(DocPath::new("solo").parent(), None);
        assert_eq!(DocPath::new("solo").leaf(), "solo");
    }

    #[test]
    fn test_child() {
        let counter = DocPath::new("pages/home");
        let shard = counter.child("shards").child("4f1c9");
        assert_eq!(shard.as_str(), "pages/home/shards/4f1c9");
        assert_eq!(DocPath::new("").child("x").as_str(), "x");
    }

    #[test]
    fn test_collection_id() {
        let shard = DocPath::new("pages/home/_counter_shards_/4f1c9");
        assert_eq!(shard.collection_id(), Some("_counter_shards_"));
        assert_eq!(DocPath::new("a/b").collection_id(), Some("a"));
        assert_eq!(DocPath::new("solo").collection_id(), None);
    }

    #[test]
    fn test_path_ordering_matches_key_ordering() {
        let col = DocPath::new("pages/home/shards");
        let partial = col.child(&encode_shard("4f1"));
        let leaf = col.child("4f1c9");
        assert!(partial < leaf);
    }
}
