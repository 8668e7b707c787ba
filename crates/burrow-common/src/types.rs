//! Indexed attribute types.

use serde::{Deserialize, Serialize};

/// Width of the fixed string key type, in bytes. Shorter values are
/// null-padded on the right; longer values are truncated.
pub const STRING_SIZE: usize = 10;

/// Type of the attribute an index is built over.
///
/// The tag is persisted in the index metadata page alongside the relation
/// name and attribute offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttrType {
    /// 32-bit signed integer, numeric order.
    Int = 0,
    /// 64-bit float, numeric order.
    Double = 1,
    /// Ten-byte null-padded string, lexicographic byte order.
    Str = 2,
}

impl AttrType {
    /// Returns the key width in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            AttrType::Int => 4,
            AttrType::Double => 8,
            AttrType::Str => STRING_SIZE,
        }
    }

    /// Decodes a metadata tag.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(AttrType::Int),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::Str),
            _ => None,
        }
    }

    /// Encodes the metadata tag.
    pub fn tag(&self) -> i32 {
        *self as i32
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Int => "INT",
            AttrType::Double => "DOUBLE",
            AttrType::Str => "STRING",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_sizes() {
        assert_eq!(AttrType::Int.key_size(), 4);
        assert_eq!(AttrType::Double.key_size(), 8);
        assert_eq!(AttrType::Str.key_size(), STRING_SIZE);
    }

    #[test]
    fn test_tag_roundtrip() {
        for attr in [AttrType::Int, AttrType::Double, AttrType::Str] {
            assert_eq!(AttrType::from_tag(attr.tag()), Some(attr));
        }
        assert_eq!(AttrType::from_tag(3), None);
        assert_eq!(AttrType::from_tag(-1), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(AttrType::Int.to_string(), "INT");
        assert_eq!(AttrType::Double.to_string(), "DOUBLE");
        assert_eq!(AttrType::Str.to_string(), "STRING");
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = AttrType::Double;
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: AttrType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
