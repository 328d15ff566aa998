//! Tag model types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagId(pub String);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of tag, as far as the sync engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    /// Ordinary user tag (mailbox tags are created as these).
    #[default]
    Tag,
    /// Marks messages as unread; new mail gets every tag of this type.
    Unread,
    /// Any other system tag.
    System,
}

impl TagType {
    /// Type name as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Unread => "unread",
            Self::System => "system",
        }
    }

    /// Parse a stored type name.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "unread" => Self::Unread,
            "system" => Self::System,
            _ => Self::Tag,
        }
    }
}

/// A tag known to the tag store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Identifier.
    pub id: TagId,
    /// Display name.
    pub name: String,
    /// Kind of tag.
    pub tag_type: TagType,
}

impl Tag {
    /// Whether `name_or_id` refers to this tag (IDs exactly, names ignoring case).
    #[must_use]
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id.0 == name_or_id || self.name.eq_ignore_ascii_case(name_or_id)
    }
}
