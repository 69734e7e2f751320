use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Namespace for properties defined by the OSCAL model itself.
pub const OSCAL_NAMESPACE: &str = "http://csrc.nist.gov/ns/oscal";

/// Arena-style identity of one node inside a loaded document tree.
///
/// Ids are handed out by a per-resolution allocator and never serialized, so
/// the index can refer to tree nodes without borrowing the tree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Nodes created after indexing (e.g. modify payloads) keep the unset id.
    pub const UNSET: NodeId = NodeId(0);

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }
}

/// Kind of entity tracked by the entity index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EntityKind {
    Group,
    Control,
    Part,
    Parameter,
    Role,
    Location,
    Party,
    Resource,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Group,
        EntityKind::Control,
        EntityKind::Part,
        EntityKind::Parameter,
        EntityKind::Role,
        EntityKind::Location,
        EntityKind::Party,
        EntityKind::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Group => "group",
            EntityKind::Control => "control",
            EntityKind::Part => "part",
            EntityKind::Parameter => "parameter",
            EntityKind::Role => "role",
            EntityKind::Location => "location",
            EntityKind::Party => "party",
            EntityKind::Resource => "resource",
        }
    }

    /// UUID-keyed kinds are matched case-insensitively.
    pub fn is_uuid(&self) -> bool {
        matches!(
            self,
            EntityKind::Location | EntityKind::Party | EntityKind::Resource
        )
    }

    /// Kinds whose survival follows tree selection rather than reference counts.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EntityKind::Group | EntityKind::Control | EntityKind::Part
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the control-selection pass for a structural node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SelectionStatus {
    Selected,
    Unselected,
    #[default]
    Unknown,
}

impl SelectionStatus {
    pub fn from_match(matched: bool) -> Self {
        if matched {
            SelectionStatus::Selected
        } else {
            SelectionStatus::Unselected
        }
    }

    pub fn is_selected(&self) -> bool {
        matches!(self, SelectionStatus::Selected)
    }
}

/// Where an alter `add` places its payload relative to the target.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Position {
    Before,
    After,
    Starting,
    #[default]
    Ending,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Before => "before",
            Position::After => "after",
            Position::Starting => "starting",
            Position::Ending => "ending",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "before" => Some(Position::Before),
            "after" => Some(Position::After),
            "starting" => Some(Position::Starting),
            "ending" => Some(Position::Ending),
            _ => None,
        }
    }

    /// Sibling positions splice next to the target instead of inside it.
    pub fn is_sibling(&self) -> bool {
        matches!(self, Position::Before | Position::After)
    }
}

/// Item kinds an alter `remove` may name through `by-item-name`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ItemName {
    Param,
    Prop,
    Link,
    Part,
}

impl ItemName {
    pub const ALL: [ItemName; 4] = [ItemName::Param, ItemName::Prop, ItemName::Link, ItemName::Part];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemName::Param => "param",
            ItemName::Prop => "prop",
            ItemName::Link => "link",
            ItemName::Part => "part",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "param" => Some(ItemName::Param),
            "prop" => Some(ItemName::Prop),
            "link" => Some(ItemName::Link),
            "part" => Some(ItemName::Part),
            _ => None,
        }
    }
}

impl fmt::Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `with-child-controls` flag on include/exclude directives.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithChildControls {
    Yes,
    #[default]
    No,
}

impl Serialize for Position {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_str(&value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown position '{value}' (expected before|after|starting|ending)"
            ))
        })
    }
}

impl Serialize for ItemName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ItemName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_str(&value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unsupported item name '{value}' (expected param|prop|link|part)"
            ))
        })
    }
}
