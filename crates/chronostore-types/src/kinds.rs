//! One-byte type tokens persisted in the assemblage type tables.

use std::fmt;

/// The kind of component an assemblage holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Unknown,
    Concept,
    /// A component that annotates another component.
    Semantic,
    Stamp,
}

impl ObjectType {
    pub const ALL: [Self; 4] = [Self::Unknown, Self::Concept, Self::Semantic, Self::Stamp];

    /// On-disk token.
    #[must_use]
    pub const fn token(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Concept => 1,
            Self::Semantic => 2,
            Self::Stamp => 3,
        }
    }

    /// Decode an on-disk token.
    #[must_use]
    pub const fn from_token(token: u8) -> Option<Self> {
        match token {
            0 => Some(Self::Unknown),
            1 => Some(Self::Concept),
            2 => Some(Self::Semantic),
            3 => Some(Self::Stamp),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Concept => "CONCEPT",
            Self::Semantic => "SEMANTIC",
            Self::Stamp => "STAMP",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The shape of the versions stored in an assemblage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionType {
    Unknown,
    Concept,
    Member,
    ComponentNid,
    Long,
    String,
    Description,
    LogicGraph,
    Dynamic,
    MeasureConstraints,
}

impl VersionType {
    pub const ALL: [Self; 10] = [
        Self::Unknown,
        Self::Concept,
        Self::Member,
        Self::ComponentNid,
        Self::Long,
        Self::String,
        Self::Description,
        Self::LogicGraph,
        Self::Dynamic,
        Self::MeasureConstraints,
    ];

    /// On-disk token.
    #[must_use]
    pub const fn token(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Concept => 1,
            Self::Member => 2,
            Self::ComponentNid => 3,
            Self::Long => 4,
            Self::String => 5,
            Self::Description => 6,
            Self::LogicGraph => 7,
            Self::Dynamic => 8,
            Self::MeasureConstraints => 9,
        }
    }

    /// Decode an on-disk token.
    #[must_use]
    pub const fn from_token(token: u8) -> Option<Self> {
        match token {
            0 => Some(Self::Unknown),
            1 => Some(Self::Concept),
            2 => Some(Self::Member),
            3 => Some(Self::ComponentNid),
            4 => Some(Self::Long),
            5 => Some(Self::String),
            6 => Some(Self::Description),
            7 => Some(Self::LogicGraph),
            8 => Some(Self::Dynamic),
            9 => Some(Self::MeasureConstraints),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Concept => "CONCEPT",
            Self::Member => "MEMBER",
            Self::ComponentNid => "COMPONENT_NID",
            Self::Long => "LONG",
            Self::String => "STRING",
            Self::Description => "DESCRIPTION",
            Self::LogicGraph => "LOGIC_GRAPH",
            Self::Dynamic => "DYNAMIC",
            Self::MeasureConstraints => "MEASURE_CONSTRAINTS",
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What `startup` found at the store root.
///
/// ```text
/// NOT_YET_CHECKED ──startup──▶ NO_DATASTORE | EXISTING_DATASTORE ──shutdown──▶ NOT_YET_CHECKED
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatastoreStartState {
    #[default]
    NotYetChecked,
    /// The root held no prior store; a fresh one was created.
    NoDatastore,
    /// A previously synced store was found and opened.
    ExistingDatastore,
}

impl fmt::Display for DatastoreStartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotYetChecked => "NOT_YET_CHECKED",
            Self::NoDatastore => "NO_DATASTORE",
            Self::ExistingDatastore => "EXISTING_DATASTORE",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_tokens_round_trip() {
        for ty in ObjectType::ALL {
            assert_eq!(ObjectType::from_token(ty.token()), Some(ty));
        }
        assert_eq!(ObjectType::from_token(200), None);
    }

    #[test]
    fn version_type_tokens_round_trip() {
        for ty in VersionType::ALL {
            assert_eq!(VersionType::from_token(ty.token()), Some(ty));
        }
        assert_eq!(VersionType::from_token(10), None);
    }

    #[test]
    fn display_names() {
        assert_eq!(ObjectType::Semantic.to_string(), "SEMANTIC");
        assert_eq!(VersionType::ComponentNid.to_string(), "COMPONENT_NID");
        assert_eq!(
            DatastoreStartState::ExistingDatastore.to_string(),
            "EXISTING_DATASTORE"
        );
        assert_eq!(
            serde_json::to_string(&VersionType::LogicGraph).unwrap(),
            "\"LOGIC_GRAPH\""
        );
    }
}
