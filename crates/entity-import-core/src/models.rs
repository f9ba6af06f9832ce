//! Shared typed models used across the lookup, importer, and store layers.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::errors::{ImportError, ImportResult};

static ENTITY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([QP])([1-9][0-9]{0,17})$").unwrap());

// ---------------------------------------------------------------------------
// Entity identifiers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Item,
    Property,
}

impl EntityKind {
    pub fn prefix(self) -> char {
        match self {
            EntityKind::Item => 'Q',
            EntityKind::Property => 'P',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Property => "property",
        }
    }

    pub fn from_type_str(value: &str) -> Option<Self> {
        match value {
            "item" => Some(EntityKind::Item),
            "property" => Some(EntityKind::Property),
            _ => None,
        }
    }
}

/// A repository-agnostic entity id such as `Q42` or `P31`.
///
/// Whether an id belongs to the remote or the local repository is carried by
/// the [`RemoteEntityId`] and [`LocalEntityId`] wrappers, never by the id
/// itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    pub kind: EntityKind,
    pub numeric: u64,
}

impl EntityId {
    pub fn new(kind: EntityKind, numeric: u64) -> Self {
        Self { kind, numeric }
    }

    /// Parse a serialized id. Surrounding whitespace is ignored and a
    /// lowercase prefix is accepted.
    pub fn parse(value: &str) -> ImportResult<Self> {
        let normalized = value.trim().to_uppercase();
        let caps = ENTITY_ID_RE
            .captures(&normalized)
            .ok_or_else(|| ImportError::InvalidId(value.to_string()))?;
        let kind = if &caps[1] == "Q" {
            EntityKind::Item
        } else {
            EntityKind::Property
        };
        let numeric = caps[2]
            .parse::<u64>()
            .map_err(|_| ImportError::InvalidId(value.to_string()))?;
        Ok(Self { kind, numeric })
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.numeric)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EntityId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

macro_rules! scoped_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(EntityId);

        impl $name {
            pub fn parse(value: &str) -> ImportResult<Self> {
                EntityId::parse(value).map(Self)
            }

            pub fn entity_id(&self) -> EntityId {
                self.0
            }

            pub fn kind(&self) -> EntityKind {
                self.0.kind
            }
        }

        impl From<EntityId> for $name {
            fn from(id: EntityId) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

scoped_id!(
    /// An entity id as known to the remote repository.
    RemoteEntityId
);
scoped_id!(
    /// An entity id owned by the local repository.
    LocalEntityId
);

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Preferred,
    #[default]
    Normal,
    Deprecated,
}

/// A typed data value. `value` is kept as an open JSON tree: embedded entity
/// references are found by walking it, whatever the value type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "snaktype", rename_all = "lowercase")]
pub enum SnakValue {
    Value { datavalue: DataValue },
    SomeValue,
    NoValue,
}

/// A property/value pair. Deserializes directly from the remote snak shape
/// (`snaktype`, `property`, `datavalue`, `datatype`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snak {
    pub property: EntityId,
    #[serde(flatten)]
    pub value: SnakValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl Snak {
    pub fn value(property: EntityId, datavalue: DataValue) -> Self {
        Self {
            property,
            value: SnakValue::Value { datavalue },
            datatype: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub snaks: Vec<Snak>,
}

/// A claim about an entity.
///
/// `pending` lists remote ids that were left untranslated because no local
/// counterpart existed when the statement was imported. The id text inside
/// the statement is the remote one for every member of that set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default)]
    pub rank: Rank,
    pub main_snak: Snak,
    #[serde(default)]
    pub qualifiers: Vec<Snak>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pending: BTreeSet<RemoteEntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
}

impl Statement {
    pub fn new(main_snak: Snak) -> Self {
        Self {
            guid: None,
            rank: Rank::Normal,
            main_snak,
            qualifiers: Vec::new(),
            references: Vec::new(),
            pending: BTreeSet::new(),
            source_fingerprint: None,
        }
    }

    pub fn property(&self) -> EntityId {
        self.main_snak.property
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// SHA-256 over property, main snak, qualifiers and pending remote ids.
    /// Qualifier order does not affect the result; rank, references, guid
    /// and source fingerprint do not take part. Pending ids are hashed as
    /// remote ids, so an untranslated `Q2` never equals a local `Q2`.
    pub fn fingerprint(&self) -> ImportResult<String> {
        let mut qualifiers = self
            .qualifiers
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        qualifiers.sort();

        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(&self.main_snak)?.as_bytes());
        for qualifier in &qualifiers {
            hasher.update(b"\x1f");
            hasher.update(qualifier.as_bytes());
        }
        for remote_id in &self.pending {
            hasher.update(b"\x1eremote:");
            hasher.update(remote_id.to_string().as_bytes());
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

// ---------------------------------------------------------------------------
// Site links
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSiteLink {
    pub site: String,
    pub title: String,
    #[serde(default)]
    pub badges: Vec<RemoteEntityId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteLink {
    pub site: String,
    pub title: String,
    #[serde(default)]
    pub badges: BTreeSet<LocalEntityId>,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// An entity as fetched from the remote repository; every id inside it is
/// remote.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEntity {
    pub id: RemoteEntityId,
    pub kind: EntityKind,
    pub datatype: Option<String>,
    pub labels: IndexMap<String, String>,
    pub descriptions: IndexMap<String, String>,
    pub aliases: IndexMap<String, Vec<String>>,
    pub statements: Vec<Statement>,
    pub sitelinks: IndexMap<String, RawSiteLink>,
}

impl RawEntity {
    pub fn new(id: RemoteEntityId) -> Self {
        Self {
            id,
            kind: id.kind(),
            datatype: None,
            labels: IndexMap::new(),
            descriptions: IndexMap::new(),
            aliases: IndexMap::new(),
            statements: Vec::new(),
            sitelinks: IndexMap::new(),
        }
    }
}

/// A local entity. `id` and `revision` are `None` until the entity store
/// has saved it once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(skip)]
    pub id: Option<LocalEntityId>,
    #[serde(skip)]
    pub revision: Option<u64>,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default)]
    pub labels: IndexMap<String, String>,
    #[serde(default)]
    pub descriptions: IndexMap<String, String>,
    #[serde(default)]
    pub aliases: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub sitelinks: IndexMap<String, SiteLink>,
}

impl Entity {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            id: None,
            revision: None,
            kind,
            datatype: None,
            labels: IndexMap::new(),
            descriptions: IndexMap::new(),
            aliases: IndexMap::new(),
            statements: Vec::new(),
            sitelinks: IndexMap::new(),
        }
    }

    /// Union of the badges on every site link.
    pub fn badges(&self) -> BTreeSet<LocalEntityId> {
        self.sitelinks
            .values()
            .flat_map(|link| link.badges.iter().copied())
            .collect()
    }

    pub fn has_pending_statements(&self) -> bool {
        self.statements.iter().any(Statement::has_pending)
    }

    /// Remote ids still waiting for a local counterpart, across all statements.
    pub fn pending_references(&self) -> BTreeSet<RemoteEntityId> {
        self.statements
            .iter()
            .flat_map(|s| s.pending.iter().copied())
            .collect()
    }
}
