//! Change event representation
//!
//! Wire-faithful model of the row-change records published by the
//! replication-log tailer: one JSON document per committed mutation,
//! keyed by table and action, carrying the row state after the change
//! (`data`) and, for updates and deletes, before it (`dataOld`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Row payload: column name → value.
pub type Row = Map<String, Value>;

/// A change captured on one watched table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Wire table name, e.g. `promo_category`
    pub table: String,
    /// Operation type
    pub action: ChangeAction,
    /// Row state after the change (INSERT/UPDATE; the tailer may omit it on DELETE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Row>,
    /// Row state before the change (UPDATE/DELETE)
    #[serde(default, rename = "dataOld", skip_serializing_if = "Option::is_none")]
    pub data_old: Option<Row>,
}

/// Change operation type, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeAction {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Insert => write!(f, "INSERT"),
            ChangeAction::Update => write!(f, "UPDATE"),
            ChangeAction::Delete => write!(f, "DELETE"),
        }
    }
}

/// The watched tables of the promo directory, plus a fallback for
/// anything the relay does not recognize.
///
/// Matching on this enum (rather than on raw table strings) keeps the
/// formatter exhaustive over the known kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTable {
    /// Promo category (`promo_category`)
    Category,
    /// Promo offer (`promo_offer`)
    Offer,
    /// City (`promo_city`)
    City,
    /// Partner (`promo_partner`)
    Partner,
    /// Unrecognized table, raw wire name preserved
    Unknown(String),
}

impl SourceTable {
    /// Resolve a wire table name.
    pub fn parse(name: &str) -> Self {
        match name {
            "promo_category" => SourceTable::Category,
            "promo_offer" => SourceTable::Offer,
            "promo_city" => SourceTable::City,
            "promo_partner" => SourceTable::Partner,
            other => SourceTable::Unknown(other.to_string()),
        }
    }

    /// The row field carrying the human-readable name for this table.
    pub fn name_field(&self) -> &'static str {
        match self {
            SourceTable::Offer => "title",
            _ => "name",
        }
    }
}

impl ChangeEvent {
    /// Create a new INSERT event
    pub fn insert(table: impl Into<String>, data: Row) -> Self {
        Self {
            table: table.into(),
            action: ChangeAction::Insert,
            data: Some(data),
            data_old: None,
        }
    }

    /// Create a new UPDATE event
    pub fn update(table: impl Into<String>, data_old: Option<Row>, data: Row) -> Self {
        Self {
            table: table.into(),
            action: ChangeAction::Update,
            data: Some(data),
            data_old,
        }
    }

    /// Create a new DELETE event
    pub fn delete(table: impl Into<String>, data_old: Row) -> Self {
        Self {
            table: table.into(),
            action: ChangeAction::Delete,
            data: None,
            data_old: Some(data_old),
        }
    }

    /// Resolve the table this event belongs to.
    pub fn source_table(&self) -> SourceTable {
        SourceTable::parse(&self.table)
    }

    /// Decode an event from a raw record value.
    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
