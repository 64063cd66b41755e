//! Notification formatting
//!
//! Maps a [`ChangeEvent`] to the text delivered to subscribers. The
//! mapping is total: any lookup failure (missing payload, missing name
//! field, unrecognized table) degrades to a generic fallback line
//! carrying the literal table and action names.

use crate::event::{ChangeAction, ChangeEvent, Row, SourceTable};
use serde_json::Value;

/// Render one change event as notification text. Never fails.
pub fn format_notification(event: &ChangeEvent) -> String {
    render(event).unwrap_or_else(|| format!("Change in {}: {}", event.table, event.action))
}

fn render(event: &ChangeEvent) -> Option<String> {
    let table = event.source_table();
    let (insert_prefix, label) = match &table {
        SourceTable::Category => ("🆕", "category"),
        SourceTable::Offer => ("🆕", "offer"),
        SourceTable::City => ("🏙️", "city"),
        SourceTable::Partner => ("🤝", "partner"),
        SourceTable::Unknown(_) => return None,
    };
    let field = table.name_field();

    match event.action {
        ChangeAction::Insert => {
            let name = field_text(event.data.as_ref(), field)?;
            Some(format!("{insert_prefix} New {label}: {name}"))
        }
        ChangeAction::Update => {
            let new = field_text(event.data.as_ref(), field)?;
            // Absent old row renders as an empty old value.
            let old = field_text(event.data_old.as_ref(), field).unwrap_or_default();
            Some(format!("📝 Updated {label}: {old} → {new}"))
        }
        ChangeAction::Delete => {
            // The tailer puts the deleted row in `dataOld`; older versions
            // sent it in `data`.
            let name = field_text(event.data_old.as_ref(), field)
                .or_else(|| field_text(event.data.as_ref(), field))?;
            Some(format!("❌ Deleted {label}: {name}"))
        }
    }
}

fn field_text(row: Option<&Row>, field: &str) -> Option<String> {
    match row?.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
