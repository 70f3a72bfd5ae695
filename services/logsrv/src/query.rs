//! Query selection and parameter construction.
//!
//! The core owns the *text* of what gets executed and the named parameters
//! that accompany it; execution belongs to the persistence sink. Generated
//! templates are keyed by table name; an operator-supplied custom query is
//! passed through verbatim with the exact same parameter map, so custom SQL
//! can reference everything the templates can, including sibling registers.

use std::collections::HashMap;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::config::{RegisterMapping, SqlConfig};

/// Which generated query shape a register uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Append one row per logged value (canonical six-column layout)
    #[default]
    Insert,
    /// Rewrite the most recent row of this register in place
    UpdateLatest,
    /// One row per register, inserted on first sight and updated after
    Upsert,
}

/// True for names usable as a bare SQL identifier. Table names come from
/// operator configuration and are spliced into template text, so anything
/// beyond `[A-Za-z_][A-Za-z0-9_]*` is refused at validation time.
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Generates the query text for an intent against a table.
pub fn build_query(intent: QueryIntent, table: &str) -> String {
    match intent {
        QueryIntent::Insert => format!(
            "INSERT INTO {table} (field_name, register_address, value, timestamp, description, unit) \
             VALUES (@FieldName, @RegisterAddress, @Value, @Timestamp, @Description, @Unit)"
        ),
        QueryIntent::UpdateLatest => format!(
            "UPDATE {table} SET value = @Value, timestamp = @Timestamp \
             WHERE field_name = @FieldName \
             AND timestamp = (SELECT MAX(timestamp) FROM {table} WHERE field_name = @FieldName)"
        ),
        QueryIntent::Upsert => format!(
            "INSERT INTO {table} (field_name, register_address, value, timestamp, description, unit) \
             VALUES (@FieldName, @RegisterAddress, @Value, @Timestamp, @Description, @Unit) \
             ON CONFLICT(field_name) DO UPDATE SET \
             value = excluded.value, timestamp = excluded.timestamp"
        ),
    }
}

/// Selects the query to execute for a register: the operator's custom text
/// verbatim, or the generated template for the configured intent.
pub fn select_query(sql: &SqlConfig) -> String {
    if sql.use_custom_query {
        sql.custom_query.clone()
    } else {
        build_query(sql.query, &sql.table)
    }
}

/// Builds the canonical parameter map for one write: the six fixed
/// parameters plus `Reg_<field>` for every *other* configured register.
pub fn build_params(
    mapping: &RegisterMapping,
    value: &str,
    timestamp: &str,
    siblings: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut params = HashMap::with_capacity(6 + siblings.len());
    params.insert("FieldName".to_string(), mapping.field_name.clone());
    params.insert("RegisterAddress".to_string(), mapping.address.clone());
    params.insert("Value".to_string(), value.to_string());
    params.insert("Timestamp".to_string(), timestamp.to_string());
    params.insert("Description".to_string(), mapping.description.clone());
    params.insert("Unit".to_string(), mapping.unit.clone());

    for (field, latest) in siblings {
        if field == &mapping.field_name {
            continue;
        }
        params.insert(format!("Reg_{field}"), latest.clone());
    }
    params
}

/// Renders the `Timestamp` parameter for a write happening now.
pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
