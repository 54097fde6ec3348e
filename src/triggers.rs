//! SQL for the row-change notification triggers.
//!
//! One trigger function, `notify_event()`, serializes the affected row as
//! `{"table": .., "action": .., "data": ..}` and sends it with `pg_notify`.
//! Each watched table gets an `AFTER INSERT OR UPDATE OR DELETE` row trigger
//! calling it. Identifiers are validated before they are interpolated; lookup
//! queries take their inputs as bind parameters.

use serde::{Deserialize, Serialize};

use crate::channel::{table_identifier, ChannelName};
use crate::error::ConfigurationError;

/// Name of the installed trigger function.
pub const NOTIFY_FUNCTION: &str = "notify_event";

/// Tables of a schema. `$1` is the schema name.
pub const LIST_TABLES_SQL: &str = "\
SELECT table_name::text
FROM information_schema.tables
WHERE table_schema = $1
  AND table_type = 'BASE TABLE'
ORDER BY table_name";

/// Triggers attached to a table. `$1` is the table name.
pub const TABLE_TRIGGERS_SQL: &str = "\
SELECT event_object_table::text
      ,trigger_name::text
      ,event_manipulation::text
      ,action_statement::text
      ,action_timing::text
FROM information_schema.triggers
WHERE event_object_table = $1
ORDER BY event_object_table
        ,event_manipulation";

/// One row of `TABLE_TRIGGERS_SQL`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub table: String,
    pub name: String,
    pub event: String,
    pub statement: String,
    pub timing: String,
}

/// `CREATE OR REPLACE FUNCTION notify_event()` sending on `channel`.
#[must_use]
pub fn notify_function_sql(channel: &ChannelName) -> String {
    format!(
        "\
CREATE OR REPLACE FUNCTION {NOTIFY_FUNCTION}() RETURNS TRIGGER AS $$
DECLARE
    data json;
    notification json;
BEGIN
    IF (TG_OP = 'DELETE') THEN
        data = row_to_json(OLD);
    ELSE
        data = row_to_json(NEW);
    END IF;

    notification = json_build_object(
                    'table', TG_TABLE_NAME,
                    'action', TG_OP,
                    'data', data);

    PERFORM pg_notify('{channel}', notification::text);

    RETURN NULL;
END;
$$ LANGUAGE plpgsql;"
    )
}

/// Name of the trigger installed on `table`.
#[must_use]
pub fn trigger_name(table: &str) -> String {
    format!("{table}_notify_event")
}

/// Replace the notification trigger on `table`.
///
/// # Errors
/// `ConfigurationError::InvalidIdentifier` for an invalid table name.
pub fn table_trigger_sql(table: &str) -> Result<String, ConfigurationError> {
    let table = table_identifier(table)?;
    let trigger = trigger_name(&table);
    Ok(format!(
        "\
DROP TRIGGER IF EXISTS {trigger} ON {table};
CREATE TRIGGER {trigger}
AFTER INSERT OR UPDATE OR DELETE ON {table}
    FOR EACH ROW EXECUTE PROCEDURE {NOTIFY_FUNCTION}();"
    ))
}

/// Remove the notification trigger from `table`.
///
/// # Errors
/// `ConfigurationError::InvalidIdentifier` for an invalid table name.
pub fn drop_table_trigger_sql(table: &str) -> Result<String, ConfigurationError> {
    let table = table_identifier(table)?;
    Ok(format!("DROP TRIGGER IF EXISTS {} ON {table};", trigger_name(&table)))
}

/// Requested tables missing from `existing`, in request order.
#[must_use]
pub fn missing_tables(requested: &[String], existing: &[String]) -> Vec<String> {
    let mut missing: Vec<String> = requested
        .iter()
        .filter(|t| !existing.iter().any(|e| e == *t))
        .cloned()
        .collect();
    missing.dedup();
    missing
}
