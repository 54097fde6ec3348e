//! Built-in handlers.

use std::collections::HashMap;
use std::io::Write;

use crate::error::HandlerError;
use crate::event::Event;
use crate::handler::{EventHandler, HandlerRegistry};

/// Logs every event at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl EventHandler for LogHandler {
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        tracing::info!(
            origin_id = event.origin_id,
            channel = %event.channel,
            payload = %event.payload,
            "event received"
        );
        Ok(())
    }
}

/// Writes each event as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesHandler<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesHandler<W> {
    #[allow(missing_docs)]
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EventHandler for JsonLinesHandler<W> {
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Parses the trigger change payload and logs table and action.
///
/// Payloads that do not follow the trigger convention are handler errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeLogHandler;

impl EventHandler for ChangeLogHandler {
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        let change = event.change()?;
        tracing::info!(
            origin_id = event.origin_id,
            table = %change.table,
            action = %change.action,
            "row changed"
        );
        Ok(())
    }
}

/// Routes events to a per-table handler using the payload's `table` field.
///
/// Events for tables without a route go to the fallback, or are skipped with
/// a debug log when there is none. Payloads without a `table` field are
/// routed as table `events`.
#[derive(Default)]
pub struct TableRouter {
    routes: HashMap<String, Box<dyn EventHandler>>,
    fallback: Option<Box<dyn EventHandler>>,
}

/// Table name used when the payload carries none.
pub const UNROUTED_TABLE: &str = "events";

#[derive(serde::Deserialize)]
struct TableOnly {
    table: Option<String>,
}

/// The payload's `table` field, or `UNROUTED_TABLE` when it has none.
///
/// # Errors
/// `HandlerError::Payload` if the payload is not a JSON object.
pub fn payload_table(event: &Event) -> Result<String, HandlerError> {
    let parsed: TableOnly = serde_json::from_str(&event.payload)?;
    Ok(parsed.table.unwrap_or_else(|| UNROUTED_TABLE.to_string()))
}

impl TableRouter {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events for `table` to `handler`.
    #[must_use]
    pub fn route(mut self, table: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        self.routes.insert(table.into(), Box::new(handler));
        self
    }

    /// Handler for tables without a route.
    #[must_use]
    pub fn fallback(mut self, handler: impl EventHandler + 'static) -> Self {
        self.fallback = Some(Box::new(handler));
        self
    }
}

impl EventHandler for TableRouter {
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        let table = payload_table(event)?;
        match self.routes.get_mut(&table) {
            Some(handler) => handler.handle(event),
            None => match self.fallback.as_mut() {
                Some(handler) => handler.handle(event),
                None => {
                    tracing::debug!(%table, "no route for table, skipping event");
                    Ok(())
                }
            },
        }
    }
}

impl std::fmt::Debug for TableRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tables: Vec<&String> = self.routes.keys().collect();
        tables.sort();
        f.debug_struct("TableRouter")
            .field("routes", &tables)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Registry holding `log`, `json` (stdout) and `changes`, plus `mqtt`
/// (broker on localhost:1883) with the `mqtt` feature.
#[must_use]
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("log", || LogHandler)
        .register("json", || JsonLinesHandler::new(std::io::stdout()))
        .register("changes", || ChangeLogHandler);
    #[cfg(feature = "mqtt")]
    crate::mqtt::register(&mut registry, crate::mqtt::MqttSettings::default());
    registry
}
