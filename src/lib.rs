//! # pg-notify
//!
//! Turn PostgreSQL `NOTIFY` traffic into a typed event stream and hand each
//! event to a handler.
//!
//! ## Core Concepts
//!
//! - **NotificationSource**: a connection that can `LISTEN`, block until
//!   notifications arrive, and drain them in arrival order
//! - **EventStream**: pull-based, cancellable stream of `Event`s over a source
//! - **Dispatcher**: runs a watch session in echo, inline or decoupled mode
//! - **HandlerRegistry**: handlers registered by name at startup
//! - **triggers**: SQL that makes row changes emit notifications
//!
//! ## Usage
//!
//! ```rust
//! use pg_notify::{memory_source, ChannelName, Dispatcher, HandlerRegistry, WatchConfig};
//!
//! let (source, injector) = memory_source();
//! injector.notify(101, "events", r#"{"table":"users","action":"INSERT","data":{}}"#);
//!
//! let mut dispatcher = Dispatcher::new(WatchConfig::new(ChannelName::default()), HandlerRegistry::new());
//! let cancel = dispatcher.cancellation_token();
//! # std::thread::spawn(move || { std::thread::sleep(std::time::Duration::from_millis(50)); cancel.cancel(); });
//! let mut out = Vec::new();
//! let report = dispatcher.run(source, &mut out)?;
//! assert_eq!(report.events_read, 1);
//! # Ok::<(), pg_notify::NotifyError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;
pub mod handlers;
pub mod handoff;
pub mod source;
pub mod stream;
pub mod triggers;

#[cfg(feature = "mqtt")]
pub mod mqtt;
#[cfg(feature = "postgres")]
pub mod schema;

pub use cancel::CancellationToken;
pub use channel::{ChannelName, DEFAULT_CHANNEL};
pub use config::{DeliveryMode, WatchConfig};
pub use dispatcher::{Dispatcher, SessionReport, SessionState, SessionStats};
pub use error::{
    ConfigurationError, HandlerError, NotifyError, NotifyResult, ResolutionError, SubscriptionError,
};
pub use event::{ChangeAction, ChangePayload, Event, RawNotification, Subscription, SubscriptionId};
pub use handler::{handler_fn, EventHandler, HandlerRegistry};
pub use handlers::{builtin_registry, ChangeLogHandler, JsonLinesHandler, LogHandler, TableRouter};
pub use source::{memory_source, MemoryInjector, MemorySource, NotificationSource};
pub use stream::{EventStream, Next};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttForwarder, MqttSettings};
#[cfg(feature = "postgres")]
pub use source::PgSource;
