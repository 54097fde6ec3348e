//! Event handlers and the name-based handler registry.
//!
//! Handlers are registered under a name at startup as factories, so each
//! session (and in decoupled mode the runner thread) owns its own instance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HandlerError, ResolutionError};
use crate::event::Event;

/// Something that reacts to events.
pub trait EventHandler: Send {
    /// Process one event. An error ends inline sessions and the runner.
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: FnMut(&Event) -> Result<(), HandlerError> + Send,
{
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Pins a closure to the handler signature so its argument and error types
/// are inferred.
pub fn handler_fn<F>(f: F) -> F
where
    F: FnMut(&Event) -> Result<(), HandlerError> + Send,
{
    f
}

type Factory = Arc<dyn Fn() -> Box<dyn EventHandler> + Send + Sync>;

/// Name to handler-factory mapping.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: BTreeMap<String, Factory>,
}

impl HandlerRegistry {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous registration.
    pub fn register<F, H>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: EventHandler + 'static,
    {
        let factory: Factory = Arc::new(move || Box::new(factory()) as Box<dyn EventHandler>);
        self.factories.insert(name.into(), factory);
        self
    }

    /// Build a fresh handler for `name`.
    ///
    /// # Errors
    /// `ResolutionError` if `name` is empty or unknown.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn EventHandler>, ResolutionError> {
        let factory = self.factory(name)?;
        Ok(factory())
    }

    /// Resolve `name` without building the handler.
    ///
    /// # Errors
    /// Same as [`HandlerRegistry::resolve`].
    pub fn check(&self, name: &str) -> Result<(), ResolutionError> {
        self.factory(name).map(|_| ())
    }

    fn factory(&self, name: &str) -> Result<&Factory, ResolutionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ResolutionError::EmptyIdentifier);
        }
        self.factories.get(name).ok_or_else(|| ResolutionError::NotFound {
            name: name.to_string(),
            available: self.names(),
        })
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name.trim())
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> Event {
        Event {
            origin_id: 1,
            channel: "events".to_string(),
            payload: "{}".to_string(),
        }
    }

    #[test]
    fn resolve_builds_registered_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register("count", move || {
            let counter = Arc::clone(&counter);
            handler_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let mut handler = registry.resolve("count").unwrap();
        handler.handle(&event()).unwrap();
        handler.handle(&event()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn each_resolve_gets_a_fresh_instance() {
        let mut registry = HandlerRegistry::new();
        registry.register("stateful", || {
            let mut seen = 0;
            handler_fn(move |_| {
                seen += 1;
                if seen > 1 {
                    return Err(HandlerError::failed("second call on the same instance"));
                }
                Ok(())
            })
        });

        registry.resolve("stateful").unwrap().handle(&event()).unwrap();
        registry.resolve("stateful").unwrap().handle(&event()).unwrap();
    }

    #[test]
    fn unknown_name_lists_available_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.register("log", || handler_fn(|_| Ok(())));
        registry.register("json", || handler_fn(|_| Ok(())));

        let Err(err) = registry.resolve("webhook") else {
            panic!("expected resolution failure");
        };
        assert_eq!(
            err,
            ResolutionError::NotFound {
                name: "webhook".to_string(),
                available: vec!["json".to_string(), "log".to_string()],
            }
        );
    }

    #[test]
    fn check_resolves_without_building() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = Arc::clone(&built);
        registry.register("counted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            handler_fn(|_| Ok(()))
        });

        registry.check("counted").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(matches!(
            registry.check("missing"),
            Err(ResolutionError::NotFound { .. })
        ));
        assert!(matches!(registry.check(""), Err(ResolutionError::EmptyIdentifier)));
    }

    #[test]
    fn empty_name_is_rejected() {
        let registry = HandlerRegistry::new();
        assert!(matches!(registry.resolve("  "), Err(ResolutionError::EmptyIdentifier)));
    }
}
