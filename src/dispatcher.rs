//! Watch session dispatcher.
//!
//! The dispatcher owns one session lifecycle: validate options, resolve the
//! handler, subscribe, then deliver events in one of three modes.
//!
//! - Echo: no handler, each event is written as a line to the output.
//! - Inline: the handler runs on the reading thread; its first failure ends
//!   the session.
//! - Decoupled: a reader thread owns the stream and feeds the hand-off queue;
//!   a runner thread owns the handler and drains it. The reader closes the
//!   queue when it stops, and the runner cancels the session token when it
//!   stops, so neither side can wait on the other forever.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::config::{DeliveryMode, WatchConfig};
use crate::error::{HandlerError, NotifyError, NotifyResult, SubscriptionError};
use crate::handler::{EventHandler, HandlerRegistry};
use crate::handoff::{self, HandoffReceiver, HandoffSender, Push};
use crate::source::NotificationSource;
use crate::stream::{EventStream, Next};

/// Lifecycle of one watch session.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Subscribing,
    Echo,
    Inline,
    Decoupled,
    Terminated,
    Failed,
}

impl SessionState {
    /// True for `Terminated` and `Failed`.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl From<DeliveryMode> for SessionState {
    fn from(mode: DeliveryMode) -> Self {
        match mode {
            DeliveryMode::Echo => Self::Echo,
            DeliveryMode::Inline => Self::Inline,
            DeliveryMode::Decoupled => Self::Decoupled,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    read: AtomicU64,
    handled: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

/// Live counters for a dispatcher. Clones share state; counts accumulate
/// across sessions run by the same dispatcher.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    inner: Arc<Counters>,
}

impl SessionStats {
    /// Events taken off the stream.
    #[must_use]
    pub fn events_read(&self) -> u64 {
        self.inner.read.load(Ordering::Relaxed)
    }

    /// Events the handler completed.
    #[must_use]
    pub fn events_handled(&self) -> u64 {
        self.inner.handled.load(Ordering::Relaxed)
    }

    /// Events discarded by a full hand-off queue.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Queued events left unhandled because the session was stopped.
    #[must_use]
    pub fn events_abandoned(&self) -> u64 {
        self.inner.abandoned.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Counts {
        Counts {
            read: self.events_read(),
            handled: self.events_handled(),
            dropped: self.events_dropped(),
            abandoned: self.events_abandoned(),
        }
    }

    fn add_read(&self) {
        self.inner.read.fetch_add(1, Ordering::Relaxed);
    }

    fn add_handled(&self) {
        self.inner.handled.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    read: u64,
    handled: u64,
    dropped: u64,
    abandoned: u64,
}

/// Summary of a finished session. Counts cover this session only.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub mode: DeliveryMode,
    pub state: SessionState,
    pub events_read: u64,
    pub events_handled: u64,
    pub events_dropped: u64,
    pub events_abandoned: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs watch sessions.
pub struct Dispatcher {
    config: WatchConfig,
    registry: HandlerRegistry,
    cancel: CancellationToken,
    state: SessionState,
    stats: SessionStats,
}

impl Dispatcher {
    /// Dispatcher resolving handler names against `registry`.
    #[must_use]
    pub fn new(config: WatchConfig, registry: HandlerRegistry) -> Self {
        Self {
            config,
            registry,
            cancel: CancellationToken::new(),
            state: SessionState::Idle,
            stats: SessionStats::default(),
        }
    }

    /// Use `cancel` to stop sessions instead of the internal token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the token, for example to run again after a cancelled session.
    pub fn set_cancellation(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// Token that stops the running session at its next suspension point.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Run one session on `source` until it is cancelled or fails.
    ///
    /// Echo mode writes to `out`. Configuration and resolution errors are
    /// returned before `source` is touched.
    pub fn run<S, W>(&mut self, source: S, out: &mut W) -> NotifyResult<SessionReport>
    where
        S: NotificationSource + 'static,
        W: Write + ?Sized,
    {
        self.state = SessionState::Idle;
        let started_at = Utc::now();
        let baseline = self.stats.snapshot();

        let result = self.run_session(source, out);
        let mode = self.config.validate().unwrap_or(DeliveryMode::Echo);
        match result {
            Ok(()) => {
                self.transition(SessionState::Terminated);
                Ok(self.report(mode, started_at, baseline))
            }
            Err(err) => {
                self.transition(SessionState::Failed);
                tracing::error!(error = %err, "watch session failed");
                Err(err)
            }
        }
    }

    fn run_session<S, W>(&mut self, source: S, out: &mut W) -> NotifyResult<()>
    where
        S: NotificationSource + 'static,
        W: Write + ?Sized,
    {
        let mode = self.config.validate()?;
        let handler = match (&self.config.handler, mode) {
            (Some(name), DeliveryMode::Inline | DeliveryMode::Decoupled) => Some(self.registry.resolve(name)?),
            _ => None,
        };

        self.transition(SessionState::Subscribing);
        let session = self.cancel.child();
        let stream = EventStream::open(source, self.config.channel.clone(), session.clone())?
            .with_liveness_interval(self.config.liveness_interval);

        self.transition(mode.into());
        match (mode, handler) {
            (DeliveryMode::Echo, _) => self.run_echo(stream, out),
            (DeliveryMode::Inline, Some(mut handler)) => self.run_inline(stream, handler.as_mut()),
            (DeliveryMode::Decoupled, Some(handler)) => self.run_decoupled(stream, handler, session),
            (mode, None) => Err(NotifyError::internal(format!("{mode:?} mode without a handler"))),
        }
    }

    fn run_echo<S, W>(&self, mut stream: EventStream<S>, out: &mut W) -> NotifyResult<()>
    where
        S: NotificationSource,
        W: Write + ?Sized,
    {
        let timeout = self.config.timeout;
        loop {
            match stream.next(timeout)? {
                Next::Event(event) => {
                    self.stats.add_read();
                    writeln!(out, "Received event: {event}")?;
                    out.flush()?;
                }
                Next::Timeout => log_timeout(timeout),
                Next::Cancelled => break,
            }
        }
        close_quietly(stream);
        Ok(())
    }

    fn run_inline<S>(&self, mut stream: EventStream<S>, handler: &mut dyn EventHandler) -> NotifyResult<()>
    where
        S: NotificationSource,
    {
        let timeout = self.config.timeout;
        loop {
            match stream.next(timeout)? {
                Next::Event(event) => {
                    self.stats.add_read();
                    if let Err(err) = handler.handle(&event) {
                        tracing::error!(
                            origin_id = event.origin_id,
                            error = %err,
                            "handler failed, stopping session"
                        );
                        return Err(err.into());
                    }
                    self.stats.add_handled();
                }
                Next::Timeout => log_timeout(timeout),
                Next::Cancelled => break,
            }
        }
        close_quietly(stream);
        Ok(())
    }

    fn run_decoupled<S>(
        &self,
        stream: EventStream<S>,
        handler: Box<dyn EventHandler>,
        session: CancellationToken,
    ) -> NotifyResult<()>
    where
        S: NotificationSource + 'static,
    {
        let (tx, rx) = handoff::channel(self.config.handoff_capacity);
        let timeout = self.config.timeout;

        let reader_stats = self.stats.clone();
        let reader = thread::Builder::new()
            .name("pg-notify-reader".to_string())
            .spawn(move || read_loop(stream, &tx, timeout, &reader_stats))
            .map_err(|e| NotifyError::internal(format!("failed to spawn reader: {e}")))?;

        let runner_stats = self.stats.clone();
        let runner_stop = session.clone();
        let runner = thread::Builder::new()
            .name("pg-notify-runner".to_string())
            .spawn(move || run_loop(handler, &rx, runner_stop, &runner_stats));
        let runner = match runner {
            Ok(runner) => runner,
            Err(e) => {
                session.cancel();
                let _ = reader.join();
                return Err(NotifyError::internal(format!("failed to spawn runner: {e}")));
            }
        };

        let reader_joined = reader.join();
        let runner_result = runner.join().unwrap_or_else(|panic| {
            Err(HandlerError::Panicked {
                message: panic_message(&*panic),
            })
        });

        runner_result?;
        reader_joined
            .map_err(|panic| NotifyError::internal(format!("reader panicked: {}", panic_message(&*panic))))??;
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn report(&self, mode: DeliveryMode, started_at: DateTime<Utc>, baseline: Counts) -> SessionReport {
        let now = self.stats.snapshot();
        SessionReport {
            mode,
            state: self.state,
            events_read: now.read - baseline.read,
            events_handled: now.handled - baseline.handled,
            events_dropped: now.dropped - baseline.dropped,
            events_abandoned: now.abandoned - baseline.abandoned,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn log_timeout(timeout: Option<Duration>) {
    tracing::debug!(?timeout, "no notification before timeout");
}

fn close_quietly<S: NotificationSource>(stream: EventStream<S>) {
    if let Err(err) = stream.close() {
        tracing::warn!(error = %err, "failed to unsubscribe");
    }
}

fn read_loop<S: NotificationSource>(
    mut stream: EventStream<S>,
    tx: &HandoffSender,
    timeout: Option<Duration>,
    stats: &SessionStats,
) -> Result<(), SubscriptionError> {
    let result = loop {
        match stream.next(timeout) {
            Ok(Next::Event(event)) => {
                stats.add_read();
                match tx.push(event) {
                    Push::Queued => {}
                    Push::Dropped => {
                        stats.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Push::Closed => {
                        tracing::warn!("runner is gone, reader stopping");
                        break Ok(());
                    }
                }
            }
            Ok(Next::Timeout) => log_timeout(timeout),
            Ok(Next::Cancelled) => break Ok(()),
            Err(err) => {
                tracing::error!(error = %err, "subscription lost, reader stopping");
                break Err(err);
            }
        }
    };
    tracing::debug!(queued = tx.queued(), dropped = tx.dropped(), "reader finished");
    result
}

/// Cancels the session token when the runner exits, including by panic.
struct StopOnExit(CancellationToken);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn run_loop(
    mut handler: Box<dyn EventHandler>,
    rx: &HandoffReceiver,
    stop: CancellationToken,
    stats: &SessionStats,
) -> Result<(), HandlerError> {
    let guard = StopOnExit(stop);
    while let Some(event) = rx.pop() {
        if guard.0.is_cancelled() {
            let abandoned = 1 + rx.len() as u64;
            stats.inner.abandoned.fetch_add(abandoned, Ordering::Relaxed);
            tracing::info!(abandoned, "session stopped, leaving queued events unhandled");
            break;
        }
        if let Err(err) = handler.handle(&event) {
            tracing::error!(
                origin_id = event.origin_id,
                error = %err,
                "handler failed, stopping runner"
            );
            return Err(err);
        }
        stats.add_handled();
    }
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
