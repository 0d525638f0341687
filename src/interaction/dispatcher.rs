//! Event dispatcher: resolves component IDs and routes events to handlers.
//!
//! Per event:
//!
//! ```text
//! slash  ── command ─────────────────────────────────► registry ─► on_slash_command
//! button ── component_id ─► resolve ─┬─ Ok(id) ──────► registry ─► on_button_click(args)
//! menu   ──                          ├─ Expired ─────► "control has expired" reply
//!                                    ├─ Malformed ───► drop (debug, counter)
//!                                    └─ Storage ─────► apology reply
//! ```
//!
//! [`Dispatcher::dispatch`] handles one event synchronously.
//! [`Dispatcher::run`] drives it from a queue with a bounded pool of
//! blocking workers, since handlers are free to block.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::component_ids::{ComponentIdError, ComponentIdGenerator};
use crate::runtime::{Component, ComponentFuture};

use super::handler::{InteractorKind, hook_name, prefix_for};
use super::registry::HandlerRegistry;
use super::{EventKind, InteractionEvent, Reply, ReplySink, Tone};

pub const EXPIRED_TEXT: &str = "This control has expired, please run the command again.";
pub const FAILURE_TEXT: &str = "Something went wrong while handling this interaction, please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler hook was invoked.
    Routed,
    /// The control's component ID is gone; the user was told.
    Expired,
    /// Malformed or missing ID; nothing was done.
    Dropped,
    /// No handler owns the resolved prefix.
    Unrouted,
    /// The payload store could not be consulted; the user got an apology.
    Failed,
}

#[derive(Debug, Default)]
struct DispatchStats {
    routed: AtomicU64,
    malformed: AtomicU64,
    expired: AtomicU64,
    unrouted: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub routed: u64,
    pub malformed: u64,
    pub expired: u64,
    pub unrouted: u64,
    pub failed: u64,
}

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    generator: Arc<ComponentIdGenerator>,
    stats: DispatchStats,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, generator: Arc<ComponentIdGenerator>) -> Self {
        Self {
            registry,
            generator,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchCounts {
        DispatchCounts {
            routed: self.stats.routed.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            unrouted: self.stats.unrouted.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Handle one event to completion on the calling thread.
    pub fn dispatch(&self, event: &InteractionEvent, reply: &dyn ReplySink) -> DispatchOutcome {
        match event.kind {
            EventKind::Slash => self.dispatch_slash(event, reply),
            EventKind::Button | EventKind::Menu => self.dispatch_component(event, reply),
        }
    }

    fn dispatch_slash(&self, event: &InteractionEvent, reply: &dyn ReplySink) -> DispatchOutcome {
        let Some(command) = event.command.as_deref() else {
            debug!("slash event without a command; dropping");
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Dropped;
        };
        let prefix = prefix_for(InteractorKind::Slash, command);
        let Some(handler) = self.registry.lookup(&prefix) else {
            return self.unrouted(&prefix, event.kind);
        };
        debug!(%prefix, "routing slash command");
        handler.on_slash_command(event, reply);
        self.stats.routed.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Routed
    }

    fn dispatch_component(&self, event: &InteractionEvent, reply: &dyn ReplySink) -> DispatchOutcome {
        let Some(token) = event.component_id.as_deref() else {
            debug!(kind = ?event.kind, "component event without an id; dropping");
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Dropped;
        };

        let id = match self.generator.resolve(token) {
            Ok(id) => id,
            Err(ComponentIdError::Malformed(detail)) => {
                debug!(%detail, "malformed component id; dropping");
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return DispatchOutcome::Dropped;
            }
            Err(ComponentIdError::Expired) => {
                debug!(kind = ?event.kind, "interaction with expired control");
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
                reply.present(Reply::ephemeral(EXPIRED_TEXT).with_tone(Tone::Error));
                return DispatchOutcome::Expired;
            }
            Err(e) => {
                error!(error = %e, "could not resolve component id");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                reply.present(Reply::ephemeral(FAILURE_TEXT).with_tone(Tone::Error));
                return DispatchOutcome::Failed;
            }
        };

        let prefix = id.handler_prefix.as_str();
        let Some(handler) = self.registry.lookup(prefix) else {
            return self.unrouted(prefix, event.kind);
        };
        debug!(%prefix, hook = hook_name(event.kind), args = id.args.len(), "routing component event");
        match event.kind {
            EventKind::Menu => handler.on_selection_menu(event, &id.args, reply),
            _ => handler.on_button_click(event, &id.args, reply),
        }
        self.stats.routed.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Routed
    }

    fn unrouted(&self, prefix: &str, kind: EventKind) -> DispatchOutcome {
        error!(%prefix, hook = hook_name(kind), "no handler registered for prefix; dropping event");
        self.stats.unrouted.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Unrouted
    }

    /// Consume `rx` until it closes or `shutdown` is cancelled.
    ///
    /// At most `options.workers` events are handled at once. On shutdown no
    /// further events are taken; in-flight ones get `options.drain_deadline`
    /// to finish, after which they are abandoned.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Envelope>,
        options: RunOptions,
        shutdown: CancellationToken,
    ) {
        let permits = Arc::new(Semaphore::new(options.workers.get()));
        let mut in_flight: JoinSet<DispatchOutcome> = JoinSet::new();
        info!(workers = options.workers.get(), "dispatcher running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("dispatcher shutting down");
                    break;
                }

                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.reap(res);
                }

                envelope = rx.recv() => {
                    let Some(envelope) = envelope else {
                        info!("event queue closed");
                        break;
                    };
                    let permit = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        permit = permits.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };
                    let dispatcher = self.clone();
                    in_flight.spawn_blocking(move || {
                        let _permit = permit;
                        dispatcher.dispatch(&envelope.event, envelope.reply.as_ref())
                    });
                }
            }
        }

        rx.close();
        if in_flight.is_empty() {
            return;
        }

        info!(pending = in_flight.len(), "draining in-flight events");
        let drained = tokio::time::timeout(options.drain_deadline, async {
            while let Some(res) = in_flight.join_next().await {
                self.reap(res);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                abandoned = in_flight.len(),
                "drain deadline passed; abandoning in-flight events"
            );
            in_flight.detach_all();
        }
    }

    fn reap(&self, res: Result<DispatchOutcome, JoinError>) {
        match res {
            Ok(outcome) => debug!(?outcome, "event handled"),
            Err(e) => {
                error!("handler panicked: {e}");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// An event paired with the sink its replies go to.
pub struct Envelope {
    pub event: InteractionEvent,
    pub reply: Arc<dyn ReplySink>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub workers: NonZeroUsize,
    pub drain_deadline: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            drain_deadline: Duration::from_secs(10),
        }
    }
}

/// [`Dispatcher::run`] as a runtime [`Component`].
pub struct DispatchLoop {
    dispatcher: Arc<Dispatcher>,
    rx: mpsc::Receiver<Envelope>,
    options: RunOptions,
}

impl DispatchLoop {
    pub fn new(dispatcher: Arc<Dispatcher>, rx: mpsc::Receiver<Envelope>, options: RunOptions) -> Self {
        Self { dispatcher, rx, options }
    }
}

impl Component for DispatchLoop {
    fn id(&self) -> &str {
        "dispatcher"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            self.dispatcher.run(self.rx, self.options, shutdown).await;
            Ok(())
        })
    }
}
