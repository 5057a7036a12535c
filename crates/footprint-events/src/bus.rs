//! Event bus implementation
//!
//! This module provides the event bus abstraction and its in-process
//! implementation. Controllers `emit` an event instance, optionally `once`
//! it to wait for every subscribed handler, and background workers `flush`
//! the bus to wait until no handler work is outstanding.
//!
//! ```text
//! emit(event) ──► snapshot handlers ──► spawn one task per handler
//!                                            │
//!                                            ▼
//!                          aggregate (settle-all, never fails)
//!                          tracked by instance id until settled,
//!                          kept by the envelope for `once`
//!                                            │
//!            once(handles) ◄─────────────────┤
//!            flush()    ◄────────────────────┘
//! ```

use async_trait::async_trait;
use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::EventBusConfig;
use crate::error::{EventBusError, EventBusResult, HandlerError, HandlerResult};
use crate::outcome::{
    into_results, EventHandle, EventResults, HandlerRef, Outcome, Settlement, SharedOutcome,
};
use crate::registry::{ErasedEvent, Registration, Registry, Unsubscribe};
use crate::types::{Envelope, Event, EventRef};

/// Event bus trait for emit/await operations.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register a handler for every future instance of `E`.
    ///
    /// The handler is named after its Rust type in results and logs.
    fn on<E, F, Fut, R>(&self, handler: F) -> Unsubscribe
    where
        E: Event,
        F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.on_named(std::any::type_name::<F>(), handler)
    }

    /// Register a handler under an explicit name.
    fn on_named<E, F, Fut, R>(&self, name: impl Into<String>, handler: F) -> Unsubscribe
    where
        E: Event,
        F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Serialize + Send + 'static;

    /// Start every handler registered for the instance's kind.
    ///
    /// Never blocks and never fails: handlers run on their own tasks after
    /// this call returns, and their failures are reported by [`EventBus::once`].
    fn emit<E: Event>(&self, event: &Envelope<E>) -> &Self;

    /// Wait until every handler of every given instance has settled.
    ///
    /// Instances that were never emitted or had no handlers resolve with no
    /// results. Instances that already settled resolve immediately with the
    /// outcome they settled with.
    async fn once(&self, events: &[EventHandle]) -> EventBusResult<Vec<EventResults>>;

    /// Wait until no instance has handler work outstanding.
    async fn flush(&self);

    /// Instances whose handlers have not all settled yet.
    fn pending(&self) -> Vec<EventRef>;

    /// Get event bus stats.
    fn stats(&self) -> EventBusStats;

    /// [`EventBus::once`] bounded by a deadline.
    ///
    /// Handlers are not cancelled when the deadline elapses.
    async fn once_timeout(
        &self,
        events: &[EventHandle],
        limit: Duration,
    ) -> EventBusResult<Vec<EventResults>> {
        match timeout(limit, self.once(events)).await {
            Ok(result) => result,
            Err(_) => {
                let pending = self.pending();
                Err(EventBusError::Timeout {
                    waited: limit,
                    pending: events
                        .iter()
                        .map(EventHandle::event)
                        .filter(|event| pending.contains(event))
                        .collect(),
                })
            }
        }
    }

    /// [`EventBus::flush`] bounded by a deadline.
    async fn flush_timeout(&self, limit: Duration) -> EventBusResult<()> {
        match timeout(limit, self.flush()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(EventBusError::Timeout {
                waited: limit,
                pending: self.pending(),
            }),
        }
    }
}

/// Event bus statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total events emitted
    pub events_emitted: u64,
    /// Events emitted with no handler registered
    pub events_untracked: u64,
    /// Events dropped because no runtime was available
    pub events_dropped: u64,
    /// Handler invocations started
    pub handlers_invoked: u64,
    /// Handler invocations that failed, panicked or were cancelled
    pub handler_failures: u64,
    /// Handler invocations still running past the slow handler threshold
    pub slow_handlers: u64,
    /// Registered handlers
    pub registered_handlers: usize,
    /// Instances with outstanding handler work
    pub pending_events: usize,
}

struct PendingOutcome {
    event: EventRef,
    generation: u64,
    outcome: SharedOutcome,
}

#[derive(Default)]
struct Counters {
    events_emitted: AtomicU64,
    events_untracked: AtomicU64,
    events_dropped: AtomicU64,
    handlers_invoked: AtomicU64,
    handler_failures: AtomicU64,
    slow_handlers: AtomicU64,
}

struct BusState {
    registry: Arc<Registry>,
    pending: Mutex<HashMap<Uuid, PendingOutcome>>,
    generation: AtomicU64,
    counters: Counters,
    config: EventBusConfig,
}

impl BusState {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<Uuid, PendingOutcome>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn any_pending(&self) -> Option<SharedOutcome> {
        self.lock_pending()
            .values()
            .next()
            .map(|entry| entry.outcome.clone())
    }

    fn spawn_handler(
        self: &Arc<Self>,
        runtime: &Handle,
        event: EventRef,
        registration: Registration,
        erased: ErasedEvent,
    ) -> JoinHandle<HandlerResult> {
        let threshold = self.config.slow_handler_threshold;
        let state = Arc::downgrade(self);

        runtime.spawn(async move {
            let mut call = registration.invoke(erased);
            let Some(threshold) = threshold else {
                return call.await;
            };

            let started = Instant::now();
            match timeout(threshold, &mut call).await {
                Ok(result) => result,
                Err(_) => {
                    if let Some(state) = state.upgrade() {
                        state.counters.slow_handlers.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::warn!(
                        event_id = %event.id,
                        event_kind = %event.kind,
                        handler = %registration.handler.name,
                        threshold_ms = threshold.as_millis() as u64,
                        "Slow event handler still running"
                    );

                    let result = call.await;
                    tracing::debug!(
                        event_id = %event.id,
                        event_kind = %event.kind,
                        handler = %registration.handler.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Slow event handler settled"
                    );
                    result
                }
            }
        })
    }

    fn record_settlement(&self, event: EventRef, settlement: &Settlement) {
        if let Settlement::Failed { handler, error } = settlement {
            self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
            if self.config.log_handler_failures {
                tracing::warn!(
                    event_id = %event.id,
                    event_kind = %event.kind,
                    handler = %handler.name,
                    error = %error,
                    "Event handler failed"
                );
            }
        }
    }

    /// Drop the tracking entry unless a later emission of the same instance
    /// replaced it.
    fn finish(&self, event: EventRef, generation: u64) {
        let mut pending = self.lock_pending();
        if pending
            .get(&event.id)
            .is_some_and(|entry| entry.generation == generation)
        {
            pending.remove(&event.id);
        }
    }
}

async fn settle(handler: HandlerRef, task: JoinHandle<HandlerResult>) -> Settlement {
    match task.await {
        Ok(Ok(result)) => Settlement::Succeeded { handler, result },
        Ok(Err(error)) => Settlement::Failed { handler, error },
        Err(join_error) => Settlement::Failed {
            handler,
            error: HandlerError::from(join_error),
        },
    }
}

async fn collect_outcome<S>(
    state: Weak<BusState>,
    event: EventRef,
    generation: u64,
    previous: Option<SharedOutcome>,
    mut tasks: FuturesUnordered<S>,
) -> Outcome
where
    S: Future<Output = Settlement>,
{
    let mut settlements = match previous {
        Some(previous) => previous.await.to_vec(),
        None => Vec::new(),
    };

    while let Some(settlement) = tasks.next().await {
        if let Some(state) = state.upgrade() {
            state.record_settlement(event, &settlement);
        }
        settlements.push(settlement);
    }

    // Removal happens before the outcome becomes observable, so anyone who
    // sees it settled also sees the entry gone.
    if let Some(state) = state.upgrade() {
        state.finish(event, generation);
    }

    tracing::debug!(
        event_id = %event.id,
        event_kind = %event.kind,
        settled = settlements.len(),
        "Event settled"
    );

    Outcome::from(settlements)
}

/// In-memory event bus implementation.
///
/// Cheap to clone; clones share registrations and tracked events, so a
/// handler can capture the bus and emit follow-up events.
///
/// # Example
///
/// ```rust,no_run
/// use footprint_events::{Envelope, EventBus, HandlerError, LoginEvent, MemoryEventBus};
///
/// async fn example(event: LoginEvent) -> Result<(), Box<dyn std::error::Error>> {
///     let bus = MemoryEventBus::new();
///
///     bus.on(|event: Envelope<LoginEvent>| async move {
///         Ok::<_, HandlerError>(event.user.id)
///     });
///
///     let event = Envelope::new(event);
///     bus.emit(&event);
///     bus.once(&[event.handle()]).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MemoryEventBus {
    state: Arc<BusState>,
}

impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("config", &self.state.config)
            .field("registered_handlers", &self.state.registry.len())
            .field("pending_events", &self.state.lock_pending().len())
            .finish()
    }
}

impl MemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            state: Arc::new(BusState {
                registry: Arc::new(Registry::default()),
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                counters: Counters::default(),
                config,
            }),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &EventBusConfig {
        &self.state.config
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    fn on_named<E, F, Fut, R>(&self, name: impl Into<String>, handler: F) -> Unsubscribe
    where
        E: Event,
        F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let handler_ref = self.state.registry.insert(name.into(), handler);

        tracing::debug!(
            event_kind = %E::KIND,
            handler = %handler_ref.name,
            subscription_id = %handler_ref.subscription_id,
            "Handler subscribed"
        );

        Unsubscribe::new(E::KIND, handler_ref, &self.state.registry)
    }

    fn emit<E: Event>(&self, event: &Envelope<E>) -> &Self {
        let event_ref = event.event_ref();
        let state = &self.state;
        state.counters.events_emitted.fetch_add(1, Ordering::Relaxed);

        let registrations = state.registry.snapshot(E::KIND);
        if registrations.is_empty() {
            state.counters.events_untracked.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event_id = %event_ref.id,
                event_kind = %event_ref.kind,
                "No handler registered, event not tracked"
            );
            return self;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(error) => {
                state.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    event_id = %event_ref.id,
                    event_kind = %event_ref.kind,
                    error = %error,
                    "Event emitted outside a Tokio runtime, handlers not started"
                );
                return self;
            }
        };

        let handler_count = registrations.len();
        let erased: ErasedEvent = Arc::new(event.clone());
        let tasks: FuturesUnordered<_> = registrations
            .into_iter()
            .map(|registration| {
                let handler = registration.handler.clone();
                let task = state.spawn_handler(&runtime, event_ref, registration, Arc::clone(&erased));
                settle(handler, task)
            })
            .collect();
        state
            .counters
            .handlers_invoked
            .fetch_add(handler_count as u64, Ordering::Relaxed);

        let generation = state.generation.fetch_add(1, Ordering::Relaxed);
        let outcome = {
            let mut pending = state.lock_pending();
            let previous = pending.get(&event_ref.id).map(|entry| entry.outcome.clone());
            if previous.is_some() {
                tracing::debug!(
                    event_id = %event_ref.id,
                    event_kind = %event_ref.kind,
                    "Instance emitted again while pending, chaining outcomes"
                );
            }
            let outcome = collect_outcome(
                Arc::downgrade(&self.state),
                event_ref,
                generation,
                previous,
                tasks,
            )
            .boxed()
            .shared();
            pending.insert(
                event_ref.id,
                PendingOutcome {
                    event: event_ref,
                    generation,
                    outcome: outcome.clone(),
                },
            );
            outcome
        };
        // Filled before `emit` returns: on a multi-thread runtime the
        // handlers may settle and leave the store before `once` is polled.
        event.outcome_slot().set(outcome.clone());

        // Drive the aggregate even when nobody awaits the event.
        runtime.spawn(outcome.map(|_| ()));

        tracing::debug!(
            event_id = %event_ref.id,
            event_kind = %event_ref.kind,
            category = ?event_ref.kind.category(),
            handlers = handler_count,
            "Event emitted"
        );

        self
    }

    async fn once(&self, events: &[EventHandle]) -> EventBusResult<Vec<EventResults>> {
        let waits = events.iter().map(|handle| {
            let event = handle.event();
            let outcome = handle.outcome();
            async move {
                let settlements = match outcome {
                    Some(outcome) => outcome.await,
                    None => Outcome::from(Vec::new()),
                };
                (event, settlements)
            }
        });

        let outcomes = futures::future::join_all(waits).await;
        into_results(outcomes)
    }

    async fn flush(&self) {
        while let Some(outcome) = self.state.any_pending() {
            outcome.await;
        }
    }

    fn pending(&self) -> Vec<EventRef> {
        self.state
            .lock_pending()
            .values()
            .map(|entry| entry.event)
            .collect()
    }

    fn stats(&self) -> EventBusStats {
        let counters = &self.state.counters;
        EventBusStats {
            events_emitted: counters.events_emitted.load(Ordering::Relaxed),
            events_untracked: counters.events_untracked.load(Ordering::Relaxed),
            events_dropped: counters.events_dropped.load(Ordering::Relaxed),
            handlers_invoked: counters.handlers_invoked.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
            slow_handlers: counters.slow_handlers.load(Ordering::Relaxed),
            registered_handlers: self.state.registry.len(),
            pending_events: self.state.lock_pending().len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Origin, UserRef, UserUpdatedEvent};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn user_updated() -> Envelope<UserUpdatedEvent> {
        Envelope::new(UserUpdatedEvent {
            user: UserRef::with_email(Uuid::now_v7(), "lea@example.org"),
            verified: true,
            newsletters: Some(vec![22]),
            previous_newsletters: Vec::new(),
            origin: Origin::default(),
        })
    }

    #[tokio::test]
    async fn test_emit_does_not_run_handlers_inline() {
        let bus = MemoryEventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.on(move |_event: Envelope<UserUpdatedEvent>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HandlerError>(()) }
        });

        let event = user_updated();
        bus.emit(&event);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        bus.once(&[event.handle()]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emit_is_chainable() {
        let bus = MemoryEventBus::new();
        bus.on(|_event: Envelope<UserUpdatedEvent>| async { Ok::<_, HandlerError>(()) });

        let first = user_updated();
        let second = user_updated();
        bus.emit(&first).emit(&second);

        let results = bus
            .once(&[first.handle(), second.handle()])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(bus.stats().events_emitted, 2);
    }

    #[tokio::test]
    async fn test_entry_removed_once_settled() {
        let bus = MemoryEventBus::new();
        let gate = Arc::new(Notify::new());
        let waiter = gate.clone();
        bus.on(move |_event: Envelope<UserUpdatedEvent>| {
            let waiter = waiter.clone();
            async move {
                waiter.notified().await;
                Ok::<_, HandlerError>(())
            }
        });

        let event = user_updated();
        bus.emit(&event);
        assert_eq!(bus.pending(), vec![event.event_ref()]);

        gate.notify_one();
        bus.once(&[event.handle()]).await.unwrap();
        assert!(bus.pending().is_empty());
        assert_eq!(bus.stats().pending_events, 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_captured() {
        let bus = MemoryEventBus::new();
        bus.on_named("panics", |_event: Envelope<UserUpdatedEvent>| async {
            if true {
                panic!("boom");
            }
            Ok::<_, HandlerError>(())
        });

        let event = user_updated();
        bus.emit(&event);
        let error = bus.once(&[event.handle()]).await.unwrap_err();

        let EventBusError::HandlersFailed(failures) = error else {
            panic!("expected handler failures");
        };
        assert!(matches!(
            failures.failures[0].errors[0],
            HandlerError::Panicked(ref message) if message == "boom"
        ));
        assert_eq!(bus.stats().handler_failures, 1);
    }

    #[tokio::test]
    async fn test_reemitting_pending_instance_chains_outcomes() {
        let bus = MemoryEventBus::new();
        bus.on(|_event: Envelope<UserUpdatedEvent>| async { Ok::<_, HandlerError>(()) });

        // Handlers only start at the next suspension point, so both
        // emissions happen while the first is still pending.
        let event = user_updated();
        bus.emit(&event).emit(&event);
        assert_eq!(bus.pending().len(), 1);

        let results = bus.once(&[event.handle()]).await.unwrap();
        assert_eq!(results[0].results.len(), 2);
        assert!(bus.pending().is_empty());
    }

    #[tokio::test]
    async fn test_once_after_settlement_still_reports_failures() {
        let bus = MemoryEventBus::new();
        bus.on_named("crm", |_event: Envelope<UserUpdatedEvent>| async {
            Err::<(), _>(HandlerError::msg("crm down"))
        });

        let event = user_updated();
        bus.emit(&event);
        bus.flush().await;
        assert!(bus.pending().is_empty());

        let error = bus.once(&[event.handle()]).await.unwrap_err();
        let EventBusError::HandlersFailed(failures) = error else {
            panic!("expected handler failures");
        };
        assert_eq!(failures.errors_for(&event.event_ref()).map(<[_]>::len), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_is_reported_while_running() {
        let bus = MemoryEventBus::with_config(
            EventBusConfig::default().with_slow_handler_threshold(Duration::from_millis(100)),
        );
        let gate = Arc::new(Notify::new());
        let waiter = gate.clone();
        bus.on(move |_event: Envelope<UserUpdatedEvent>| {
            let waiter = waiter.clone();
            async move {
                waiter.notified().await;
                Ok::<_, HandlerError>(())
            }
        });

        let event = user_updated();
        bus.emit(&event);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(bus.stats().slow_handlers, 1);
        assert_eq!(bus.pending(), vec![event.event_ref()]);

        gate.notify_one();
        let results = bus.once(&[event.handle()]).await.unwrap();
        assert_eq!(results[0].results.len(), 1);
        assert_eq!(bus.stats().slow_handlers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_is_not_reported_slow() {
        let bus = MemoryEventBus::with_config(
            EventBusConfig::default().with_slow_handler_threshold(Duration::from_millis(100)),
        );
        bus.on(|_event: Envelope<UserUpdatedEvent>| async { Ok::<_, HandlerError>(()) });

        bus.emit(&user_updated());
        bus.flush().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(bus.stats().slow_handlers, 0);
    }

    #[test]
    fn test_emit_outside_runtime_is_dropped() {
        let bus = MemoryEventBus::new();
        bus.on(|_event: Envelope<UserUpdatedEvent>| async { Ok::<_, HandlerError>(()) });

        bus.emit(&user_updated());

        let stats = bus.stats();
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.pending_events, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = MemoryEventBus::new();

        let stats = bus.stats();
        assert_eq!(stats.events_emitted, 0);
        assert_eq!(stats.registered_handlers, 0);

        let subscription =
            bus.on(|_event: Envelope<UserUpdatedEvent>| async { Ok::<_, HandlerError>(()) });
        assert_eq!(bus.stats().registered_handlers, 1);

        bus.emit(&user_updated());
        bus.flush().await;

        subscription.unsubscribe();
        bus.emit(&user_updated());

        let stats = bus.stats();
        assert_eq!(stats.events_emitted, 2);
        assert_eq!(stats.events_untracked, 1);
        assert_eq!(stats.handlers_invoked, 1);
        assert_eq!(stats.registered_handlers, 0);
    }
}
