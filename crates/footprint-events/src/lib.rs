//! # Footprint Events
//!
//! This crate provides the in-process event bus of the footprint platform.
//! Request handlers emit domain events (a user signed in, a simulation was
//! saved, an organisation changed) and the side effects subscribed to them
//! (CRM sync, poll stats) run asynchronously, with the request able to wait
//! for them and see their failures.
//!
//! ## Overview
//!
//! The footprint-events crate handles:
//! - **Event Types**: one payload type per [`EventKind`], wrapped in an
//!   [`Envelope`] that gives every emitted value its own identity
//! - **Registry**: typed handlers subscribed per kind with [`EventBus::on`]
//! - **Dispatch**: [`EventBus::emit`] starts every handler on its own task
//! - **Awaiting**: [`EventBus::once`] waits for specific instances and
//!   aggregates handler failures into one error
//! - **Draining**: [`EventBus::flush`] waits until nothing is outstanding
//!
//! ## Usage
//!
//! ### Subscribing at startup
//!
//! ```rust,no_run
//! use footprint_events::{Envelope, EventBus, HandlerError, MemoryEventBus, UserUpdatedEvent};
//!
//! fn bootstrap(bus: &MemoryEventBus) {
//!     bus.on(|event: Envelope<UserUpdatedEvent>| async move {
//!         // sync the contact with the CRM...
//!         Ok::<_, HandlerError>(serde_json::json!({ "user": event.user.id }))
//!     });
//! }
//! ```
//!
//! ### Emitting from a request handler
//!
//! ```rust,no_run
//! use footprint_events::{Envelope, EventBus, EventBusResult, MemoryEventBus, UserUpdatedEvent};
//!
//! async fn update_user(bus: &MemoryEventBus, event: UserUpdatedEvent) -> EventBusResult<()> {
//!     let event = Envelope::new(event);
//!     bus.emit(&event);
//!
//!     // Fails with every handler error when any handler failed
//!     bus.once(&[event.handle()]).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - Handlers registered after an emission never see it
//! - Handlers never run inline in `emit`
//! - Handlers of one instance run independently; one failing or panicking
//!   does not affect the others
//! - Nothing is cancelled or timed out by the bus; use
//!   [`EventBus::once_timeout`] or [`EventBus::flush_timeout`] to bound a wait

pub mod bus;
pub mod config;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod types;

// Re-export main types
pub use bus::{EventBus, EventBusStats, MemoryEventBus};
pub use config::{ConfigError, EventBusConfig};
pub use error::{
    EventBusError, EventBusResult, EventFailure, HandlerError, HandlerFailures, HandlerResult,
};
pub use outcome::{EventHandle, EventResults, HandlerRef, HandlerSuccess, Settlement};
pub use registry::{SubscriptionId, Unsubscribe};
pub use types::{
    Envelope, Event, EventCategory, EventKind, EventRef, GroupCreatedEvent, GroupDeletedEvent,
    GroupRef, GroupUpdatedEvent, LoginEvent, OrganisationCreatedEvent, OrganisationSummary,
    OrganisationUpdatedEvent, Origin, PollCreatedEvent, PollDeletedEvent, PollRef,
    PollUpdatedEvent, SimulationSummary, SimulationUpsertedEvent, UserRef, UserUpdatedEvent,
    VerificationCodeCreatedEvent,
};
