//! Event types published on the footprint event bus
//!
//! This module defines the event discriminants, the payloads controllers
//! emit when users, simulations, organisations, polls and groups change,
//! and the [`Envelope`] that gives each emitted value its own identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

use crate::outcome::{EventHandle, OutcomeSlot};

/// Discriminant of every event type known to the bus.
///
/// Handlers are registered per kind, and each payload type is bound to
/// exactly one kind through [`Event::KIND`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A user signed in
    Login,
    /// A user profile or newsletter subscription changed
    UserUpdated,
    /// A login verification code was issued
    VerificationCodeCreated,
    /// A simulation was created or updated
    SimulationUpserted,
    /// An organisation was created
    OrganisationCreated,
    /// An organisation was updated
    OrganisationUpdated,
    /// A poll was created
    PollCreated,
    /// A poll was updated
    PollUpdated,
    /// A poll was deleted
    PollDeleted,
    /// A group was created
    GroupCreated,
    /// A group was updated
    GroupUpdated,
    /// A group was deleted
    GroupDeleted,
}

impl EventKind {
    /// Stable dotted name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Login => "user.login",
            EventKind::UserUpdated => "user.updated",
            EventKind::VerificationCodeCreated => "verification_code.created",
            EventKind::SimulationUpserted => "simulation.upserted",
            EventKind::OrganisationCreated => "organisation.created",
            EventKind::OrganisationUpdated => "organisation.updated",
            EventKind::PollCreated => "poll.created",
            EventKind::PollUpdated => "poll.updated",
            EventKind::PollDeleted => "poll.deleted",
            EventKind::GroupCreated => "group.created",
            EventKind::GroupUpdated => "group.updated",
            EventKind::GroupDeleted => "group.deleted",
        }
    }

    /// Category this kind belongs to.
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::Login | EventKind::UserUpdated | EventKind::VerificationCodeCreated => {
                EventCategory::User
            }
            EventKind::SimulationUpserted => EventCategory::Simulation,
            EventKind::OrganisationCreated | EventKind::OrganisationUpdated => {
                EventCategory::Organisation
            }
            EventKind::PollCreated | EventKind::PollUpdated | EventKind::PollDeleted => {
                EventCategory::Poll
            }
            EventKind::GroupCreated | EventKind::GroupUpdated | EventKind::GroupDeleted => {
                EventCategory::Group
            }
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event categories for filtering and log fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Account and authentication events
    User,
    /// Footprint simulation events
    Simulation,
    /// Organisation administration events
    Organisation,
    /// Organisation poll events
    Poll,
    /// Friends group events
    Group,
}

/// A payload that can travel through the bus.
///
/// # Examples
///
/// ```
/// use footprint_events::{Event, EventKind, LoginEvent};
///
/// assert_eq!(LoginEvent::KIND, EventKind::Login);
/// ```
pub trait Event: Send + Sync + 'static {
    /// The discriminant handlers for this payload are registered under.
    const KIND: EventKind;
}

/// Identity of one event instance, used in results, errors and logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventRef {
    /// Instance id
    pub id: Uuid,
    /// Event kind
    pub kind: EventKind,
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// One occurrence of an event.
///
/// Every call to [`Envelope::new`] yields a distinct instance, even for
/// identical payloads. Clones share the id and refer to the same instance.
pub struct Envelope<E> {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    correlation_id: Option<String>,
    payload: Arc<E>,
    outcome: OutcomeSlot,
}

impl<E> Clone for Envelope<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            occurred_at: self.occurred_at,
            correlation_id: self.correlation_id.clone(),
            payload: Arc::clone(&self.payload),
            outcome: self.outcome.clone(),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Envelope<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("occurred_at", &self.occurred_at)
            .field("correlation_id", &self.correlation_id)
            .field("payload", &self.payload)
            .finish()
    }
}

impl<E: Event> Envelope<E> {
    /// Wrap a payload into a fresh event instance.
    pub fn new(payload: E) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            correlation_id: None,
            payload: Arc::new(payload),
            outcome: OutcomeSlot::default(),
        }
    }

    /// Set the correlation ID of the request that produced the event.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Instance id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Event kind.
    pub fn kind(&self) -> EventKind {
        E::KIND
    }

    /// Creation timestamp.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Correlation ID, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Payload carried by this instance.
    pub fn payload(&self) -> &E {
        &self.payload
    }

    /// Copyable identity of this instance.
    pub fn event_ref(&self) -> EventRef {
        EventRef {
            id: self.id,
            kind: E::KIND,
        }
    }

    /// Handle for awaiting this instance with [`crate::EventBus::once`].
    pub fn handle(&self) -> EventHandle {
        EventHandle::new(self.event_ref(), self.outcome.clone())
    }

    pub(crate) fn outcome_slot(&self) -> &OutcomeSlot {
        &self.outcome
    }
}

impl<E> Deref for Envelope<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.payload
    }
}

impl<E: Event> From<&Envelope<E>> for EventRef {
    fn from(envelope: &Envelope<E>) -> Self {
        envelope.event_ref()
    }
}

impl<E: Event> From<&Envelope<E>> for EventHandle {
    fn from(envelope: &Envelope<E>) -> Self {
        envelope.handle()
    }
}

// ============================================================================
// Shared payload parts
// ============================================================================

/// Identity of the user an event is about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRef {
    /// User id
    pub id: Uuid,
    /// Email, unset for anonymous users
    pub email: Option<String>,
    /// Display name
    pub name: Option<String>,
}

impl UserRef {
    /// Anonymous user known only by id.
    pub fn anonymous(id: Uuid) -> Self {
        Self {
            id,
            email: None,
            name: None,
        }
    }

    /// User with a known email.
    pub fn with_email(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: Some(email.into()),
            name: None,
        }
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Origin {
    /// Site origin, e.g. `https://example.org`
    pub url: String,
    /// Interface locale
    pub locale: String,
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            url: String::new(),
            locale: "fr".to_string(),
        }
    }
}

// ============================================================================
// User events
// ============================================================================

/// A user signed in with a verification code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginEvent {
    /// User who signed in
    pub user: UserRef,
    /// Request origin
    pub origin: Origin,
}

impl Event for LoginEvent {
    const KIND: EventKind = EventKind::Login;
}

/// A user profile changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdatedEvent {
    /// Updated user
    pub user: UserRef,
    /// Whether the email was verified in this request
    pub verified: bool,
    /// Newsletter list ids after the update, `None` when unchanged
    pub newsletters: Option<Vec<u64>>,
    /// Newsletter list ids before the update
    pub previous_newsletters: Vec<u64>,
    /// Request origin
    pub origin: Origin,
}

impl Event for UserUpdatedEvent {
    const KIND: EventKind = EventKind::UserUpdated;
}

/// A login verification code was issued and must be mailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCodeCreatedEvent {
    /// Recipient
    pub email: String,
    /// Code to send
    pub code: String,
    /// Expiry of the code
    pub expires_at: DateTime<Utc>,
    /// Request origin
    pub origin: Origin,
}

impl Event for VerificationCodeCreatedEvent {
    const KIND: EventKind = EventKind::VerificationCodeCreated;
}

// ============================================================================
// Simulation events
// ============================================================================

/// Summary of a simulation, enough for CRM attributes and stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSummary {
    /// Simulation id
    pub id: Uuid,
    /// Owner
    pub user: UserRef,
    /// Carbon footprint in kgCO2e per year
    pub carbon_footprint: f64,
    /// Water footprint in litres per day
    pub water_footprint: Option<f64>,
    /// Completion ratio in `[0, 1]`
    pub progression: f64,
    /// Polls the simulation answers
    #[serde(default)]
    pub poll_ids: Vec<Uuid>,
    /// Groups the simulation participates in
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
}

impl SimulationSummary {
    /// A simulation counts as completed once progression reaches 1.
    pub fn is_completed(&self) -> bool {
        self.progression >= 1.0
    }
}

/// A simulation was created or updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationUpsertedEvent {
    /// Upserted simulation
    pub simulation: SimulationSummary,
    /// Request origin
    pub origin: Origin,
}

impl Event for SimulationUpsertedEvent {
    const KIND: EventKind = EventKind::SimulationUpserted;
}

// ============================================================================
// Organisation events
// ============================================================================

/// Summary of an organisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganisationSummary {
    /// Organisation id
    pub id: Uuid,
    /// Name
    pub name: String,
    /// URL slug
    pub slug: String,
    /// Organisation type, e.g. `company`
    pub organisation_type: Option<String>,
    /// Declared number of collaborators
    pub number_of_collaborators: Option<u32>,
}

/// An organisation was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganisationCreatedEvent {
    /// Created organisation
    pub organisation: OrganisationSummary,
    /// Administrator who created it
    pub administrator: UserRef,
    /// Request origin
    pub origin: Origin,
}

impl Event for OrganisationCreatedEvent {
    const KIND: EventKind = EventKind::OrganisationCreated;
}

/// An organisation was updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganisationUpdatedEvent {
    /// Updated organisation
    pub organisation: OrganisationSummary,
    /// Administrator who updated it
    pub administrator: UserRef,
    /// Request origin
    pub origin: Origin,
}

impl Event for OrganisationUpdatedEvent {
    const KIND: EventKind = EventKind::OrganisationUpdated;
}

// ============================================================================
// Poll and group events
// ============================================================================

/// Identity of an organisation poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollRef {
    /// Poll id
    pub id: Uuid,
    /// Poll slug
    pub slug: String,
    /// Owning organisation
    pub organisation_id: Uuid,
}

/// A poll was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollCreatedEvent {
    /// Created poll
    pub poll: PollRef,
}

impl Event for PollCreatedEvent {
    const KIND: EventKind = EventKind::PollCreated;
}

/// A poll was updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollUpdatedEvent {
    /// Updated poll
    pub poll: PollRef,
}

impl Event for PollUpdatedEvent {
    const KIND: EventKind = EventKind::PollUpdated;
}

/// A poll was deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollDeletedEvent {
    /// Deleted poll
    pub poll: PollRef,
}

impl Event for PollDeletedEvent {
    const KIND: EventKind = EventKind::PollDeleted;
}

/// Identity of a friends group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRef {
    /// Group id
    pub id: Uuid,
    /// Group name
    pub name: String,
    /// Administrator
    pub administrator: UserRef,
}

/// A group was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCreatedEvent {
    /// Created group
    pub group: GroupRef,
}

impl Event for GroupCreatedEvent {
    const KIND: EventKind = EventKind::GroupCreated;
}

/// A group was updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupUpdatedEvent {
    /// Updated group
    pub group: GroupRef,
}

impl Event for GroupUpdatedEvent {
    const KIND: EventKind = EventKind::GroupUpdated;
}

/// A group was deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDeletedEvent {
    /// Deleted group
    pub group: GroupRef,
}

impl Event for GroupDeletedEvent {
    const KIND: EventKind = EventKind::GroupDeleted;
}
