//! # Footprint Sync
//!
//! Side effects of platform events: keeping the CRM contact base in sync and
//! recomputing poll and group statistics.
//!
//! ## Overview
//!
//! The footprint-sync crate handles:
//! - **Handlers**: One async handler per side effect, subscribed to the event bus
//! - **CRM**: Contact attributes, newsletter lists and transactional emails
//! - **Stats**: Invalidation and incremental recording of poll/group aggregates
//! - **Retry**: Exponential backoff around transient CRM failures
//!
//! The CRM provider and the stats store are reached through the [`CrmClient`]
//! and [`StatsStore`] traits; concrete HTTP and cache clients live with the
//! service that wires them.
//!
//! ## Registered Handlers
//!
//! ### CRM (only when `CRM_SYNC_ENABLED` is set)
//! - `crm.sync_login`: last login of the user
//! - `crm.sync_user`: contact attributes and newsletter subscriptions
//! - `crm.send_verification_code`: verification code email
//! - `crm.sync_simulation`: footprint of completed simulations
//! - `crm.sync_organisation_created` / `crm.sync_organisation_updated`:
//!   organisation administrators
//!
//! ### Stats
//! - `stats.record_simulation`: fold simulations into poll and group aggregates
//! - `stats.invalidate_*`: drop aggregates of updated or deleted polls and groups
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use footprint_events::{MemoryEventBus, SimulationSummary};
//! use footprint_sync::{
//!     register_handlers, ContactUpsert, CrmClient, CrmError, StatsError, StatsScope,
//!     StatsStore, SyncConfig, SyncHandlers, TransactionalEmail,
//! };
//! use std::sync::Arc;
//!
//! struct Provider;
//!
//! #[async_trait]
//! impl CrmClient for Provider {
//!     async fn upsert_contact(&self, _contact: ContactUpsert) -> Result<(), CrmError> {
//!         Ok(())
//!     }
//!
//!     async fn update_newsletters(
//!         &self,
//!         _email: &str,
//!         _subscribe: &[u64],
//!         _unsubscribe: &[u64],
//!     ) -> Result<(), CrmError> {
//!         Ok(())
//!     }
//!
//!     async fn send_transactional_email(&self, _email: TransactionalEmail) -> Result<(), CrmError> {
//!         Ok(())
//!     }
//! }
//!
//! struct Cache;
//!
//! #[async_trait]
//! impl StatsStore for Cache {
//!     async fn record_simulation(
//!         &self,
//!         _scope: StatsScope,
//!         _simulation: &SimulationSummary,
//!     ) -> Result<(), StatsError> {
//!         Ok(())
//!     }
//!
//!     async fn invalidate(&self, _scope: StatsScope) -> Result<(), StatsError> {
//!         Ok(())
//!     }
//! }
//!
//! async fn bootstrap() -> MemoryEventBus {
//!     let bus = MemoryEventBus::new();
//!     let handlers = SyncHandlers::new(Arc::new(Provider), Arc::new(Cache), SyncConfig::from_env());
//!     let subscriptions = register_handlers(&bus, Arc::new(handlers));
//!     println!("Registered {} handlers", subscriptions.len());
//!     bus
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod crm;
pub mod handlers;
pub mod retry;
pub mod stats;

// Re-export main types
pub use bootstrap::register_handlers;
pub use config::SyncConfig;
pub use crm::{ContactAttributes, ContactUpsert, CrmClient, CrmError, TransactionalEmail};
pub use handlers::SyncHandlers;
pub use retry::{with_retry_if, RetryConfig};
pub use stats::{StatsError, StatsScope, StatsStore};
