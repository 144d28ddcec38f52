//! `SQLite` persistence and the changeset apply engine for the Onestop
//! registry.
//!
//! The store keeps one current row per entity business key, archives every
//! superseded or destroyed version, and records data-quality issues attached
//! to entity attributes. [`ChangesetApplyEngine`] applies a changeset's
//! payloads, runs the [`QualityCheckEngine`] and reconciles issues inside a
//! single transaction; [`Registry`] bundles both behind one handle.
//!
//! ```
//! use onestop_store::{Registry, RegistryStore};
//! use onestop_core::{ApplyConfig, ChangeOp, EntityChange, NewChangeset, Operator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = Registry::new(RegistryStore::open_in_memory()?, ApplyConfig::default());
//! let changeset = registry.create_changeset(&NewChangeset::default().with_notes("add operator"))?;
//! registry.add_changes(
//!     changeset.id,
//!     vec![ChangeOp::create_update(EntityChange::Operator(Operator {
//!         onestop_id: "o-9q9-bart".to_owned(),
//!         name: Some("BART".to_owned()),
//!         ..Operator::default()
//!     }))],
//! )?;
//! let outcome = registry.apply(changeset.id)?;
//! assert_eq!(outcome.touched_entities, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod changesets;
mod cursor;
mod engine;
mod error;
mod issues;
mod provenance;
pub mod quality;
mod reconcile;
mod registry;
mod repository;
pub mod schema;
mod store;
mod touched;

pub use changesets::ChangesetStore;
pub use cursor::{ChangesetEntityCursor, MAX_BATCH_SIZE};
pub use engine::{ApplyMode, ApplyOutcome, ChangesetApplyEngine, TrialOutcome};
pub use error::{ApplyError, StoreError, WriteError};
pub use issues::IssueStore;
pub use provenance::{FeedVersionStore, ImportedEntity};
pub use quality::{
    CheckContext, QualityCheck, QualityCheckEngine, RspLineCheck, StopRspDistanceCheck,
};
pub use reconcile::Reconciliation;
pub use registry::Registry;
pub use repository::{
    Attributes, HistoricalEntity, StoredEntity, UpsertOutcome, VersionedEntityRepository,
};
pub use schema::SchemaError;
pub use store::{DEFAULT_BUSY_TIMEOUT, RegistryStore};
pub use touched::{TouchedEntities, TouchedEntity};
