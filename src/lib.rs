//! Facade crate for the Onestop transit registry.
//!
//! This crate re-exports the core domain types and exposes the `SQLite`
//! registry behind the `store-sqlite` feature flag.
//!
//! ```
//! # #[cfg(feature = "store-sqlite")]
//! # {
//! use onestop_registry::{ApplyConfig, NewChangeset, Registry, RegistryStore};
//!
//! let store = RegistryStore::open_in_memory().unwrap();
//! let mut registry = Registry::new(store, ApplyConfig::default());
//! let changeset = registry.create_changeset(&NewChangeset::default()).unwrap();
//! let trial = registry.trial_apply(changeset.id);
//! assert!(trial.would_succeed);
//! # }
//! ```

#![forbid(unsafe_code)]

pub use onestop_core::{
    ApplyConfig, ChangeAction, ChangeOp, ChangePayload, Changeset, ChangesetEvent, ChangesetId,
    ChangesetUser, EntityChange, EntityId, EntityKind, Issue, IssueCandidate, IssueId, IssueType,
    JobQueue, NewChangeset, Notifier, PayloadBody, ValidationError,
};

#[cfg(feature = "store-sqlite")]
pub use onestop_store::{
    ApplyError, ApplyOutcome, ChangesetApplyEngine, QualityCheck, QualityCheckEngine, Registry,
    RegistryStore, StoreError, TrialOutcome, VersionedEntityRepository, WriteError,
};
