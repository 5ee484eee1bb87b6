//! Dual-store persistence: a relational staging store (system of record)
//! and a derived graph store (queried by risk consumers), per the spec's
//! persisted-state layout.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::{CoupledBlock, EntityCountVariance, GraphStore, IncidentSummary, OwnershipSummary, StagingStore};
pub use error::{ErrorKind, Result, StorageError};
pub use infrastructure::{InMemoryGraphStore, InMemoryStagingStore, Neo4jGraphStore, PostgresStagingStore};
