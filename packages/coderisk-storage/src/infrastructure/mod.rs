//! Storage adapters. `memory` backs tests and the Reconcile dry-run path;
//! `postgres` and `neo4j` are the production staging/graph stores named in
//! the spec's persisted-state layout (§6).

pub mod memory;
pub mod neo4j;
pub mod postgres;

pub use memory::{InMemoryGraphStore, InMemoryStagingStore};
pub use neo4j::Neo4jGraphStore;
pub use postgres::PostgresStagingStore;
