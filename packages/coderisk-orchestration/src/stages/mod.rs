//! The seven `StageHandler` implementations, one per §4.1-§4.7 component,
//! registered with the orchestrator in `StageId::ALL_IN_ORDER`.

pub mod s1_stage;
pub mod s2_ingest;
pub mod s3_link;
pub mod s4_atomize;
pub mod s5_index_incident;
pub mod s6_index_ownership;
pub mod s7_index_coupling;

pub use s1_stage::S1StageHandler;
pub use s2_ingest::S2IngestHandler;
pub use s3_link::S3LinkHandler;
pub use s4_atomize::S4AtomizeHandler;
pub use s5_index_incident::S5IndexIncidentHandler;
pub use s6_index_ownership::S6IndexOwnershipHandler;
pub use s7_index_coupling::S7IndexCouplingHandler;
