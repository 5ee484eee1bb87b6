//! Thin ports for the two external collaborators named out-of-scope in the
//! spec: the source host (§4.1) and the language model (§4.3/§4.4/§4.5).
//! Each gets a real HTTP-backed implementation sufficient to exercise the
//! pipeline, both behind the adaptive token-bucket rate limiter from
//! `coderisk-core`.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::{LlmClient, SourceHostClient};
pub use error::{ClientError, Result};
pub use infrastructure::{HttpLlmClient, HttpSourceHostClient, RecordingLlmClient, ReplayLlmClient};
