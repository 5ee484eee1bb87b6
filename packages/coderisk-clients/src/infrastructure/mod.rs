pub mod llm_http;
pub mod record_replay;
pub mod source_host_http;

pub use llm_http::HttpLlmClient;
pub use record_replay::{RecordingLlmClient, ReplayLlmClient};
pub use source_host_http::HttpSourceHostClient;
