pub mod llm;
pub mod source_host;

pub use llm::*;
pub use source_host::*;
