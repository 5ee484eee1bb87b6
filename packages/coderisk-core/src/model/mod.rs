pub mod block_change;
pub mod code_block;
pub mod commit;
pub mod dead_letter;
pub mod file_identity;
pub mod ingestion_job;
pub mod issue;
pub mod issue_pr_link;
pub mod repository;

pub use block_change::{BlockChange, ChangeKind};
pub use code_block::{BlockType, CodeBlock, RiskProperties};
pub use commit::{Commit, FileChange};
pub use dead_letter::{next_retry_at, DeadLetter, DeadLetterStatus, UnitKind};
pub use file_identity::{FileIdentity, FileIdentityMap};
pub use ingestion_job::{IngestionJob, JobState, StageId};
pub use issue::{Comment, Issue, PullRequest, TimelineEvent, TimelineEventKind};
pub use issue_pr_link::{
    ConfidenceBreakdown, DetectionMethod, IssuePRLink, LinkClassification, LinkQuality,
};
pub use repository::{IngestionStatus, Repository};
