pub mod adapter;
pub mod branches;
pub mod repository;
pub mod service;
pub mod worktrees;

pub use adapter::{ApplyOutcome, CloneRequest, CommitRange, GitCli, RepositoryAdapter};
pub use service::*;
