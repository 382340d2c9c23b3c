pub mod lock;
pub mod service;
pub mod target;
pub mod types;

pub use lock::{SyncLockGuard, SyncLocks};
pub use service::SyncEngine;
pub use target::{TargetPlan, plan_target, realize_target};
pub use types::{
    ApprovalRequest, Approver, AutoApprove, MergePoint, ProjectSyncResult, SyncHistoryEntry,
    SyncOutcome, SyncPhase, SyncReport, SyncRequest,
};
