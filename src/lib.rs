pub mod api;
pub mod domains;
pub mod errors;
pub mod infrastructure;
pub mod logging;
pub mod utils;

pub use api::{DivergenceReport, Enclave};
pub use domains::divergence::{CommitSummary, Divergence};
pub use domains::merge::{
    ApprovalRequest, Approver, AutoApprove, ProjectSyncResult, SyncOutcome, SyncReport,
    SyncRequest,
};
pub use domains::projects::{Project, ProjectSpec, Provenance};
pub use domains::sessions::{SessionHandle, SessionView};
pub use domains::settings::{EngineConfig, Identity, TargetPolicy};
pub use errors::EnclaveError;
