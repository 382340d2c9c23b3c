pub mod tracker;
pub mod types;

pub use tracker::DivergenceTracker;
pub use types::{Baseline, CloneBaseline, CommitSummary, Divergence, DivergencePlan};
