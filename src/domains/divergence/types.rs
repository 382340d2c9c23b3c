use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domains::git::CommitRange;

/// Clone HEAD recorded when the session was created. `commit_id` is `None`
/// when the source had no commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneBaseline {
    pub project: String,
    pub commit_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub author_name: String,
    pub author_email: String,
    /// Strict ISO 8601 author date as reported by git.
    pub authored_at: String,
    pub summary: String,
}

impl CommitSummary {
    pub fn new(
        id: impl Into<String>,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
        authored_at: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author_name: author_name.into(),
            author_email: author_email.into(),
            authored_at: authored_at.into(),
            summary: summary.into(),
        }
    }
}

/// Result of a read against a project clone that may have been removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Divergence<T> {
    Available(T),
    Unavailable { reason: String },
}

impl<T> Divergence<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            Divergence::Available(value) => Some(value),
            Divergence::Unavailable { .. } => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Divergence::Unavailable { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Divergence<U> {
        match self {
            Divergence::Available(value) => Divergence::Available(f(value)),
            Divergence::Unavailable { reason } => Divergence::Unavailable { reason },
        }
    }
}

/// Which baseline a count was measured against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Baseline {
    MergePoint(String),
    /// Commit the clone was made at, never synchronized since.
    Cloned(String),
    /// Root commit(s) of the clone. Only for sessions whose clone commit was
    /// never recorded.
    Root(Vec<String>),
    /// Whole history: discovered projects and clones of empty sources.
    Empty,
}

/// Everything needed to export a project's divergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergencePlan {
    /// `None` when the clone has no commits at all.
    pub head: Option<String>,
    pub baseline: Baseline,
    pub range: Option<CommitRange>,
    pub count: u32,
}

impl DivergencePlan {
    pub fn empty(head: Option<String>, baseline: Baseline) -> Self {
        Self {
            head,
            baseline,
            range: None,
            count: 0,
        }
    }
}
