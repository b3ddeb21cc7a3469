//! Error taxonomy of the engine and the status codes reported at the
//! command-processing boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{IssueId, PositionId};

/// Which configured cap a rejected operation would have exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    NodesPerIssue,
    ContributionsPerUser,
    TotalIssues,
    IssuesPerUser,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::NodesPerIssue => "nodes_per_issue",
            LimitKind::ContributionsPerUser => "contributions_per_user",
            LimitKind::TotalIssues => "total_issues",
            LimitKind::IssuesPerUser => "issues_per_user",
        }
    }
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Rejected atomically: nothing was written and no id was consumed.
    #[error("capacity exceeded: {limit} (max {max})")]
    CapacityExceeded { limit: LimitKind, max: usize },

    #[error("issue {0} not found")]
    IssueNotFound(IssueId),

    #[error("position {0} not found")]
    PositionNotFound(PositionId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    CapacityExceeded,
    IssueNotFound,
    PositionNotFound,
    InvalidRequest,
    StorageFailure,
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::CapacityExceeded { .. } => StatusCode::CapacityExceeded,
            EngineError::IssueNotFound(_) => StatusCode::IssueNotFound,
            EngineError::PositionNotFound(_) => StatusCode::PositionNotFound,
            EngineError::InvalidRequest(_) => StatusCode::InvalidRequest,
            EngineError::Storage(_) => StatusCode::StorageFailure,
        }
    }
}
