//! JSON request/response records for the line-oriented service.
//!
//! One request object per line, tagged by `op`; an optional `id` is echoed
//! back so clients can match responses to requests that complete out of
//! order (revision waits).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::{Command, Engine};
use crate::error::{EngineError, StatusCode};
use crate::graph::node::PremiseSpec;
use crate::{IssueId, PositionId};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    AddIssue {
        user: String,
        name: String,
    },
    RenameIssue {
        user: String,
        issue: IssueId,
        name: String,
    },
    DeleteIssue {
        user: String,
        issue: IssueId,
    },
    AddPosition {
        user: String,
        issue: IssueId,
        statement: String,
        #[serde(default)]
        duplicate_of: Option<PositionId>,
    },
    AddArgument {
        user: String,
        issue: IssueId,
        supports_conclusion: bool,
        conclusion_id: PositionId,
        premises: Vec<PremiseSpec>,
    },
    PlaceBid {
        user: String,
        issue: IssueId,
        position_id: PositionId,
        support: bool,
        price: f64,
    },
    Graph {
        issue: IssueId,
    },
    PositionText {
        issue: IssueId,
        position_id: PositionId,
    },
    Revision {
        issue: IssueId,
    },
    WaitRevision {
        issue: IssueId,
        last_seen: u64,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Program {
        issue: IssueId,
    },
}

impl Request {
    /// Requests that may park for a long time and should not hold up the
    /// ones behind them.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Request::WaitRevision { .. })
    }
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub status: StatusCode,
    pub result: Value,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self { id: None, status: StatusCode::Ok, result }
    }

    pub fn error(err: &EngineError) -> Self {
        Self {
            id: None,
            status: err.status(),
            result: json!({ "error": err.to_string() }),
        }
    }

    fn from_result(res: Result<Value, EngineError>) -> Self {
        match res {
            Ok(v) => Self::ok(v),
            Err(err) => Self::error(&err),
        }
    }
}

pub fn parse_line(line: &str) -> Result<Envelope, Response> {
    serde_json::from_str(line)
        .map_err(|e| Response::error(&EngineError::InvalidRequest(format!("bad request: {}", e))))
}

pub async fn handle(engine: &Engine, request: Request) -> Response {
    let res = match request {
        Request::AddIssue { user, name } => engine
            .add_issue(&user, &name)
            .await
            .map(|id| json!({ "issue": id })),
        Request::RenameIssue { user, issue, name } => engine
            .execute(&user, issue, Command::RenameIssue { name })
            .await
            .map(|out| json!(out)),
        Request::DeleteIssue { user, issue } => engine
            .execute(&user, issue, Command::DeleteIssue)
            .await
            .map(|out| json!(out)),
        Request::AddPosition { user, issue, statement, duplicate_of } => engine
            .execute(&user, issue, Command::AddPosition { statement, duplicate_of })
            .await
            .map(|out| json!(out)),
        Request::AddArgument { user, issue, supports_conclusion, conclusion_id, premises } => engine
            .execute(&user, issue, Command::AddArgument { supports_conclusion, conclusion_id, premises })
            .await
            .map(|out| json!(out)),
        Request::PlaceBid { user, issue, position_id, support, price } => engine
            .execute(&user, issue, Command::PlaceBid { position_id, support, price })
            .await
            .map(|out| json!(out)),
        Request::Graph { issue } => engine.drawn_graph_data(issue).map(|g| json!(g)),
        Request::PositionText { issue, position_id } => Ok(json!(engine.position_text(issue, position_id))),
        Request::Revision { issue } => engine.revision(issue).map(|rev| json!({ "revision": rev })),
        Request::WaitRevision { issue, last_seen, timeout_ms } => wait_revision(engine, issue, last_seen, timeout_ms).await,
        Request::Program { issue } => engine.program_text(issue).await.map(Value::String),
    };
    Response::from_result(res)
}

/// The engine defines no timeout; the deadline is the caller's.
async fn wait_revision(
    engine: &Engine,
    issue: IssueId,
    last_seen: u64,
    timeout_ms: Option<u64>,
) -> Result<Value, EngineError> {
    let wait = engine.wait_for_next_revision(issue, last_seen);
    match timeout_ms {
        None => wait.await.map(|rev| json!({ "revision": rev, "timed_out": false })),
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), wait).await {
            Ok(res) => res.map(|rev| json!({ "revision": rev, "timed_out": false })),
            Err(_) => engine
                .revision(issue)
                .map(|rev| json!({ "revision": rev, "timed_out": true })),
        },
    }
}
