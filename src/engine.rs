//! Service root: command dispatch, persistence hand-off and the read API.
//!
//! Mutations on one issue are processed one at a time in arrival order (the
//! issue's writer mutex is fair). Reads go through the issue's
//! [`GraphReader`](crate::graph::store::GraphReader) and never wait for a
//! writer. Issues are independent of each other.
//!
//! The in-memory graph is authoritative. After each successful mutation the
//! issue's full record is committed; a failed commit is logged and healed by
//! the next successful one.

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::belief::solver::{Solver, WorldSolver};
use crate::config::Config;
use crate::error::EngineError;
use crate::graph::node::PremiseSpec;
use crate::graph::snapshot::DrawnGraph;
use crate::graph::store::{ArgumentGraph, BeliefServices};
use crate::logging::{log, log_issue_event, log_price_recorded, log_storage_failure, obj, v_str, Domain, Level};
use crate::market::PriceBook;
use crate::registry::{IssueEntry, Registry};
use crate::storage::{is_conflict, Change, IssueStore, META_NEXT_ISSUE_ID};
use crate::{ArgumentId, IssueId, PositionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    AddPosition {
        statement: String,
        #[serde(default)]
        duplicate_of: Option<PositionId>,
    },
    AddArgument {
        supports_conclusion: bool,
        conclusion_id: PositionId,
        premises: Vec<PremiseSpec>,
    },
    /// Sandbox bid: taken directly as the position's last price.
    PlaceBid {
        position_id: PositionId,
        support: bool,
        price: f64,
    },
    RenameIssue {
        name: String,
    },
    DeleteIssue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    PositionAdded(PositionId),
    ArgumentAdded(ArgumentId),
    PriceRecorded(f64),
    Renamed,
    Deleted,
}

pub struct Engine {
    registry: RwLock<Registry>,
    prices: Arc<PriceBook>,
    store: Mutex<IssueStore>,
}

impl Engine {
    /// Open the configured database and restore every stored issue.
    pub fn open(config: &Config) -> Result<Self> {
        let store = IssueStore::new(&config.sqlite_path)?;
        Self::with_store(config, store, Arc::new(WorldSolver::new(config.solver)))
    }

    /// Fresh engine on an in-memory database with default configuration.
    pub fn in_memory() -> Result<Self> {
        Self::with_store(
            &Config::default(),
            IssueStore::open_in_memory()?,
            Arc::new(WorldSolver::default()),
        )
    }

    pub fn with_store(config: &Config, mut store: IssueStore, solver: Arc<dyn Solver>) -> Result<Self> {
        store.init()?;
        let prices = Arc::new(PriceBook::new());
        let services = BeliefServices { solver, prices: prices.clone() };
        let mut registry = Registry::new(config.limits, services.clone());

        for (id, loaded) in store.load_all()? {
            let record = match loaded {
                Ok(record) => record,
                Err(err) => {
                    log_storage_failure(Some(id), &format!("{:#}", err), false);
                    continue;
                }
            };
            // prices first: restoring recomputes beliefs
            prices.restore(id, record.prices.clone());
            match ArgumentGraph::restore(record, config.limits, services.clone()) {
                Ok(graph) => {
                    registry.insert_restored(graph);
                }
                Err(err) => {
                    prices.clear_issue(id);
                    log_storage_failure(Some(id), &format!("{:#}", err), false);
                }
            }
        }
        registry.set_next_issue_id(load_next_issue_id(&store));

        log(
            Level::Info,
            Domain::System,
            "engine_ready",
            obj(&[
                ("issues", json!(registry.issue_count())),
                ("next_issue_id", json!(registry.next_issue_id())),
            ]),
        );

        Ok(Self {
            registry: RwLock::new(registry),
            prices,
            store: Mutex::new(store),
        })
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn issue_ids(&self) -> Vec<IssueId> {
        self.registry_read().ids()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn add_issue(&self, user: &str, name: &str) -> Result<IssueId, EngineError> {
        let entry = self.registry_write().add_issue(user, name)?;
        let graph = entry.writer.lock().await;
        self.persist(&graph, true);
        Ok(entry.id)
    }

    pub async fn execute(&self, user: &str, issue: IssueId, command: Command) -> Result<Outcome, EngineError> {
        let entry = match &command {
            Command::AddPosition { statement, duplicate_of } => {
                // a missing issue is created only if its first position is accepted
                let (entry, first) = self.registry_write().ensure_issue_with(issue, user, |graph| {
                    graph.add_position(user, statement, *duplicate_of)
                })?;
                if let Some(id) = first {
                    let graph = entry.writer.lock().await;
                    if self.is_live(&entry) {
                        self.persist(&graph, true);
                    }
                    return Ok(Outcome::PositionAdded(id));
                }
                entry
            }
            _ => self.registry_read().get(issue)?,
        };

        let mut graph = entry.writer.lock().await;
        // the issue may have been deleted while this command was queued
        if !self.is_live(&entry) {
            return Err(EngineError::IssueNotFound(issue));
        }

        match command {
            Command::AddPosition { statement, duplicate_of } => {
                let id = graph.add_position(user, &statement, duplicate_of)?;
                self.persist(&graph, false);
                Ok(Outcome::PositionAdded(id))
            }
            Command::AddArgument { supports_conclusion, conclusion_id, premises } => {
                let id = graph.add_argument(user, supports_conclusion, conclusion_id, premises)?;
                self.persist(&graph, false);
                Ok(Outcome::ArgumentAdded(id))
            }
            Command::PlaceBid { position_id, support, price } => {
                let canonical = graph.canonical_of(position_id)?;
                let last = self.prices.record_bid(issue, canonical, support, price)?;
                log_price_recorded(issue, canonical, last);
                let _ = graph.recompute_beliefs();
                self.persist(&graph, false);
                Ok(Outcome::PriceRecorded(last))
            }
            Command::RenameIssue { name } => {
                if entry.owner != user {
                    return Err(EngineError::IssueNotFound(issue));
                }
                graph.rename(&name);
                log_issue_event("issue_renamed", issue, graph.name());
                self.persist(&graph, false);
                Ok(Outcome::Renamed)
            }
            Command::DeleteIssue => {
                if entry.owner != user {
                    return Err(EngineError::IssueNotFound(issue));
                }
                self.registry_write().remove(issue)?;
                self.prices.clear_issue(issue);
                self.commit(Some(issue), &[Change::DeleteIssue(issue)]);
                Ok(Outcome::Deleted)
            }
        }
    }

    /// Commit every live issue; used on shutdown.
    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        let entries: Vec<Arc<IssueEntry>> = {
            let registry = self.registry_read();
            registry.ids().into_iter().filter_map(|id| registry.get(id).ok()).collect()
        };
        let mut changes = Vec::with_capacity(entries.len() + 1);
        for entry in entries {
            let graph = entry.writer.lock().await;
            changes.push(Change::PutIssue(graph.to_record(self.prices.prices_for(entry.id))));
        }
        changes.push(self.next_issue_meta());
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.commit(&changes).map_err(|err| {
            log_storage_failure(None, &format!("{:#}", err), is_conflict(&err));
            EngineError::Storage(err.to_string())
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn drawn_graph_data(&self, issue: IssueId) -> Result<DrawnGraph, EngineError> {
        Ok(self.registry_read().get(issue)?.reader.drawn_graph())
    }

    /// Statement of a position; empty when the issue or position is unknown.
    pub fn position_text(&self, issue: IssueId, position: PositionId) -> String {
        self.registry_read()
            .get(issue)
            .map(|entry| entry.reader.position_text(position))
            .unwrap_or_default()
    }

    pub fn revision(&self, issue: IssueId) -> Result<u64, EngineError> {
        Ok(self.registry_read().get(issue)?.reader.revision())
    }

    pub fn marginal(&self, issue: IssueId, position: PositionId) -> Result<Option<f64>, EngineError> {
        Ok(self.registry_read().get(issue)?.reader.marginal(position))
    }

    /// Wait until the issue's revision exceeds `last_seen`. Dropping the
    /// future abandons the wait; deleting the issue ends it with
    /// `IssueNotFound`.
    pub async fn wait_for_next_revision(&self, issue: IssueId, last_seen: u64) -> Result<u64, EngineError> {
        let watcher = self.registry_read().get(issue)?.reader.watcher();
        watcher.wait_past(last_seen).await.map_err(|_| EngineError::IssueNotFound(issue))
    }

    /// Last compiled belief program of an issue.
    pub async fn program_text(&self, issue: IssueId) -> Result<String, EngineError> {
        let entry = self.registry_read().get(issue)?;
        let graph = entry.writer.lock().await;
        Ok(graph.program_text().to_string())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn is_live(&self, entry: &Arc<IssueEntry>) -> bool {
        self.registry_read()
            .get(entry.id)
            .map(|current| Arc::ptr_eq(&current, entry))
            .unwrap_or(false)
    }

    fn next_issue_meta(&self) -> Change {
        Change::SetMeta {
            key: META_NEXT_ISSUE_ID.to_string(),
            value: self.registry_read().next_issue_id().to_string(),
        }
    }

    /// Commit the issue's record, with the registry counter when the issue
    /// was just created.
    fn persist(&self, graph: &ArgumentGraph, with_counter: bool) {
        let id = graph.issue_id();
        let mut changes = vec![Change::PutIssue(graph.to_record(self.prices.prices_for(id)))];
        if with_counter {
            changes.push(self.next_issue_meta());
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            // counter updates: retry once, then keep the in-memory value
            if let Err(err) = store.commit_retrying_once(&changes) {
                log_storage_failure(Some(id), &format!("{:#}", err), false);
            }
            return;
        }
        self.commit(Some(id), &changes);
    }

    fn commit(&self, issue: Option<IssueId>, changes: &[Change]) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = store.commit(changes) {
            // one writer per issue: a conflict here is a bug
            log_storage_failure(issue, &format!("{:#}", err), is_conflict(&err));
        }
    }
}

/// Registry counter from storage: retry a failed read once, then fall back
/// to the default.
fn load_next_issue_id(store: &IssueStore) -> IssueId {
    let read = || -> Result<Option<IssueId>> {
        Ok(store.load_meta(META_NEXT_ISSUE_ID)?.and_then(|v| v.parse().ok()))
    };
    match read().or_else(|_| read()) {
        Ok(next) => next.unwrap_or_default(),
        Err(err) => {
            log(
                Level::Warn,
                Domain::Store,
                "meta_read_failed",
                obj(&[("key", v_str(META_NEXT_ISSUE_ID)), ("error", v_str(&err.to_string()))]),
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn add_position(text: &str) -> Command {
        Command::AddPosition { statement: text.to_string(), duplicate_of: None }
    }

    #[tokio::test]
    async fn test_add_position_creates_issue_implicitly() {
        let engine = Engine::in_memory().unwrap();
        let out = engine.execute("alice", 3, add_position("root")).await.unwrap();
        assert_eq!(out, Outcome::PositionAdded(0));
        assert_eq!(engine.issue_ids(), vec![3]);
        assert_eq!(engine.add_issue("alice", "next").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_rejected_first_position_leaves_no_issue() {
        let engine = Engine::in_memory().unwrap();
        let cmd = Command::AddPosition { statement: "copy".into(), duplicate_of: Some(3) };
        assert_eq!(engine.execute("a", 7, cmd).await, Err(EngineError::PositionNotFound(3)));
        assert!(engine.issue_ids().is_empty());
        assert_eq!(engine.revision(7), Err(EngineError::IssueNotFound(7)));
        assert_eq!(engine.add_issue("a", "first").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_argument_on_unknown_issue_is_not_found() {
        let engine = Engine::in_memory().unwrap();
        let cmd = Command::AddArgument {
            supports_conclusion: true,
            conclusion_id: 0,
            premises: vec![PremiseSpec::New("x".into())],
        };
        assert_eq!(engine.execute("a", 0, cmd).await, Err(EngineError::IssueNotFound(0)));
    }

    #[tokio::test]
    async fn test_bid_sets_canonical_price_without_bump() {
        let engine = Engine::in_memory().unwrap();
        let issue = engine.add_issue("a", "tax").await.unwrap();
        engine.execute("a", issue, add_position("root")).await.unwrap();
        engine
            .execute("a", issue, Command::AddPosition { statement: String::new(), duplicate_of: Some(0) })
            .await
            .unwrap();

        let out = engine
            .execute("a", issue, Command::PlaceBid { position_id: 1, support: false, price: 80.0 })
            .await
            .unwrap();
        assert_eq!(out, Outcome::PriceRecorded(20.0));
        assert_eq!(engine.revision(issue).unwrap(), 2);

        let drawn = engine.drawn_graph_data(issue).unwrap();
        assert!(drawn.positions.iter().all(|p| p.price == Some(20.0)));
        assert!((engine.marginal(issue, 1).unwrap().unwrap() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_only_owner_deletes_and_waiters_are_released() {
        let engine = Arc::new(Engine::in_memory().unwrap());
        let issue = engine.add_issue("owner", "tax").await.unwrap();
        assert_eq!(
            engine.execute("intruder", issue, Command::DeleteIssue).await,
            Err(EngineError::IssueNotFound(issue))
        );

        let waiter = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.wait_for_next_revision(issue, 0).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(engine.execute("owner", issue, Command::DeleteIssue).await, Ok(Outcome::Deleted));
        let res = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(res, Err(EngineError::IssueNotFound(issue)));
        assert_eq!(engine.position_text(issue, 0), "");
    }

    #[tokio::test]
    async fn test_rename_keeps_revision() {
        let engine = Engine::in_memory().unwrap();
        let issue = engine.add_issue("a", "old").await.unwrap();
        engine.execute("a", issue, Command::RenameIssue { name: "new".into() }).await.unwrap();
        let drawn = engine.drawn_graph_data(issue).unwrap();
        assert_eq!(drawn.name, "new");
        assert_eq!(drawn.revision, 0);
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: Command =
            serde_json::from_str(r#"{"add_position": {"statement": "s"}}"#).unwrap();
        assert_eq!(cmd, add_position("s"));
    }
}
