//! Issue registry: maps issue ids to their graphs.
//!
//! Owned by the engine and passed around explicitly. Each entry pairs the
//! issue's single writer (behind a fair, FIFO async mutex) with its read
//! handle, so readers never queue behind writers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{cap_statement, Limits};
use crate::error::{EngineError, LimitKind};
use crate::graph::store::{ArgumentGraph, BeliefServices, GraphReader};
use crate::logging::{log_capacity_rejected, log_issue_event};
use crate::IssueId;

pub struct IssueEntry {
    pub id: IssueId,
    pub owner: String,
    pub writer: Mutex<ArgumentGraph>,
    pub reader: GraphReader,
}

impl IssueEntry {
    fn new(graph: ArgumentGraph) -> Arc<Self> {
        Arc::new(Self {
            id: graph.issue_id(),
            owner: graph.owner().to_string(),
            reader: graph.reader(),
            writer: Mutex::new(graph),
        })
    }
}

pub struct Registry {
    issues: BTreeMap<IssueId, Arc<IssueEntry>>,
    next_issue_id: IssueId,
    limits: Limits,
    services: BeliefServices,
}

impl Registry {
    pub fn new(limits: Limits, services: BeliefServices) -> Self {
        Self {
            issues: BTreeMap::new(),
            next_issue_id: 0,
            limits,
            services,
        }
    }

    pub fn next_issue_id(&self) -> IssueId {
        self.next_issue_id
    }

    /// Resume numbering from a persisted counter; never moves backwards past
    /// a live issue.
    pub fn set_next_issue_id(&mut self, next: IssueId) {
        let floor = self.issues.keys().next_back().map_or(0, |last| last + 1);
        self.next_issue_id = next.max(floor);
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    pub fn ids(&self) -> Vec<IssueId> {
        self.issues.keys().copied().collect()
    }

    pub fn get(&self, id: IssueId) -> Result<Arc<IssueEntry>, EngineError> {
        self.issues.get(&id).cloned().ok_or(EngineError::IssueNotFound(id))
    }

    pub fn issues_owned_by(&self, owner: &str) -> usize {
        self.issues.values().filter(|e| e.owner == owner).count()
    }

    pub fn add_issue(&mut self, owner: &str, name: &str) -> Result<Arc<IssueEntry>, EngineError> {
        let id = self.next_issue_id;
        if id >= self.limits.max_total_issues as IssueId {
            log_capacity_rejected(id, LimitKind::TotalIssues.as_str(), self.limits.max_total_issues, 1);
            return Err(EngineError::CapacityExceeded {
                limit: LimitKind::TotalIssues,
                max: self.limits.max_total_issues,
            });
        }
        self.check_owner_cap(id, owner)?;
        self.next_issue_id += 1;
        let graph = self.build(id, owner, name);
        Ok(self.register(graph))
    }

    /// Look up `id`, or create it owned by `owner` when it does not exist
    /// yet and the id is within the issue cap. A new issue is handed to
    /// `first` before anyone else can see it; if `first` fails the issue is
    /// never registered. `Some` carries `first`'s result for a new issue.
    pub fn ensure_issue_with<T>(
        &mut self,
        id: IssueId,
        owner: &str,
        first: impl FnOnce(&mut ArgumentGraph) -> Result<T, EngineError>,
    ) -> Result<(Arc<IssueEntry>, Option<T>), EngineError> {
        if let Some(entry) = self.issues.get(&id) {
            return Ok((Arc::clone(entry), None));
        }
        if id >= self.limits.max_total_issues as IssueId {
            return Err(EngineError::IssueNotFound(id));
        }
        self.check_owner_cap(id, owner)?;
        let mut graph = self.build(id, owner, "");
        let out = first(&mut graph)?;
        self.next_issue_id = self.next_issue_id.max(id + 1);
        Ok((self.register(graph), Some(out)))
    }

    pub fn remove(&mut self, id: IssueId) -> Result<Arc<IssueEntry>, EngineError> {
        let entry = self.issues.remove(&id).ok_or(EngineError::IssueNotFound(id))?;
        log_issue_event("issue_deleted", id, "");
        Ok(entry)
    }

    /// Register a graph rebuilt from storage.
    pub fn insert_restored(&mut self, graph: ArgumentGraph) -> Arc<IssueEntry> {
        let entry = IssueEntry::new(graph);
        self.next_issue_id = self.next_issue_id.max(entry.id + 1);
        self.issues.insert(entry.id, Arc::clone(&entry));
        log_issue_event("issue_restored", entry.id, &entry.reader.snapshot().name);
        entry
    }

    fn check_owner_cap(&self, id: IssueId, owner: &str) -> Result<(), EngineError> {
        let max = self.limits.max_issues_per_user;
        if self.issues_owned_by(owner) >= max {
            log_capacity_rejected(id, LimitKind::IssuesPerUser.as_str(), max, 1);
            return Err(EngineError::CapacityExceeded { limit: LimitKind::IssuesPerUser, max });
        }
        Ok(())
    }

    fn build(&self, id: IssueId, owner: &str, name: &str) -> ArgumentGraph {
        let name = cap_statement(name, self.limits.max_text_input_string_chars);
        ArgumentGraph::new(id, owner, &name, self.limits, self.services.clone())
    }

    fn register(&mut self, graph: ArgumentGraph) -> Arc<IssueEntry> {
        let entry = IssueEntry::new(graph);
        self.issues.insert(entry.id, Arc::clone(&entry));
        log_issue_event("issue_added", entry.id, &entry.reader.snapshot().name);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::solver::WorldSolver;
    use crate::market::PriceBook;
    use crate::PositionId;

    fn registry(limits: Limits) -> Registry {
        let services = BeliefServices {
            solver: Arc::new(WorldSolver::default()),
            prices: Arc::new(PriceBook::new()),
        };
        Registry::new(limits, services)
    }

    #[test]
    fn test_issue_ids_are_dense() {
        let mut r = registry(Limits::default());
        assert_eq!(r.add_issue("a", "one").unwrap().id, 0);
        assert_eq!(r.add_issue("a", "two").unwrap().id, 1);
        r.remove(0).unwrap();
        assert_eq!(r.add_issue("a", "three").unwrap().id, 2);
        assert_eq!(r.ids(), vec![1, 2]);
    }

    #[test]
    fn test_issue_caps() {
        let limits = Limits { max_total_issues: 3, max_issues_per_user: 2, ..Limits::default() };
        let mut r = registry(limits);
        r.add_issue("a", "1").unwrap();
        r.add_issue("a", "2").unwrap();
        assert!(matches!(
            r.add_issue("a", "3"),
            Err(EngineError::CapacityExceeded { limit: LimitKind::IssuesPerUser, .. })
        ));
        r.add_issue("b", "3").unwrap();
        assert!(matches!(
            r.add_issue("b", "4"),
            Err(EngineError::CapacityExceeded { limit: LimitKind::TotalIssues, .. })
        ));
    }

    fn first_position(graph: &mut ArgumentGraph) -> Result<PositionId, EngineError> {
        graph.add_position("a", "root", None)
    }

    #[test]
    fn test_ensure_issue_creates_within_cap() {
        let limits = Limits { max_total_issues: 5, ..Limits::default() };
        let mut r = registry(limits);
        let (entry, first) = r.ensure_issue_with(3, "a", first_position).unwrap();
        assert_eq!((entry.id, first), (3, Some(0)));
        assert_eq!(entry.reader.revision(), 1);
        assert_eq!(r.next_issue_id(), 4);

        let (again, first) = r.ensure_issue_with(3, "b", first_position).unwrap();
        assert!(Arc::ptr_eq(&entry, &again));
        assert_eq!(first, None);
        assert!(matches!(
            r.ensure_issue_with(5, "a", first_position),
            Err(EngineError::IssueNotFound(5))
        ));
    }

    #[test]
    fn test_failed_first_mutation_registers_nothing() {
        let mut r = registry(Limits { max_total_issues: 10, max_issues_per_user: 1, ..Limits::default() });
        let res = r.ensure_issue_with(7, "a", |g| g.add_position("a", "", Some(3)));
        assert!(matches!(res, Err(EngineError::PositionNotFound(3))));
        assert!(r.ids().is_empty());
        assert_eq!(r.next_issue_id(), 0);
        // the failed attempt does not count against the owner's cap
        assert_eq!(r.add_issue("a", "real").unwrap().id, 0);
    }

    #[test]
    fn test_unknown_issue() {
        let mut r = registry(Limits::default());
        assert!(matches!(r.get(7), Err(EngineError::IssueNotFound(7))));
        assert!(matches!(r.remove(7), Err(EngineError::IssueNotFound(7))));
    }

    #[test]
    fn test_next_id_never_reuses_live_issue() {
        let mut r = registry(Limits::default());
        r.ensure_issue_with(4, "a", first_position).unwrap();
        r.set_next_issue_id(1);
        assert_eq!(r.next_issue_id(), 5);
    }
}
