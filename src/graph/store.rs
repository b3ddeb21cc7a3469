//! Position/Argument store for one issue.
//!
//! [`ArgumentGraph`] is the single writer: every mutation goes through it,
//! one at a time, and ends by recompiling the belief program, publishing a
//! fresh [`GraphSnapshot`] and bumping the revision clock, in that order, so
//! a reader woken by the bump already sees the new state.
//!
//! [`GraphReader`] is the cheap, cloneable read side. It only touches the
//! published snapshot, the inference cache and the clock receiver, so any
//! number of readers run alongside the writer without blocking it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::json;

use crate::belief::compiler::compile;
use crate::belief::runner::{InferenceRunner, Marginals};
use crate::belief::solver::{Solver, SolverError};
use crate::clock::{ClockClosed, RevisionClock, RevisionWatcher};
use crate::codec::IssueRecord;
use crate::config::{cap_statement, Limits};
use crate::error::{EngineError, LimitKind};
use crate::graph::node::{Argument, Position, PremiseSpec};
use crate::graph::resolver;
use crate::graph::snapshot::{DrawnGraph, GraphSnapshot};
use crate::logging::{
    log_argument_added, log_beliefs_updated, log_capacity_rejected, log_circular_argument,
    log_position_added, log_revision_committed, log_solver_failure, ProfileScope,
};
use crate::market::MarketPrices;
use crate::slot::SwapSlot;
use crate::{ArgumentId, IssueId, PositionId};

/// Inference collaborators shared by every issue.
#[derive(Clone)]
pub struct BeliefServices {
    pub solver: Arc<dyn Solver>,
    pub prices: Arc<dyn MarketPrices>,
}

pub struct ArgumentGraph {
    issue_id: IssueId,
    owner: String,
    name: String,
    positions: BTreeMap<PositionId, Position>,
    arguments: BTreeMap<ArgumentId, Argument>,
    next_position_id: PositionId,
    next_argument_id: ArgumentId,
    /// Nodes created per user.
    contributions: HashMap<String, usize>,
    limits: Limits,
    services: BeliefServices,
    clock: RevisionClock,
    runner: Arc<InferenceRunner>,
    published: Arc<SwapSlot<GraphSnapshot>>,
    program_text: String,
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl ArgumentGraph {
    pub fn new(issue_id: IssueId, owner: &str, name: &str, limits: Limits, services: BeliefServices) -> Self {
        let graph = Self {
            issue_id,
            owner: owner.to_string(),
            name: name.to_string(),
            positions: BTreeMap::new(),
            arguments: BTreeMap::new(),
            next_position_id: 0,
            next_argument_id: 0,
            contributions: HashMap::new(),
            limits,
            services,
            clock: RevisionClock::new(),
            runner: Arc::new(InferenceRunner::new()),
            published: Arc::new(SwapSlot::default()),
            program_text: String::new(),
        };
        graph.publish(0);
        graph
    }

    /// Rebuild a graph from its persisted record and recompute its beliefs.
    pub fn restore(record: IssueRecord, limits: Limits, services: BeliefServices) -> Result<Self> {
        let positions: BTreeMap<PositionId, Position> =
            record.positions.into_iter().map(|p| (p.id, p)).collect();
        let arguments: BTreeMap<ArgumentId, Argument> =
            record.arguments.into_iter().map(|a| (a.id, a)).collect();

        if let Some(&last) = positions.keys().next_back() {
            if last >= record.next_position_id {
                bail!("issue {}: position {} at or past next id {}", record.issue_id, last, record.next_position_id);
            }
        }
        if let Some(&last) = arguments.keys().next_back() {
            if last >= record.next_argument_id {
                bail!("issue {}: argument {} at or past next id {}", record.issue_id, last, record.next_argument_id);
            }
        }
        for arg in arguments.values() {
            for id in arg.premise_ids.iter().chain(std::iter::once(&arg.conclusion_id)) {
                if !positions.contains_key(id) {
                    bail!("issue {}: argument {} names missing position {}", record.issue_id, arg.id, id);
                }
            }
        }

        let mut contributions: HashMap<String, usize> = HashMap::new();
        let creators = positions
            .values()
            .map(|p| &p.created_by)
            .chain(arguments.values().map(|a| &a.created_by));
        for creator in creators {
            *contributions.entry(creator.clone()).or_default() += 1;
        }

        let mut graph = Self {
            issue_id: record.issue_id,
            owner: record.owner,
            name: record.name,
            positions,
            arguments,
            next_position_id: record.next_position_id,
            next_argument_id: record.next_argument_id,
            contributions,
            limits,
            services,
            clock: RevisionClock::starting_at(record.revision),
            runner: Arc::new(InferenceRunner::new()),
            published: Arc::new(SwapSlot::default()),
            program_text: String::new(),
        };
        let _ = graph.recompute_beliefs();
        graph.publish(record.revision);
        Ok(graph)
    }

    pub fn to_record(&self, prices: BTreeMap<PositionId, f64>) -> IssueRecord {
        IssueRecord {
            issue_id: self.issue_id,
            owner: self.owner.clone(),
            name: self.name.clone(),
            next_position_id: self.next_position_id,
            next_argument_id: self.next_argument_id,
            revision: self.clock.current(),
            positions: self.positions.values().cloned().collect(),
            arguments: self.arguments.values().cloned().collect(),
            prices,
        }
    }

    pub fn reader(&self) -> GraphReader {
        GraphReader {
            issue_id: self.issue_id,
            published: Arc::clone(&self.published),
            runner: Arc::clone(&self.runner),
            prices: Arc::clone(&self.services.prices),
            watcher: self.clock.subscribe(),
        }
    }

    pub fn issue_id(&self) -> IssueId {
        self.issue_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn positions(&self) -> &BTreeMap<PositionId, Position> {
        &self.positions
    }

    pub fn arguments(&self) -> &BTreeMap<ArgumentId, Argument> {
        &self.arguments
    }

    /// Text of the most recently compiled belief program.
    pub fn program_text(&self) -> &str {
        &self.program_text
    }

    pub fn marginals(&self) -> Arc<Marginals> {
        self.runner.marginals()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn add_position(
        &mut self,
        creator: &str,
        statement: &str,
        duplicate_of: Option<PositionId>,
    ) -> Result<PositionId, EngineError> {
        let statement = match duplicate_of {
            Some(orig) => self
                .positions
                .get(&orig)
                .map(|p| p.statement.clone())
                .ok_or(EngineError::PositionNotFound(orig))?,
            None => cap_statement(statement, self.limits.max_text_input_string_chars),
        };
        self.check_capacity(creator, 1)?;

        let id = self.insert_position(creator, statement, duplicate_of);
        let _ = self.recompute_beliefs();
        let revision = self.commit_revision("position_added");
        log_position_added(self.issue_id, id, duplicate_of, revision);
        Ok(id)
    }

    pub fn add_argument(
        &mut self,
        creator: &str,
        supports_conclusion: bool,
        conclusion_id: PositionId,
        premises: Vec<PremiseSpec>,
    ) -> Result<ArgumentId, EngineError> {
        if premises.is_empty() {
            return Err(EngineError::InvalidRequest("an argument needs at least one premise".to_string()));
        }
        if !self.positions.contains_key(&conclusion_id) {
            return Err(EngineError::PositionNotFound(conclusion_id));
        }
        let mut planned = Vec::with_capacity(premises.len());
        for spec in premises {
            planned.push(match spec {
                PremiseSpec::Existing(orig) => {
                    let p = self.positions.get(&orig).ok_or(EngineError::PositionNotFound(orig))?;
                    (p.statement.clone(), Some(orig))
                }
                PremiseSpec::New(text) => (cap_statement(&text, self.limits.max_text_input_string_chars), None),
            });
        }
        // the whole batch must fit before anything is created
        self.check_capacity(creator, planned.len() + 1)?;

        let premise_ids: Vec<PositionId> = planned
            .into_iter()
            .map(|(statement, duplicate_of)| self.insert_position(creator, statement, duplicate_of))
            .collect();

        if let Some(conclusion) = self.positions.get_mut(&conclusion_id) {
            conclusion.is_leaf = false;
        }

        let id = self.next_argument_id;
        self.next_argument_id += 1;
        self.arguments.insert(
            id,
            Argument {
                id,
                supports_conclusion,
                conclusion_id,
                premise_ids: premise_ids.clone(),
                created_by: creator.to_string(),
                created_at: now_secs(),
            },
        );
        *self.contributions.entry(creator.to_string()).or_default() += 1;

        let _ = self.recompute_beliefs();
        let revision = self.commit_revision("argument_added");
        log_argument_added(self.issue_id, id, conclusion_id, &premise_ids, supports_conclusion, revision);
        Ok(id)
    }

    /// Change the display name. Not a structural mutation: no revision bump.
    pub fn rename(&mut self, name: &str) {
        self.name = cap_statement(name, self.limits.max_text_input_string_chars);
        self.publish(self.clock.current());
    }

    /// Canonical id of an existing position.
    pub fn canonical_of(&self, id: PositionId) -> Result<PositionId, EngineError> {
        self.positions
            .get(&id)
            .map(Position::canonical_id)
            .ok_or(EngineError::PositionNotFound(id))
    }

    /// Recompile the belief program from the current graph and publish new
    /// marginals. On solver failure the previous marginals stay in place.
    pub fn recompute_beliefs(&mut self) -> Result<usize, SolverError> {
        let _scope = ProfileScope::with_context("recompute_beliefs", &[("issue", json!(self.issue_id))]);
        let issue = self.issue_id;
        let prices = Arc::clone(&self.services.prices);
        let compiled = compile(&self.positions, &self.arguments, |id| prices.last_price(issue, id));

        for id in &compiled.skipped_arguments {
            if let Some(arg) = self.arguments.get(id) {
                log_circular_argument(issue, arg.id, arg.conclusion_id);
            }
        }
        self.program_text = compiled.program.to_string();

        let solver = self.services.solver.as_ref();
        match self.runner.run(&compiled.program, solver) {
            Ok(terms) => {
                log_beliefs_updated(issue, terms, compiled.program.len(), solver.name());
                Ok(terms)
            }
            Err(err) => {
                log_solver_failure(issue, solver.name(), &err.to_string());
                Err(err)
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Independent copy of a position; a default position when `id` is unknown.
    pub fn get_position_copy(&self, id: PositionId) -> Position {
        self.positions.get(&id).cloned().unwrap_or_default()
    }

    pub fn revision_number(&self) -> u64 {
        self.clock.current()
    }

    pub async fn wait_for_next_revision(&self, last_seen: u64) -> Result<u64, ClockClosed> {
        self.clock.wait_for_next_revision(last_seen).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_capacity(&self, creator: &str, requested: usize) -> Result<(), EngineError> {
        let nodes = self.positions.len() + self.arguments.len();
        let max_nodes = self.limits.max_total_nodes_per_issue;
        if nodes + requested > max_nodes {
            log_capacity_rejected(self.issue_id, LimitKind::NodesPerIssue.as_str(), max_nodes, requested);
            return Err(EngineError::CapacityExceeded { limit: LimitKind::NodesPerIssue, max: max_nodes });
        }
        let mine = self.contributions.get(creator).copied().unwrap_or(0);
        let max_mine = self.limits.max_contrib_per_user_per_issue;
        if mine + requested > max_mine {
            log_capacity_rejected(self.issue_id, LimitKind::ContributionsPerUser.as_str(), max_mine, requested);
            return Err(EngineError::CapacityExceeded { limit: LimitKind::ContributionsPerUser, max: max_mine });
        }
        Ok(())
    }

    /// Append a position without touching beliefs or the clock.
    fn insert_position(&mut self, creator: &str, statement: String, duplicate_of: Option<PositionId>) -> PositionId {
        let id = self.next_position_id;
        self.next_position_id += 1;
        let same_as = duplicate_of
            .and_then(|orig| self.positions.get(&orig))
            .map(resolver::alias_set_for)
            .unwrap_or_default();
        self.positions.insert(
            id,
            Position {
                id,
                statement,
                created_by: creator.to_string(),
                created_at: now_secs(),
                same_as,
                is_leaf: true,
            },
        );
        if duplicate_of.is_some() {
            resolver::link_duplicate(&mut self.positions, id);
        }
        *self.contributions.entry(creator.to_string()).or_default() += 1;
        id
    }

    fn publish(&self, revision: u64) {
        self.published.swap(GraphSnapshot {
            issue_id: self.issue_id,
            name: self.name.clone(),
            revision,
            positions: self.positions.clone(),
            arguments: self.arguments.clone(),
        });
    }

    /// Publish the new state under the next revision, then wake waiters.
    fn commit_revision(&mut self, cause: &str) -> u64 {
        self.publish(self.clock.current() + 1);
        let revision = self.clock.bump();
        log_revision_committed(self.issue_id, revision, cause);
        revision
    }
}

/// Concurrent read handle of one issue.
#[derive(Clone)]
pub struct GraphReader {
    issue_id: IssueId,
    published: Arc<SwapSlot<GraphSnapshot>>,
    runner: Arc<InferenceRunner>,
    prices: Arc<dyn MarketPrices>,
    watcher: RevisionWatcher,
}

impl GraphReader {
    pub fn issue_id(&self) -> IssueId {
        self.issue_id
    }

    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.published.load()
    }

    pub fn position_copy(&self, id: PositionId) -> Position {
        self.published.load().positions.get(&id).cloned().unwrap_or_default()
    }

    /// Statement of a position, empty when unknown.
    pub fn position_text(&self, id: PositionId) -> String {
        self.published
            .load()
            .positions
            .get(&id)
            .map(|p| p.statement.clone())
            .unwrap_or_default()
    }

    /// Marginal of the claim `id` stands for.
    pub fn marginal(&self, id: PositionId) -> Option<f64> {
        let canonical = resolver::canonical_id(&self.published.load().positions, id);
        self.runner.marginal(canonical)
    }

    pub fn drawn_graph(&self) -> DrawnGraph {
        let snapshot = self.published.load();
        let marginals = self.runner.marginals();
        snapshot.drawn(&marginals, self.prices.as_ref())
    }

    pub fn revision(&self) -> u64 {
        self.watcher.current()
    }

    /// Detached waiter; holding it does not keep the issue alive.
    pub fn watcher(&self) -> RevisionWatcher {
        self.watcher.clone()
    }

    pub async fn wait_for_next_revision(&self, last_seen: u64) -> Result<u64, ClockClosed> {
        self.watcher().wait_past(last_seen).await
    }
}
