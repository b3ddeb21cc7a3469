//! End-to-end behaviour of the engine through its public command and read
//! API: the reference scenario, capacity atomicity, alias symmetry, revision
//! accounting and concurrent writers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arggraph::belief::program::{parse_position_atom, prior_atom, Program, Statement};
use arggraph::belief::solver::{Solver, SolverError};
use arggraph::config::{Config, Limits};
use arggraph::graph::PremiseSpec;
use arggraph::storage::IssueStore;
use arggraph::{Command, Engine, EngineError, Outcome};

/// Returns each query's prior directly: the fact probability of a leaf term,
/// or of `prior(c)` for a derived one.
struct PriorSolver;

impl Solver for PriorSolver {
    fn solve(&self, text: &str) -> Result<BTreeMap<String, f64>, SolverError> {
        let program = Program::parse(text)?;
        let facts: BTreeMap<String, f64> = program
            .statements
            .iter()
            .filter_map(|s| match s {
                Statement::Fact { probability, atom } => Some((atom.to_string(), *probability)),
                _ => None,
            })
            .collect();
        Ok(program
            .queries()
            .map(|q| {
                let id = parse_position_atom(q.as_str()).unwrap_or_default();
                let p = facts
                    .get(q.as_str())
                    .or_else(|| facts.get(prior_atom(id).as_str()))
                    .copied()
                    .unwrap_or(0.0);
                (q.to_string(), p)
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "prior"
    }
}

fn engine_with(limits: Limits, solver: Arc<dyn Solver>) -> Engine {
    let config = Config { limits, ..Config::default() };
    Engine::with_store(&config, IssueStore::open_in_memory().unwrap(), solver).unwrap()
}

fn default_engine() -> Engine {
    Engine::in_memory().unwrap()
}

fn add_position(text: &str) -> Command {
    Command::AddPosition { statement: text.to_string(), duplicate_of: None }
}

fn new_premises(texts: &[&str]) -> Vec<PremiseSpec> {
    texts.iter().map(|t| PremiseSpec::New(t.to_string())).collect()
}

#[tokio::test]
async fn test_reference_scenario() {
    let engine = default_engine();
    let issue = engine.add_issue("alice", "climate").await.unwrap();

    // (1)
    let out = engine.execute("alice", issue, add_position("Climate action is justified")).await;
    assert_eq!(out, Ok(Outcome::PositionAdded(0)));
    let drawn = engine.drawn_graph_data(issue).unwrap();
    assert!(drawn.positions[0].position.is_leaf);

    // (2)
    let out = engine
        .execute(
            "alice",
            issue,
            Command::AddArgument {
                supports_conclusion: true,
                conclusion_id: 0,
                premises: new_premises(&["emissions cause warming"]),
            },
        )
        .await;
    assert_eq!(out, Ok(Outcome::ArgumentAdded(0)));
    assert_eq!(engine.position_text(issue, 1), "emissions cause warming");

    // (3)
    let drawn = engine.drawn_graph_data(issue).unwrap();
    let root = drawn.positions.iter().find(|p| p.position.id == 0).unwrap();
    assert!(!root.position.is_leaf);
    assert_eq!(drawn.arguments[0].premise_ids, vec![1]);

    // (4)
    assert_eq!(engine.revision(issue).unwrap(), 2);

    // (5) supporting evidence only raises the belief
    let marginal = engine.marginal(issue, 0).unwrap().unwrap();
    assert!(marginal >= 0.5, "marginal {}", marginal);
}

#[tokio::test]
async fn test_unpriced_leaf_yields_even_odds() {
    let engine = engine_with(Limits::default(), Arc::new(PriorSolver));
    let issue = engine.add_issue("a", "t").await.unwrap();
    engine.execute("a", issue, add_position("lonely claim")).await.unwrap();
    assert_eq!(engine.marginal(issue, 0).unwrap(), Some(0.5));
}

#[tokio::test]
async fn test_capacity_atomicity_at_one_free_slot() {
    let limits = Limits { max_total_nodes_per_issue: 3, ..Limits::default() };
    let engine = engine_with(limits, Arc::new(PriorSolver));
    let issue = engine.add_issue("a", "t").await.unwrap();
    engine.execute("a", issue, add_position("p0")).await.unwrap();
    engine.execute("a", issue, add_position("p1")).await.unwrap();

    let res = engine
        .execute(
            "a",
            issue,
            Command::AddArgument {
                supports_conclusion: false,
                conclusion_id: 0,
                premises: new_premises(&["x", "y"]),
            },
        )
        .await;
    assert!(matches!(res, Err(EngineError::CapacityExceeded { .. })));

    let drawn = engine.drawn_graph_data(issue).unwrap();
    assert_eq!(drawn.positions.len(), 2);
    assert!(drawn.arguments.is_empty());
    assert_eq!(engine.revision(issue).unwrap(), 2);

    // no id was spent by the rejection
    assert_eq!(engine.execute("a", issue, add_position("p2")).await, Ok(Outcome::PositionAdded(2)));
}

#[tokio::test]
async fn test_duplicate_is_symmetric_and_shares_statement() {
    let engine = default_engine();
    let issue = engine.add_issue("a", "t").await.unwrap();
    engine.execute("a", issue, add_position("original")).await.unwrap();
    let out = engine
        .execute("b", issue, Command::AddPosition { statement: String::new(), duplicate_of: Some(0) })
        .await
        .unwrap();
    let q = match out {
        Outcome::PositionAdded(q) => q,
        other => panic!("unexpected {:?}", other),
    };

    let drawn = engine.drawn_graph_data(issue).unwrap();
    let p0 = &drawn.positions[0].position;
    let pq = &drawn.positions[q as usize].position;
    assert!(p0.same_as.contains(&q));
    assert!(pq.same_as.contains(&0));
    assert_eq!(p0.statement, pq.statement);
}

#[tokio::test]
async fn test_leaf_flag_tracks_conclusions() {
    let engine = default_engine();
    let issue = engine.add_issue("a", "t").await.unwrap();
    engine.execute("a", issue, add_position("root")).await.unwrap();
    for (pro, conclusion) in [(true, 0), (false, 0), (true, 1)] {
        engine
            .execute(
                "a",
                issue,
                Command::AddArgument {
                    supports_conclusion: pro,
                    conclusion_id: conclusion,
                    premises: vec![PremiseSpec::New("premise".into()), PremiseSpec::Existing(0)],
                },
            )
            .await
            .unwrap();
    }

    let drawn = engine.drawn_graph_data(issue).unwrap();
    for p in &drawn.positions {
        let concluded = drawn.arguments.iter().any(|a| a.conclusion_id == p.position.id);
        assert_eq!(p.position.is_leaf, !concluded, "position {}", p.position.id);
    }
    // every marginal is a probability
    for p in &drawn.positions {
        let m = p.marginal.unwrap();
        assert!((0.0..=1.0).contains(&m));
    }
}

#[tokio::test]
async fn test_revision_counts_only_successful_mutations() {
    let engine = default_engine();
    let issue = engine.add_issue("a", "t").await.unwrap();
    assert_eq!(engine.revision(issue).unwrap(), 0);

    engine.execute("a", issue, add_position("a")).await.unwrap();
    assert_eq!(engine.revision(issue).unwrap(), 1);

    let bad = Command::AddArgument { supports_conclusion: true, conclusion_id: 42, premises: new_premises(&["x"]) };
    assert!(engine.execute("a", issue, bad).await.is_err());
    assert_eq!(engine.revision(issue).unwrap(), 1);

    let bad_bid = Command::PlaceBid { position_id: 0, support: true, price: 120.0 };
    assert!(matches!(engine.execute("a", issue, bad_bid).await, Err(EngineError::InvalidRequest(_))));
    assert_eq!(engine.revision(issue).unwrap(), 1);
}

#[tokio::test]
async fn test_waiter_one_behind_returns_when_mutation_commits() {
    let engine = Arc::new(default_engine());
    let issue = engine.add_issue("a", "t").await.unwrap();
    engine.execute("a", issue, add_position("a")).await.unwrap();
    let current = engine.revision(issue).unwrap();

    // already past the baseline
    let rev = tokio::time::timeout(Duration::from_millis(50), engine.wait_for_next_revision(issue, current - 1))
        .await
        .unwrap();
    assert_eq!(rev, Ok(current));

    let waiter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.wait_for_next_revision(issue, current).await })
    };
    tokio::task::yield_now().await;
    engine.execute("a", issue, add_position("b")).await.unwrap();
    let rev = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(rev, Ok(current + 1));
}

#[tokio::test]
async fn test_abandoned_wait_leaves_engine_untouched() {
    let engine = default_engine();
    let issue = engine.add_issue("a", "t").await.unwrap();
    let res = tokio::time::timeout(Duration::from_millis(10), engine.wait_for_next_revision(issue, 0)).await;
    assert!(res.is_err());
    assert_eq!(engine.execute("a", issue, add_position("a")).await, Ok(Outcome::PositionAdded(0)));
    assert_eq!(engine.revision(issue).unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_get_dense_ids() {
    let engine = Arc::new(default_engine());
    let issue = engine.add_issue("a", "t").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..24 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            engine.execute(&format!("user{}", i % 3), issue, add_position(&format!("claim {}", i))).await
        }));
    }
    let mut ids = Vec::new();
    for t in tasks {
        match t.await.unwrap() {
            Ok(Outcome::PositionAdded(id)) => ids.push(id),
            other => panic!("unexpected {:?}", other),
        }
    }
    ids.sort_unstable();
    assert_eq!(ids, (0..24).collect::<Vec<u64>>());
    assert_eq!(engine.revision(issue).unwrap(), 24);
}

#[tokio::test]
async fn test_issues_are_independent() {
    let engine = default_engine();
    let a = engine.add_issue("u", "a").await.unwrap();
    let b = engine.add_issue("u", "b").await.unwrap();
    engine.execute("u", a, add_position("only in a")).await.unwrap();

    assert_eq!(engine.revision(a).unwrap(), 1);
    assert_eq!(engine.revision(b).unwrap(), 0);
    assert_eq!(engine.position_text(b, 0), "");
    assert_eq!(engine.execute("u", b, add_position("first in b")).await, Ok(Outcome::PositionAdded(0)));
}
