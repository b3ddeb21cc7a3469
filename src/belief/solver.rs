//! Marginal inference over compiled belief programs.
//!
//! [`Solver`] is the seam to the inference engine: it takes program text and
//! returns `{query atom: probability}`. [`WorldSolver`] is the bundled
//! implementation. It evaluates the program under possible-world semantics:
//! every probabilistic fact is an independent coin, derived atoms hold when
//! some rule body holds in that world, and a query's marginal is the weight
//! of worlds where it holds, conditioned on the evidence. Small programs are
//! enumerated exactly; larger ones are sampled with a fixed seed so repeated
//! solves of the same program agree.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::belief::program::{Atom, ParseError, Program, Statement};
use crate::config::SolverConfig;

/// Hard ceiling on exact enumeration regardless of configuration.
const MAX_EXACT_FACTS: usize = 30;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("malformed program: {0}")]
    Parse(#[from] ParseError),

    #[error("recursive definition through {0} is not supported")]
    Cycle(String),

    #[error("evidence has zero probability")]
    InconsistentEvidence,

    #[error("solver unavailable: {0}")]
    Unavailable(String),
}

pub trait Solver: Send + Sync {
    fn solve(&self, program: &str) -> Result<BTreeMap<String, f64>, SolverError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct WorldSolver {
    cfg: SolverConfig,
}

impl WorldSolver {
    pub fn new(cfg: SolverConfig) -> Self {
        Self { cfg }
    }
}

impl Solver for WorldSolver {
    fn solve(&self, program: &str) -> Result<BTreeMap<String, f64>, SolverError> {
        let program = Program::parse(program)?;
        let model = GroundModel::build(&program)?;
        let tally = if model.facts.len() <= self.cfg.exact_fact_limit.min(MAX_EXACT_FACTS) {
            model.enumerate()
        } else {
            model.sample(self.cfg.samples.max(1), self.cfg.seed)
        };
        tally.into_marginals(&model)
    }

    fn name(&self) -> &'static str {
        "world"
    }
}

// =============================================================================
// Ground model
// =============================================================================

/// Program lowered to indexed atoms with derived atoms in dependency order.
struct GroundModel {
    /// (atom index, probability)
    facts: Vec<(usize, f64)>,
    /// Derived atoms, each after everything its rules mention.
    order: Vec<usize>,
    /// Rule bodies per derived atom: (atom index, negated). Certain facts
    /// (`a.` or `1::a.`) are folded in as empty, always-true bodies.
    rules: HashMap<usize, Vec<Vec<(usize, bool)>>>,
    queries: Vec<(String, usize)>,
    evidence: Vec<(usize, bool)>,
    atom_count: usize,
}

#[derive(Default)]
struct Interner {
    index: HashMap<Atom, usize>,
    names: Vec<Atom>,
}

impl Interner {
    fn id(&mut self, atom: &Atom) -> usize {
        if let Some(&i) = self.index.get(atom) {
            return i;
        }
        let i = self.names.len();
        self.index.insert(atom.clone(), i);
        self.names.push(atom.clone());
        i
    }
}

impl GroundModel {
    fn build(program: &Program) -> Result<Self, SolverError> {
        let mut atoms = Interner::default();
        let mut facts = Vec::new();
        let mut rules: HashMap<usize, Vec<Vec<(usize, bool)>>> = HashMap::new();
        let mut queries = Vec::new();
        let mut evidence = Vec::new();

        for stmt in &program.statements {
            match stmt {
                Statement::Fact { probability, atom } => {
                    let a = atoms.id(atom);
                    if *probability >= 1.0 {
                        rules.entry(a).or_default().push(Vec::new());
                    } else if *probability > 0.0 {
                        // a fact that is also a rule head holds if either does
                        let coin = atoms.id(&Atom::new(&format!("__coin{}", facts.len())));
                        facts.push((coin, *probability));
                        rules.entry(a).or_default().push(vec![(coin, false)]);
                    }
                }
                Statement::Rule { head, body } => {
                    let h = atoms.id(head);
                    let lits = body.iter().map(|l| (atoms.id(&l.atom), l.negated)).collect();
                    rules.entry(h).or_default().push(lits);
                }
                Statement::Query(atom) => {
                    queries.push((atom.to_string(), atoms.id(atom)));
                }
                Statement::Evidence { atom, value } => {
                    evidence.push((atoms.id(atom), *value));
                }
            }
        }

        let order = topological_order(&rules, &atoms.names)?;
        Ok(Self {
            facts,
            order,
            rules,
            queries,
            evidence,
            atom_count: atoms.names.len(),
        })
    }

    /// Truth values of every atom in the world fixed by `coin`.
    fn evaluate(&self, values: &mut [bool], coin: impl Fn(usize) -> bool) {
        values.iter_mut().for_each(|v| *v = false);
        for (i, (atom, _)) in self.facts.iter().enumerate() {
            values[*atom] = coin(i);
        }
        for &atom in &self.order {
            let holds = self.rules[&atom]
                .iter()
                .any(|body| body.iter().all(|&(a, negated)| values[a] != negated));
            values[atom] = holds;
        }
    }

    fn record(&self, values: &[bool], weight: f64, tally: &mut Tally) {
        if self.evidence.iter().any(|&(a, v)| values[a] != v) {
            return;
        }
        tally.total += weight;
        for (slot, (_, atom)) in self.queries.iter().enumerate() {
            if values[*atom] {
                tally.hits[slot] += weight;
            }
        }
    }

    fn enumerate(&self) -> Tally {
        let mut tally = Tally::new(self.queries.len());
        let mut values = vec![false; self.atom_count];
        let worlds: u64 = 1u64 << self.facts.len();
        for mask in 0..worlds {
            let mut weight = 1.0;
            for (i, (_, p)) in self.facts.iter().enumerate() {
                weight *= if mask & (1u64 << i) != 0 { *p } else { 1.0 - *p };
            }
            if weight == 0.0 {
                continue;
            }
            self.evaluate(&mut values, |i| mask & (1u64 << i) != 0);
            self.record(&values, weight, &mut tally);
        }
        tally
    }

    fn sample(&self, samples: usize, seed: u64) -> Tally {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tally = Tally::new(self.queries.len());
        let mut values = vec![false; self.atom_count];
        let mut draws = vec![false; self.facts.len()];
        for _ in 0..samples {
            for (d, (_, p)) in draws.iter_mut().zip(&self.facts) {
                *d = rng.gen::<f64>() < *p;
            }
            self.evaluate(&mut values, |i| draws[i]);
            self.record(&values, 1.0, &mut tally);
        }
        tally
    }
}

struct Tally {
    total: f64,
    hits: Vec<f64>,
}

impl Tally {
    fn new(queries: usize) -> Self {
        Self { total: 0.0, hits: vec![0.0; queries] }
    }

    fn into_marginals(self, model: &GroundModel) -> Result<BTreeMap<String, f64>, SolverError> {
        if self.total <= 0.0 {
            return Err(SolverError::InconsistentEvidence);
        }
        Ok(model
            .queries
            .iter()
            .zip(self.hits)
            .map(|((name, _), hit)| (name.clone(), (hit / self.total).clamp(0.0, 1.0)))
            .collect())
    }
}

/// Depth-first ordering of derived atoms; any cycle is rejected.
fn topological_order(
    rules: &HashMap<usize, Vec<Vec<(usize, bool)>>>,
    names: &[Atom],
) -> Result<Vec<usize>, SolverError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    // dependencies that are themselves derived
    let deps: HashMap<usize, Vec<usize>> = rules
        .iter()
        .map(|(&head, bodies)| {
            let ds = bodies
                .iter()
                .flatten()
                .map(|&(a, _)| a)
                .filter(|a| rules.contains_key(a))
                .collect();
            (head, ds)
        })
        .collect();

    let mut marks = vec![Mark::New; names.len()];
    let mut order = Vec::with_capacity(rules.len());
    let mut heads: Vec<usize> = rules.keys().copied().collect();
    heads.sort_unstable();

    for root in heads {
        if marks[root] != Mark::New {
            continue;
        }
        // explicit stack: (atom, next dependency to visit)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::Active;
        while let Some(&(atom, next)) = stack.last() {
            match deps[&atom].get(next) {
                Some(&dep) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks[dep] {
                        Mark::Active => return Err(SolverError::Cycle(names[dep].to_string())),
                        Mark::New => {
                            marks[dep] = Mark::Active;
                            stack.push((dep, 0));
                        }
                        Mark::Done => {}
                    }
                }
                None => {
                    marks[atom] = Mark::Done;
                    order.push(atom);
                    stack.pop();
                }
            }
        }
    }
    Ok(order)
}
