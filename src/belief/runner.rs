//! Inference runner: solve a compiled program and publish the marginals.
//!
//! Results are built off to the side and swapped in whole. A failed solve
//! leaves the published marginals untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::belief::program::{parse_position_atom, Program};
use crate::belief::solver::{Solver, SolverError};
use crate::slot::SwapSlot;
use crate::PositionId;

/// Canonical position id → probability in [0,1].
pub type Marginals = BTreeMap<PositionId, f64>;

#[derive(Debug, Default)]
pub struct InferenceRunner {
    results: SwapSlot<Marginals>,
}

impl InferenceRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solve `program` and publish its marginals. Returns the number of
    /// published terms.
    pub fn run(&self, program: &Program, solver: &dyn Solver) -> Result<usize, SolverError> {
        if program.is_empty() {
            self.results.swap(Marginals::new());
            return Ok(0);
        }
        let raw = solver.solve(&program.to_string())?;
        let next: Marginals = raw
            .into_iter()
            .filter_map(|(name, p)| parse_position_atom(&name).map(|id| (id, p.clamp(0.0, 1.0))))
            .collect();
        let terms = next.len();
        self.results.swap(next);
        Ok(terms)
    }

    pub fn marginals(&self) -> Arc<Marginals> {
        self.results.load()
    }

    pub fn marginal(&self, id: PositionId) -> Option<f64> {
        self.results.load().get(&id).copied()
    }
}
