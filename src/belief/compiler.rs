//! Graph → belief program.
//!
//! The program is rebuilt from scratch on every mutation. One term `n(c)` per
//! canonical position `c`:
//! - leaf claims are independent facts, `P = price/100` (0.5 without a price);
//! - a claim that is the conclusion of some argument gets `prior(c)` with the
//!   same probability and is derived as
//!   `(prior AND no con argument holds) OR some pro argument holds`,
//!   where an argument holds iff all its premises hold.
//!
//! Every canonical term is queried.

use std::collections::{BTreeMap, BTreeSet};

use crate::belief::program::{argument_atom, position_atom, prior_atom, Literal, Program, Statement};
use crate::graph::node::{Argument, Position};
use crate::{ArgumentId, PositionId};

/// Probability used for a claim nobody has priced yet.
pub const UNINFORMED_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledProgram {
    pub program: Program,
    /// Canonical positions that received a term.
    pub terms: usize,
    /// Arguments left out because they would make a claim depend on itself.
    pub skipped_arguments: Vec<ArgumentId>,
}

/// Convert a market price in [0,100] to a fact probability.
pub fn price_to_probability(price: Option<f64>) -> f64 {
    match price {
        Some(p) if p.is_finite() => (p / 100.0).clamp(0.0, 1.0),
        _ => UNINFORMED_PROBABILITY,
    }
}

pub fn compile<F>(
    positions: &BTreeMap<PositionId, Position>,
    arguments: &BTreeMap<ArgumentId, Argument>,
    price: F,
) -> CompiledProgram
where
    F: Fn(PositionId) -> Option<f64>,
{
    let canon = |id: PositionId| positions.get(&id).map(Position::canonical_id).unwrap_or(id);

    let canonical: Vec<PositionId> = positions
        .values()
        .filter(|p| p.canonical_id() == p.id)
        .map(|p| p.id)
        .collect();

    // Any cohort member being a conclusion makes the claim derived, even if
    // every argument aimed at it ends up skipped below.
    let derived: BTreeSet<PositionId> = arguments.values().map(|a| canon(a.conclusion_id)).collect();

    // conclusion -> premises of accepted arguments, all canonical
    let mut depends_on: BTreeMap<PositionId, BTreeSet<PositionId>> = BTreeMap::new();
    let mut accepted: Vec<(&Argument, PositionId, Vec<PositionId>)> = Vec::new();
    let mut skipped_arguments = Vec::new();

    for arg in arguments.values() {
        let conclusion = canon(arg.conclusion_id);
        let premises: Vec<PositionId> = arg.premise_ids.iter().map(|&p| canon(p)).collect();
        if premises.iter().any(|&p| reaches(&depends_on, p, conclusion)) {
            skipped_arguments.push(arg.id);
            continue;
        }
        depends_on.entry(conclusion).or_default().extend(premises.iter().copied());
        accepted.push((arg, conclusion, premises));
    }

    let mut program = Program::new();

    for &c in &canonical {
        let probability = price_to_probability(price(c));
        let atom = if derived.contains(&c) { prior_atom(c) } else { position_atom(c) };
        program.push(Statement::Fact { probability, atom });
    }

    for (arg, _, premises) in &accepted {
        program.push(Statement::Rule {
            head: argument_atom(arg.id),
            body: premises.iter().map(|&p| Literal::pos(position_atom(p))).collect(),
        });
    }

    for &c in canonical.iter().filter(|c| derived.contains(c)) {
        let mut body = vec![Literal::pos(prior_atom(c))];
        body.extend(
            accepted
                .iter()
                .filter(|(a, concl, _)| *concl == c && !a.supports_conclusion)
                .map(|(a, _, _)| Literal::neg(argument_atom(a.id))),
        );
        program.push(Statement::Rule { head: position_atom(c), body });

        for (a, _, _) in accepted.iter().filter(|(a, concl, _)| *concl == c && a.supports_conclusion) {
            program.push(Statement::Rule {
                head: position_atom(c),
                body: vec![Literal::pos(argument_atom(a.id))],
            });
        }
    }

    for &c in &canonical {
        program.push(Statement::Query(position_atom(c)));
    }

    CompiledProgram {
        program,
        terms: canonical.len(),
        skipped_arguments,
    }
}

/// Whether `target` is `from` or something `from` (transitively) depends on.
fn reaches(depends_on: &BTreeMap<PositionId, BTreeSet<PositionId>>, from: PositionId, target: PositionId) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(next) = depends_on.get(&id) {
            stack.extend(next.iter().copied());
        }
    }
    false
}
