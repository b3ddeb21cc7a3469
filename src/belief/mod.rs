//! Belief computation: program model, compiler, solver seam and runner.

pub mod compiler;
pub mod program;
pub mod runner;
pub mod solver;

pub use compiler::{compile, CompiledProgram};
pub use runner::{InferenceRunner, Marginals};
pub use solver::{Solver, SolverError, WorldSolver};
