//! The argument graph: records, duplicate resolution, the per-issue store
//! and its published snapshots.

pub mod node;
pub mod resolver;
pub mod snapshot;
pub mod store;

pub use node::{Argument, Position, PremiseSpec};
pub use snapshot::{DrawnGraph, DrawnPosition, GraphSnapshot};
pub use store::{ArgumentGraph, BeliefServices, GraphReader};
