//! Argument graph engine.
//!
//! Participants build a tree of positions (claims) and pro/con arguments per
//! issue. After every change the graph is compiled into a probabilistic
//! logic program whose marginals estimate how likely each position is,
//! given the arguments and the market prices attached to contested claims.

pub mod belief;
pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logging;
pub mod market;
pub mod protocol;
pub mod registry;
pub mod slot;
pub mod storage;

pub type IssueId = u64;
pub type PositionId = u64;
pub type ArgumentId = u64;

pub use engine::{Command, Engine, Outcome};
pub use error::{EngineError, StatusCode};
