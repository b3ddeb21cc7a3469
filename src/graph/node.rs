//! Plain data records for positions and arguments.
//!
//! These are the values that cross the persistence boundary (see
//! [`crate::codec`]) and the values handed out to readers; nothing here
//! holds a reference into the live store.

use serde::{Deserialize, Serialize};

use crate::{ArgumentId, PositionId};

/// A claim in the argument graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub statement: String,
    pub created_by: String,
    /// Unix seconds
    pub created_at: u64,
    /// Other positions standing for the same claim, ascending.
    #[serde(default)]
    pub same_as: Vec<PositionId>,
    /// Cleared the first time an argument names this position as conclusion.
    pub is_leaf: bool,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            id: 0,
            statement: String::new(),
            created_by: String::new(),
            created_at: 0,
            same_as: Vec::new(),
            is_leaf: true,
        }
    }
}

impl Position {
    /// Lowest id of this position's alias cohort.
    pub fn canonical_id(&self) -> PositionId {
        match self.same_as.first() {
            Some(&first) if first < self.id => first,
            _ => self.id,
        }
    }
}

/// A pro or con inference from premises to a conclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub id: ArgumentId,
    /// true = pro, false = con
    pub supports_conclusion: bool,
    pub conclusion_id: PositionId,
    pub premise_ids: Vec<PositionId>,
    pub created_by: String,
    pub created_at: u64,
}

/// One premise of a new argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiseSpec {
    /// Use an existing claim; the store creates an alias of it.
    Existing(PositionId),
    /// A new claim with this text.
    New(String),
}
