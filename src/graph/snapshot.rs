//! Immutable views of an issue's graph.
//!
//! The writer publishes a [`GraphSnapshot`] after each mutation; readers
//! combine it with the current marginals and prices into a [`DrawnGraph`],
//! the data a renderer needs to draw the tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::belief::runner::Marginals;
use crate::graph::node::{Argument, Position};
use crate::market::MarketPrices;
use crate::{ArgumentId, IssueId, PositionId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSnapshot {
    pub issue_id: IssueId,
    pub name: String,
    pub revision: u64,
    pub positions: BTreeMap<PositionId, Position>,
    pub arguments: BTreeMap<ArgumentId, Argument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnPosition {
    #[serde(flatten)]
    pub position: Position,
    pub canonical_id: PositionId,
    /// Last market price of the canonical claim, [0,100].
    pub price: Option<f64>,
    /// Marginal belief of the canonical claim, [0,1].
    pub marginal: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawnGraph {
    pub issue_id: IssueId,
    pub name: String,
    pub revision: u64,
    pub positions: Vec<DrawnPosition>,
    pub arguments: Vec<Argument>,
}

impl GraphSnapshot {
    pub fn drawn(&self, marginals: &Marginals, prices: &dyn MarketPrices) -> DrawnGraph {
        let positions = self
            .positions
            .values()
            .map(|p| {
                let canonical_id = p.canonical_id();
                DrawnPosition {
                    position: p.clone(),
                    canonical_id,
                    price: prices.last_price(self.issue_id, canonical_id),
                    marginal: marginals.get(&canonical_id).copied(),
                }
            })
            .collect();
        DrawnGraph {
            issue_id: self.issue_id,
            name: self.name.clone(),
            revision: self.revision,
            positions,
            arguments: self.arguments.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PriceBook;

    #[test]
    fn test_aliases_report_canonical_annotations() {
        let mut snap = GraphSnapshot { issue_id: 3, name: "tax".to_string(), revision: 2, ..Default::default() };
        snap.positions.insert(0, Position { id: 0, same_as: vec![2], ..Default::default() });
        snap.positions.insert(2, Position { id: 2, same_as: vec![0], ..Default::default() });

        let book = PriceBook::new();
        book.record_bid(3, 0, true, 64.0).unwrap();
        let marginals = Marginals::from([(0, 0.64)]);

        let drawn = snap.drawn(&marginals, &book);
        assert_eq!(drawn.revision, 2);
        assert_eq!(drawn.positions.len(), 2);
        for p in &drawn.positions {
            assert_eq!(p.canonical_id, 0);
            assert_eq!(p.price, Some(64.0));
            assert_eq!(p.marginal, Some(0.64));
        }
    }

    #[test]
    fn test_drawn_position_serializes_flat() {
        let p = DrawnPosition {
            position: Position { id: 1, statement: "s".to_string(), ..Default::default() },
            canonical_id: 1,
            price: None,
            marginal: Some(0.5),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["id"], 1);
        assert_eq!(v["statement"], "s");
        assert_eq!(v["marginal"], 0.5);
    }
}
