//! Last published price per contested position.
//!
//! Order matching is not part of the engine. [`PriceBook`] is the sandbox
//! source: a participant's bid is taken as the last price of the position's
//! market.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::EngineError;
use crate::{IssueId, PositionId};

/// Source of `getLastPrice`. Prices are in [0,100].
pub trait MarketPrices: Send + Sync {
    fn last_price(&self, issue: IssueId, position: PositionId) -> Option<f64>;
}

#[derive(Debug, Default)]
pub struct PriceBook {
    prices: RwLock<HashMap<IssueId, BTreeMap<PositionId, f64>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bid as the new last price: `price` when the bid supports the
    /// position, `100 - price` when it opposes it. Returns the stored price.
    pub fn record_bid(
        &self,
        issue: IssueId,
        position: PositionId,
        support: bool,
        price: f64,
    ) -> Result<f64, EngineError> {
        if !price.is_finite() || !(0.0..=100.0).contains(&price) {
            return Err(EngineError::InvalidRequest(format!(
                "price {} outside [0, 100]",
                price
            )));
        }
        let last = if support { price } else { 100.0 - price };
        let mut book = self.prices.write().unwrap_or_else(|e| e.into_inner());
        book.entry(issue).or_default().insert(position, last);
        Ok(last)
    }

    pub fn prices_for(&self, issue: IssueId) -> BTreeMap<PositionId, f64> {
        let book = self.prices.read().unwrap_or_else(|e| e.into_inner());
        book.get(&issue).cloned().unwrap_or_default()
    }

    /// Replace an issue's prices with persisted ones.
    pub fn restore(&self, issue: IssueId, prices: BTreeMap<PositionId, f64>) {
        let mut book = self.prices.write().unwrap_or_else(|e| e.into_inner());
        if prices.is_empty() {
            book.remove(&issue);
        } else {
            book.insert(issue, prices);
        }
    }

    pub fn clear_issue(&self, issue: IssueId) {
        let mut book = self.prices.write().unwrap_or_else(|e| e.into_inner());
        book.remove(&issue);
    }
}

impl MarketPrices for PriceBook {
    fn last_price(&self, issue: IssueId, position: PositionId) -> Option<f64> {
        let book = self.prices.read().unwrap_or_else(|e| e.into_inner());
        book.get(&issue).and_then(|m| m.get(&position)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supporting_and_opposing_bids() {
        let book = PriceBook::new();
        assert_eq!(book.last_price(0, 1), None);
        assert_eq!(book.record_bid(0, 1, true, 70.0), Ok(70.0));
        assert_eq!(book.last_price(0, 1), Some(70.0));
        assert_eq!(book.record_bid(0, 1, false, 70.0), Ok(30.0));
        assert_eq!(book.last_price(0, 1), Some(30.0));
    }

    #[test]
    fn test_out_of_range_bid_is_rejected() {
        let book = PriceBook::new();
        assert!(matches!(book.record_bid(0, 1, true, 101.0), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(book.record_bid(0, 1, true, f64::NAN), Err(EngineError::InvalidRequest(_))));
        assert_eq!(book.last_price(0, 1), None);
    }

    #[test]
    fn test_issues_are_independent() {
        let book = PriceBook::new();
        book.record_bid(0, 1, true, 80.0).unwrap();
        book.record_bid(1, 1, true, 20.0).unwrap();
        book.clear_issue(0);
        assert_eq!(book.last_price(0, 1), None);
        assert_eq!(book.prices_for(1), BTreeMap::from([(1, 20.0)]));
    }
}
