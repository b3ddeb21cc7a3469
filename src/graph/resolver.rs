//! Duplicate positions.
//!
//! Reusing a claim as a premise never reuses its node: the store allocates a
//! fresh position carrying the same statement, so every node keeps at most
//! one parent edge and the drawn graph stays a tree. The copies are tied
//! together through `same_as`, which is kept flat and symmetric: each member
//! of a cohort lists every other member. Belief computation treats the
//! lowest id of a cohort as the one authoritative term.

use std::collections::BTreeMap;

use crate::graph::node::Position;
use crate::PositionId;

/// Alias list for a new copy of `original`: the original's own aliases plus
/// the original itself, ascending.
pub fn alias_set_for(original: &Position) -> Vec<PositionId> {
    let mut aliases = original.same_as.clone();
    insert_sorted(&mut aliases, original.id);
    aliases
}

/// Push `new_id` onto the alias list of every position it names as an alias.
/// Members missing from the index are skipped.
pub fn link_duplicate(positions: &mut BTreeMap<PositionId, Position>, new_id: PositionId) {
    let members = match positions.get(&new_id) {
        Some(p) => p.same_as.clone(),
        None => return,
    };
    for member in members {
        if let Some(p) = positions.get_mut(&member) {
            insert_sorted(&mut p.same_as, new_id);
        }
    }
}

/// Lowest id in the cohort of `id`; `id` itself when unknown.
pub fn canonical_id(positions: &BTreeMap<PositionId, Position>, id: PositionId) -> PositionId {
    positions.get(&id).map(Position::canonical_id).unwrap_or(id)
}

fn insert_sorted(list: &mut Vec<PositionId>, id: PositionId) {
    if let Err(idx) = list.binary_search(&id) {
        list.insert(idx, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(id: PositionId, statement: &str, same_as: Vec<PositionId>) -> Position {
        Position {
            id,
            statement: statement.to_string(),
            same_as,
            ..Default::default()
        }
    }

    fn add_copy(index: &mut BTreeMap<PositionId, Position>, original: PositionId, new_id: PositionId) {
        let orig = index[&original].clone();
        index.insert(new_id, position(new_id, &orig.statement, alias_set_for(&orig)));
        link_duplicate(index, new_id);
    }

    #[test]
    fn test_single_copy_is_symmetric() {
        let mut index = BTreeMap::new();
        index.insert(0, position(0, "claim", vec![]));
        add_copy(&mut index, 0, 1);

        assert_eq!(index[&0].same_as, vec![1]);
        assert_eq!(index[&1].same_as, vec![0]);
        assert_eq!(index[&1].statement, "claim");
    }

    #[test]
    fn test_cohort_stays_flat_across_copies_of_copies() {
        let mut index = BTreeMap::new();
        index.insert(0, position(0, "claim", vec![]));
        index.insert(1, position(1, "other", vec![]));
        add_copy(&mut index, 0, 2);
        add_copy(&mut index, 2, 3);

        assert_eq!(index[&0].same_as, vec![2, 3]);
        assert_eq!(index[&2].same_as, vec![0, 3]);
        assert_eq!(index[&3].same_as, vec![0, 2]);
        assert!(index[&1].same_as.is_empty());
    }

    #[test]
    fn test_canonical_resolution_is_lowest_id() {
        let mut index = BTreeMap::new();
        index.insert(4, position(4, "claim", vec![]));
        add_copy(&mut index, 4, 9);
        add_copy(&mut index, 9, 12);

        for id in [4, 9, 12] {
            assert_eq!(canonical_id(&index, id), 4);
        }
        assert_eq!(canonical_id(&index, 99), 99);
    }
}
