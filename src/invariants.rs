//! Consistency checks across the claim index and the town registry.
//!
//! These should never fire. A violation means a bug, a crash between two
//! writes, or a hand-edited data directory.

use std::collections::HashMap;

use crate::cell::CellKey;
use crate::claims::ClaimIndex;
use crate::ids::{ClaimOwner, PlayerId, TownId};
use crate::town::{LEDGER_CAPACITY, TownRegistry, validate_town_name};

/// Invariant violation error.
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    /// Description of the violated invariant.
    pub message: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invariant violation: {}", self.message)
    }
}

impl std::error::Error for InvariantViolation {}

/// Check every invariant.
///
/// Returns the violations found, or an empty list if all hold.
#[must_use]
pub fn check_invariants(claims: &ClaimIndex, towns: &TownRegistry) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut report = |message: String| violations.push(InvariantViolation { message });

    let all = towns.list();
    let index = towns.index_snapshot();
    let mut cell_holder: HashMap<&CellKey, TownId> = HashMap::new();
    let mut member_of: HashMap<PlayerId, TownId> = HashMap::new();

    for town in &all {
        if let Err(e) = validate_town_name(&town.name) {
            report(format!("Town {} has an invalid name: {e}", town.id));
        }
        if index.by_name.get(&town.name.to_lowercase()) != Some(&town.id) {
            report(format!("Town {} is missing from the name index", town.name));
        }

        // Governance
        if !town.members.contains_key(&town.leader) {
            report(format!("Leader of {} is not a member", town.name));
        }
        if town.officers.contains(&town.leader) {
            report(format!("Leader of {} is also listed as officer", town.name));
        }
        for officer in &town.officers {
            if !town.members.contains_key(officer) {
                report(format!("Officer {officer} of {} is not a member", town.name));
            }
        }
        for member in town.members.keys() {
            if let Some(other) = member_of.insert(*member, town.id) {
                report(format!("Player {member} belongs to towns {other} and {}", town.id));
            }
            if index.by_member.get(member) != Some(&town.id) {
                report(format!(
                    "Member {member} of {} is missing from the member index",
                    town.name
                ));
            }
        }

        if town.ledger.len() > LEDGER_CAPACITY {
            report(format!(
                "Ledger of {} holds {} entries > capacity {LEDGER_CAPACITY}",
                town.name,
                town.ledger.len()
            ));
        }

        // Territory
        for cell in &town.territory {
            if let Some(other) = cell_holder.insert(cell, town.id) {
                report(format!("Cell {cell} belongs to towns {other} and {}", town.id));
            }
            if index.by_cell.get(cell) != Some(&town.id) {
                report(format!("Cell {cell} of {} is missing from the cell index", town.name));
            }
            match claims.holder_at(cell) {
                Some(ClaimOwner::Town(id)) if id == town.id => {}
                Some(ClaimOwner::Player(player)) => report(format!(
                    "Cell {cell} is held by both {} and player {player}",
                    town.name
                )),
                other => report(format!(
                    "Cell {cell} of {} is recorded in the claim index as {other:?}",
                    town.name
                )),
            }
        }
        for (cell, plot) in &town.plots {
            if !town.territory.contains(cell) {
                report(format!("Plot {cell} of {} lies outside its territory", town.name));
            }
            if let Some(owner) = plot.owner {
                if !town.members.contains_key(&owner) {
                    report(format!("Plot {cell} of {} is owned by non-member {owner}", town.name));
                }
            }
        }
    }

    // The index must not hold town cells the registry does not know.
    for claim in claims.claims() {
        if let ClaimOwner::Town(id) = claim.owner {
            if cell_holder.get(&claim.cell) != Some(&id) {
                report(format!(
                    "Claim index holds {} for town {id}, which does not own it",
                    claim.cell
                ));
            }
        }
    }
    if index.by_cell.len() != cell_holder.len() {
        report(format!(
            "Cell index has {} entries, territory has {}",
            index.by_cell.len(),
            cell_holder.len()
        ));
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{NoMapSink, SystemClock};
    use crate::storage::Storage;
    use std::sync::Arc;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn test_consistent_state_passes() {
        let dir = tempdir().unwrap();
        let towns =
            TownRegistry::open(Storage::open(dir.path()).unwrap(), Arc::new(SystemClock)).unwrap();
        let claims = ClaimIndex::in_memory(Arc::new(NoMapSink));
        let leader = Uuid::new_v4();
        let town = towns.create("Alpha", leader, "Ann").unwrap();
        let cell = CellKey::new("w", 0, 0);
        towns.claim_cell("Alpha", leader, &cell, 10, 0.0).unwrap();
        claims.assign_town_cell(town.id, &cell, 0).unwrap();
        claims
            .claim_cell(Uuid::new_v4(), &CellKey::new("w", 9, 9), 4, 2, 0)
            .unwrap();
        assert!(check_invariants(&claims, &towns).is_empty());
    }

    #[test]
    fn test_detects_shared_cell() {
        let dir = tempdir().unwrap();
        let towns =
            TownRegistry::open(Storage::open(dir.path()).unwrap(), Arc::new(SystemClock)).unwrap();
        let claims = ClaimIndex::in_memory(Arc::new(NoMapSink));
        let leader = Uuid::new_v4();
        let cell = CellKey::new("w", 0, 0);
        // Player claim first, then the town takes the same cell behind the
        // index's back.
        claims.claim_cell(Uuid::new_v4(), &cell, 4, 0, 0).unwrap();
        towns.create("Alpha", leader, "Ann").unwrap();
        towns.claim_cell("Alpha", leader, &cell, 10, 0.0).unwrap();

        let violations = check_invariants(&claims, &towns);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("held by both"));
    }

    #[test]
    fn test_detects_orphan_town_cell() {
        let dir = tempdir().unwrap();
        let towns =
            TownRegistry::open(Storage::open(dir.path()).unwrap(), Arc::new(SystemClock)).unwrap();
        let claims = ClaimIndex::in_memory(Arc::new(NoMapSink));
        claims
            .assign_town_cell(TownId::generate(), &CellKey::new("w", 1, 1), 0)
            .unwrap();
        let violations = check_invariants(&claims, &towns);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].to_string().starts_with("Invariant violation"));
    }
}
