use std::collections::{HashSet, VecDeque};

use braid_core::constants::{
    COUNT_WITNESSES, MAJORITY_OF_WITNESSES, MAX_WITNESSLIST_MUTATIONS,
    UPGRADE_MCI_COMMON_WITNESSES,
};
use braid_core::error::BraidError;
use braid_core::props::UnitProps;
use braid_core::types::{Address, Level, Mci, UnitHash};
use braid_storage::Ledger;

/// Witness list of a unit: embedded (stored under the unit itself) or
/// inherited via witness_list_unit.
pub fn witness_list_of(ledger: &Ledger, props: &UnitProps) -> Result<Vec<Address>, BraidError> {
    let key = props.witness_list_unit.as_ref().unwrap_or(&props.unit);
    ledger
        .witness_list(key)?
        .ok_or_else(|| BraidError::Internal(format!("no witness list reachable from {}", props.unit)))
}

/// Best parent: the parent maximizing witnessed level, then minimizing
/// (level − witnessed level), then minimizing the unit hash. Before the
/// common-op-list upgrade a parent must also share enough witnesses with
/// the child's list.
pub fn determine_best_parent(
    ledger: &Ledger,
    parents: &[UnitProps],
    child_witnesses: &[Address],
    last_ball_mci: Mci,
) -> Result<Option<UnitProps>, BraidError> {
    let mut eligible: Vec<&UnitProps> = Vec::new();
    for parent in parents {
        if last_ball_mci < UPGRADE_MCI_COMMON_WITNESSES {
            let parent_witnesses = witness_list_of(ledger, parent)?;
            let shared = parent_witnesses
                .iter()
                .filter(|w| child_witnesses.contains(w))
                .count();
            if shared < COUNT_WITNESSES - MAX_WITNESSLIST_MUTATIONS {
                continue;
            }
        }
        eligible.push(parent);
    }
    Ok(eligible
        .into_iter()
        .min_by_key(|p| p.best_parent_key())
        .cloned())
}

/// Witnessed level: walk best-parent ancestry collecting distinct witness
/// authors; the level of the unit at which the count first reaches the
/// majority is the witnessed level. Genesis ancestry exhausted → 0.
pub fn witnessed_level_for(
    ledger: &Ledger,
    best_parent: &UnitHash,
    witnesses: &[Address],
) -> Result<Level, BraidError> {
    let mut collected: HashSet<&Address> = HashSet::new();
    let mut current = ledger.expect_unit_props(best_parent)?;
    loop {
        for address in &current.author_addresses {
            if let Some(witness) = witnesses.iter().find(|w| *w == address) {
                collected.insert(witness);
            }
        }
        if collected.len() >= MAJORITY_OF_WITNESSES {
            return Ok(current.level);
        }
        match &current.best_parent_unit {
            Some(parent) => current = ledger.expect_unit_props(parent)?,
            None => return Ok(0),
        }
    }
}

/// Whether `earlier` is in the ancestry of any of `later` (inclusive).
/// BFS over parents, pruned by level.
pub fn is_included(
    ledger: &Ledger,
    earlier: &UnitHash,
    later: &[UnitHash],
) -> Result<bool, BraidError> {
    let earlier_props = ledger.expect_unit_props(earlier)?;
    let mut queue: VecDeque<UnitHash> = later.iter().cloned().collect();
    let mut seen: HashSet<UnitHash> = HashSet::new();
    while let Some(unit) = queue.pop_front() {
        if &unit == earlier {
            return Ok(true);
        }
        if !seen.insert(unit.clone()) {
            continue;
        }
        let props = ledger.expect_unit_props(&unit)?;
        if props.level <= earlier_props.level {
            continue;
        }
        // fast exit through the stable region: an included stable unit at
        // or below earlier's MCI can no longer lead back to it
        if props.is_stable {
            if let (Some(mci), Some(earlier_mci)) =
                (props.main_chain_index, earlier_props.main_chain_index)
            {
                if mci < earlier_mci {
                    continue;
                }
            }
        }
        for parent in &props.parent_units {
            queue.push_back(parent.clone());
        }
    }
    Ok(false)
}
