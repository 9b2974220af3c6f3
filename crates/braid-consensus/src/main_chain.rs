use std::collections::{HashSet, VecDeque};
use tracing::debug;

use braid_core::error::BraidError;
use braid_core::props::UnitProps;
use braid_core::types::{Mci, UnitHash};
use braid_storage::Ledger;

/// Rebuild the unstable main chain after a new unit was written.
///
/// Walks best parents down from the best tip to the stable prefix, marks
/// the path as the main chain, assigns provisional MCIs (non-MC units
/// inherit the MCI of the first MC unit that includes them) and
/// re-propagates latest_included_mc_index over the whole unstable region.
pub fn update_main_chain(ledger: &Ledger) -> Result<(), BraidError> {
    let free = ledger.free_units()?;
    let Some(tip) = free.into_iter().min_by_key(|p| p.best_parent_key()) else {
        return Ok(());
    };

    // ── Walk down to the stable main chain ──────────────────────────────────
    let mut chain: Vec<UnitProps> = Vec::new();
    let mut current = tip;
    loop {
        // the stable region is frozen: the walk never crosses into it
        if current.is_stable {
            break;
        }
        chain.push(current.clone());
        match &current.best_parent_unit {
            Some(parent) => current = ledger.expect_unit_props(parent)?,
            None => break, // genesis
        }
    }
    chain.reverse();

    // ── Reset provisional marks on the unstable region ──────────────────────
    let last_stable_mci = ledger.last_stable_mci()?;
    ledger.clear_mc_above(last_stable_mci)?;
    for props in ledger.unstable_units_snapshot()? {
        if props.is_on_main_chain
            || props.main_chain_index.is_some()
            || props.latest_included_mc_index.is_some()
        {
            ledger.update_props(&props.unit, |p| {
                p.is_on_main_chain = false;
                p.main_chain_index = None;
                p.latest_included_mc_index = None;
            })?;
        }
    }

    // ── Mark the new chain and assign MCIs ──────────────────────────────────
    let mut mci = last_stable_mci;
    for mc_props in &chain {
        mci += 1;
        ledger.update_props(&mc_props.unit, |p| {
            p.is_on_main_chain = true;
            p.main_chain_index = Some(mci);
        })?;
        ledger.set_mc_unit(mci, &mc_props.unit)?;
        assign_mci_to_included(ledger, &mc_props.unit, mci)?;
    }
    debug!(top_mci = mci, chain_len = chain.len(), "main chain rebuilt");

    propagate_limci(ledger)?;
    Ok(())
}

/// Give every not-yet-assigned ancestor of `mc_unit` the same MCI: a non-MC
/// unit inherits the MCI of the first MC unit that includes it.
fn assign_mci_to_included(ledger: &Ledger, mc_unit: &UnitHash, mci: Mci) -> Result<(), BraidError> {
    let props = ledger.expect_unit_props(mc_unit)?;
    let mut queue: VecDeque<UnitHash> = props.parent_units.iter().cloned().collect();
    let mut seen: HashSet<UnitHash> = HashSet::new();
    while let Some(unit) = queue.pop_front() {
        if !seen.insert(unit.clone()) {
            continue;
        }
        let parent_props = ledger.expect_unit_props(&unit)?;
        if parent_props.is_stable || parent_props.main_chain_index.is_some() {
            continue;
        }
        ledger.update_props(&unit, |p| {
            p.main_chain_index = Some(mci);
        })?;
        for grandparent in &parent_props.parent_units {
            queue.push_back(grandparent.clone());
        }
    }
    Ok(())
}

/// Recompute latest_included_mc_index bottom-up: for each parent, the
/// child's LIMCI is the parent's MCI when the parent sits on the MC,
/// otherwise the parent's own LIMCI; the child takes the maximum.
fn propagate_limci(ledger: &Ledger) -> Result<(), BraidError> {
    let mut unstable = ledger.unstable_units_snapshot()?;
    unstable.sort_by_key(|p| (p.level, p.unit.clone()));
    for props in unstable {
        let mut limci: Option<Mci> = None;
        for parent in &props.parent_units {
            let parent_props = ledger.expect_unit_props(parent)?;
            let inherited = if parent_props.is_on_main_chain {
                parent_props.main_chain_index
            } else {
                parent_props.latest_included_mc_index
            };
            limci = match (limci, inherited) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (None, b) => b,
                (a, None) => a,
            };
        }
        if props.latest_included_mc_index != limci {
            ledger.update_props(&props.unit, |p| {
                p.latest_included_mc_index = limci;
            })?;
        }
    }
    Ok(())
}
