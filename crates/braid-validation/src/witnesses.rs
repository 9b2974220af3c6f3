use braid_core::constants::{
    COUNT_WITNESSES, MAX_WITNESSLIST_MUTATIONS, UPGRADE_MCI_COMMON_WITNESSES,
};
use braid_core::error::BraidError;
use braid_core::types::Address;
use braid_core::unit::Unit;
use braid_storage::Ledger;

use crate::parents::ParentContext;

/// Stage-7 checks: resolve the unit's effective witness list (embedded or
/// via witness_list_unit) and, before the common-op-list upgrade, bound the
/// mutation distance from the parents' lists.
pub fn check_witnesses(
    ledger: &Ledger,
    unit: &Unit,
    parent_ctx: &ParentContext,
) -> Result<Vec<Address>, BraidError> {
    let witnesses = match (&unit.witnesses, &unit.witness_list_unit) {
        (Some(list), None) => {
            for witness in list {
                if !braid_crypto::is_chash_valid(witness) {
                    return Err(BraidError::WitnessList(format!(
                        "witness {witness} fails checksum"
                    )));
                }
            }
            list.clone()
        }
        (None, Some(list_unit)) => {
            let props = ledger
                .unit_props(list_unit)?
                .ok_or_else(|| BraidError::WitnessList(format!("witness list unit {list_unit} not found")))?;
            if !props.is_stable {
                return Err(BraidError::WitnessList(format!(
                    "witness list unit {list_unit} is not stable"
                )));
            }
            if props.main_chain_index.unwrap_or(u64::MAX) > parent_ctx.last_ball_mci {
                return Err(BraidError::WitnessList(format!(
                    "witness list unit {list_unit} is later than the last ball"
                )));
            }
            ledger.witness_list(list_unit)?.ok_or_else(|| {
                BraidError::WitnessList(format!("unit {list_unit} carries no witness list"))
            })?
        }
        // structural stage already enforced exactly-one
        _ => return Err(BraidError::Internal("witness declaration shape".into())),
    };
    if witnesses.len() != COUNT_WITNESSES {
        return Err(BraidError::WitnessList(format!(
            "expected {COUNT_WITNESSES} witnesses, got {}",
            witnesses.len()
        )));
    }

    if parent_ctx.last_ball_mci < UPGRADE_MCI_COMMON_WITNESSES {
        for parent in &parent_ctx.parent_props {
            let parent_list =
                braid_consensus::graph::witness_list_of(ledger, parent)?;
            let shared = parent_list
                .iter()
                .filter(|w| witnesses.contains(w))
                .count();
            if shared < COUNT_WITNESSES - MAX_WITNESSLIST_MUTATIONS {
                return Err(BraidError::WitnessList(format!(
                    "only {shared} witnesses shared with parent {}",
                    parent.unit
                )));
            }
        }
    }
    Ok(witnesses)
}
