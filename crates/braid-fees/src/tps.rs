use tracing::debug;

use braid_core::constants::{TPS_FEE_MULTIPLIER, TPS_INTERVAL, UPGRADE_MCI_V4};
use braid_core::error::BraidError;
use braid_core::props::UnitProps;
use braid_core::types::{Amount, Mci};
use braid_storage::Ledger;

/// The TPS fee a new unit must pay, computed from the parent view: the unit
/// rate over the trailing TPS_INTERVAL MCIs below the parents' view of the
/// chain, scaled by the multiplier. Congestion-free periods cost the floor.
pub fn required_tps_fee(ledger: &Ledger, parents: &[UnitProps]) -> Result<Amount, BraidError> {
    let view_top = parents
        .iter()
        .filter_map(|p| {
            p.latest_included_mc_index
                .or(p.main_chain_index)
        })
        .max()
        .unwrap_or(0);
    let from = view_top.saturating_sub(TPS_INTERVAL.saturating_sub(1));
    let mut recent_units = 0u64;
    for mci in from..=view_top {
        recent_units += ledger.units_at_mci(mci)?.len() as u64;
    }
    let rate = recent_units.div_ceil(TPS_INTERVAL);
    let fee = TPS_FEE_MULTIPLIER * rate.max(1);
    debug!(view_top, recent_units, fee, "tps fee computed");
    Ok(fee)
}

/// Lower bound a light client holds a vendor's tps_fee quote against.
/// Light clients cannot see the DAG, but no honest network ever quotes
/// below the uncongested floor.
pub fn min_plausible_tps_fee() -> Amount {
    TPS_FEE_MULTIPLIER
}

/// After stabilization of `mci`, settle TPS-fee balances: each author's
/// prepaid balance grows by the fee paid and shrinks by the fee consumed at
/// the rate that held when the unit stabilized.
pub fn settle_tps_fees(ledger: &Ledger, mci: Mci) -> Result<(), BraidError> {
    if mci < UPGRADE_MCI_V4 {
        return Ok(());
    }
    for props in ledger.units_at_mci(mci)? {
        let joint = ledger
            .joint(&props.unit)?
            .ok_or_else(|| BraidError::Internal(format!("no joint for {}", props.unit)))?;
        let paid = joint.unit.tps_fee.unwrap_or(0) as i64;
        let consumed = min_plausible_tps_fee() as i64;
        if paid != 0 || consumed != 0 {
            let author = &joint.unit.authors[0].address;
            ledger.add_tps_fee_balance(author, paid - consumed)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plausibility_floor_is_positive() {
        assert!(min_plausible_tps_fee() > 0);
    }
}
