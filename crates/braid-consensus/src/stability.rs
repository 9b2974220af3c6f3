use braid_core::error::BraidError;
use braid_core::props::UnitProps;
use braid_core::types::{Mci, UnitHash};
use braid_storage::Ledger;

use crate::graph::is_included;

/// Is `unit` stable in the view of `later_units`?
///
/// Fast path: the unit's MCI is at or below the highest last-ball MCI among
/// the later units AND the unit is already marked stable. Both conditions
/// are required — the MCI-only shortcut races against concurrent
/// stabilization that has flipped is_stable but not yet written the ball.
pub fn is_stable_in_view(
    ledger: &Ledger,
    unit: &UnitHash,
    later_units: &[UnitHash],
) -> Result<bool, BraidError> {
    let props = ledger.expect_unit_props(unit)?;

    let mut max_last_ball_mci: Option<Mci> = None;
    for later in later_units {
        let later_props = ledger.expect_unit_props(later)?;
        if let Some(last_ball_unit) = &later_props.last_ball_unit {
            let lb_props = ledger.expect_unit_props(last_ball_unit)?;
            max_last_ball_mci = max_last_ball_mci.max(lb_props.main_chain_index);
        }
    }

    if props.is_stable {
        if let (Some(mci), Some(max_mci)) = (props.main_chain_index, max_last_ball_mci) {
            if mci <= max_mci {
                return Ok(true);
            }
        }
        // Stable but past the view's last ball: stable for us only if the
        // view actually includes it.
        return is_included(ledger, unit, later_units);
    }
    Ok(false)
}

/// Can the first unstable MC unit (`candidate`) be declared stable?
///
/// Requires (a) the main-chain tip's witnessed level to have climbed past
/// the candidate's level — a majority of witnesses has since built on top —
/// and (b) no unstable unit outside the candidate's cone to have reached a
/// comparable witnessed level, so no alternative branch can catch up.
pub fn can_stabilize(ledger: &Ledger, candidate: &UnitProps) -> Result<bool, BraidError> {
    let Some((_, tip_unit)) = ledger.mc_top()? else {
        return Ok(false);
    };
    let tip = ledger.expect_unit_props(&tip_unit)?;
    let mc_wl = tip.witnessed_level;

    if mc_wl <= candidate.level {
        return Ok(false);
    }

    for alt in ledger.unstable_units_snapshot()? {
        if alt.unit == candidate.unit {
            continue;
        }
        if alt.witnessed_level < mc_wl {
            continue;
        }
        // A heavy unit is harmless only if it builds on the candidate.
        if !is_included(ledger, &candidate.unit, &[alt.unit.clone()])? {
            return Ok(false);
        }
    }
    Ok(true)
}
