use sha2::{Digest, Sha256};
use tracing::{debug, info};

use braid_core::constants::{COMMISSION_BATCH, WITNESSING_WINDOW_MCIS};
use braid_core::error::BraidError;
use braid_core::types::{Address, Amount, Mci, Sequence, UnitHash};
use braid_core::unit::HeadersCommissionShare;
use braid_storage::Ledger;

/// Advance commission distribution over newly stable MCIs, at most
/// COMMISSION_BATCH per call so a long outage is paid off in bounded
/// memory. An MCI is payable once its next MCI is stable (the winner draw
/// needs next-MCI children).
pub fn update_commissions(ledger: &Ledger) -> Result<(), BraidError> {
    let last_stable = ledger.last_stable_mci()?;
    if last_stable == 0 {
        return Ok(());
    }
    let start = match ledger.max_spendable_mci()? {
        Some(m) => m + 1,
        None => 1,
    };
    let mut processed = 0u64;
    let mut mci = start;
    while mci + 1 <= last_stable && processed < COMMISSION_BATCH {
        distribute_headers_commissions(ledger, mci)?;
        distribute_witnessing_commissions(ledger, mci)?;
        ledger.set_max_spendable_mci(mci)?;
        processed += 1;
        mci += 1;
    }
    if processed > 0 {
        info!(from = start, to = mci - 1, "commissions distributed");
    }
    Ok(())
}

/// Each good unit at `mci` pays its headers commission to one child: among
/// its children at the same or next MCI with sequence good, the child
/// minimizing SHA-256(child_unit ‖ next_mc_unit) wins. The draw is
/// deterministic and unpredictable until the next MC unit is fixed.
fn distribute_headers_commissions(ledger: &Ledger, mci: Mci) -> Result<(), BraidError> {
    let next_mc_unit = ledger
        .mc_unit_at(mci + 1)?
        .ok_or_else(|| BraidError::Internal(format!("no MC unit at {}", mci + 1)))?;

    for props in ledger.units_at_mci(mci)? {
        if props.sequence != Sequence::Good {
            continue;
        }
        let mut candidates = Vec::new();
        for child in ledger.children_of(&props.unit)? {
            let child_props = ledger.expect_unit_props(&child)?;
            if child_props.sequence != Sequence::Good {
                continue;
            }
            match child_props.main_chain_index {
                Some(child_mci) if child_mci == mci || child_mci == mci + 1 => {
                    candidates.push(child);
                }
                _ => {}
            }
        }
        let Some(winner) = candidates.into_iter().min_by_key(|child| {
            let mut hasher = Sha256::new();
            hasher.update(child.as_bytes());
            hasher.update(next_mc_unit.as_bytes());
            let digest: [u8; 32] = hasher.finalize().into();
            digest
        }) else {
            continue; // childless within the window: the commission is burned
        };
        let shares = commission_recipients(ledger, &winner)?;
        pay_shares(ledger, props.headers_commission, &shares, mci)?;
        debug!(unit = %props.unit, winner = %winner, "headers commission drawn");
    }
    Ok(())
}

/// The winner's earned-headers-commission recipients, defaulting to its
/// first author at 100 shares.
fn commission_recipients(
    ledger: &Ledger,
    unit: &UnitHash,
) -> Result<Vec<HeadersCommissionShare>, BraidError> {
    let joint = ledger
        .joint(unit)?
        .ok_or_else(|| BraidError::Internal(format!("no joint for {unit}")))?;
    Ok(match &joint.unit.earned_headers_commission_recipients {
        Some(recipients) => recipients.clone(),
        None => vec![HeadersCommissionShare {
            address: joint.unit.authors[0].address.clone(),
            earned_headers_commission_share: 100,
        }],
    })
}

fn pay_shares(
    ledger: &Ledger,
    total: Amount,
    shares: &[HeadersCommissionShare],
    mci: Mci,
) -> Result<(), BraidError> {
    let mut paid = 0u64;
    for (i, share) in shares.iter().enumerate() {
        let amount = if i + 1 == shares.len() {
            total - paid // rounding remainder goes to the last recipient
        } else {
            total * share.earned_headers_commission_share as u64 / 100
        };
        paid += amount;
        if amount > 0 {
            ledger.put_headers_commission_output(&share.address, mci, amount)?;
        }
    }
    Ok(())
}

/// The witnessing pool of `mci` (payload commissions of its good units) is
/// split equally among the MC unit's witnesses that authored a stable unit
/// within the trailing window; the remainder goes to the first (smallest)
/// address, so every node pays identically.
fn distribute_witnessing_commissions(ledger: &Ledger, mci: Mci) -> Result<(), BraidError> {
    let mc_unit = ledger
        .mc_unit_at(mci)?
        .ok_or_else(|| BraidError::Internal(format!("no MC unit at {mci}")))?;
    let mc_props = ledger.expect_unit_props(&mc_unit)?;
    let list_unit = mc_props.witness_list_unit.as_ref().unwrap_or(&mc_unit);
    let witnesses = ledger
        .witness_list(list_unit)?
        .ok_or_else(|| BraidError::Internal(format!("no witness list for {mc_unit}")))?;

    let pool: Amount = ledger
        .units_at_mci(mci)?
        .iter()
        .filter(|p| p.sequence == Sequence::Good)
        .map(|p| p.payload_commission)
        .sum();
    if pool == 0 {
        return Ok(());
    }

    let from_mci = mci.saturating_sub(WITNESSING_WINDOW_MCIS);
    let mut active: Vec<Address> = Vec::new();
    for witness in &witnesses {
        if ledger.author_active_in_range(witness, from_mci, mci)? {
            active.push(witness.clone());
        }
    }
    if active.is_empty() {
        return Ok(());
    }
    active.sort();

    let n = active.len() as u64;
    let share = pool / n;
    let remainder = pool - share * n;
    for (i, witness) in active.iter().enumerate() {
        let amount = if i == 0 { share + remainder } else { share };
        if amount > 0 {
            ledger.put_witnessing_output(witness, mci, amount)?;
        }
    }
    Ok(())
}
