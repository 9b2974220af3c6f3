use tracing::{error, info};

use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::props::UnitProps;
use braid_core::types::{Mci, Sequence, UnitHash};
use braid_core::unit::{Input, Payload};
use braid_storage::rows::OutputRow;
use braid_storage::Ledger;
use braid_validation::ValidationState;

use crate::locks;

/// What one committed save produced.
#[derive(Debug)]
pub struct SaveOutcome {
    pub unit: UnitHash,
    pub stabilized_mcis: Vec<Mci>,
    pub aa_response_units: Vec<UnitHash>,
}

/// Persist a validated joint. Acquires the global write lock; the entire
/// commit — rows, main-chain advance, stabilization, AA execution,
/// commission accrual — happens inside the guard's scope, so the lock is
/// released on every path, error paths included.
pub async fn save_joint(
    ledger: &Ledger,
    joint: &Joint,
    state: &ValidationState,
) -> Result<SaveOutcome, BraidError> {
    let _write_guard = locks::lock_write().await;
    save_joint_under_lock(ledger, joint, state)
}

fn save_joint_under_lock(
    ledger: &Ledger,
    joint: &Joint,
    state: &ValidationState,
) -> Result<SaveOutcome, BraidError> {
    let unit = &joint.unit;
    let unit_hash = &unit.unit;

    // ── Determinism re-check ─────────────────────────────────────────────────
    // Recompute the graph attributes exactly as validation did; divergence
    // means a code bug, and silently writing would fork this node off the
    // network.
    let mut parent_props = Vec::with_capacity(unit.parent_units.len());
    for parent in &unit.parent_units {
        parent_props.push(ledger.expect_unit_props(parent)?);
    }
    let best_parent = braid_consensus::determine_best_parent(
        ledger,
        &parent_props,
        &state.witnesses,
        state.last_ball_mci,
    )?
    .map(|p| p.unit);
    let level = parent_props.iter().map(|p| p.level).max().unwrap_or(0) + 1;
    let witnessed_level = match &best_parent {
        Some(bp) => braid_consensus::witnessed_level_for(ledger, bp, &state.witnesses)?,
        None => 0,
    };
    if best_parent != state.best_parent_unit
        || level != state.level
        || witnessed_level != state.witnessed_level
    {
        error!(
            unit = %unit_hash,
            ?best_parent,
            level,
            witnessed_level,
            expected_best = ?state.best_parent_unit,
            expected_level = state.level,
            expected_wl = state.witnessed_level,
            "writer disagrees with validation on graph attributes"
        );
        return Err(BraidError::Internal(format!(
            "graph attribute mismatch for {unit_hash}"
        )));
    }

    let props = UnitProps {
        unit: unit_hash.clone(),
        level,
        witnessed_level,
        best_parent_unit: best_parent,
        parent_units: unit.parent_units.clone(),
        witness_list_unit: unit.witness_list_unit.clone(),
        last_ball_unit: unit.last_ball_unit.clone(),
        is_on_main_chain: false,
        main_chain_index: None,
        latest_included_mc_index: None,
        is_free: true,
        is_stable: false,
        sequence: state.sequence,
        author_addresses: unit.author_addresses(),
        timestamp: unit.timestamp,
        headers_commission: unit.headers_commission,
        payload_commission: unit.payload_commission,
    };
    write_unit_rows(ledger, joint, &props)?;
    for (chash, row) in &state.new_definitions {
        ledger.store_definition(chash, row)?;
    }

    // ── Main chain, stabilization, post-commit work ──────────────────────────
    braid_consensus::update_main_chain(ledger)?;
    let outcome = braid_consensus::stabilize_ready(ledger)?;

    let mut aa_response_units = Vec::new();
    if !outcome.triggers.is_empty() {
        // already under the write lock: the executor never takes another
        let responses = braid_aa::execute_triggers(ledger, &outcome.triggers)?;
        for response in &responses {
            save_response_joint(ledger, response)?;
            aa_response_units.push(response.unit_hash().clone());
        }
        if !responses.is_empty() {
            braid_consensus::update_main_chain(ledger)?;
        }
    }
    for mci in &outcome.stabilized_mcis {
        braid_fees::settle_tps_fees(ledger, *mci)?;
    }
    braid_fees::update_commissions(ledger)?;

    ledger.flush()?;
    info!(unit = %unit_hash, stabilized = outcome.stabilized_mcis.len(), "joint saved");
    Ok(SaveOutcome {
        unit: unit_hash.clone(),
        stabilized_mcis: outcome.stabilized_mcis,
        aa_response_units,
    })
}

/// Rows shared by network units and AA responses: props, joint KV, witness
/// list, author index, outputs, spend claims, spend proofs, message cache.
fn write_unit_rows(ledger: &Ledger, joint: &Joint, props: &UnitProps) -> Result<(), BraidError> {
    let unit = &joint.unit;
    let unit_hash = &unit.unit;

    ledger.save_unit_props(props)?;
    ledger.put_joint(joint)?;
    if let Some(witnesses) = &unit.witnesses {
        ledger.put_witness_list(unit_hash, witnesses)?;
    }
    for author in &unit.authors {
        ledger.index_author_unit(&author.address, unit_hash)?;
    }
    for (message_index, message) in unit.messages.iter().enumerate() {
        if let Some(spend_proofs) = &message.spend_proofs {
            for proof in spend_proofs {
                let address = proof
                    .address
                    .clone()
                    .unwrap_or_else(|| unit.authors[0].address.clone());
                ledger.put_spend_proof(&proof.spend_proof, &address, unit_hash)?;
            }
        }
        let Some(Payload::Payment(payment)) = &message.payload else {
            continue;
        };
        for (output_index, output) in payment.outputs.iter().enumerate() {
            ledger.put_output(
                unit_hash,
                message_index as u32,
                output_index as u32,
                &OutputRow {
                    address: output.address.clone(),
                    asset: payment.asset.clone(),
                    amount: output.amount,
                    is_spent: false,
                    main_chain_index: None,
                },
            )?;
        }
        for input in &payment.inputs {
            match input {
                Input::Transfer {
                    unit: src,
                    message_index: src_msg,
                    output_index: src_out,
                } => {
                    let rivals = ledger.add_spend_claim(
                        &payment.asset,
                        src,
                        *src_msg,
                        *src_out,
                        unit_hash,
                    )?;
                    for rival in rivals {
                        // both sides of a double spend ride temp-bad until
                        // stabilization picks the winner
                        let rival_props = ledger.expect_unit_props(&rival)?;
                        if !rival_props.is_stable && rival_props.sequence == Sequence::Good {
                            ledger.update_props(&rival, |p| {
                                p.sequence = Sequence::TempBad;
                            })?;
                        }
                    }
                }
                Input::HeadersCommission {
                    from_main_chain_index,
                    to_main_chain_index,
                } => {
                    ledger.sweep_commission_range(
                        false,
                        &unit.authors[0].address,
                        *from_main_chain_index,
                        *to_main_chain_index,
                    )?;
                }
                Input::Witnessing {
                    from_main_chain_index,
                    to_main_chain_index,
                } => {
                    ledger.sweep_commission_range(
                        true,
                        &unit.authors[0].address,
                        *from_main_chain_index,
                        *to_main_chain_index,
                    )?;
                }
                Input::Issue { .. } => {}
            }
        }
    }
    ledger.cache_unstable_messages(unit_hash, &unit.messages)?;
    Ok(())
}

/// Persist an AA response unit. Responses are generated deterministically
/// under the write lock and skip validation; their graph attributes are
/// computed here.
fn save_response_joint(ledger: &Ledger, joint: &Joint) -> Result<(), BraidError> {
    let unit = &joint.unit;
    let mut parent_props = Vec::with_capacity(unit.parent_units.len());
    for parent in &unit.parent_units {
        parent_props.push(ledger.expect_unit_props(parent)?);
    }
    let witnesses = match &unit.witness_list_unit {
        Some(list_unit) => ledger.witness_list(list_unit)?.ok_or_else(|| {
            BraidError::Internal(format!("no witness list at {list_unit} for AA response"))
        })?,
        None => {
            return Err(BraidError::Internal(
                "AA response without witness list".into(),
            ))
        }
    };
    let last_ball_mci = match &unit.last_ball_unit {
        Some(lb) => ledger
            .expect_unit_props(lb)?
            .main_chain_index
            .unwrap_or(0),
        None => 0,
    };
    let best_parent =
        braid_consensus::determine_best_parent(ledger, &parent_props, &witnesses, last_ball_mci)?
            .map(|p| p.unit);
    let level = parent_props.iter().map(|p| p.level).max().unwrap_or(0) + 1;
    let witnessed_level = match &best_parent {
        Some(bp) => braid_consensus::witnessed_level_for(ledger, bp, &witnesses)?,
        None => 0,
    };
    let props = UnitProps {
        unit: unit.unit.clone(),
        level,
        witnessed_level,
        best_parent_unit: best_parent,
        parent_units: unit.parent_units.clone(),
        witness_list_unit: unit.witness_list_unit.clone(),
        last_ball_unit: unit.last_ball_unit.clone(),
        is_on_main_chain: false,
        main_chain_index: None,
        latest_included_mc_index: None,
        is_free: true,
        is_stable: false,
        sequence: Sequence::Good,
        author_addresses: unit.author_addresses(),
        timestamp: unit.timestamp,
        headers_commission: unit.headers_commission,
        payload_commission: unit.payload_commission,
    };
    write_unit_rows(ledger, joint, &props)?;
    info!(unit = %unit.unit, aa = %unit.authors[0].address, "AA response saved");
    Ok(())
}
