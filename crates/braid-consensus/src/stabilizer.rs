use std::collections::BTreeMap;
use tracing::{info, warn};

use braid_core::constants::UPGRADE_MCI_AA;
use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::props::UnitProps;
use braid_core::types::{Ball, Mci, Sequence, UnitHash};
use braid_core::unit::{Input, Payload};
use braid_crypto::canonical::canonical_json;
use braid_crypto::{ball_hash, sha256_b64};
use braid_storage::rows::{AaRow, AssetRow, TriggerRow};
use braid_storage::Ledger;

use crate::stability::can_stabilize;

/// What one stabilization pass produced: the MCIs that froze and the AA
/// triggers they released, in deterministic execution order.
#[derive(Debug, Default)]
pub struct StabilizationOutcome {
    pub stabilized_mcis: Vec<Mci>,
    pub triggers: Vec<TriggerRow>,
}

/// Advance the stability point as far as the witnesses allow. Each newly
/// stable MCI is committed in one protected section: sequence resolution,
/// ball computation, archival, side-table indexing, trigger collection.
pub fn stabilize_ready(ledger: &Ledger) -> Result<StabilizationOutcome, BraidError> {
    let mut outcome = StabilizationOutcome::default();
    loop {
        let next_mci = ledger.last_stable_mci()? + 1;
        let Some(mc_unit) = ledger.mc_unit_at(next_mci)? else {
            break;
        };
        let candidate = ledger.expect_unit_props(&mc_unit)?;
        if candidate.is_stable {
            return Err(BraidError::Internal(format!(
                "MC unit {mc_unit} at {next_mci} already stable before stabilization"
            )));
        }
        if !can_stabilize(ledger, &candidate)? {
            break;
        }
        let triggers = stabilize_mci(ledger, next_mci)?;
        outcome.stabilized_mcis.push(next_mci);
        outcome.triggers.extend(triggers);
    }
    Ok(outcome)
}

fn stabilize_mci(ledger: &Ledger, mci: Mci) -> Result<Vec<TriggerRow>, BraidError> {
    let mut units = ledger.units_at_mci(mci)?;
    // Deterministic order on every node: level, then unit hash.
    units.sort_by_key(|p| (p.level, p.unit.clone()));

    let mut triggers = Vec::new();
    for props in &units {
        let sequence = resolve_sequence(ledger, props, mci)?;
        let joint = ledger
            .joint(&props.unit)?
            .ok_or_else(|| BraidError::Internal(format!("no joint for {}", props.unit)))?;

        let ball = compute_and_store_ball(ledger, &joint, props, sequence, mci)?;

        let final_props = ledger.update_props(&props.unit, |p| {
            p.is_stable = true;
            p.sequence = sequence;
            p.main_chain_index = Some(mci);
        })?;
        ledger.caches_write()?.mark_stable(&final_props, mci);

        match sequence {
            Sequence::Good => {
                apply_good_unit(ledger, &joint, mci, &mut triggers)?;
            }
            Sequence::FinalBad => {
                archive_bad_unit(ledger, &joint, &ball)?;
            }
            Sequence::TempBad => {
                return Err(BraidError::Internal(format!(
                    "unit {} left temp-bad after resolution",
                    props.unit
                )));
            }
        }
    }

    ledger.set_last_stable_mci(mci)?;
    info!(mci, units = units.len(), triggers = triggers.len(), "MCI stabilized");
    Ok(triggers)
}

/// Resolve temp-bad: among all claimants of each output this unit spends,
/// the winner is the smallest (effective MCI, unit hash); everyone else is
/// final-bad. Effective MCI of a not-yet-stabilized claimant is ∞.
fn resolve_sequence(
    ledger: &Ledger,
    props: &UnitProps,
    mci: Mci,
) -> Result<Sequence, BraidError> {
    if props.sequence != Sequence::TempBad {
        return Ok(props.sequence);
    }
    let joint = ledger
        .joint(&props.unit)?
        .ok_or_else(|| BraidError::Internal(format!("no joint for {}", props.unit)))?;
    for message in &joint.unit.messages {
        let Some(payment) = message.payment() else {
            continue;
        };
        for input in &payment.inputs {
            let Input::Transfer {
                unit,
                message_index,
                output_index,
            } = input
            else {
                continue;
            };
            let claimants =
                ledger.spend_claimants(&payment.asset, unit, *message_index, *output_index)?;
            let mut best: Option<(Mci, UnitHash)> = None;
            for claimant in claimants {
                let claimant_props = ledger.expect_unit_props(&claimant)?;
                let effective_mci = match (claimant_props.is_stable, claimant_props.main_chain_index)
                {
                    (true, Some(m)) => m,
                    _ if claimant == props.unit => mci,
                    (_, Some(m)) if m == mci => m,
                    _ => Mci::MAX,
                };
                let key = (effective_mci, claimant.clone());
                if best.as_ref().map_or(true, |b| key < *b) {
                    best = Some(key);
                }
            }
            if let Some((_, winner)) = best {
                if winner != props.unit {
                    warn!(unit = %props.unit, winner = %winner, "double spend resolved against unit");
                    return Ok(Sequence::FinalBad);
                }
            }
        }
    }
    Ok(Sequence::Good)
}

fn compute_and_store_ball(
    ledger: &Ledger,
    joint: &Joint,
    props: &UnitProps,
    sequence: Sequence,
    mci: Mci,
) -> Result<Ball, BraidError> {
    let mut parent_balls = Vec::with_capacity(props.parent_units.len());
    for parent in &props.parent_units {
        let ball = ledger
            .ball_of(parent)?
            .ok_or_else(|| BraidError::Internal(format!("parent {parent} has no ball yet")))?;
        parent_balls.push(ball);
    }
    let (skiplist_units, skiplist_balls) = if props.is_on_main_chain && mci % 10 == 0 && mci > 0 {
        skiplist_for(ledger, mci)?
    } else {
        (Vec::new(), Vec::new())
    };
    let is_nonserial = sequence == Sequence::FinalBad;
    let ball = ball_hash(&props.unit, &parent_balls, &skiplist_balls, is_nonserial)?;
    ledger.put_ball(&props.unit, &ball)?;

    let mut stable_joint = joint.clone();
    stable_joint.ball = Some(ball.clone());
    stable_joint.skiplist_units = if skiplist_units.is_empty() {
        None
    } else {
        Some(skiplist_units)
    };
    ledger.put_joint(&stable_joint)?;
    Ok(ball)
}

/// Skiplist for MC units at MCIs divisible by 10: back-links at powers of
/// ten, giving catchup logarithmic hops.
fn skiplist_for(ledger: &Ledger, mci: Mci) -> Result<(Vec<UnitHash>, Vec<Ball>), BraidError> {
    let mut units = Vec::new();
    let mut balls = Vec::new();
    let mut step = 10u64;
    while step <= mci && mci % step == 0 {
        let target = mci - step;
        if let Some(unit) = ledger.mc_unit_at(target)? {
            if let Some(ball) = ledger.ball_of(&unit)? {
                units.push(unit);
                balls.push(ball);
            }
        }
        match step.checked_mul(10) {
            Some(next) => step = next,
            None => break,
        }
    }
    Ok((units, balls))
}

/// Side effects of a good unit becoming stable: outputs get their MCI,
/// consumed outputs flip to spent, payload indexes are fed, AA triggers
/// are collected.
fn apply_good_unit(
    ledger: &Ledger,
    joint: &Joint,
    mci: Mci,
    triggers: &mut Vec<TriggerRow>,
) -> Result<(), BraidError> {
    let unit = &joint.unit;
    let unit_hash = &unit.unit;
    let author = &unit.authors[0].address;
    // AA response units never create new primary triggers: AA-to-AA
    // payments were already handled as secondary triggers at generation
    let author_is_aa = ledger.is_aa(author);
    let mut aa_outputs: BTreeMap<braid_core::types::Address, BTreeMap<String, u64>> =
        BTreeMap::new();

    for (message_index, message) in unit.messages.iter().enumerate() {
        match &message.payload {
            Some(Payload::Payment(payment)) => {
                for input in &payment.inputs {
                    if let Input::Transfer {
                        unit: src,
                        message_index: src_msg,
                        output_index: src_out,
                    } = input
                    {
                        ledger.mark_output_spent(src, *src_msg, *src_out)?;
                    }
                }
                for (output_index, output) in payment.outputs.iter().enumerate() {
                    if let Some(mut row) =
                        ledger.output(unit_hash, message_index as u32, output_index as u32)?
                    {
                        row.main_chain_index = Some(mci);
                        ledger.put_output(
                            unit_hash,
                            message_index as u32,
                            output_index as u32,
                            &row,
                        )?;
                    }
                    if !author_is_aa && mci >= UPGRADE_MCI_AA && ledger.is_aa(&output.address) {
                        let asset_key = payment
                            .asset
                            .as_ref()
                            .map(|a| a.as_str().to_string())
                            .unwrap_or_else(|| "base".to_string());
                        *aa_outputs
                            .entry(output.address.clone())
                            .or_default()
                            .entry(asset_key)
                            .or_insert(0) += output.amount;
                    }
                }
            }
            Some(Payload::DataFeed(feed)) => {
                for (name, value) in feed {
                    if let Some(encoded) = braid_crypto::datafeed::encode_numeric(value, mci) {
                        let key = braid_crypto::datafeed::numeric_feed_key(name, &encoded, author);
                        ledger.index_data_feed_entry(key, unit_hash)?;
                    }
                    let key = braid_crypto::datafeed::string_feed_key(
                        name,
                        &value.to_string(),
                        author,
                    );
                    ledger.index_data_feed_entry(key, unit_hash)?;
                }
            }
            Some(Payload::Definition(payload)) => {
                if let braid_core::definition::Definition::AutonomousAgent(aa) =
                    &payload.definition
                {
                    ledger.put_aa(&AaRow {
                        address: payload.address.clone(),
                        definition: aa.as_ref().clone(),
                        unit: unit_hash.clone(),
                        main_chain_index: mci,
                        base_aa: aa.base_aa.clone(),
                        storage_size: 0,
                    })?;
                }
            }
            Some(Payload::AddressDefinitionChange(payload)) => {
                let address = payload.address.as_ref().unwrap_or(author);
                ledger.record_definition_change(address, &payload.definition_chash, mci)?;
            }
            Some(Payload::Attestation(payload)) => {
                ledger.index_attestation(author, &payload.address, unit_hash)?;
            }
            Some(Payload::Asset(payload)) => {
                ledger.put_asset(
                    unit_hash,
                    &AssetRow {
                        payload: payload.clone(),
                        definer: author.clone(),
                        main_chain_index: Some(mci),
                    },
                )?;
            }
            _ => {}
        }
    }

    let data = unit.messages.iter().find_map(|m| match &m.payload {
        Some(Payload::Data(v)) => Some(v.clone()),
        _ => None,
    });
    for (aa_address, outputs) in aa_outputs {
        // An AA paying an AA inside this same stabilization batch is a
        // secondary trigger handled by the executor, not queued here.
        triggers.push(TriggerRow {
            unit: unit_hash.clone(),
            aa_address,
            trigger_address: author.clone(),
            outputs,
            data: data.clone(),
            main_chain_index: mci,
        });
    }
    Ok(())
}

/// Final-bad stable unit: uncovered units are removed outright, covered
/// ones are voided — payloads stripped, content hash substituted, skeleton
/// kept so later units' parent references stay resolvable.
fn archive_bad_unit(ledger: &Ledger, joint: &Joint, ball: &Ball) -> Result<(), BraidError> {
    let unit_hash = joint.unit_hash().clone();
    let children = ledger.children_of(&unit_hash)?;
    if children.is_empty() {
        ledger.archive_remove(&unit_hash)?;
        return Ok(());
    }
    let mut voided = joint.clone();
    let messages_value = serde_json::to_value(&voided.unit.messages)
        .map_err(|e| BraidError::Serialization(e.to_string()))?;
    voided.unit.content_hash = Some(sha256_b64(canonical_json(&messages_value)?.as_bytes()));
    voided.unit.messages = Vec::new();
    voided.ball = Some(ball.clone());
    ledger.archive_void(&unit_hash, &voided)?;
    Ok(())
}
