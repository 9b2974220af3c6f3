use std::collections::BTreeSet;
use tracing::warn;

use braid_core::constants::{
    HASH_LENGTH, MAX_AA_DEFINITION_LENGTH, MAX_AA_STRING_LENGTH,
};
use braid_core::definition::{Counters, Definition};
use braid_core::error::BraidError;
use braid_core::types::{Amount, Mci, Sequence, UnitHash};
use braid_core::unit::{DataFeedValue, Input, Message, Payload, PaymentPayload, Unit};
use braid_crypto::canonical::serialize_for_version;
use braid_storage::rows::DefinitionRow;
use braid_storage::Ledger;

use crate::authors::StorageResolver;

const ALLOWED_SYSTEM_SUBJECTS: [&str; 5] = [
    "op_list",
    "threshold_size",
    "base_tps_fee",
    "tps_interval",
    "tps_fee_multiplier",
];

pub struct MessagesOutcome {
    pub sequence: Sequence,
    pub new_definitions: Vec<(braid_core::types::Address, DefinitionRow)>,
}

/// Stage-11: per-app payload validation. Payments enforce per-asset balance
/// conservation; AA definitions are bounded before they can ever reach
/// storage; spend-proof sets are compared in sorted order.
pub fn check_messages(
    ledger: &Ledger,
    unit: &Unit,
    last_ball_mci: Mci,
) -> Result<MessagesOutcome, BraidError> {
    let mut sequence = Sequence::Good;
    let mut new_definitions = Vec::new();
    // (asset, unit, msg, out) triples spent anywhere in this unit
    let mut spent_in_unit: BTreeSet<(String, UnitHash, u32, u32)> = BTreeSet::new();
    // one payment message per asset: base conservation counts commissions
    // exactly once
    let mut payment_assets: BTreeSet<String> = BTreeSet::new();

    for (i, message) in unit.messages.iter().enumerate() {
        check_payload_hash(unit, i, message)?;

        if let Some(spend_proofs) = &message.spend_proofs {
            // The stored set comes back ordered by hash value; the unit
            // must present the computed set in the same order for the
            // element-wise comparison to be meaningful.
            for pair in spend_proofs.windows(2) {
                if pair[0].spend_proof >= pair[1].spend_proof {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "spend proofs not sorted by hash".into(),
                    });
                }
            }
            for proof in spend_proofs {
                if proof.spend_proof.len() != HASH_LENGTH {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "bad spend proof length".into(),
                    });
                }
                if let Some(owner) = ledger.spend_proof_owner(&proof.spend_proof)? {
                    let owner_props = ledger.expect_unit_props(&owner)?;
                    if owner_props.is_stable && owner_props.sequence == Sequence::Good {
                        return Err(BraidError::Message {
                            message_index: i,
                            reason: format!("spend proof already used by stable unit {owner}"),
                        });
                    }
                    warn!(unit = %unit.unit, other = %owner, "conflicting spend proof, unit is temp-bad");
                    sequence = Sequence::TempBad;
                }
            }
        }

        match &message.payload {
            Some(Payload::Payment(payment)) => {
                let asset_tag = payment
                    .asset
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "base".to_string());
                if !payment_assets.insert(asset_tag) {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "more than one payment message in the same asset".into(),
                    });
                }
                let payment_sequence =
                    check_payment(ledger, unit, i, payment, &mut spent_in_unit)?;
                if payment_sequence == Sequence::TempBad {
                    sequence = Sequence::TempBad;
                }
            }
            Some(Payload::DataFeed(feed)) => check_data_feed(i, feed)?,
            Some(Payload::Definition(payload)) => {
                let computed = braid_crypto::address_from_definition(&payload.definition)?;
                if computed != payload.address {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!(
                            "definition hashes to {computed}, payload claims {}",
                            payload.address
                        ),
                    });
                }
                let resolver = StorageResolver {
                    ledger,
                    last_ball_mci,
                };
                let mut counters = Counters::default();
                payload.definition.validate(&resolver, &mut counters, 0)?;
                if let Definition::AutonomousAgent(aa) = &payload.definition {
                    let serialized = serde_json::to_string(aa.as_ref())
                        .map_err(|e| BraidError::Serialization(e.to_string()))?;
                    // checked here so the storage column is never the
                    // failure point
                    if serialized.len() > MAX_AA_DEFINITION_LENGTH {
                        return Err(BraidError::Message {
                            message_index: i,
                            reason: format!(
                                "agent definition of {} bytes exceeds cap",
                                serialized.len()
                            ),
                        });
                    }
                    if let Some(base_aa) = &aa.base_aa {
                        if !ledger.is_aa(base_aa) {
                            return Err(BraidError::Message {
                                message_index: i,
                                reason: format!("base agent {base_aa} not found"),
                            });
                        }
                    }
                }
                new_definitions.push((
                    payload.address.clone(),
                    DefinitionRow {
                        definition: payload.definition.clone(),
                        unit: unit.unit.clone(),
                    },
                ));
            }
            Some(Payload::AddressDefinitionChange(payload)) => {
                if let Some(address) = &payload.address {
                    if !unit.authors.iter().any(|a| &a.address == address) {
                        return Err(BraidError::Message {
                            message_index: i,
                            reason: format!("{address} is not an author of this unit"),
                        });
                    }
                } else if unit.authors.len() > 1 {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "multi-author definition change must name the address".into(),
                    });
                }
                if !braid_crypto::is_chash_valid(&payload.definition_chash) {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "definition_chash fails checksum".into(),
                    });
                }
            }
            Some(Payload::Asset(payload)) => {
                if payload.fixed_denominations {
                    let denominations = payload.denominations.as_deref().unwrap_or(&[]);
                    if denominations.is_empty() {
                        return Err(BraidError::Message {
                            message_index: i,
                            reason: "fixed denominations asset needs denominations".into(),
                        });
                    }
                    for pair in denominations.windows(2) {
                        if pair[0] >= pair[1] {
                            return Err(BraidError::Message {
                                message_index: i,
                                reason: "denominations not sorted or duplicated".into(),
                            });
                        }
                    }
                }
                if payload.cap == Some(0) {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "asset cap must be positive".into(),
                    });
                }
            }
            Some(Payload::AssetAttestors(payload)) => {
                if payload.attestors.is_empty() {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "attestor list is empty".into(),
                    });
                }
                if ledger.asset(&payload.asset)?.is_none() {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!("unknown asset {}", payload.asset),
                    });
                }
            }
            Some(Payload::Attestation(payload)) => {
                if !payload.profile.is_object() {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "attestation profile must be an object".into(),
                    });
                }
            }
            Some(Payload::Poll(payload)) => {
                if payload.question.is_empty() || payload.question.len() > MAX_AA_STRING_LENGTH {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "bad poll question".into(),
                    });
                }
                let unique: BTreeSet<&String> = payload.choices.iter().collect();
                if payload.choices.is_empty() || unique.len() != payload.choices.len() {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "poll choices empty or duplicated".into(),
                    });
                }
            }
            Some(Payload::Vote(payload)) => {
                let Some(poll_joint) = ledger.joint(&payload.unit)? else {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!("poll unit {} not found", payload.unit),
                    });
                };
                let choices = poll_joint.unit.messages.iter().find_map(|m| match &m.payload {
                    Some(Payload::Poll(p)) => Some(&p.choices),
                    _ => None,
                });
                match choices {
                    Some(choices) if choices.contains(&payload.choice) => {}
                    Some(_) => {
                        return Err(BraidError::Message {
                            message_index: i,
                            reason: format!("choice {} not offered by the poll", payload.choice),
                        })
                    }
                    None => {
                        return Err(BraidError::Message {
                            message_index: i,
                            reason: format!("unit {} is not a poll", payload.unit),
                        })
                    }
                }
            }
            Some(Payload::State(_)) => {
                // State messages exist only inside AA response units, which
                // are generated locally at stabilization, never ingested.
                return Err(BraidError::Message {
                    message_index: i,
                    reason: "state messages are not allowed in network units".into(),
                });
            }
            Some(Payload::SystemVote(payload)) => {
                if !ALLOWED_SYSTEM_SUBJECTS.contains(&payload.subject.as_str()) {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!("unknown system vote subject {}", payload.subject),
                    });
                }
            }
            Some(Payload::SystemVoteCount(subject)) => {
                if !ALLOWED_SYSTEM_SUBJECTS.contains(&subject.as_str()) {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!("unknown system vote subject {subject}"),
                    });
                }
            }
            Some(Payload::Data(_))
            | Some(Payload::Text(_))
            | Some(Payload::Profile(_))
            | Some(Payload::DefinitionTemplate(_)) => {}
            None => {} // uri / none payloads carry only the hash
        }
    }

    // every unit funds its own commissions through a base payment
    if !payment_assets.contains("base") {
        return Err(BraidError::UnitError(
            "unit has no base payment to cover its commissions".into(),
        ));
    }

    Ok(MessagesOutcome {
        sequence,
        new_definitions,
    })
}

fn check_payload_hash(unit: &Unit, i: usize, message: &Message) -> Result<(), BraidError> {
    let Some(payload) = &message.payload else {
        return Ok(());
    };
    let value = payload.to_value()?;
    let serialized = serialize_for_version(&value, &unit.version)?;
    let computed = braid_crypto::sha256_b64(serialized.as_bytes());
    if computed != message.payload_hash {
        return Err(BraidError::Message {
            message_index: i,
            reason: format!(
                "payload hash mismatch: computed {computed}, declared {}",
                message.payload_hash
            ),
        });
    }
    Ok(())
}

fn check_data_feed(
    i: usize,
    feed: &std::collections::BTreeMap<String, DataFeedValue>,
) -> Result<(), BraidError> {
    if feed.is_empty() {
        return Err(BraidError::Message {
            message_index: i,
            reason: "empty data feed".into(),
        });
    }
    for (name, value) in feed {
        if name.is_empty() || name.len() > 64 || name.chars().any(|c| c.is_control()) {
            return Err(BraidError::Message {
                message_index: i,
                reason: format!("bad feed name {name:?}"),
            });
        }
        if let DataFeedValue::Text(text) = value {
            if text.is_empty() || text.len() > MAX_AA_STRING_LENGTH {
                return Err(BraidError::Message {
                    message_index: i,
                    reason: format!("bad feed value for {name}"),
                });
            }
        }
    }
    Ok(())
}

/// Payment validation: inputs resolve against the snapshot, ownership holds,
/// nothing is spent twice within the unit, and the per-asset balance
/// equation closes exactly.
fn check_payment(
    ledger: &Ledger,
    unit: &Unit,
    i: usize,
    payment: &PaymentPayload,
    spent_in_unit: &mut BTreeSet<(String, UnitHash, u32, u32)>,
) -> Result<Sequence, BraidError> {
    let mut sequence = Sequence::Good;
    if payment.inputs.is_empty() || payment.outputs.is_empty() {
        return Err(BraidError::Message {
            message_index: i,
            reason: "payment needs inputs and outputs".into(),
        });
    }
    if let Some(asset) = &payment.asset {
        if ledger.asset(asset)?.is_none() {
            return Err(BraidError::Message {
                message_index: i,
                reason: format!("unknown asset {asset}"),
            });
        }
    }
    for output in &payment.outputs {
        if output.amount == 0 {
            return Err(BraidError::Message {
                message_index: i,
                reason: "zero output amount".into(),
            });
        }
    }
    let asset_tag = payment
        .asset
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "base".to_string());

    let mut total_in: Amount = 0;
    for input in &payment.inputs {
        match input {
            Input::Transfer {
                unit: src,
                message_index,
                output_index,
            } => {
                let key = (asset_tag.clone(), src.clone(), *message_index, *output_index);
                if !spent_in_unit.insert(key) {
                    return Err(BraidError::DoubleSpendWithinUnit {
                        unit: src.to_string(),
                        message_index: *message_index,
                        output_index: *output_index,
                    });
                }
                let row = ledger
                    .output(src, *message_index, *output_index)?
                    .ok_or_else(|| BraidError::Message {
                        message_index: i,
                        reason: format!("input {src}:{message_index}:{output_index} not found"),
                    })?;
                if row.asset != payment.asset {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "input asset differs from payment asset".into(),
                    });
                }
                if !unit.authors.iter().any(|a| a.address == row.address) {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!("output belongs to {}, not an author", row.address),
                    });
                }
                let src_props = ledger.expect_unit_props(src)?;
                if src_props.sequence == Sequence::FinalBad {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!("input unit {src} is final-bad"),
                    });
                }
                for claimant in
                    ledger.spend_claimants(&payment.asset, src, *message_index, *output_index)?
                {
                    if claimant == unit.unit {
                        continue;
                    }
                    let claimant_props = ledger.expect_unit_props(&claimant)?;
                    if claimant_props.is_stable && claimant_props.sequence == Sequence::Good {
                        return Err(BraidError::Message {
                            message_index: i,
                            reason: format!(
                                "output {src}:{message_index}:{output_index} already spent by stable {claimant}"
                            ),
                        });
                    }
                    warn!(unit = %unit.unit, rival = %claimant, "double spend detected, unit is temp-bad");
                    sequence = Sequence::TempBad;
                }
                total_in += row.amount;
            }
            Input::Issue { .. } => {
                // the genesis unit is seeded locally and never re-validated
                return Err(BraidError::Message {
                    message_index: i,
                    reason: "issue inputs are only valid in genesis".into(),
                });
            }
            Input::HeadersCommission {
                from_main_chain_index,
                to_main_chain_index,
            }
            | Input::Witnessing {
                from_main_chain_index,
                to_main_chain_index,
            } => {
                if payment.asset.is_some() {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "commission inputs are base-asset only".into(),
                    });
                }
                if from_main_chain_index > to_main_chain_index {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "commission range is inverted".into(),
                    });
                }
                let max_spendable = ledger.max_spendable_mci()?.unwrap_or(0);
                if *to_main_chain_index > max_spendable {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: format!(
                            "commission range ends at {to_main_chain_index}, spendable up to {max_spendable}"
                        ),
                    });
                }
                let witnessing = matches!(input, Input::Witnessing { .. });
                total_in += ledger.commission_range_total(
                    witnessing,
                    &unit.authors[0].address,
                    *from_main_chain_index,
                    *to_main_chain_index,
                )?;
            }
        }
    }

    let total_out = payment.total_output();
    let expected = if payment.asset.is_none() {
        total_out + unit.total_commission()
    } else {
        total_out
    };
    if total_in != expected {
        return Err(BraidError::BalanceViolation {
            message_index: i,
            inputs: total_in,
            outputs: expected,
        });
    }
    Ok(sequence)
}
