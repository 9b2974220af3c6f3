//! braid-genesis
//!
//! Builds the genesis state from scratch, writing directly into a
//! [`Ledger`] without going through the normal ingest pipeline (the
//! genesis unit has no parents, no last ball and no signatures — it is the
//! founding document).
//!
//! Genesis is the one and only place where base units are created: a
//! single issue input of TOTAL_SUPPLY, paid to the issuance address minus
//! the genesis unit's own commissions. After `apply_genesis`, no further
//! issuance is possible.

pub mod params;

pub use params::GenesisParams;

use tracing::info;

use braid_core::constants::{ALT, COUNT_WITNESSES, TOTAL_SUPPLY, VERSION};
use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::props::UnitProps;
use braid_core::types::{Sequence, UnitHash};
use braid_core::unit::{
    App, Author, Input, Message, Output, Payload, PaymentPayload, PayloadLocation, Unit,
};
use braid_crypto::canonical::serialize_for_version;
use braid_storage::rows::{DefinitionRow, OutputRow};
use braid_storage::Ledger;
use std::collections::BTreeMap;

/// Apply the genesis state to an empty ledger. Returns the genesis unit
/// hash.
///
/// Errors if the ledger already has a genesis — genesis may only be
/// applied once.
pub fn apply_genesis(ledger: &Ledger, params: &GenesisParams) -> Result<UnitHash, BraidError> {
    if ledger.genesis_unit()?.is_some() {
        return Err(BraidError::Internal("genesis already applied".into()));
    }
    if params.witnesses.len() != COUNT_WITNESSES {
        return Err(BraidError::WitnessList(format!(
            "genesis needs {COUNT_WITNESSES} witnesses, got {}",
            params.witnesses.len()
        )));
    }
    info!("applying braid genesis state");

    let unit = build_genesis_unit(params)?;
    let unit_hash = unit.unit.clone();
    let ball = braid_crypto::ball_hash(&unit_hash, &[], &[], false)?;

    let mut joint = Joint::new(unit.clone());
    joint.ball = Some(ball.clone());

    // ── Rows, written directly: the founding document skips validation ──────
    let props = UnitProps {
        unit: unit_hash.clone(),
        level: 0,
        witnessed_level: 0,
        best_parent_unit: None,
        parent_units: vec![],
        witness_list_unit: None,
        last_ball_unit: None,
        is_on_main_chain: true,
        main_chain_index: Some(0),
        latest_included_mc_index: None,
        is_free: true,
        is_stable: true,
        sequence: Sequence::Good,
        author_addresses: unit.author_addresses(),
        timestamp: unit.timestamp,
        headers_commission: unit.headers_commission,
        payload_commission: unit.payload_commission,
    };
    ledger.save_unit_props(&props)?;
    ledger.caches_write()?.mark_stable(&props, 0);
    ledger.put_joint(&joint)?;
    ledger.put_ball(&unit_hash, &ball)?;
    ledger.set_mc_unit(0, &unit_hash)?;
    ledger.put_witness_list(&unit_hash, &params.witnesses)?;
    ledger.index_author_unit(&unit.authors[0].address, &unit_hash)?;
    ledger.store_definition(
        &unit.authors[0].address,
        &DefinitionRow {
            definition: params.issuance_definition.clone(),
            unit: unit_hash.clone(),
        },
    )?;
    for (message_index, message) in unit.messages.iter().enumerate() {
        let Some(Payload::Payment(payment)) = &message.payload else {
            continue;
        };
        for (output_index, output) in payment.outputs.iter().enumerate() {
            ledger.put_output(
                &unit_hash,
                message_index as u32,
                output_index as u32,
                &OutputRow {
                    address: output.address.clone(),
                    asset: None,
                    amount: output.amount,
                    is_spent: false,
                    main_chain_index: Some(0),
                },
            )?;
        }
    }
    ledger.set_last_stable_mci(0)?;
    ledger.set_genesis_unit(&unit_hash)?;

    verify_genesis_supply(&unit)?;
    ledger.flush()?;
    info!(unit = %unit_hash, "genesis state committed to disk");
    Ok(unit_hash)
}

/// Construct the genesis unit. Commissions depend on the serialized size,
/// which depends on the output amount's digit count, so the fee fields are
/// fixed by iterating to a fixed point.
fn build_genesis_unit(params: &GenesisParams) -> Result<Unit, BraidError> {
    let issuance_address = braid_crypto::address_from_definition(&params.issuance_definition)?;
    let mut unit = Unit {
        unit: UnitHash::new("A".repeat(44))?, // placeholder until hashed
        version: VERSION.into(),
        alt: ALT.into(),
        parent_units: vec![],
        last_ball: None,
        last_ball_unit: None,
        witness_list_unit: None,
        witnesses: Some(params.witnesses.clone()),
        authors: vec![Author {
            address: issuance_address.clone(),
            definition: Some(params.issuance_definition.clone()),
            authentifiers: BTreeMap::new(),
        }],
        messages: vec![],
        timestamp: params.timestamp,
        headers_commission: 0,
        payload_commission: 0,
        tps_fee: None,
        burn_fee: None,
        oversize_fee: None,
        max_aa_responses: None,
        earned_headers_commission_recipients: None,
        content_hash: None,
    };

    let endowments: u64 = params.witness_endowment * params.witnesses.len() as u64;
    let mut remainder = TOTAL_SUPPLY - endowments;
    for _ in 0..4 {
        unit.messages = vec![issue_message(&issuance_address, remainder, params)?];
        let headers = braid_fees::headers_size(&unit)?;
        let payload = braid_fees::payload_size(&unit)?;
        let next_remainder = TOTAL_SUPPLY - endowments - headers - payload;
        unit.headers_commission = headers;
        unit.payload_commission = payload;
        if next_remainder == remainder {
            break;
        }
        remainder = next_remainder;
    }
    unit.messages = vec![issue_message(&issuance_address, remainder, params)?];
    unit.unit = braid_crypto::unit_hash(&unit)?;
    Ok(unit)
}

fn issue_message(
    address: &braid_core::types::Address,
    remainder: u64,
    params: &GenesisParams,
) -> Result<Message, BraidError> {
    let mut outputs: Vec<Output> = params
        .witnesses
        .iter()
        .map(|witness| Output {
            address: witness.clone(),
            amount: params.witness_endowment,
        })
        .collect();
    outputs.push(Output {
        address: address.clone(),
        amount: remainder,
    });
    outputs.sort_by(|a, b| a.address.cmp(&b.address).then(a.amount.cmp(&b.amount)));
    let payment = PaymentPayload {
        asset: None,
        inputs: vec![Input::Issue {
            amount: TOTAL_SUPPLY,
            serial_number: 1,
        }],
        outputs,
    };
    let payload = Payload::Payment(payment);
    let serialized = serialize_for_version(&payload.to_value()?, VERSION)?;
    Ok(Message {
        app: App::Payment,
        payload_location: PayloadLocation::Inline,
        payload_hash: braid_crypto::sha256_b64(serialized.as_bytes()),
        payload: Some(payload),
        spend_proofs: None,
    })
}

/// Issued amount plus the genesis unit's own commissions must equal
/// TOTAL_SUPPLY exactly.
fn verify_genesis_supply(unit: &Unit) -> Result<(), BraidError> {
    let outputs: u64 = unit
        .messages
        .iter()
        .filter_map(|m| m.payment())
        .map(|p| p.total_output())
        .sum();
    let total = outputs + unit.headers_commission + unit.payload_commission;
    if total != TOTAL_SUPPLY {
        return Err(BraidError::Internal(format!(
            "genesis supply mismatch: expected {TOTAL_SUPPLY}, got {total}"
        )));
    }
    info!(total, "genesis supply verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::definition::{Definition, SigArg};
    use braid_crypto::KeyPair;

    fn test_params() -> GenesisParams {
        let witnesses: Vec<_> = (0..COUNT_WITNESSES)
            .map(|i| {
                let kp = KeyPair::from_seed([i as u8 + 1; 32]);
                let def = Definition::Sig(SigArg {
                    pubkey: kp.public_key.as_str().to_string(),
                });
                braid_crypto::address_from_definition(&def).unwrap()
            })
            .collect();
        let issuance = KeyPair::from_seed([99; 32]);
        GenesisParams {
            witnesses: {
                let mut w = witnesses;
                w.sort();
                w
            },
            issuance_definition: Definition::Sig(SigArg {
                pubkey: issuance.public_key.as_str().to_string(),
            }),
            witness_endowment: 1_000_000_000,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn genesis_supply_is_exact() {
        let dir = std::env::temp_dir().join("braid_genesis_test");
        let _ = std::fs::remove_dir_all(&dir);
        let ledger = Ledger::open(&dir).unwrap();
        let params = test_params();

        let unit_hash = apply_genesis(&ledger, &params).expect("genesis must succeed");
        let joint = ledger.joint(&unit_hash).unwrap().unwrap();
        let outputs: u64 = joint
            .unit
            .messages
            .iter()
            .filter_map(|m| m.payment())
            .map(|p| p.total_output())
            .sum();
        assert_eq!(
            outputs + joint.unit.headers_commission + joint.unit.payload_commission,
            TOTAL_SUPPLY
        );
        // genesis is stable with a ball from birth
        let props = ledger.unit_props(&unit_hash).unwrap().unwrap();
        assert!(props.is_stable);
        assert_eq!(props.main_chain_index, Some(0));
        assert!(ledger.ball_of(&unit_hash).unwrap().is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn genesis_cannot_be_applied_twice() {
        let dir = std::env::temp_dir().join("braid_genesis_twice_test");
        let _ = std::fs::remove_dir_all(&dir);
        let ledger = Ledger::open(&dir).unwrap();
        let params = test_params();
        apply_genesis(&ledger, &params).unwrap();
        assert!(apply_genesis(&ledger, &params).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
