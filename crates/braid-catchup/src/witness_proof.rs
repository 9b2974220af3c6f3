use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use braid_core::constants::MAJORITY_OF_WITNESSES;
use braid_core::definition::Definition;
use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::types::{Address, Ball, UnitHash};
use braid_core::unit::Payload;
use braid_storage::Ledger;

/// Proof that a majority of witnesses stands behind the current tip:
/// unstable MC joints authored by witnesses, plus the joints carrying each
/// witness's latest stable definition state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WitnessProof {
    pub unstable_mc_joints: Vec<Joint>,
    pub witness_change_and_definition_joints: Vec<Joint>,
}

/// What a light client learns from a verified witness proof.
pub struct VerifiedWitnessProof {
    pub last_ball_unit: UnitHash,
    pub last_ball: Ball,
    pub definitions: BTreeMap<Address, Definition>,
}

/// Assemble a witness proof for the given witness list.
pub fn prepare_witness_proof(
    ledger: &Ledger,
    witnesses: &[Address],
) -> Result<WitnessProof, BraidError> {
    // ── Unstable MC joints, tip downwards ────────────────────────────────────
    let mut unstable_mc_joints = Vec::new();
    let mut found_witnesses: BTreeSet<Address> = BTreeSet::new();
    let last_stable = ledger.last_stable_mci()?;
    let Some((top_mci, _)) = ledger.mc_top()? else {
        return Err(BraidError::Internal("no main chain yet".into()));
    };
    let mut mci = top_mci;
    while mci > last_stable {
        if let Some(unit) = ledger.mc_unit_at(mci)? {
            let joint = ledger
                .joint(&unit)?
                .ok_or_else(|| BraidError::Internal(format!("no joint for {unit}")))?;
            for author in &joint.unit.authors {
                if witnesses.contains(&author.address) {
                    found_witnesses.insert(author.address.clone());
                }
            }
            unstable_mc_joints.push(joint);
        }
        mci -= 1;
    }
    if found_witnesses.len() < MAJORITY_OF_WITNESSES {
        return Err(BraidError::Transient(format!(
            "only {} witnesses on the unstable MC, majority is {MAJORITY_OF_WITNESSES}",
            found_witnesses.len()
        )));
    }

    // ── Latest stable definition state per witness ───────────────────────────
    // Ordered by (level, main_chain_index, unit): two changes at the same
    // level are disambiguated by MCI, so every client caches the same
    // definition.
    let mut definition_joints: Vec<(u64, u64, UnitHash, Joint)> = Vec::new();
    let mut seen_units: BTreeSet<UnitHash> = BTreeSet::new();
    for witness in witnesses {
        for joint in stable_definition_joints_of(ledger, witness)? {
            let unit_hash = joint.unit_hash().clone();
            if !seen_units.insert(unit_hash.clone()) {
                continue;
            }
            let props = ledger.expect_unit_props(&unit_hash)?;
            definition_joints.push((
                props.level,
                props.main_chain_index.unwrap_or(0),
                unit_hash,
                joint,
            ));
        }
    }
    definition_joints.sort_by(|a, b| (a.0, a.1, &a.2).cmp(&(b.0, b.1, &b.2)));

    Ok(WitnessProof {
        unstable_mc_joints,
        witness_change_and_definition_joints: definition_joints
            .into_iter()
            .map(|(_, _, _, joint)| joint)
            .collect(),
    })
}

fn stable_definition_joints_of(
    ledger: &Ledger,
    witness: &Address,
) -> Result<Vec<Joint>, BraidError> {
    // a witness's definition state changes via definition or
    // address_definition_change messages in its stable units
    let mut result = Vec::new();
    let last_stable = ledger.last_stable_mci()?;
    let chash = ledger.definition_chash_at(witness, last_stable)?;
    if let Some(row) = ledger.definition(&chash)? {
        if let Some(joint) = ledger.joint(&row.unit)? {
            result.push(joint);
        }
    }
    Ok(result)
}

/// Verify a witness proof without DAG state: hashes recompute, a majority
/// of distinct witnesses authored the unstable MC, and the definitions on
/// offer hash to their claimed addresses.
pub fn process_witness_proof(
    proof: &WitnessProof,
    witnesses: &[Address],
) -> Result<VerifiedWitnessProof, BraidError> {
    if proof.unstable_mc_joints.is_empty() {
        return Err(BraidError::JointError("empty witness proof".into()));
    }
    let mut found_witnesses: BTreeSet<Address> = BTreeSet::new();
    let mut last_ball: Option<(UnitHash, Ball)> = None;
    for (i, joint) in proof.unstable_mc_joints.iter().enumerate() {
        if joint.ball.is_some() {
            return Err(BraidError::JointError(
                "unstable MC joint must not carry a ball".into(),
            ));
        }
        let computed = braid_crypto::unit_hash(&joint.unit)?;
        if &computed != joint.unit_hash() {
            return Err(BraidError::WrongHash {
                expected: computed.to_string(),
                got: joint.unit_hash().to_string(),
            });
        }
        for author in &joint.unit.authors {
            if witnesses.contains(&author.address) {
                found_witnesses.insert(author.address.clone());
            }
        }
        if i == 0 {
            if let (Some(lb_unit), Some(lb)) =
                (&joint.unit.last_ball_unit, &joint.unit.last_ball)
            {
                last_ball = Some((lb_unit.clone(), lb.clone()));
            }
        }
    }
    if found_witnesses.len() < MAJORITY_OF_WITNESSES {
        return Err(BraidError::JointError(format!(
            "witness proof carries {} witnesses, majority is {MAJORITY_OF_WITNESSES}",
            found_witnesses.len()
        )));
    }
    let (last_ball_unit, last_ball) = last_ball
        .ok_or_else(|| BraidError::JointError("tip joint has no last ball".into()))?;

    let mut definitions: BTreeMap<Address, Definition> = BTreeMap::new();
    for joint in &proof.witness_change_and_definition_joints {
        let computed = braid_crypto::unit_hash(&joint.unit)?;
        if &computed != joint.unit_hash() {
            return Err(BraidError::WrongHash {
                expected: computed.to_string(),
                got: joint.unit_hash().to_string(),
            });
        }
        for message in &joint.unit.messages {
            if let Some(Payload::Definition(payload)) = &message.payload {
                let chash = braid_crypto::address_from_definition(&payload.definition)?;
                if chash != payload.address {
                    return Err(BraidError::JointError(format!(
                        "definition hashes to {chash}, joint claims {}",
                        payload.address
                    )));
                }
                definitions.insert(payload.address.clone(), payload.definition.clone());
            }
        }
        for author in &joint.unit.authors {
            if let Some(definition) = &author.definition {
                let chash = braid_crypto::address_from_definition(definition)?;
                definitions.insert(chash, definition.clone());
            }
        }
    }

    Ok(VerifiedWitnessProof {
        last_ball_unit,
        last_ball,
        definitions,
    })
}
