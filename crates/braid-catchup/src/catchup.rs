use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::types::{Ball, Mci, Sequence, UnitHash};
use braid_storage::Ledger;

/// A catchup chain: stable joints hopping backwards through last-ball
/// references, newest first, ending at (or before) something the receiver
/// already knows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatchupChain {
    pub stable_last_ball_joints: Vec<Joint>,
}

/// Serve a catchup chain for a peer whose stability point is at
/// `peer_last_stable_mci`. Hops follow each joint's last_ball_unit, so the
/// chain shrinks logarithmically in practice.
pub fn prepare_catchup_chain(
    ledger: &Ledger,
    peer_last_stable_mci: Mci,
) -> Result<CatchupChain, BraidError> {
    let mut joints = Vec::new();
    let last_stable = ledger.last_stable_mci()?;
    let mut current = ledger
        .mc_unit_at(last_stable)?
        .ok_or_else(|| BraidError::Internal(format!("no MC unit at {last_stable}")))?;
    loop {
        let joint = ledger
            .joint(&current)?
            .ok_or_else(|| BraidError::Internal(format!("no joint for {current}")))?;
        let props = ledger.expect_unit_props(&current)?;
        let next = joint.unit.last_ball_unit.clone();
        joints.push(joint);
        if props.main_chain_index.unwrap_or(0) <= peer_last_stable_mci {
            break;
        }
        match next {
            Some(unit) => current = unit,
            None => break, // reached genesis
        }
    }
    Ok(CatchupChain {
        stable_last_ball_joints: joints,
    })
}

/// Verify and record a received catchup chain.
///
/// Every joint's unit hash is recomputed; adjacent joints must link
/// through (last_ball_unit, last_ball); and for the anchor — the first
/// unit we already know — the claimed ball is recomputed cryptographically
/// from our own parent balls, never trusted from the peer. A forged ball
/// is rejected before anything reaches catchup_chain_balls.
pub fn process_catchup_chain(ledger: &Ledger, chain: &CatchupChain) -> Result<(), BraidError> {
    let joints = &chain.stable_last_ball_joints;
    if joints.is_empty() {
        return Err(BraidError::JointError("empty catchup chain".into()));
    }

    let mut verified: Vec<(UnitHash, Ball)> = Vec::new();
    let mut anchor_found = false;
    for (i, joint) in joints.iter().enumerate() {
        let computed = braid_crypto::unit_hash(&joint.unit)?;
        if &computed != joint.unit_hash() {
            return Err(BraidError::WrongHash {
                expected: computed.to_string(),
                got: joint.unit_hash().to_string(),
            });
        }
        let ball = joint
            .ball
            .clone()
            .ok_or_else(|| BraidError::InvalidJoint("catchup joint without ball".into()))?;
        if i > 0 {
            let previous = &joints[i - 1].unit;
            if previous.last_ball_unit.as_ref() != Some(joint.unit_hash()) {
                return Err(BraidError::InvalidJoint(format!(
                    "chain broken at {}: last_ball_unit does not link",
                    joint.unit_hash()
                )));
            }
            if previous.last_ball.as_ref() != Some(&ball) {
                return Err(BraidError::InvalidJoint(format!(
                    "chain broken at {}: last_ball does not match ball",
                    joint.unit_hash()
                )));
            }
        }
        if ledger.unit_exists(joint.unit_hash()) {
            verify_ball_against_local(ledger, joint.unit_hash(), &ball)?;
            anchor_found = true;
            break;
        }
        verified.push((joint.unit_hash().clone(), ball));
    }
    if !anchor_found {
        return Err(BraidError::NeedHashTree);
    }

    // record oldest → newest, only after the whole chain checked out
    for (seq, (_, ball)) in verified.iter().rev().enumerate() {
        ledger.push_catchup_ball(seq as u64, ball)?;
    }
    info!(balls = verified.len(), "catchup chain accepted");
    Ok(())
}

/// Recompute the ball of a locally known stable unit from our own parent
/// balls and skiplist, and compare with the claim.
fn verify_ball_against_local(
    ledger: &Ledger,
    unit: &UnitHash,
    claimed: &Ball,
) -> Result<(), BraidError> {
    let props = ledger.expect_unit_props(unit)?;
    if !props.is_stable {
        return Err(BraidError::InvalidJoint(format!(
            "catchup anchor {unit} is not stable here"
        )));
    }
    let mut parent_balls = Vec::with_capacity(props.parent_units.len());
    for parent in &props.parent_units {
        parent_balls.push(ledger.ball_of(parent)?.ok_or_else(|| {
            BraidError::Internal(format!("stable parent {parent} has no ball"))
        })?);
    }
    let joint = ledger
        .joint(unit)?
        .ok_or_else(|| BraidError::Internal(format!("no joint for {unit}")))?;
    let mut skiplist_balls = Vec::new();
    if let Some(skiplist_units) = &joint.skiplist_units {
        for sk_unit in skiplist_units {
            skiplist_balls.push(ledger.ball_of(sk_unit)?.ok_or_else(|| {
                BraidError::Internal(format!("skiplist unit {sk_unit} has no ball"))
            })?);
        }
    }
    let recomputed = braid_crypto::ball_hash(
        unit,
        &parent_balls,
        &skiplist_balls,
        props.sequence == Sequence::FinalBad,
    )?;
    if &recomputed != claimed {
        warn!(unit = %unit, claimed = %claimed, recomputed = %recomputed, "forged catchup ball rejected");
        return Err(BraidError::InvalidJoint(format!(
            "ball of {unit} recomputes to {recomputed}, peer claims {claimed}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_rejected() {
        let dir = std::env::temp_dir().join("braid_catchup_empty_test");
        let _ = std::fs::remove_dir_all(&dir);
        let ledger = Ledger::open(&dir).unwrap();
        let chain = CatchupChain {
            stable_last_ball_joints: vec![],
        };
        assert!(process_catchup_chain(&ledger, &chain).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
