use serde::{Deserialize, Serialize};
use tracing::info;

use braid_core::error::BraidError;
use braid_core::types::{Ball, Sequence, UnitHash};
use braid_storage::Ledger;

/// One entry of a hash tree: everything needed to recompute the ball.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BallProof {
    pub unit: UnitHash,
    pub ball: Ball,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_balls: Vec<Ball>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skiplist_balls: Vec<Ball>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_nonserial: bool,
}

/// Serve the hash tree between two balls on the main chain (exclusive of
/// `from_ball`, inclusive of `to_ball`).
pub fn read_hash_tree(
    ledger: &Ledger,
    from_ball: &Ball,
    to_ball: &Ball,
) -> Result<Vec<BallProof>, BraidError> {
    let from_unit = ledger
        .unit_of_ball(from_ball)?
        .ok_or_else(|| BraidError::JointError(format!("unknown from_ball {from_ball}")))?;
    let to_unit = ledger
        .unit_of_ball(to_ball)?
        .ok_or_else(|| BraidError::JointError(format!("unknown to_ball {to_ball}")))?;
    let from_mci = ledger
        .expect_unit_props(&from_unit)?
        .main_chain_index
        .ok_or_else(|| BraidError::JointError("from_ball is not stable".into()))?;
    let to_mci = ledger
        .expect_unit_props(&to_unit)?
        .main_chain_index
        .ok_or_else(|| BraidError::JointError("to_ball is not stable".into()))?;
    if from_mci >= to_mci {
        return Err(BraidError::JointError("inverted hash tree range".into()));
    }

    let mut proofs = Vec::new();
    for mci in (from_mci + 1)..=to_mci {
        let mut units = ledger.units_at_mci(mci)?;
        units.sort_by_key(|p| (p.level, p.unit.clone()));
        for props in units {
            let ball = ledger
                .ball_of(&props.unit)?
                .ok_or_else(|| BraidError::Internal(format!("no ball for stable {}", props.unit)))?;
            let mut parent_balls = Vec::with_capacity(props.parent_units.len());
            for parent in &props.parent_units {
                parent_balls.push(ledger.ball_of(parent)?.ok_or_else(|| {
                    BraidError::Internal(format!("no ball for parent {parent}"))
                })?);
            }
            let joint = ledger
                .joint(&props.unit)?
                .ok_or_else(|| BraidError::Internal(format!("no joint for {}", props.unit)))?;
            let mut skiplist_balls = Vec::new();
            if let Some(skiplist_units) = &joint.skiplist_units {
                for sk in skiplist_units {
                    skiplist_balls.push(ledger.ball_of(sk)?.ok_or_else(|| {
                        BraidError::Internal(format!("no ball for skiplist unit {sk}"))
                    })?);
                }
            }
            proofs.push(BallProof {
                unit: props.unit.clone(),
                ball,
                parent_balls,
                skiplist_balls,
                is_nonserial: props.sequence == Sequence::FinalBad,
            });
        }
    }
    Ok(proofs)
}

/// Verify a received hash tree: every ball must recompute from its parent
/// balls, and every parent ball must be known — from our stable set or
/// from earlier entries of this same tree. Verified balls land in
/// hash_tree_balls, ready to admit the corresponding units.
pub fn process_hash_tree(ledger: &Ledger, proofs: &[BallProof]) -> Result<(), BraidError> {
    for proof in proofs {
        let recomputed = braid_crypto::ball_hash(
            &proof.unit,
            &proof.parent_balls,
            &proof.skiplist_balls,
            proof.is_nonserial,
        )?;
        if recomputed != proof.ball {
            return Err(BraidError::InvalidJoint(format!(
                "hash tree ball for {} recomputes to {recomputed}, peer sent {}",
                proof.unit, proof.ball
            )));
        }
        for parent_ball in &proof.parent_balls {
            let known_stable = ledger.unit_of_ball(parent_ball)?.is_some();
            let known_in_tree = ledger.hash_tree_unit(parent_ball)?.is_some();
            if !known_stable && !known_in_tree {
                return Err(BraidError::InvalidJoint(format!(
                    "hash tree references unknown parent ball {parent_ball}"
                )));
            }
        }
        ledger.put_hash_tree_ball(&proof.ball, &proof.unit)?;
    }
    // consume the catchup chain as its balls are reached
    while let Some(front) = ledger.catchup_balls()?.first().cloned() {
        if ledger.hash_tree_unit(&front)?.is_some() || ledger.unit_of_ball(&front)?.is_some() {
            ledger.pop_front_catchup_ball()?;
        } else {
            break;
        }
    }
    info!(proofs = proofs.len(), "hash tree accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_ball_rejected() {
        let dir = std::env::temp_dir().join("braid_hash_tree_test");
        let _ = std::fs::remove_dir_all(&dir);
        let ledger = Ledger::open(&dir).unwrap();
        let unit = UnitHash::new("U".repeat(44)).unwrap();
        let proof = BallProof {
            unit,
            ball: Ball::new("F".repeat(44)).unwrap(),
            parent_balls: vec![],
            skiplist_balls: vec![],
            is_nonserial: false,
        };
        let err = process_hash_tree(&ledger, &[proof]).unwrap_err();
        assert!(matches!(err, BraidError::InvalidJoint(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
