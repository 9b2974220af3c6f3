use tracing::{debug, info, warn};

use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::types::UnitHash;
use braid_storage::rows::UnhandledJoint;
use braid_storage::Ledger;
use braid_validation::ValidationState;

use crate::locks;
use crate::writer::{self, SaveOutcome};

/// The complete ingest pipeline for one incoming joint: dedupe, dependency
/// parking, validation under author-address locks, serialized save, then
/// release of any parked joints this unit unblocked.
///
/// Holds the global ingest lock for the whole operation. Author locks are
/// released before the writer runs — the joint is handed to the writer's
/// serial section instead of being saved under the validation locks.
pub async fn handle_joint(
    ledger: &Ledger,
    joint: Joint,
    peer: Option<String>,
) -> Result<SaveOutcome, BraidError> {
    let _ingest_guard = locks::lock_handle_joint().await;
    let unit_hash = joint.unit_hash().clone();

    if ledger.unit_exists(&unit_hash) {
        return Err(BraidError::KnownUnit(unit_hash.to_string()));
    }
    if ledger.is_archived(&unit_hash) {
        // any archival reason suppresses re-acceptance
        return Err(BraidError::Archived(unit_hash.to_string()));
    }
    if ledger.unhandled_joint(&unit_hash)?.is_some() {
        return Err(BraidError::KnownUnit(format!("{unit_hash} (parked)")));
    }

    let now = chrono::Utc::now().timestamp();
    let state = validate_with_parking(ledger, &joint, peer, now).await?;
    let outcome = writer::save_joint(ledger, &joint, &state).await?;
    release_dependents(ledger, &unit_hash).await?;
    Ok(outcome)
}

/// Validate under the author-address locks. Missing parents park the joint
/// in unhandled_joints with its dependency list and surface as
/// UnresolvedDependencies.
async fn validate_with_parking(
    ledger: &Ledger,
    joint: &Joint,
    peer: Option<String>,
    now: i64,
) -> Result<ValidationState, BraidError> {
    let addresses = joint.unit.author_addresses();
    let _address_guards = locks::lock_addresses(&addresses).await;
    match braid_validation::validate_joint(ledger, joint, now) {
        Ok(state) => Ok(state),
        Err(BraidError::UnresolvedDependencies(missing)) => {
            let missing_units: Result<Vec<UnitHash>, BraidError> =
                missing.iter().map(|u| UnitHash::new(u.clone())).collect();
            ledger.park_joint(&UnhandledJoint {
                joint: joint.clone(),
                peer,
                received_at: now,
                missing_units: missing_units?,
            })?;
            info!(unit = %joint.unit_hash(), deps = missing.len(), "joint parked on missing parents");
            Err(BraidError::UnresolvedDependencies(missing))
        }
        Err(e) => Err(e),
    }
}

/// After a save, walk the dependency index and re-run any parked joints
/// whose parents are now all known. Iterative: a released joint may in
/// turn release more.
async fn release_dependents(ledger: &Ledger, saved: &UnitHash) -> Result<(), BraidError> {
    let mut queue = vec![saved.clone()];
    while let Some(done) = queue.pop() {
        for parked in ledger.joints_waiting_on(&done)? {
            let waiting_hash = parked.joint.unit_hash().clone();
            let mut still_missing = false;
            for dep in &parked.missing_units {
                if !ledger.unit_exists(dep) {
                    still_missing = true;
                    break;
                }
            }
            if still_missing {
                continue;
            }
            ledger.remove_unhandled(&waiting_hash)?;
            let now = chrono::Utc::now().timestamp();
            let validated =
                validate_with_parking(ledger, &parked.joint, parked.peer.clone(), now).await;
            match validated {
                Ok(state) => {
                    writer::save_joint(ledger, &parked.joint, &state).await?;
                    debug!(unit = %waiting_hash, "parked joint released");
                    queue.push(waiting_hash);
                }
                Err(BraidError::UnresolvedDependencies(_)) => {
                    // re-parked with a fresh dependency list
                }
                Err(e) => {
                    // the parked joint turned out bad; drop it and move on
                    warn!(unit = %waiting_hash, error = %e, "parked joint rejected on release");
                }
            }
        }
    }
    Ok(())
}
