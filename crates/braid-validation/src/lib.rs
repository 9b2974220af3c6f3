pub mod authors;
pub mod messages;
pub mod parents;
pub mod structural;
pub mod witnesses;

use tracing::debug;

use braid_core::constants::{
    ALT, MAX_UNIT_LENGTH, SUPPORTED_VERSIONS, THRESHOLD_SIZE, UPGRADE_MCI_V4,
};
use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::types::{Address, Level, Mci, Sequence, Timestamp, UnitHash};
use braid_storage::rows::DefinitionRow;
use braid_storage::Ledger;

/// Everything validation established about an acceptable unit, handed to
/// the writer so it can persist the unit and re-check determinism of the
/// graph attributes.
#[derive(Debug)]
pub struct ValidationState {
    pub unit: UnitHash,
    pub level: Level,
    pub witnessed_level: Level,
    pub best_parent_unit: Option<UnitHash>,
    pub last_ball_mci: Mci,
    pub witnesses: Vec<Address>,
    pub sequence: Sequence,
    pub new_definitions: Vec<(Address, DefinitionRow)>,
    pub unit_size: usize,
}

/// Validate an incoming joint against the current ledger snapshot. Stages
/// run in a fixed order and fail fast; every failure is a typed error on
/// the error channel, never a panic.
///
/// The caller holds the author-address locks; this function takes none.
pub fn validate_joint(
    ledger: &Ledger,
    joint: &Joint,
    now: Timestamp,
) -> Result<ValidationState, BraidError> {
    let unit = &joint.unit;
    let unit_hash = &unit.unit;

    // ── 1. Structural field checks ───────────────────────────────────────────
    structural::check_structure(unit, now)?;

    // ── 2. Version / network tag ─────────────────────────────────────────────
    if !SUPPORTED_VERSIONS.contains(&unit.version.as_str()) {
        return Err(BraidError::UnsupportedVersion(unit.version.clone()));
    }
    if unit.alt != ALT {
        return Err(BraidError::WrongAlt(unit.alt.clone()));
    }

    // ── 3. Size gate, before any size-proportional hashing work ──────────────
    let unit_size = braid_fees::unit_size(unit)?;
    if unit_size > MAX_UNIT_LENGTH {
        return Err(BraidError::UnitTooLarge {
            size: unit_size,
            max: MAX_UNIT_LENGTH,
        });
    }

    // ── 4. Hash integrity ────────────────────────────────────────────────────
    let computed = braid_crypto::unit_hash(unit)?;
    if &computed != unit_hash {
        return Err(BraidError::WrongHash {
            expected: computed.to_string(),
            got: unit_hash.to_string(),
        });
    }

    // ── 5. Duplicates and archival (reason-blind) ────────────────────────────
    if ledger.unit_exists(unit_hash) {
        return Err(BraidError::KnownUnit(unit_hash.to_string()));
    }
    if ledger.is_archived(unit_hash) {
        return Err(BraidError::Archived(unit_hash.to_string()));
    }
    if unit.is_genesis() {
        // Genesis is seeded locally, never ingested from a peer.
        return Err(BraidError::UnitError("unexpected genesis unit".into()));
    }

    // ── 6. Parents and last ball ─────────────────────────────────────────────
    let parent_ctx = parents::check_parents(ledger, unit)?;

    // ── 7. Witnesses ─────────────────────────────────────────────────────────
    let witness_list = witnesses::check_witnesses(ledger, unit, &parent_ctx)?;

    // ── 8. Graph attributes (shared with the writer's determinism check) ─────
    let best_parent = braid_consensus::determine_best_parent(
        ledger,
        &parent_ctx.parent_props,
        &witness_list,
        parent_ctx.last_ball_mci,
    )?
    .ok_or_else(|| BraidError::UnitError("no eligible best parent".into()))?;
    let level = parent_ctx
        .parent_props
        .iter()
        .map(|p| p.level)
        .max()
        .unwrap_or(0)
        + 1;
    let witnessed_level =
        braid_consensus::witnessed_level_for(ledger, &best_parent.unit, &witness_list)?;

    // ── 9. Commissions and v4 fees ───────────────────────────────────────────
    let headers = braid_fees::headers_size(unit)?;
    if unit.headers_commission != headers {
        return Err(BraidError::UnitError(format!(
            "wrong headers commission: declared {}, computed {headers}",
            unit.headers_commission
        )));
    }
    let payload = braid_fees::payload_size(unit)?;
    if unit.payload_commission != payload {
        return Err(BraidError::UnitError(format!(
            "wrong payload commission: declared {}, computed {payload}",
            unit.payload_commission
        )));
    }
    if parent_ctx.last_ball_mci >= UPGRADE_MCI_V4 {
        let required = braid_fees::required_tps_fee(ledger, &parent_ctx.parent_props)?;
        let prepaid = ledger.tps_fee_balance(&unit.authors[0].address)?.max(0) as u64;
        let have = unit.tps_fee.unwrap_or(0) + prepaid;
        if have < required {
            return Err(BraidError::InsufficientTpsFee {
                need: required,
                have,
            });
        }
        if unit_size > THRESHOLD_SIZE {
            let required_oversize = braid_fees::required_oversize_fee(unit_size);
            if unit.oversize_fee.unwrap_or(0) < required_oversize {
                return Err(BraidError::UnitError(format!(
                    "oversize fee {} below required {required_oversize}",
                    unit.oversize_fee.unwrap_or(0)
                )));
            }
        }
    }

    // ── 10. Authors, definitions, signatures ─────────────────────────────────
    let author_outcome = authors::check_authors(ledger, unit, parent_ctx.last_ball_mci)?;

    // ── 11. Messages ─────────────────────────────────────────────────────────
    let message_outcome = messages::check_messages(ledger, unit, parent_ctx.last_ball_mci)?;

    let mut new_definitions = author_outcome.new_definitions;
    new_definitions.extend(message_outcome.new_definitions);

    debug!(unit = %unit_hash, level, witnessed_level, sequence = %message_outcome.sequence, "unit validated");
    Ok(ValidationState {
        unit: unit_hash.clone(),
        level,
        witnessed_level,
        best_parent_unit: Some(best_parent.unit),
        last_ball_mci: parent_ctx.last_ball_mci,
        witnesses: witness_list,
        sequence: message_outcome.sequence,
        new_definitions,
        unit_size,
    })
}
