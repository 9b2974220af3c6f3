use braid_core::constants::{
    COUNT_WITNESSES, HASH_LENGTH, MAX_AUTHORS_PER_UNIT, MAX_MESSAGES_PER_UNIT,
    MAX_PARENTS_PER_UNIT,
};
use braid_core::error::BraidError;
use braid_core::types::Timestamp;
use braid_core::unit::{PayloadLocation, Unit};

/// How far into the future a unit timestamp may run ahead of local clock.
const TIMESTAMP_TOLERANCE_SECS: i64 = 600;

/// Longest accepted authentifier (signatures are 88 chars; hash-lock
/// preimages may be longer, but not unbounded).
const MAX_AUTHENTIFIER_LENGTH: usize = 4096;

/// Stage-1 checks: required fields, orderings, counts. Cheap and purely
/// local — no storage reads, no hashing.
pub fn check_structure(unit: &Unit, now: Timestamp) -> Result<(), BraidError> {
    // ── Parents ──────────────────────────────────────────────────────────────
    if unit.parent_units.len() > MAX_PARENTS_PER_UNIT {
        return Err(BraidError::TooMany {
            what: "parents",
            got: unit.parent_units.len(),
            max: MAX_PARENTS_PER_UNIT,
        });
    }
    for pair in unit.parent_units.windows(2) {
        if pair[0] >= pair[1] {
            return Err(BraidError::ParentsNotOrdered);
        }
    }
    if !unit.is_genesis() {
        if unit.last_ball.is_none() || unit.last_ball_unit.is_none() {
            return Err(BraidError::Structure(
                "last_ball and last_ball_unit are required".into(),
            ));
        }
    }

    // ── Witness declaration: embedded list xor reference ─────────────────────
    match (&unit.witnesses, &unit.witness_list_unit) {
        (Some(_), Some(_)) => {
            return Err(BraidError::Structure(
                "witnesses and witness_list_unit are mutually exclusive".into(),
            ))
        }
        (None, None) => {
            return Err(BraidError::Structure(
                "either witnesses or witness_list_unit is required".into(),
            ))
        }
        (Some(list), None) => {
            if list.len() != COUNT_WITNESSES {
                return Err(BraidError::WitnessList(format!(
                    "expected {COUNT_WITNESSES} witnesses, got {}",
                    list.len()
                )));
            }
            for pair in list.windows(2) {
                if pair[0] >= pair[1] {
                    return Err(BraidError::WitnessList(
                        "witnesses not sorted or duplicated".into(),
                    ));
                }
            }
        }
        (None, Some(_)) => {}
    }

    // ── Authors ──────────────────────────────────────────────────────────────
    if unit.authors.is_empty() {
        return Err(BraidError::Structure("unit has no authors".into()));
    }
    if unit.authors.len() > MAX_AUTHORS_PER_UNIT {
        return Err(BraidError::TooMany {
            what: "authors",
            got: unit.authors.len(),
            max: MAX_AUTHORS_PER_UNIT,
        });
    }
    for pair in unit.authors.windows(2) {
        if pair[0].address >= pair[1].address {
            return Err(BraidError::Structure(
                "authors not sorted by address or duplicated".into(),
            ));
        }
    }
    for author in &unit.authors {
        for (path, authentifier) in &author.authentifiers {
            if path.is_empty() || path.len() > 256 {
                return Err(BraidError::Structure(format!("bad authentifier path {path}")));
            }
            if authentifier.is_empty() || authentifier.len() > MAX_AUTHENTIFIER_LENGTH {
                return Err(BraidError::Structure(format!(
                    "authentifier at {path} has bad length {}",
                    authentifier.len()
                )));
            }
        }
    }

    // ── Messages ─────────────────────────────────────────────────────────────
    if unit.messages.is_empty() {
        return Err(BraidError::Structure("unit has no messages".into()));
    }
    if unit.messages.len() > MAX_MESSAGES_PER_UNIT {
        return Err(BraidError::TooMany {
            what: "messages",
            got: unit.messages.len(),
            max: MAX_MESSAGES_PER_UNIT,
        });
    }
    for (i, message) in unit.messages.iter().enumerate() {
        if message.payload_hash.len() != HASH_LENGTH {
            return Err(BraidError::Message {
                message_index: i,
                reason: "bad payload_hash length".into(),
            });
        }
        match message.payload_location {
            PayloadLocation::Inline => {
                if message.payload.is_none() {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "inline payload missing".into(),
                    });
                }
            }
            PayloadLocation::None => {
                if message.payload.is_some() {
                    return Err(BraidError::Message {
                        message_index: i,
                        reason: "private payload must not be published".into(),
                    });
                }
            }
            PayloadLocation::Uri => {}
        }
    }

    // ── Header scalars ───────────────────────────────────────────────────────
    if unit.timestamp < 0 || unit.timestamp > now + TIMESTAMP_TOLERANCE_SECS {
        return Err(BraidError::Structure(format!(
            "timestamp {} out of range",
            unit.timestamp
        )));
    }
    if unit.content_hash.is_some() {
        // Voided units exist only as locally archived skeletons.
        return Err(BraidError::Structure(
            "incoming unit must not carry content_hash".into(),
        ));
    }
    if let Some(recipients) = &unit.earned_headers_commission_recipients {
        let total: u32 = recipients
            .iter()
            .map(|r| r.earned_headers_commission_share)
            .sum();
        if total != 100 {
            return Err(BraidError::Structure(format!(
                "earned headers commission shares sum to {total}, not 100"
            )));
        }
        for pair in recipients.windows(2) {
            if pair[0].address >= pair[1].address {
                return Err(BraidError::Structure(
                    "commission recipients not sorted or duplicated".into(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::{Address, UnitHash};
    use braid_core::unit::{App, Author, Message, Payload};
    use std::collections::BTreeMap;

    fn base_unit() -> Unit {
        Unit {
            unit: UnitHash::new("A".repeat(44)).unwrap(),
            version: "4.0".into(),
            alt: "1".into(),
            parent_units: vec![UnitHash::new("B".repeat(44)).unwrap()],
            last_ball: Some(braid_core::types::Ball::new("C".repeat(44)).unwrap()),
            last_ball_unit: Some(UnitHash::new("D".repeat(44)).unwrap()),
            witness_list_unit: Some(UnitHash::new("E".repeat(44)).unwrap()),
            witnesses: None,
            authors: vec![Author {
                address: Address::new("F".repeat(32)).unwrap(),
                definition: None,
                authentifiers: BTreeMap::from([("r".to_string(), "s".repeat(88))]),
            }],
            messages: vec![Message {
                app: App::Text,
                payload_location: braid_core::unit::PayloadLocation::Inline,
                payload_hash: "h".repeat(44),
                payload: Some(Payload::Text("hi".into())),
                spend_proofs: None,
            }],
            timestamp: 1_700_000_000,
            headers_commission: 1,
            payload_commission: 1,
            tps_fee: None,
            burn_fee: None,
            oversize_fee: None,
            max_aa_responses: None,
            earned_headers_commission_recipients: None,
            content_hash: None,
        }
    }

    #[test]
    fn well_formed_unit_passes() {
        assert!(check_structure(&base_unit(), 1_700_000_100).is_ok());
    }

    #[test]
    fn unordered_parents_rejected() {
        let mut unit = base_unit();
        unit.parent_units = vec![
            UnitHash::new("C".repeat(44)).unwrap(),
            UnitHash::new("B".repeat(44)).unwrap(),
        ];
        assert!(matches!(
            check_structure(&unit, 1_700_000_100),
            Err(BraidError::ParentsNotOrdered)
        ));
    }

    #[test]
    fn witnesses_and_list_unit_are_exclusive() {
        let mut unit = base_unit();
        unit.witnesses = Some(vec![]);
        assert!(check_structure(&unit, 1_700_000_100).is_err());
    }

    #[test]
    fn future_timestamp_rejected() {
        let unit = base_unit();
        assert!(check_structure(&unit, unit.timestamp - 700).is_err());
    }
}
