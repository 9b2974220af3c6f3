use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use braid_core::error::BraidError;
use braid_core::types::{Ball, UnitHash};
use braid_core::unit::Unit;

use crate::canonical::{canonical_json, naked_unit_value, serialize_for_version, strip_nulls};

/// SHA-256 of `data`, base64-encoded: the 44-character form used for unit
/// hashes, balls and payload hashes.
pub fn sha256_b64(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

pub fn sha256_raw(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hash of the unit's canonical form: authentifiers removed, content hash
/// substituted when voided, serialization selected by version.
pub fn unit_hash(unit: &Unit) -> Result<UnitHash, BraidError> {
    let naked = naked_unit_value(unit)?;
    let serialized = serialize_for_version(&naked, &unit.version)?;
    UnitHash::new(sha256_b64(serialized.as_bytes()))
}

/// The 32-byte digest authors sign: like `unit_hash` but never voided
/// (signing happens before any archival) and returned raw for the
/// signature scheme.
pub fn unit_hash_to_sign(unit: &Unit) -> Result<[u8; 32], BraidError> {
    let mut naked = naked_unit_value(unit)?;
    if let Some(obj) = naked.as_object_mut() {
        obj.remove("content_hash");
    }
    let serialized = serialize_for_version(&naked, &unit.version)?;
    Ok(sha256_raw(serialized.as_bytes()))
}

/// Ball hash: `H(unit, sorted(parent_balls), sorted(skiplist_balls),
/// is_nonserial)`. Inputs are sorted here so the value is independent of
/// insertion order.
pub fn ball_hash(
    unit: &UnitHash,
    parent_balls: &[Ball],
    skiplist_balls: &[Ball],
    is_nonserial: bool,
) -> Result<Ball, BraidError> {
    let mut parents: Vec<&Ball> = parent_balls.iter().collect();
    parents.sort();
    let mut skiplist: Vec<&Ball> = skiplist_balls.iter().collect();
    skiplist.sort();

    let mut obj = serde_json::Map::new();
    obj.insert("unit".into(), serde_json::json!(unit));
    if !parents.is_empty() {
        obj.insert("parent_balls".into(), serde_json::json!(parents));
    }
    if !skiplist.is_empty() {
        obj.insert("skiplist_balls".into(), serde_json::json!(skiplist));
    }
    if is_nonserial {
        obj.insert("is_nonserial".into(), serde_json::json!(true));
    }
    let serialized = canonical_json(&serde_json::Value::Object(obj))?;
    Ball::new(sha256_b64(serialized.as_bytes()))
}

/// Canonical hash of an off-chain signed package, authentifiers removed.
/// The package must already carry `version` — enforced by validators, not
/// here.
pub fn signed_package_hash(package: &serde_json::Value) -> Result<String, BraidError> {
    let mut value = package.clone();
    strip_nulls(&mut value);
    if let Some(authors) = value.get_mut("authors").and_then(|a| a.as_array_mut()) {
        for author in authors {
            if let Some(obj) = author.as_object_mut() {
                obj.remove("authentifiers");
            }
        }
    }
    let serialized = canonical_json(&value)?;
    Ok(sha256_b64(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::Address;
    use braid_core::unit::{Author, Unit};
    use std::collections::BTreeMap;

    fn test_unit() -> Unit {
        let mut authentifiers = BTreeMap::new();
        authentifiers.insert("r".to_string(), "X".repeat(88));
        Unit {
            unit: UnitHash::new("A".repeat(44)).unwrap(),
            version: "4.0".into(),
            alt: "1".into(),
            parent_units: vec![],
            last_ball: None,
            last_ball_unit: None,
            witness_list_unit: None,
            witnesses: None,
            authors: vec![Author {
                address: Address::new("B".repeat(32)).unwrap(),
                definition: None,
                authentifiers,
            }],
            messages: vec![],
            timestamp: 1_700_000_000,
            headers_commission: 300,
            payload_commission: 200,
            tps_fee: None,
            burn_fee: None,
            oversize_fee: None,
            max_aa_responses: None,
            earned_headers_commission_recipients: None,
            content_hash: None,
        }
    }

    #[test]
    fn hash_ignores_authentifiers_and_own_hash() {
        let unit = test_unit();
        let h1 = unit_hash(&unit).unwrap();

        let mut modified = unit.clone();
        modified.authors[0]
            .authentifiers
            .insert("r".into(), "Y".repeat(88));
        modified.unit = UnitHash::new("C".repeat(44)).unwrap();
        assert_eq!(unit_hash(&modified).unwrap(), h1);
    }

    #[test]
    fn hash_changes_with_any_field() {
        let unit = test_unit();
        let h1 = unit_hash(&unit).unwrap();
        let mut modified = unit.clone();
        modified.timestamp += 1;
        assert_ne!(unit_hash(&modified).unwrap(), h1);
    }

    #[test]
    fn hashing_leaves_callers_unit_unchanged() {
        let unit = test_unit();
        let before = serde_json::to_value(&unit).unwrap();
        let _ = unit_hash(&unit).unwrap();
        assert_eq!(serde_json::to_value(&unit).unwrap(), before);
    }

    #[test]
    fn ball_hash_is_order_independent() {
        let u = UnitHash::new("A".repeat(44)).unwrap();
        let b1 = Ball::new("B".repeat(44)).unwrap();
        let b2 = Ball::new("C".repeat(44)).unwrap();
        let h1 = ball_hash(&u, &[b1.clone(), b2.clone()], &[], false).unwrap();
        let h2 = ball_hash(&u, &[b2, b1], &[], false).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn nonserial_flag_changes_ball() {
        let u = UnitHash::new("A".repeat(44)).unwrap();
        let serial = ball_hash(&u, &[], &[], false).unwrap();
        let nonserial = ball_hash(&u, &[], &[], true).unwrap();
        assert_ne!(serial, nonserial);
    }
}
