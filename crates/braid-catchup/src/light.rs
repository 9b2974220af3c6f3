use serde::{Deserialize, Serialize};

use braid_core::constants::{ALT, SUPPORTED_VERSIONS};
use braid_core::error::BraidError;
use braid_core::types::{Address, Amount, Ball, UnitHash};
use braid_storage::Ledger;

/// What a full node hands a light client that wants to compose a unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParentsAndLastBall {
    pub parent_units: Vec<UnitHash>,
    pub last_ball: Ball,
    pub last_ball_unit: UnitHash,
    pub witness_list_unit: UnitHash,
}

/// Compose-support for light clients: current free units as parents, the
/// stability point as last ball, the genesis witness list.
pub fn prepare_parents_and_last_ball(ledger: &Ledger) -> Result<ParentsAndLastBall, BraidError> {
    let mut parent_units: Vec<UnitHash> = ledger
        .free_units()?
        .into_iter()
        .map(|p| p.unit)
        .collect();
    parent_units.sort();
    parent_units.truncate(braid_core::constants::MAX_PARENTS_PER_UNIT);
    if parent_units.is_empty() {
        return Err(BraidError::Transient("no free units yet".into()));
    }
    let last_stable = ledger.last_stable_mci()?;
    let last_ball_unit = ledger
        .mc_unit_at(last_stable)?
        .ok_or_else(|| BraidError::Internal(format!("no MC unit at {last_stable}")))?;
    let last_ball = ledger
        .ball_of(&last_ball_unit)?
        .ok_or_else(|| BraidError::Internal(format!("no ball for {last_ball_unit}")))?;
    let witness_list_unit = ledger
        .genesis_unit()?
        .ok_or_else(|| BraidError::Internal("no genesis".into()))?;
    Ok(ParentsAndLastBall {
        parent_units,
        last_ball,
        last_ball_unit,
        witness_list_unit,
    })
}

/// Validate an off-chain signed package. The rules that stop cross-network
/// replay: `version` must be present and supported, the network tag must
/// match, and a referenced last_ball_unit must be stable — a signed
/// message anchored to an unstable unit reads differently on different
/// nodes.
pub fn validate_signed_package(
    ledger: &Ledger,
    package: &serde_json::Value,
) -> Result<(), BraidError> {
    let obj = package
        .as_object()
        .ok_or_else(|| BraidError::Structure("signed package must be an object".into()))?;
    if obj.get("signed_message").is_none() {
        return Err(BraidError::Structure("signed_message missing".into()));
    }
    let Some(version) = obj.get("version").and_then(|v| v.as_str()) else {
        return Err(BraidError::Structure(
            "signed package without version".into(),
        ));
    };
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(BraidError::UnsupportedVersion(version.to_string()));
    }
    let Some(alt) = obj.get("alt").and_then(|v| v.as_str()) else {
        return Err(BraidError::Structure("signed package without alt".into()));
    };
    if alt != ALT {
        return Err(BraidError::WrongAlt(alt.to_string()));
    }

    let authors = obj
        .get("authors")
        .and_then(|a| a.as_array())
        .ok_or_else(|| BraidError::Structure("signed package without authors".into()))?;
    if authors.is_empty() {
        return Err(BraidError::Structure("signed package without authors".into()));
    }

    if let Some(last_ball_unit) = obj.get("last_ball_unit").and_then(|v| v.as_str()) {
        let unit = UnitHash::new(last_ball_unit.to_string())?;
        let props = ledger
            .unit_props(&unit)?
            .ok_or_else(|| BraidError::Transient(format!("last_ball_unit {unit} unknown")))?;
        if !props.is_stable {
            return Err(BraidError::UnitError(format!(
                "signed package references unstable last_ball_unit {unit}"
            )));
        }
    }

    // signatures cover the canonical package hash, authentifiers excluded
    let package_hash = braid_crypto::signed_package_hash(package)?;
    for author in authors {
        let address: Address = serde_json::from_value(
            author
                .get("address")
                .cloned()
                .ok_or_else(|| BraidError::Structure("author without address".into()))?,
        )
        .map_err(|e| BraidError::Structure(format!("bad author address: {e}")))?;
        let definition = author.get("definition").ok_or_else(|| {
            BraidError::Structure(format!("author {address} without definition"))
        })?;
        let parsed = braid_core::definition::Definition::from_value(definition)?;
        let chash = braid_crypto::address_from_definition(&parsed)?;
        if chash != address {
            return Err(BraidError::Authentication {
                address: address.to_string(),
                reason: format!("definition hashes to {chash}"),
            });
        }
        let authentifiers = author
            .get("authentifiers")
            .and_then(|a| a.as_object())
            .ok_or_else(|| BraidError::Structure("author without authentifiers".into()))?;
        let Some(signature) = authentifiers.get("r").and_then(|s| s.as_str()) else {
            return Err(BraidError::Authentication {
                address: address.to_string(),
                reason: "no authentifier at r".into(),
            });
        };
        let braid_core::definition::Definition::Sig(sig_arg) = &parsed else {
            return Err(BraidError::Authentication {
                address: address.to_string(),
                reason: "only sig definitions are accepted for signed packages".into(),
            });
        };
        let digest = braid_crypto::hash::sha256_raw(package_hash.as_bytes());
        if !braid_crypto::verify_sig(&sig_arg.pubkey, &digest, signature)? {
            return Err(BraidError::Authentication {
                address: address.to_string(),
                reason: "signature does not verify".into(),
            });
        }
    }
    Ok(())
}

/// Hold a vendor's tps_fee quote against the local lower bound. Light
/// clients cannot compute the true fee, but an implausibly low quote is a
/// lie either way.
pub fn check_tps_fee_quote(quote: Amount) -> Result<(), BraidError> {
    let floor = braid_fees::min_plausible_tps_fee();
    if quote < floor {
        return Err(BraidError::Transient(format!(
            "vendor tps fee quote {quote} below plausible floor {floor}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger(tag: &str) -> (Ledger, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("braid_light_test_{tag}"));
        let _ = std::fs::remove_dir_all(&dir);
        (Ledger::open(&dir).unwrap(), dir)
    }

    #[test]
    fn package_without_version_rejected() {
        let (ledger, dir) = temp_ledger("nover");
        let package = serde_json::json!({
            "signed_message": "hello",
            "alt": "1",
            "authors": [],
        });
        let err = validate_signed_package(&ledger, &package).unwrap_err();
        assert!(matches!(err, BraidError::Structure(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn package_with_wrong_alt_rejected() {
        let (ledger, dir) = temp_ledger("alt");
        let package = serde_json::json!({
            "signed_message": "hello",
            "version": "4.0",
            "alt": "2",
            "authors": [{"address": "A"}],
        });
        let err = validate_signed_package(&ledger, &package).unwrap_err();
        assert!(matches!(err, BraidError::WrongAlt(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn implausible_tps_quote_rejected() {
        assert!(check_tps_fee_quote(0).is_err());
        assert!(check_tps_fee_quote(braid_fees::min_plausible_tps_fee()).is_ok());
    }
}
