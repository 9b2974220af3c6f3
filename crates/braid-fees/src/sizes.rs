use braid_core::error::BraidError;
use braid_core::types::Amount;
use braid_core::unit::Unit;
use braid_crypto::canonical::canonical_json;

fn unit_value(unit: &Unit) -> Result<serde_json::Value, BraidError> {
    serde_json::to_value(unit).map_err(|e| BraidError::Serialization(e.to_string()))
}

/// Size of the whole serialized unit, excluding its own hash. This is the
/// number checked against MAX_UNIT_LENGTH and the oversize threshold.
pub fn unit_size(unit: &Unit) -> Result<usize, BraidError> {
    let mut value = unit_value(unit)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("unit");
    }
    Ok(canonical_json(&value)?.len())
}

/// The headers portion: everything except messages and the fee fields the
/// commissions themselves occupy. Authentifiers count — signatures are
/// header weight the author pays for.
pub fn headers_size(unit: &Unit) -> Result<Amount, BraidError> {
    let mut value = unit_value(unit)?;
    if let Some(obj) = value.as_object_mut() {
        for field in [
            "unit",
            "messages",
            "headers_commission",
            "payload_commission",
            "tps_fee",
            "burn_fee",
            "oversize_fee",
        ] {
            obj.remove(field);
        }
    }
    Ok(canonical_json(&value)?.len() as Amount)
}

/// The payload portion: the serialized messages array.
pub fn payload_size(unit: &Unit) -> Result<Amount, BraidError> {
    let value = serde_json::to_value(&unit.messages)
        .map_err(|e| BraidError::Serialization(e.to_string()))?;
    Ok(canonical_json(&value)?.len() as Amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::{Address, UnitHash};
    use braid_core::unit::{App, Author, Message, Payload, PayloadLocation};
    use std::collections::BTreeMap;

    fn test_unit() -> Unit {
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
                authentifiers: BTreeMap::new(),
            }],
            messages: vec![Message {
                app: App::Text,
                payload_location: PayloadLocation::Inline,
                payload_hash: "h".repeat(44),
                payload: Some(Payload::Text("hello".into())),
                spend_proofs: None,
            }],
            timestamp: 1_700_000_000,
            headers_commission: 0,
            payload_commission: 0,
            tps_fee: None,
            burn_fee: None,
            oversize_fee: None,
            max_aa_responses: None,
            earned_headers_commission_recipients: None,
            content_hash: None,
        }
    }

    #[test]
    fn sizes_are_stable_under_commission_fields() {
        let mut unit = test_unit();
        let h1 = headers_size(&unit).unwrap();
        let p1 = payload_size(&unit).unwrap();
        unit.headers_commission = 999;
        unit.payload_commission = 999;
        assert_eq!(headers_size(&unit).unwrap(), h1);
        assert_eq!(payload_size(&unit).unwrap(), p1);
    }

    #[test]
    fn payload_grows_with_messages() {
        let mut unit = test_unit();
        let p1 = payload_size(&unit).unwrap();
        unit.messages.push(unit.messages[0].clone());
        assert!(payload_size(&unit).unwrap() > p1);
    }
}
