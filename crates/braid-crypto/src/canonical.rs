use braid_core::error::BraidError;
use braid_core::unit::Unit;

/// Canonical JSON: serde_json's object map is BTreeMap-backed, so keys come
/// out sorted and number formatting is stable. Used for all versions ≥ 2.0.
pub fn canonical_json(value: &serde_json::Value) -> Result<String, BraidError> {
    serde_json::to_string(value).map_err(|e| BraidError::Serialization(e.to_string()))
}

/// Legacy serialization for version 1.0 units: a type-tagged traversal
/// joined with NUL separators. Kept bit-for-bit for pre-upgrade history.
pub fn source_string(value: &serde_json::Value) -> Result<String, BraidError> {
    let mut components: Vec<String> = Vec::new();
    collect_components(value, &mut components, 0)?;
    Ok(components.join("\x00"))
}

fn collect_components(
    value: &serde_json::Value,
    components: &mut Vec<String>,
    depth: usize,
) -> Result<(), BraidError> {
    if depth > braid_core::constants::MAX_STRUCTURE_DEPTH {
        return Err(BraidError::StructureDepthExceeded(depth));
    }
    match value {
        serde_json::Value::Null => {
            Err(BraidError::Serialization("null not allowed in canonical form".into()))
        }
        serde_json::Value::String(s) => {
            components.push("s".into());
            components.push(s.clone());
            Ok(())
        }
        serde_json::Value::Number(n) => {
            components.push("n".into());
            components.push(n.to_string());
            Ok(())
        }
        serde_json::Value::Bool(b) => {
            components.push("b".into());
            components.push(b.to_string());
            Ok(())
        }
        serde_json::Value::Array(items) => {
            components.push("[".into());
            for item in items {
                collect_components(item, components, depth + 1)?;
            }
            components.push("]".into());
            Ok(())
        }
        serde_json::Value::Object(map) => {
            // serde_json map iterates in sorted key order
            for (key, item) in map {
                components.push(key.clone());
                collect_components(item, components, depth + 1)?;
            }
            Ok(())
        }
    }
}

/// Whether `version` selects the legacy source-string form.
pub fn uses_legacy_serialization(version: &str) -> bool {
    version == "1.0"
}

/// Serialize a value in the form selected by the unit version.
pub fn serialize_for_version(
    value: &serde_json::Value,
    version: &str,
) -> Result<String, BraidError> {
    if uses_legacy_serialization(version) {
        source_string(value)
    } else {
        canonical_json(value)
    }
}

/// The unit reduced to its hashable form: a fresh deep value (the caller's
/// unit is observably unchanged) with the hash field and all authentifiers
/// removed, and — when the unit was voided — payloads replaced by
/// `content_hash`.
pub fn naked_unit_value(unit: &Unit) -> Result<serde_json::Value, BraidError> {
    let mut value =
        serde_json::to_value(unit).map_err(|e| BraidError::Serialization(e.to_string()))?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| BraidError::Internal("unit did not serialize to an object".into()))?;
    obj.remove("unit");
    if let Some(authors) = obj.get_mut("authors").and_then(|a| a.as_array_mut()) {
        for author in authors {
            if let Some(author_obj) = author.as_object_mut() {
                author_obj.remove("authentifiers");
            }
        }
    }
    if obj.contains_key("content_hash") {
        // Voided unit: only the skeleton is hashed.
        for field in [
            "messages",
            "headers_commission",
            "payload_commission",
            "tps_fee",
            "burn_fee",
            "oversize_fee",
            "max_aa_responses",
            "earned_headers_commission_recipients",
        ] {
            obj.remove(field);
        }
    }
    Ok(value)
}

/// Strip nulls recursively from a value bound for a hashing or signing
/// path. Operates on an owned value; callers clone first.
pub fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                strip_nulls(v);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items.iter_mut() {
                strip_nulls(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_string_is_type_tagged() {
        let v = serde_json::json!({"b": 1, "a": "x"});
        // object keys sorted: a before b
        assert_eq!(source_string(&v).unwrap(), "a\x00s\x00x\x00b\x00n\x001");
    }

    #[test]
    fn source_string_distinguishes_types() {
        let s = source_string(&serde_json::json!(["1"])).unwrap();
        let n = source_string(&serde_json::json!([1])).unwrap();
        assert_ne!(s, n);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v = serde_json::json!({"z": 1, "a": 2});
        assert_eq!(canonical_json(&v).unwrap(), r#"{"a":2,"z":1}"#);
    }

    #[test]
    fn strip_nulls_is_recursive() {
        let mut v = serde_json::json!({"a": null, "b": {"c": null, "d": 1}});
        strip_nulls(&mut v);
        assert_eq!(v, serde_json::json!({"b": {"d": 1}}));
    }
}
