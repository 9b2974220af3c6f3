use std::collections::BTreeMap;

use braid_core::error::BraidError;
use braid_core::types::{Address, Mci, Timestamp};
use braid_storage::rows::TriggerRow;
use braid_storage::Ledger;

use crate::state::StagedAaState;

/// Everything a template expression may observe. All of it derives from the
/// stable prefix and the trigger, so evaluation is byte-identical on every
/// node.
pub struct ExprScope<'a> {
    pub ledger: &'a Ledger,
    pub trigger: &'a TriggerRow,
    pub aa_address: &'a Address,
    pub params: &'a BTreeMap<String, serde_json::Value>,
    pub staged: &'a StagedAaState,
    pub mci: Mci,
    pub timestamp: Timestamp,
}

/// Evaluate a template value. Plain JSON passes through; strings starting
/// with `$` are scope references; single-key `{"$op": …}` objects are
/// operators. The formula *parser* lives outside this system — templates
/// arrive already structured.
pub fn eval(value: &serde_json::Value, scope: &ExprScope<'_>) -> Result<serde_json::Value, BraidError> {
    match value {
        serde_json::Value::String(s) if s.starts_with('$') => resolve_ref(s, scope),
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                let (key, arg) = map.iter().next().map(|(k, v)| (k.clone(), v)).ok_or_else(
                    || BraidError::Internal("single-key object vanished".into()),
                )?;
                if key.starts_with('$') {
                    return apply_op(&key, arg, scope);
                }
            }
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                out.insert(key.clone(), eval(item, scope)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_json::Value::Array(items) => {
            let evaluated: Result<Vec<_>, _> = items.iter().map(|v| eval(v, scope)).collect();
            Ok(serde_json::Value::Array(evaluated?))
        }
        other => Ok(other.clone()),
    }
}

pub fn eval_bool(value: &serde_json::Value, scope: &ExprScope<'_>) -> Result<bool, BraidError> {
    match eval(value, scope)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        serde_json::Value::Null => Ok(false),
        serde_json::Value::String(s) => Ok(!s.is_empty()),
        other => Err(BraidError::Definition(format!(
            "condition evaluated to non-scalar {other}"
        ))),
    }
}

fn resolve_ref(reference: &str, scope: &ExprScope<'_>) -> Result<serde_json::Value, BraidError> {
    match reference {
        "$trigger.address" => Ok(serde_json::json!(scope.trigger.trigger_address)),
        "$trigger.unit" => Ok(serde_json::json!(scope.trigger.unit)),
        "$trigger.output" => Ok(serde_json::json!(scope
            .trigger
            .outputs
            .get("base")
            .copied()
            .unwrap_or(0))),
        "$mci" => Ok(serde_json::json!(scope.mci)),
        "$timestamp" => Ok(serde_json::json!(scope.timestamp)),
        "$address" => Ok(serde_json::json!(scope.aa_address)),
        _ => {
            if let Some(asset) = reference
                .strip_prefix("$trigger.output[")
                .and_then(|s| s.strip_suffix(']'))
            {
                return Ok(serde_json::json!(scope
                    .trigger
                    .outputs
                    .get(asset)
                    .copied()
                    .unwrap_or(0)));
            }
            if let Some(key) = reference.strip_prefix("$trigger.data.") {
                let value = scope
                    .trigger
                    .data
                    .as_ref()
                    .and_then(|d| d.get(key))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                return Ok(value);
            }
            if let Some(name) = reference
                .strip_prefix("$var[")
                .and_then(|s| s.strip_suffix(']'))
            {
                return Ok(scope
                    .staged
                    .var(scope.ledger, scope.aa_address, name)?
                    .unwrap_or(serde_json::Value::Null));
            }
            if let Some(asset) = reference
                .strip_prefix("$balance[")
                .and_then(|s| s.strip_suffix(']'))
            {
                return Ok(serde_json::json!(scope.staged.balance(
                    scope.ledger,
                    scope.aa_address,
                    asset
                )?));
            }
            if let Some(key) = reference.strip_prefix("$params.") {
                return Ok(scope
                    .params
                    .get(key)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null));
            }
            Err(BraidError::Definition(format!(
                "unknown reference {reference}"
            )))
        }
    }
}

fn as_i128(value: &serde_json::Value) -> Result<i128, BraidError> {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
        .ok_or_else(|| BraidError::Definition(format!("expected integer, got {value}")))
}

fn apply_op(
    op: &str,
    arg: &serde_json::Value,
    scope: &ExprScope<'_>,
) -> Result<serde_json::Value, BraidError> {
    let args = arg
        .as_array()
        .ok_or_else(|| BraidError::Definition(format!("{op} expects an argument array")))?;
    match op {
        "$add" | "$sub" | "$mul" | "$div" => {
            if args.len() != 2 {
                return Err(BraidError::Definition(format!("{op} expects 2 arguments")));
            }
            let a = as_i128(&eval(&args[0], scope)?)?;
            let b = as_i128(&eval(&args[1], scope)?)?;
            let result = match op {
                "$add" => a.checked_add(b),
                "$sub" => a.checked_sub(b),
                "$mul" => a.checked_mul(b),
                _ => {
                    if b == 0 {
                        return Err(BraidError::Definition("division by zero".into()));
                    }
                    a.checked_div(b)
                }
            }
            .ok_or_else(|| BraidError::Definition(format!("{op} overflowed")))?;
            let as_i64 = i64::try_from(result)
                .map_err(|_| BraidError::Definition(format!("{op} result out of range")))?;
            Ok(serde_json::json!(as_i64))
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            if args.len() != 2 {
                return Err(BraidError::Definition(format!("{op} expects 2 arguments")));
            }
            let a = as_i128(&eval(&args[0], scope)?)?;
            let b = as_i128(&eval(&args[1], scope)?)?;
            let result = match op {
                "$gt" => a > b,
                "$gte" => a >= b,
                "$lt" => a < b,
                _ => a <= b,
            };
            Ok(serde_json::json!(result))
        }
        "$eq" | "$ne" => {
            if args.len() != 2 {
                return Err(BraidError::Definition(format!("{op} expects 2 arguments")));
            }
            let a = eval(&args[0], scope)?;
            let b = eval(&args[1], scope)?;
            Ok(serde_json::json!(if op == "$eq" { a == b } else { a != b }))
        }
        "$and" | "$or" => {
            let mut result = op == "$and";
            for item in args {
                let b = eval_bool(item, scope)?;
                result = if op == "$and" { result && b } else { result || b };
            }
            Ok(serde_json::json!(result))
        }
        "$not" => {
            if args.len() != 1 {
                return Err(BraidError::Definition("$not expects 1 argument".into()));
            }
            Ok(serde_json::json!(!eval_bool(&args[0], scope)?))
        }
        "$concat" => {
            let mut out = String::new();
            for item in args {
                match eval(item, scope)? {
                    serde_json::Value::String(s) => out.push_str(&s),
                    serde_json::Value::Number(n) => out.push_str(&n.to_string()),
                    other => {
                        return Err(BraidError::Definition(format!(
                            "$concat of non-scalar {other}"
                        )))
                    }
                }
            }
            Ok(serde_json::Value::String(out))
        }
        other => Err(BraidError::Definition(format!("unknown operator {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::UnitHash;

    fn scope_fixture<'a>(
        ledger: &'a Ledger,
        trigger: &'a TriggerRow,
        aa: &'a Address,
        params: &'a BTreeMap<String, serde_json::Value>,
        staged: &'a StagedAaState,
    ) -> ExprScope<'a> {
        ExprScope {
            ledger,
            trigger,
            aa_address: aa,
            params,
            staged,
            mci: 7,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn trigger_refs_and_arithmetic() {
        let dir = std::env::temp_dir().join("braid_expr_test");
        let _ = std::fs::remove_dir_all(&dir);
        let ledger = Ledger::open(&dir).unwrap();
        let aa = Address::new("A".repeat(32)).unwrap();
        let trigger = TriggerRow {
            unit: UnitHash::new("U".repeat(44)).unwrap(),
            aa_address: aa.clone(),
            trigger_address: Address::new("B".repeat(32)).unwrap(),
            outputs: BTreeMap::from([("base".to_string(), 500u64)]),
            data: Some(serde_json::json!({"action": "ping"})),
            main_chain_index: 7,
        };
        let params = BTreeMap::new();
        let staged = StagedAaState::default();
        let scope = scope_fixture(&ledger, &trigger, &aa, &params, &staged);

        assert_eq!(
            eval(&serde_json::json!("$trigger.output"), &scope).unwrap(),
            serde_json::json!(500)
        );
        assert_eq!(
            eval(&serde_json::json!("$trigger.data.action"), &scope).unwrap(),
            serde_json::json!("ping")
        );
        let refund = serde_json::json!({"$sub": ["$trigger.output", 100]});
        assert_eq!(eval(&refund, &scope).unwrap(), serde_json::json!(400));
        let cond = serde_json::json!({"$gte": ["$trigger.output", 1000]});
        assert!(!eval_bool(&cond, &scope).unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
