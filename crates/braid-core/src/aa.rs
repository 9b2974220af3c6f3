use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{MAX_AA_STRING_LENGTH, MAX_DEPTH};
use crate::error::BraidError;
use crate::types::{Address, Amount};
use crate::unit::App;

/// One templated message of an AA. `payload` is a JSON template: literal
/// values plus `$`-expressions that the executor substitutes
/// deterministically at trigger time. `if` gates the whole message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaMessageTemplate {
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
    pub app: App,
    pub payload: serde_json::Value,
}

/// The body of an `['autonomous agent', {…}]` definition. A parameterized
/// AA sets `base_aa` + `params` and carries no messages of its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_aa: Option<Address>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Minimum refund withheld per asset ("base" keys the native currency)
    /// when a trigger bounces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_fees: Option<BTreeMap<String, Amount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_url: Option<String>,
    /// State assignments evaluated before any message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<AaMessageTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub getters: Option<serde_json::Value>,
}

impl AaDefinition {
    pub fn is_parameterized(&self) -> bool {
        self.base_aa.is_some()
    }

    /// Structural validation: a base AA needs messages, a parameterized AA
    /// must not have any; all embedded strings respect the AA string cap;
    /// nesting respects MAX_DEPTH.
    pub fn validate(&self, depth: usize) -> Result<(), BraidError> {
        match (&self.base_aa, self.messages.is_empty()) {
            (Some(_), false) => {
                return Err(BraidError::Definition(
                    "parameterized agent must not define messages".into(),
                ))
            }
            (None, true) => {
                return Err(BraidError::Definition("agent has no messages".into()))
            }
            _ => {}
        }
        if let Some(fees) = &self.bounce_fees {
            for (asset, _) in fees {
                if asset != "base" && asset.len() != crate::constants::HASH_LENGTH {
                    return Err(BraidError::Definition(format!(
                        "bad bounce fee asset: {asset}"
                    )));
                }
            }
        }
        for (key, value) in &self.params {
            check_strings(value, depth + 1)?;
            if key.len() > MAX_AA_STRING_LENGTH {
                return Err(BraidError::Definition("param name too long".into()));
            }
        }
        if let Some(init) = &self.init {
            check_strings(init, depth + 1)?;
        }
        for tpl in &self.messages {
            if let Some(cond) = &tpl.condition {
                check_strings(cond, depth + 1)?;
            }
            check_strings(&tpl.payload, depth + 1)?;
            if matches!(
                tpl.app,
                App::AddressDefinitionChange | App::SystemVote | App::SystemVoteCount
            ) {
                return Err(BraidError::Definition(format!(
                    "app {} not allowed in agent messages",
                    tpl.app
                )));
            }
        }
        if let Some(getters) = &self.getters {
            check_strings(getters, depth + 1)?;
        }
        Ok(())
    }
}

/// Walk a template checking string lengths and nesting depth.
fn check_strings(value: &serde_json::Value, depth: usize) -> Result<(), BraidError> {
    if depth > MAX_DEPTH {
        return Err(BraidError::DepthExceeded {
            got: depth,
            max: MAX_DEPTH,
        });
    }
    match value {
        serde_json::Value::String(s) => {
            if s.len() > MAX_AA_STRING_LENGTH {
                return Err(BraidError::Definition(format!(
                    "string of {} chars exceeds agent cap",
                    s.len()
                )));
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                check_strings(item, depth + 1)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                if key.len() > MAX_AA_STRING_LENGTH {
                    return Err(BraidError::Definition("key too long".into()));
                }
                check_strings(item, depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_aa_requires_messages() {
        let aa = AaDefinition {
            base_aa: None,
            params: BTreeMap::new(),
            bounce_fees: None,
            doc_url: None,
            init: None,
            messages: vec![],
            getters: None,
        };
        assert!(aa.validate(0).is_err());
    }

    #[test]
    fn oversize_string_rejected() {
        let aa = AaDefinition {
            base_aa: None,
            params: BTreeMap::new(),
            bounce_fees: None,
            doc_url: None,
            init: None,
            messages: vec![AaMessageTemplate {
                condition: None,
                app: App::Data,
                payload: serde_json::json!({"blob": "x".repeat(MAX_AA_STRING_LENGTH + 1)}),
            }],
            getters: None,
        };
        assert!(aa.validate(0).is_err());
    }
}
