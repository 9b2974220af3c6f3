use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::definition::Definition;
use crate::error::BraidError;
use crate::types::{Address, Amount, Ball, Mci, Timestamp, UnitHash};

// ── App ──────────────────────────────────────────────────────────────────────

/// Message application. Each variant has its own payload shape, validator
/// and writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum App {
    Payment,
    Data,
    DataFeed,
    Definition,
    Asset,
    AssetAttestors,
    Attestation,
    Poll,
    Vote,
    Text,
    Profile,
    DefinitionTemplate,
    State,
    AddressDefinitionChange,
    SystemVote,
    SystemVoteCount,
}

impl App {
    pub fn as_str(&self) -> &'static str {
        match self {
            App::Payment => "payment",
            App::Data => "data",
            App::DataFeed => "data_feed",
            App::Definition => "definition",
            App::Asset => "asset",
            App::AssetAttestors => "asset_attestors",
            App::Attestation => "attestation",
            App::Poll => "poll",
            App::Vote => "vote",
            App::Text => "text",
            App::Profile => "profile",
            App::DefinitionTemplate => "definition_template",
            App::State => "state",
            App::AddressDefinitionChange => "address_definition_change",
            App::SystemVote => "system_vote",
            App::SystemVoteCount => "system_vote_count",
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a message's payload lives. `None` means only the hash is published
/// (private payments); `Uri` payloads are fetched out of band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadLocation {
    Inline,
    Uri,
    None,
}

// ── Inputs and outputs ───────────────────────────────────────────────────────

/// A payment input. Commission inputs sweep whole MCI ranges instead of
/// naming individual outputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    Transfer {
        unit: UnitHash,
        message_index: u32,
        output_index: u32,
    },
    Issue {
        amount: Amount,
        serial_number: u64,
    },
    HeadersCommission {
        from_main_chain_index: Mci,
        to_main_chain_index: Mci,
    },
    Witnessing {
        from_main_chain_index: Mci,
        to_main_chain_index: Mci,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: Address,
    pub amount: Amount,
}

/// Hash commitment published instead of the input itself in private
/// payments. The DB returns these ordered by hash value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendProof {
    pub spend_proof: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<UnitHash>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl PaymentPayload {
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// A data-feed value is either a string or a number; numbers are indexed in
/// a lexicographically sortable encoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataFeedValue {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for DataFeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFeedValue::Number(n) => write!(f, "{n}"),
            DataFeedValue::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefinitionPayload {
    pub address: Address,
    pub definition: Definition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<Amount>,
    pub is_private: bool,
    pub is_transferrable: bool,
    pub auto_destroy: bool,
    pub fixed_denominations: bool,
    pub issued_by_definer_only: bool,
    pub cosigned_by_definer: bool,
    pub spender_attested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestors: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denominations: Option<Vec<Amount>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetAttestorsPayload {
    pub asset: UnitHash,
    pub attestors: Vec<Address>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttestationPayload {
    pub address: Address,
    pub profile: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollPayload {
    pub question: String,
    pub choices: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VotePayload {
    pub unit: UnitHash,
    pub choice: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddressDefinitionChangePayload {
    /// Present in multi-author units to say whose definition changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub definition_chash: Address,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemVotePayload {
    pub subject: String,
    pub value: serde_json::Value,
}

/// One state-var mutation inside an AA response's `state` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub var: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete: bool,
}

/// Typed payload, dispatched on the enclosing message's `app`.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Payment(PaymentPayload),
    Data(serde_json::Value),
    DataFeed(BTreeMap<String, DataFeedValue>),
    Definition(DefinitionPayload),
    Asset(AssetPayload),
    AssetAttestors(AssetAttestorsPayload),
    Attestation(AttestationPayload),
    Poll(PollPayload),
    Vote(VotePayload),
    Text(String),
    Profile(serde_json::Value),
    DefinitionTemplate(serde_json::Value),
    State(Vec<StateUpdate>),
    AddressDefinitionChange(AddressDefinitionChangePayload),
    SystemVote(SystemVotePayload),
    SystemVoteCount(String),
}

impl Payload {
    /// Parse a raw JSON payload according to the message app.
    pub fn from_value(app: App, value: serde_json::Value) -> Result<Self, BraidError> {
        let err = |e: serde_json::Error| {
            BraidError::Structure(format!("bad {app} payload: {e}"))
        };
        Ok(match app {
            App::Payment => Payload::Payment(serde_json::from_value(value).map_err(err)?),
            App::Data => Payload::Data(value),
            App::DataFeed => Payload::DataFeed(serde_json::from_value(value).map_err(err)?),
            App::Definition => Payload::Definition(serde_json::from_value(value).map_err(err)?),
            App::Asset => Payload::Asset(serde_json::from_value(value).map_err(err)?),
            App::AssetAttestors => {
                Payload::AssetAttestors(serde_json::from_value(value).map_err(err)?)
            }
            App::Attestation => Payload::Attestation(serde_json::from_value(value).map_err(err)?),
            App::Poll => Payload::Poll(serde_json::from_value(value).map_err(err)?),
            App::Vote => Payload::Vote(serde_json::from_value(value).map_err(err)?),
            App::Text => Payload::Text(serde_json::from_value(value).map_err(err)?),
            App::Profile => Payload::Profile(value),
            App::DefinitionTemplate => Payload::DefinitionTemplate(value),
            App::State => Payload::State(serde_json::from_value(value).map_err(err)?),
            App::AddressDefinitionChange => {
                Payload::AddressDefinitionChange(serde_json::from_value(value).map_err(err)?)
            }
            App::SystemVote => Payload::SystemVote(serde_json::from_value(value).map_err(err)?),
            App::SystemVoteCount => {
                Payload::SystemVoteCount(serde_json::from_value(value).map_err(err)?)
            }
        })
    }

    pub fn to_value(&self) -> Result<serde_json::Value, BraidError> {
        let err = |e: serde_json::Error| BraidError::Serialization(e.to_string());
        Ok(match self {
            Payload::Payment(p) => serde_json::to_value(p).map_err(err)?,
            Payload::Data(v) => v.clone(),
            Payload::DataFeed(p) => serde_json::to_value(p).map_err(err)?,
            Payload::Definition(p) => serde_json::to_value(p).map_err(err)?,
            Payload::Asset(p) => serde_json::to_value(p).map_err(err)?,
            Payload::AssetAttestors(p) => serde_json::to_value(p).map_err(err)?,
            Payload::Attestation(p) => serde_json::to_value(p).map_err(err)?,
            Payload::Poll(p) => serde_json::to_value(p).map_err(err)?,
            Payload::Vote(p) => serde_json::to_value(p).map_err(err)?,
            Payload::Text(s) => serde_json::Value::String(s.clone()),
            Payload::Profile(v) => v.clone(),
            Payload::DefinitionTemplate(v) => v.clone(),
            Payload::State(p) => serde_json::to_value(p).map_err(err)?,
            Payload::AddressDefinitionChange(p) => serde_json::to_value(p).map_err(err)?,
            Payload::SystemVote(p) => serde_json::to_value(p).map_err(err)?,
            Payload::SystemVoteCount(s) => serde_json::Value::String(s.clone()),
        })
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

/// A typed payload inside a unit. The payload's JSON shape depends on `app`,
/// so (de)serialization goes through a raw intermediate and `Payload`
/// dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub app: App,
    pub payload_location: PayloadLocation,
    pub payload_hash: String,
    pub payload: Option<Payload>,
    pub spend_proofs: Option<Vec<SpendProof>>,
}

#[derive(Serialize, Deserialize)]
struct RawMessage {
    app: App,
    payload_location: PayloadLocation,
    payload_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spend_proofs: Option<Vec<SpendProof>>,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = match &self.payload {
            Some(p) => Some(p.to_value().map_err(|e| S::Error::custom(e.to_string()))?),
            None => None,
        };
        RawMessage {
            app: self.app,
            payload_location: self.payload_location,
            payload_hash: self.payload_hash.clone(),
            payload,
            spend_proofs: self.spend_proofs.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawMessage::deserialize(deserializer)?;
        let payload = match raw.payload {
            Some(v) => Some(
                Payload::from_value(raw.app, v).map_err(|e| D::Error::custom(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Message {
            app: raw.app,
            payload_location: raw.payload_location,
            payload_hash: raw.payload_hash,
            payload,
            spend_proofs: raw.spend_proofs,
        })
    }
}

impl Message {
    pub fn payment(&self) -> Option<&PaymentPayload> {
        match &self.payload {
            Some(Payload::Payment(p)) => Some(p),
            _ => None,
        }
    }
}

// ── Author ───────────────────────────────────────────────────────────────────

/// A unit author: address, optional inline definition, and authentifiers
/// keyed by definition path ("r", "r.0.1", …). BTreeMap keeps the wire form
/// key-sorted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<Definition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authentifiers: BTreeMap<String, String>,
}

/// Who earns a unit's headers commission, in shares summing to 100.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadersCommissionShare {
    pub address: Address,
    pub earned_headers_commission_share: u32,
}

// ── Unit ─────────────────────────────────────────────────────────────────────

/// The atomic DAG vertex. `unit` is the hash of the canonical form of all
/// other header and payload fields (authentifiers excluded).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub unit: UnitHash,
    pub version: String,
    pub alt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_units: Vec<UnitHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ball: Option<Ball>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ball_unit: Option<UnitHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness_list_unit: Option<UnitHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witnesses: Option<Vec<Address>>,
    pub authors: Vec<Author>,
    pub messages: Vec<Message>,
    pub timestamp: Timestamp,
    pub headers_commission: Amount,
    pub payload_commission: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tps_fee: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burn_fee: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oversize_fee: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_aa_responses: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned_headers_commission_recipients: Option<Vec<HeadersCommissionShare>>,
    /// Set when the unit was voided at stabilization; payloads are stripped
    /// and the content hash stands in for them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Unit {
    pub fn is_genesis(&self) -> bool {
        self.parent_units.is_empty()
    }

    /// Author addresses in unit order (which validation requires sorted).
    pub fn author_addresses(&self) -> Vec<Address> {
        self.authors.iter().map(|a| a.address.clone()).collect()
    }

    /// All five fee categories combined.
    pub fn total_commission(&self) -> Amount {
        self.headers_commission
            + self.payload_commission
            + self.tps_fee.unwrap_or(0)
            + self.burn_fee.unwrap_or(0)
            + self.oversize_fee.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_app_dispatch() {
        let json = serde_json::json!({
            "app": "payment",
            "payload_location": "inline",
            "payload_hash": "h",
            "payload": {
                "inputs": [
                    {"type": "issue", "amount": 1000, "serial_number": 1}
                ],
                "outputs": [
                    {"address": "A".repeat(32), "amount": 1000}
                ]
            }
        });
        let msg: Message = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(msg.app, App::Payment);
        let p = msg.payment().expect("payment payload");
        assert_eq!(p.total_output(), 1000);
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn data_feed_payload_keeps_numbers_and_strings() {
        let json = serde_json::json!({
            "app": "data_feed",
            "payload_location": "inline",
            "payload_hash": "h",
            "payload": {"price": 42, "label": "spot"}
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        match msg.payload {
            Some(Payload::DataFeed(feed)) => {
                assert!(matches!(feed["price"], DataFeedValue::Number(_)));
                assert!(matches!(feed["label"], DataFeedValue::Text(_)));
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }
}
