use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use braid_core::aa::AaDefinition;
use braid_core::definition::Definition;
use braid_core::joint::Joint;
use braid_core::types::{Address, Amount, Mci, Timestamp, UnitHash};
use braid_core::unit::AssetPayload;

/// One spendable output, keyed in the tree by (unit, message_index,
/// output_index). `is_spent` transitions 0→1 exactly once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub address: Address,
    pub asset: Option<UnitHash>,
    pub amount: Amount,
    pub is_spent: bool,
    pub main_chain_index: Option<Mci>,
}

/// A definition stored under its chash, with the unit that first carried it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRow {
    pub definition: Definition,
    pub unit: UnitHash,
}

/// A deployed autonomous agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaRow {
    pub address: Address,
    pub definition: AaDefinition,
    pub unit: UnitHash,
    pub main_chain_index: Mci,
    pub base_aa: Option<Address>,
    /// Total bytes of live state vars. Must stay within the AA's byte
    /// balance once it exceeds the free allowance.
    pub storage_size: u64,
}

/// A stabilized payment into an AA, queued for deterministic execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerRow {
    /// The unit that paid the AA.
    pub unit: UnitHash,
    /// The AA being triggered.
    pub aa_address: Address,
    /// authors[0].address of the triggering unit.
    pub trigger_address: Address,
    /// Aggregated amounts to the AA, keyed "base" or by asset id.
    pub outputs: BTreeMap<String, Amount>,
    /// First data payload of the triggering unit, if any.
    pub data: Option<serde_json::Value>,
    pub main_chain_index: Mci,
}

/// Outcome of executing one trigger against one AA.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaResponseRow {
    pub trigger_unit: UnitHash,
    pub aa_address: Address,
    pub main_chain_index: Mci,
    pub bounced: bool,
    pub response_unit: Option<UnitHash>,
    pub error: Option<String>,
}

/// Headers-commission or witnessing output earned at an MCI, spendable via
/// range inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommissionOutputRow {
    pub amount: Amount,
    pub is_spent: bool,
}

/// An asset definition, keyed by its defining unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetRow {
    pub payload: AssetPayload,
    pub definer: Address,
    pub main_chain_index: Option<Mci>,
}

/// A joint whose parents are not all known yet, parked until the missing
/// units arrive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnhandledJoint {
    pub joint: Joint,
    pub peer: Option<String>,
    pub received_at: Timestamp,
    pub missing_units: Vec<UnitHash>,
}

/// Why a unit was archived. Detection of "was this archived?" must ignore
/// the reason; it exists for diagnostics only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivalReason {
    /// Uncovered nonserial: all rows deleted.
    Uncovered,
    /// Final-bad stable: payloads stripped, skeleton kept.
    Voided,
}
