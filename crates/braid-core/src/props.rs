use serde::{Deserialize, Serialize};

use crate::types::{Address, Amount, Level, Mci, Sequence, Timestamp, UnitHash};

/// The per-unit consensus row: everything the main-chain engine needs
/// without re-reading the joint. Owned by the storage layer; mutated by the
/// main-chain engine under the write lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitProps {
    pub unit: UnitHash,
    pub level: Level,
    pub witnessed_level: Level,
    pub best_parent_unit: Option<UnitHash>,
    pub parent_units: Vec<UnitHash>,
    pub witness_list_unit: Option<UnitHash>,
    pub last_ball_unit: Option<UnitHash>,
    pub is_on_main_chain: bool,
    pub main_chain_index: Option<Mci>,
    pub latest_included_mc_index: Option<Mci>,
    /// No children yet (a DAG tip).
    pub is_free: bool,
    pub is_stable: bool,
    pub sequence: Sequence,
    pub author_addresses: Vec<Address>,
    pub timestamp: Timestamp,
    pub headers_commission: Amount,
    pub payload_commission: Amount,
}

impl UnitProps {
    /// Tie-break helper for every deterministic ordering in the engine:
    /// (witnessed_level desc, level - witnessed_level asc, unit hash asc).
    pub fn best_parent_key(&self) -> (std::cmp::Reverse<Level>, Level, UnitHash) {
        (
            std::cmp::Reverse(self.witnessed_level),
            self.level - self.witnessed_level,
            self.unit.clone(),
        )
    }
}
