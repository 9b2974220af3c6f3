use serde::{Deserialize, Serialize};

use crate::types::{Ball, UnitHash};
use crate::unit::Unit;

/// The wire wrapper around a unit. `ball` and `skiplist_units` are present
/// only when the sender already knows the unit is stable (catchup traffic);
/// fresh broadcasts carry the bare unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub unit: Unit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ball: Option<Ball>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skiplist_units: Option<Vec<UnitHash>>,
}

impl Joint {
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            ball: None,
            skiplist_units: None,
        }
    }

    pub fn unit_hash(&self) -> &UnitHash {
        &self.unit.unit
    }
}
