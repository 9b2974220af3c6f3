use serde::{Deserialize, Serialize};

use braid_core::definition::Definition;
use braid_core::types::{Address, Amount, Timestamp};

/// Everything a deployment supplies to found a network. Real deployments
/// load this from a reviewed file; tests generate throwaway keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisParams {
    /// The initial witness list, sorted, exactly COUNT_WITNESSES long.
    /// Embedded into the genesis unit; later units may reference it via
    /// witness_list_unit.
    pub witnesses: Vec<Address>,
    /// Definition of the address receiving the issuance remainder.
    pub issuance_definition: Definition,
    /// Base units paid to each witness at genesis, so witnesses can fund
    /// the commissions of the units that drive stability.
    pub witness_endowment: Amount,
    /// Founding timestamp (Unix seconds UTC).
    pub timestamp: Timestamp,
}
