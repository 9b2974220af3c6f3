//! ─── Braid Protocol Constants ───────────────────────────────────────────────
//!
//! A unit-DAG braided into a total order by witnesses and the main chain.
//!
//! Total supply: 10^15 base units, issued once in the genesis unit.
//! Network tag ("alt") distinguishes chains sharing the same code.

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Length of a base64-encoded SHA-256: unit hashes, balls, payload hashes.
pub const HASH_LENGTH: usize = 44;

/// Length of a base64-encoded ed25519 public key (32 bytes).
pub const PUBKEY_LENGTH: usize = 44;

/// Length of a base64-encoded ed25519 signature (64 bytes).
pub const SIG_LENGTH: usize = 88;

/// Length of a base32 chash160 address.
pub const ADDRESS_LENGTH: usize = 32;

// ── Network ──────────────────────────────────────────────────────────────────

/// Current protocol version written into new units.
pub const VERSION: &str = "4.0";

/// Versions this node accepts. "1.0" selects the legacy source-string
/// serialization; later versions use canonical JSON.
pub const SUPPORTED_VERSIONS: [&str; 4] = ["1.0", "2.0", "3.0", "4.0"];

/// Network tag. Units and signed packages from other alts are rejected.
pub const ALT: &str = "1";

// ── Supply ───────────────────────────────────────────────────────────────────

/// Total fixed supply in base units. Issued by the genesis unit; no further
/// issuance is possible.
pub const TOTAL_SUPPLY: u64 = 1_000_000_000_000_000;

// ── Unit limits ──────────────────────────────────────────────────────────────

/// Maximum serialized unit size in bytes.
pub const MAX_UNIT_LENGTH: usize = 5_000_000;

pub const MAX_MESSAGES_PER_UNIT: usize = 128;
pub const MAX_AUTHORS_PER_UNIT: usize = 16;
pub const MAX_PARENTS_PER_UNIT: usize = 16;

/// Depth cap for any recursive walk over untrusted structures. Fails long
/// before native stack exhaustion.
pub const MAX_STRUCTURE_DEPTH: usize = 1000;

// ── Witnesses ────────────────────────────────────────────────────────────────

/// Size of every witness list.
pub const COUNT_WITNESSES: usize = 12;

/// Witnesses that must be encountered on best-parent ancestry for the
/// witnessed level: ceil(2/3 · COUNT_WITNESSES).
pub const MAJORITY_OF_WITNESSES: usize = (2 * COUNT_WITNESSES + 2) / 3;

/// Maximum witness-list difference tolerated between neighbors before the
/// common-op-list upgrade.
pub const MAX_WITNESSLIST_MUTATIONS: usize = 1;

// ── Address definitions ──────────────────────────────────────────────────────

/// Complexity budget of an address definition (sig/hash/address/data-feed
/// leaves each cost 1).
pub const MAX_COMPLEXITY: u32 = 100;

/// Total op budget of an address definition.
pub const MAX_OPS: u32 = 2000;

/// Nesting depth budget of an address or AA definition.
pub const MAX_DEPTH: usize = 100;

// ── Autonomous agents ────────────────────────────────────────────────────────

/// Longest string allowed anywhere inside an AA definition.
pub const MAX_AA_STRING_LENGTH: usize = 4096;

/// JSON-stringified size cap for a stored AA definition. Enforced at
/// validation so the storage layer is never the failure point.
pub const MAX_AA_DEFINITION_LENGTH: usize = 1_000_000;

/// Cap on response units (primary + secondary) per primary trigger.
pub const MAX_RESPONSES_PER_PRIMARY_TRIGGER: usize = 10;

/// Default bounce fee in base units when an AA declares none.
pub const DEFAULT_BOUNCE_FEE: u64 = 10_000;

/// Minimum state-var storage an AA gets for free; beyond this,
/// storage_size must stay within the AA's byte balance.
pub const FULL_TRANSFER_INPUT_SIZE: u64 = 88;

/// Serialized size of a plain transfer input, used for fee arithmetic.
pub const TRANSFER_INPUT_SIZE: u64 = 60;

// ── Fees ─────────────────────────────────────────────────────────────────────

/// Units larger than this pay an oversize fee.
pub const THRESHOLD_SIZE: usize = 10_000;

/// Window (in MCIs) over which the recent unit rate is measured for the
/// TPS fee.
pub const TPS_INTERVAL: u64 = 10;

/// Base multiplier applied to the measured rate when computing the
/// required TPS fee.
pub const TPS_FEE_MULTIPLIER: u64 = 10;

/// MCIs processed per batch when advancing commissions after an outage,
/// bounding peak memory.
pub const COMMISSION_BATCH: u64 = 100;

/// Witnessing-commission window: witnesses that authored a unit within this
/// many trailing MCIs share the pool.
pub const WITNESSING_WINDOW_MCIS: u64 = 2 * COUNT_WITNESSES as u64;

// ── Private chains ───────────────────────────────────────────────────────────

pub const MAX_PRIVATE_CHAIN_DEPTH: usize = 100;

// ── Upgrade gates (explicit MCI constants, never boolean flags) ──────────────

/// Canonical-JSON serialization applies from genesis on this network; the
/// legacy source-string form survives only for version "1.0" units.
pub const UPGRADE_MCI_V2_JSON: u64 = 0;

/// Before this MCI, data-feed numeric indexing is limited to 15 significant
/// mantissa digits. The rule that applies to a feed is the one active at the
/// feed unit's own MCI.
pub const UPGRADE_MCI_DATAFEED_PRECISION: u64 = 1_400_000;

/// Before this MCI, a parent is eligible as best parent only if it shares
/// at least COUNT_WITNESSES - MAX_WITNESSLIST_MUTATIONS witnesses with the
/// child.
pub const UPGRADE_MCI_COMMON_WITNESSES: u64 = 2_000_000;

/// TPS, burn and oversize fees apply from this MCI.
pub const UPGRADE_MCI_V4: u64 = 3_000_000;

/// Autonomous agents may be deployed and triggered from this MCI. Enabled
/// from genesis on this network.
pub const UPGRADE_MCI_AA: u64 = 0;

// ── Stability / retention ────────────────────────────────────────────────────

/// How many MCIs behind the stability point the joint KV remains
/// retrievable; min_retrievable_mci trails last_stable_mci by this depth.
pub const RETRIEVABLE_DEPTH: u64 = 1000;

/// Stable-units-by-MCI cache keeps this many MCIs beyond the retention
/// floor.
pub const STABLE_CACHE_BUFFER: u64 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_is_ceil_two_thirds() {
        // ceil(2·12/3) = 8
        assert_eq!(MAJORITY_OF_WITNESSES, 8);
    }
}
