pub mod commission;
pub mod oversize;
pub mod sizes;
pub mod tps;

pub use commission::update_commissions;
pub use oversize::required_oversize_fee;
pub use sizes::{headers_size, payload_size, unit_size};
pub use tps::{min_plausible_tps_fee, required_tps_fee, settle_tps_fees};
