pub mod canonical;
pub mod chash;
pub mod datafeed;
pub mod hash;
pub mod keys;

pub use chash::{address_from_definition, is_chash_valid};
pub use hash::{ball_hash, sha256_b64, signed_package_hash, unit_hash, unit_hash_to_sign};
pub use keys::{verify_sig, KeyPair};
