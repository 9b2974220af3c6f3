pub mod catchup;
pub mod hash_tree;
pub mod light;
pub mod witness_proof;

pub use catchup::{prepare_catchup_chain, process_catchup_chain, CatchupChain};
pub use hash_tree::{process_hash_tree, read_hash_tree, BallProof};
pub use light::{check_tps_fee_quote, prepare_parents_and_last_ball, validate_signed_package};
pub use witness_proof::{prepare_witness_proof, process_witness_proof, WitnessProof};
