pub mod graph;
pub mod main_chain;
pub mod stability;
pub mod stabilizer;

pub use graph::{determine_best_parent, is_included, witnessed_level_for};
pub use main_chain::update_main_chain;
pub use stability::{can_stabilize, is_stable_in_view};
pub use stabilizer::{stabilize_ready, StabilizationOutcome};
