pub mod executor;
pub mod expr;
pub mod state;

pub use executor::{execute_triggers, ResponseJoint};
pub use state::StagedAaState;
