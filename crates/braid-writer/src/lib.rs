pub mod ingest;
pub mod locks;
pub mod writer;

pub use ingest::handle_joint;
pub use writer::{save_joint, SaveOutcome};
