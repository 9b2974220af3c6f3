pub mod aa;
pub mod constants;
pub mod definition;
pub mod error;
pub mod joint;
pub mod props;
pub mod types;
pub mod unit;

pub use error::{BraidError, ErrorKind};
pub use joint::Joint;
pub use props::UnitProps;
pub use types::{Address, Amount, Ball, Level, Mci, PubKey, Sequence, Timestamp, UnitHash};
pub use unit::{Author, Input, Message, Output, Payload, Unit};
