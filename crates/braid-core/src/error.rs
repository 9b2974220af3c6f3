use thiserror::Error;

/// Abstract error kinds, used for peer-facing policy: whether to retry,
/// park, ban, or abort. Every `BraidError` maps onto exactly one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Permanent rejection of the unit itself; the author pays.
    UnitError,
    /// Peer misbehavior: bad hash, duplicate, wrong ball.
    JointError,
    /// DB/IO hiccup or vendor unavailability; retry-eligible.
    Transient,
    /// Known parents missing; joint may be parked and retried later.
    UnresolvedDependency,
    /// Too far behind; switch to catchup sync.
    NeedHashTree,
    /// Peer sent a ball/unit mismatch.
    InvalidJoint,
    /// A code bug. Abort the operation with full context; never swallow.
    Internal,
}

#[derive(Debug, Error)]
pub enum BraidError {
    // ── Structural unit errors ───────────────────────────────────────────────
    #[error("invalid structure: {0}")]
    Structure(String),

    #[error("wrong unit hash: expected {expected}, got {got}")]
    WrongHash { expected: String, got: String },

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("wrong network alt: {0}")]
    WrongAlt(String),

    #[error("unit too large: {size} bytes, max {max}")]
    UnitTooLarge { size: usize, max: usize },

    #[error("too many {what}: {got}, max {max}")]
    TooMany { what: &'static str, got: usize, max: usize },

    #[error("structure depth exceeded at {0}")]
    StructureDepthExceeded(usize),

    // ── Semantic unit errors ─────────────────────────────────────────────────
    #[error("unknown parent unit: {0}")]
    UnknownParent(String),

    #[error("parents not ordered or duplicated")]
    ParentsNotOrdered,

    #[error("last ball unit {0} is not stable")]
    LastBallNotStable(String),

    #[error("last ball mismatch for {unit}: expected {expected}, got {got}")]
    LastBallMismatch { unit: String, expected: String, got: String },

    #[error("witness list error: {0}")]
    WitnessList(String),

    #[error("authentication failed for {address}: {reason}")]
    Authentication { address: String, reason: String },

    #[error("definition error: {0}")]
    Definition(String),

    #[error("complexity exceeded: {got} > {max}")]
    ComplexityExceeded { got: u32, max: u32 },

    #[error("op count exceeded: {got} > {max}")]
    OpsExceeded { got: u32, max: u32 },

    #[error("definition depth exceeded: {got} > {max}")]
    DepthExceeded { got: usize, max: usize },

    #[error("message {message_index} invalid: {reason}")]
    Message { message_index: usize, reason: String },

    #[error("balance conservation violated in message {message_index}: inputs {inputs}, outputs plus fees {outputs}")]
    BalanceViolation { message_index: usize, inputs: u64, outputs: u64 },

    #[error("input {unit}:{message_index}:{output_index} already spent in this unit")]
    DoubleSpendWithinUnit { unit: String, message_index: u32, output_index: u32 },

    #[error("insufficient tps fee: need {need}, have {have}")]
    InsufficientTpsFee { need: u64, have: u64 },

    #[error("unit error: {0}")]
    UnitError(String),

    // ── Joint errors ─────────────────────────────────────────────────────────
    #[error("joint error: {0}")]
    JointError(String),

    #[error("unit already known: {0}")]
    KnownUnit(String),

    #[error("unit was archived: {0}")]
    Archived(String),

    // ── Transient ────────────────────────────────────────────────────────────
    #[error("transient error: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Dependencies / sync ──────────────────────────────────────────────────
    #[error("unresolved dependencies: {0:?}")]
    UnresolvedDependencies(Vec<String>),

    #[error("need hash tree")]
    NeedHashTree,

    #[error("invalid joint: {0}")]
    InvalidJoint(String),

    // ── Internal ─────────────────────────────────────────────────────────────
    #[error("internal consistency error: {0}")]
    Internal(String),
}

impl BraidError {
    pub fn kind(&self) -> ErrorKind {
        use BraidError::*;
        match self {
            Structure(_) | UnsupportedVersion(_) | WrongAlt(_)
            | UnitTooLarge { .. } | TooMany { .. } | StructureDepthExceeded(_)
            | UnknownParent(_) | ParentsNotOrdered | LastBallNotStable(_)
            | LastBallMismatch { .. } | WitnessList(_) | Authentication { .. }
            | Definition(_) | ComplexityExceeded { .. } | OpsExceeded { .. }
            | DepthExceeded { .. } | Message { .. } | BalanceViolation { .. }
            | DoubleSpendWithinUnit { .. } | InsufficientTpsFee { .. } | UnitError(_) => {
                ErrorKind::UnitError
            }
            WrongHash { .. } | JointError(_) | KnownUnit(_) | Archived(_) => {
                ErrorKind::JointError
            }
            Transient(_) | Storage(_) | Serialization(_) => ErrorKind::Transient,
            UnresolvedDependencies(_) => ErrorKind::UnresolvedDependency,
            NeedHashTree => ErrorKind::NeedHashTree,
            InvalidJoint(_) => ErrorKind::InvalidJoint,
            Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_partition_the_taxonomy() {
        assert_eq!(BraidError::WrongAlt("2".into()).kind(), ErrorKind::UnitError);
        assert_eq!(BraidError::KnownUnit("U".into()).kind(), ErrorKind::JointError);
        assert_eq!(BraidError::NeedHashTree.kind(), ErrorKind::NeedHashTree);
        assert_eq!(
            BraidError::UnresolvedDependencies(vec!["U".into()]).kind(),
            ErrorKind::UnresolvedDependency
        );
        assert_eq!(BraidError::Internal("bug".into()).kind(), ErrorKind::Internal);
    }
}
