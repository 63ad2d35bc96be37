//! Error taxonomy shared by every collector.
//!
//! Every variant is local and recoverable: the rejected operation leaves the
//! heap untouched and the caller may carry on with the next operation.

use thiserror::Error;

use crate::memory::object::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// Negative or reserved identity, or an identity that is live or retired.
    #[error("invalid object id {raw}: {reason}")]
    InvalidIdentity { raw: i64, reason: &'static str },

    #[error("invalid allocation size {size} (heap capacity {capacity})")]
    InvalidSize { size: usize, capacity: usize },

    #[error("object {0} does not exist")]
    MissingObject(ObjectId),

    #[error("object {0} may not reference itself")]
    SelfReference(ObjectId),

    #[error("edge {from} -> {to} does not exist")]
    MissingEdge { from: ObjectId, to: ObjectId },

    #[error("object {0} is already a root")]
    AlreadyRoot(ObjectId),

    #[error("object {0} is not a root")]
    NotRoot(ObjectId),

    #[error("out of memory: requested {requested}, {free} of {capacity} free after collection")]
    OutOfMemory {
        requested: usize,
        free: usize,
        capacity: usize,
    },
}

impl GcError {
    /// Short machine-friendly label, used in simulation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            GcError::InvalidIdentity { .. } => "invalid-identity",
            GcError::InvalidSize { .. } => "invalid-size",
            GcError::MissingObject(_) => "missing-object",
            GcError::SelfReference(_) => "self-reference",
            GcError::MissingEdge { .. } => "missing-edge",
            GcError::AlreadyRoot(_) => "already-root",
            GcError::NotRoot(_) => "not-root",
            GcError::OutOfMemory { .. } => "out-of-memory",
        }
    }
}

pub type GcResult<T> = Result<T, GcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_object() {
        let err = GcError::MissingEdge {
            from: ObjectId::new(1),
            to: ObjectId::new(2),
        };
        assert_eq!(err.to_string(), "edge obj_1 -> obj_2 does not exist");
        assert_eq!(err.kind(), "missing-edge");
    }
}
