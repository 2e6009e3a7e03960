use thiserror::Error;

use crate::{RefId, ReferenceKey, Uid};

pub type ReferenceResult<T> = Result<T, ReferenceError>;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference {0:?} is no longer valid")]
    Stale(ReferenceKey),

    #[error("no reference registered with id 0x{0:x}")]
    UnknownId(RefId),

    #[error("reference 0x{id:x} is already borrowed")]
    Busy { id: RefId },

    #[error("reference 0x{id:x} is of type {found}, expected {expected}")]
    TypeMismatch { id: RefId, found: Uid, expected: String },
}

impl ReferenceError {
    pub fn type_mismatch(id: RefId, found: Uid, expected: impl Into<String>) -> Self {
        ReferenceError::TypeMismatch {
            id,
            found,
            expected: expected.into(),
        }
    }
}
