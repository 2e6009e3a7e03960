//! Reference identity, lifetime and messaging kernel.
//!
//! Every long-lived engine object is a [`Reference`]: it owns a stable
//! [`RefId`], a dual live/soft reference count and a record of *who* holds it.
//! The [`ReferenceManager`] is the explicit context that owns all of that
//! state:
//! * an arena of reference slots addressed by [`ReferenceKey`],
//! * the serialized and internal id directories,
//! * group and subscriber tables plus four time-ordered delivery queues used by
//!   the [`Message`] bus.
//!
//! Ids below [`INTERNAL_REF_THRESHOLD`] belong to persisted objects and are
//! allocated by the owning world; ids at or above it (and id 0) are
//! process-local.

mod clock;
mod error;
mod manager;
mod message;
mod messaging;
mod reference;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ReferenceError, ReferenceResult};
pub use manager::{ManagerConfig, ReferenceManager};
pub use message::{DeliveryKind, Message, MessageData};
pub use reference::{Handle, Reference, ReferenceKey};
pub use state::ReferenceState;

pub use uuid::Uuid as Uid;

/// Reference identifier. Zero means "anonymous / not tracked by id".
pub type RefId = u32;

/// First identifier of the process-local (never persisted) id band.
pub const INTERNAL_REF_THRESHOLD: RefId = 0x8000_0000;

/// Type identifier of the reference base type.
pub const RTID_REFERENCE: Uid = Uid::from_u128(0x50F0C010_5105_407A_A1CC_BFCF9872189D);

/// Returns true for ids that are never written to a world database.
#[inline]
pub fn is_internal_id(id: RefId) -> bool {
    id >= INTERNAL_REF_THRESHOLD || id == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_band_includes_zero_and_threshold() {
        assert!(is_internal_id(0));
        assert!(is_internal_id(INTERNAL_REF_THRESHOLD));
        assert!(is_internal_id(u32::MAX));
        assert!(!is_internal_id(1));
        assert!(!is_internal_id(INTERNAL_REF_THRESHOLD - 1));
    }

    #[test]
    fn reference_type_id_matches_registry_value() {
        assert_eq!(
            RTID_REFERENCE.to_string(),
            "50f0c010-5105-407a-a1cc-bfcf9872189d"
        );
    }
}
