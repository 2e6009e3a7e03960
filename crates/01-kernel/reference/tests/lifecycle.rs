//! Reference counting, holder bookkeeping and teardown through the manager.

mod support;

use reference::{
    is_internal_id, ReferenceManager, INTERNAL_REF_THRESHOLD, RTID_REFERENCE,
};
use support::{journal, probe, RTID_PROBE};

/// Named holders are counted per holder and drop out of the holder map once
/// their last reference is gone.
#[test]
fn named_holders_adjust_live_count() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let target = probe(&mut manager, 5, "target", &log);
    let holder_a = probe(&mut manager, 6, "a", &log);
    let holder_b = probe(&mut manager, 7, "b", &log);

    assert!(!target.is_internal());
    assert_eq!(manager.add_reference(target.key(), Some(holder_a.key()), false), 1);
    assert_eq!(manager.add_reference(target.key(), Some(holder_b.key()), false), 2);
    assert_eq!(manager.remove_reference(target.key(), Some(holder_a.key()), false), 1);

    assert_eq!(manager.reference_count(target.key(), true), 1);
    assert_eq!(manager.reference_holders(target.key()), vec![(holder_b.key(), 1)]);
    assert!(manager.held_references(holder_a.key()).is_empty());
    assert_eq!(manager.held_references(holder_b.key()), vec![(target.key(), 1)]);
}

/// Fresh internal ids climb from the threshold.
#[test]
fn internal_ids_increase_from_threshold() {
    let mut manager = ReferenceManager::new();
    let ids: Vec<_> = (0..3).map(|_| manager.generate_internal_ref_id()).collect();

    assert!(ids.iter().all(|&id| id >= INTERNAL_REF_THRESHOLD));
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(ids.iter().all(|&id| is_internal_id(id)));
}

/// Removing a reference the holder never added changes nothing.
#[test]
fn redundant_removal_is_absorbed() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let target = probe(&mut manager, 1, "target", &log);
    let stranger = probe(&mut manager, 2, "stranger", &log);

    manager.add_reference(target.key(), None, false);
    assert_eq!(manager.remove_reference(target.key(), Some(stranger.key()), false), 1);
    assert_eq!(manager.remove_reference(target.key(), None, false), 0);
    assert_eq!(manager.remove_reference(target.key(), None, false), 0);
    assert_eq!(target.borrow().disposals, 1);
}

/// A disconnecting removal keeps the soft count, and reconnecting restores
/// the live count without inflating it.
#[test]
fn disconnect_and_reconnect_preserve_soft_count() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let target = probe(&mut manager, 1, "target", &log);
    let holder = probe(&mut manager, 2, "holder", &log);

    manager.add_reference(target.key(), None, false);
    manager.add_reference(target.key(), Some(holder.key()), false);
    manager.remove_reference(target.key(), Some(holder.key()), true);
    assert_eq!(manager.reference_count(target.key(), true), 1);
    assert_eq!(manager.reference_count(target.key(), false), 2);

    manager.add_reference(target.key(), Some(holder.key()), true);
    assert_eq!(manager.reference_count(target.key(), true), 2);
    assert_eq!(manager.reference_count(target.key(), false), 2);
}

/// The last live reference going away deletes the object and cascades to
/// what it held.
#[test]
fn last_release_cascades_through_holds() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let parent = probe(&mut manager, 1, "parent", &log);
    let child = probe(&mut manager, 2, "child", &log);

    manager.add_reference(parent.key(), None, false);
    manager.add_reference(child.key(), Some(parent.key()), false);

    assert_eq!(manager.remove_reference(parent.key(), None, false), 0);
    assert!(!manager.is_valid_reference(parent.key()));
    assert!(!manager.is_valid_reference(child.key()));
    assert!(manager.is_disposed(child.key()));
    assert_eq!(*log.borrow(), vec!["dispose parent", "dispose child"]);
}

/// When a holder goes away its hold is released as a disconnect, so the
/// target remembers the link in its soft count.
#[test]
fn deleted_holder_disconnects_from_target() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let target = probe(&mut manager, 1, "target", &log);
    let holder = probe(&mut manager, 2, "holder", &log);

    manager.add_reference(target.key(), None, false);
    manager.add_reference(target.key(), Some(holder.key()), false);
    assert!(manager.delete_reference(holder.key()));

    assert_eq!(manager.reference_count(target.key(), true), 1);
    assert_eq!(manager.reference_count(target.key(), false), 2);
    assert!(manager.reference_holders(target.key()).is_empty());
}

/// Forced deletion of one member of a holder cycle tears both down once.
#[test]
fn forced_deletion_breaks_cycles() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let a = probe(&mut manager, 1, "a", &log);
    let b = probe(&mut manager, 2, "b", &log);

    manager.add_reference(a.key(), Some(b.key()), false);
    manager.add_reference(b.key(), Some(a.key()), false);

    assert!(manager.delete_reference(a.key()));
    assert!(!manager.delete_reference(a.key()));
    assert!(!manager.delete_reference(b.key()));

    assert_eq!(a.borrow().disposals, 1);
    assert_eq!(b.borrow().disposals, 1);
    assert_eq!(*log.borrow(), vec!["dispose a", "dispose b"]);
}

/// Unregistering hides the object from id lookup and validity checks even
/// though handles still keep the allocation alive.
#[test]
fn unregistered_reference_is_no_longer_valid() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let target = probe(&mut manager, 42, "target", &log);

    assert!(manager.unregister_reference(42, false));
    assert_eq!(manager.get_reference(42), None);
    assert!(!manager.is_valid_reference(target.key()));
    assert!(!manager.unregister_reference(42, false));
    assert_eq!(target.borrow().name, "target");
}

/// Capability queries chain to the reference base type.
#[test]
fn type_queries_chain_to_base() {
    let log = journal();
    let mut manager = ReferenceManager::new();
    let target = probe(&mut manager, 3, "target", &log);

    assert!(manager.query_reference_type(target.key(), &RTID_PROBE));
    assert!(manager.query_reference_type(target.key(), &RTID_REFERENCE));
    assert_eq!(manager.reference_type(target.key()), Some(RTID_PROBE));

    manager.delete_reference(target.key());
    assert!(!manager.query_reference_type(target.key(), &RTID_PROBE));
}

#[cfg(feature = "proptest")]
mod prop {
    use super::*;
    use proptest::prelude::*;
    use reference::ReferenceKey;

    #[derive(Clone, Debug)]
    enum Op {
        Add { target: usize, holder: Option<usize>, reconnecting: bool },
        Remove { target: usize, holder: Option<usize>, disconnecting: bool },
        Delete(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        let holder = prop::option::of(0usize..5);
        prop_oneof![
            4 => (0usize..5, holder.clone(), any::<bool>()).prop_map(|(target, holder, reconnecting)| {
                Op::Add { target, holder, reconnecting }
            }),
            3 => (0usize..5, holder, any::<bool>()).prop_map(|(target, holder, disconnecting)| {
                Op::Remove { target, holder, disconnecting }
            }),
            1 => (0usize..5).prop_map(Op::Delete),
        ]
    }

    fn check(manager: &ReferenceManager, keys: &[ReferenceKey]) {
        for &key in keys {
            let Some(state) = manager.state(key) else { continue };
            assert!(state.live_count() >= 0);
            assert!(state.soft_count() >= state.live_count());
            let named: i32 = state.holders().map(|(_, count)| count).sum();
            assert_eq!(state.live_count(), named + state.anonymous_count());
            for (holder, count) in manager.reference_holders(key) {
                let held = manager.state(holder).map_or(0, |holder| holder.held_count(key));
                assert_eq!(held, count);
            }
        }
    }

    proptest! {
        /// Counts and holder maps stay consistent under arbitrary
        /// add/remove/delete sequences.
        #[test]
        fn counts_and_holder_maps_stay_consistent(ops in prop::collection::vec(op(), 1..64)) {
            let log = journal();
            let mut manager = ReferenceManager::new();
            let keys: Vec<_> = (0..5)
                .map(|i| probe(&mut manager, i + 1, "p", &log).key())
                .collect();

            for op in ops {
                match op {
                    Op::Add { target, holder, reconnecting } => {
                        manager.add_reference(keys[target], holder.map(|h| keys[h]), reconnecting);
                    }
                    Op::Remove { target, holder, disconnecting } => {
                        manager.remove_reference(keys[target], holder.map(|h| keys[h]), disconnecting);
                    }
                    Op::Delete(target) => {
                        manager.delete_reference(keys[target]);
                    }
                }
                check(&manager, &keys);
            }
        }
    }
}
