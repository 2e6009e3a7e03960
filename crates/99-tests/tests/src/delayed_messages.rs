//! Delayed delivery driven by a manually advanced clock.

use reference::{DeliveryKind, ManualClock, Message, ReferenceManager};
use world::{DummyNode, TypeCatalog, World, WorldConfig, RTID_DUMMY_OBJECT, WORLD_COMPONENT_MODIFIED};

fn world_with_clock(clock: &ManualClock) -> World {
    crate::init_logging();
    let manager = ReferenceManager::with_clock(clock.clone());
    World::create_with_manager(
        WorldConfig::transient(),
        &TypeCatalog::with_builtin_types(),
        manager,
    )
    .unwrap()
}

/// A modification queued with a delay reaches the object's node only once
/// the clock passes its delivery time.
#[test]
fn delayed_modifications_reach_nodes_when_due() {
    let clock = ManualClock::new();
    let mut world = world_with_clock(&clock);
    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    let node = world
        .create_object_node(false, RTID_DUMMY_OBJECT, &object)
        .unwrap();

    let message = Message::new(WORLD_COMPONENT_MODIFIED).with_context("Tint");
    assert!(world
        .manager_mut()
        .send_message_to_subscribers(object.id(), message, 0.5));
    assert_eq!(world.manager().pending_in(DeliveryKind::Subscribers), 1);

    clock.advance(0.25);
    assert_eq!(world.process_messages(), 0);

    clock.advance(0.25);
    assert_eq!(world.process_messages(), 1);
    assert_eq!(world.manager().pending_messages(), 0);

    let seen = world
        .manager()
        .with_reference::<DummyNode, _>(node.key(), |node| node.modifications().to_vec())
        .unwrap();
    assert_eq!(seen, vec!["Tint"]);
}

/// Queued messages come out in delivery-time order, not send order.
#[test]
fn queued_messages_are_ordered_by_delivery_time() {
    let clock = ManualClock::new();
    let mut world = world_with_clock(&clock);
    let object = world.create_object(false, RTID_DUMMY_OBJECT).unwrap();
    let node = world
        .create_object_node(false, RTID_DUMMY_OBJECT, &object)
        .unwrap();

    for (context, delay) in [("Late", 2.0), ("Early", 1.0)] {
        let message = Message::new(WORLD_COMPONENT_MODIFIED).with_context(context);
        world
            .manager_mut()
            .send_message_to_subscribers(object.id(), message, delay);
    }

    clock.advance(5.0);
    assert_eq!(world.process_messages(), 2);
    let seen = world
        .manager()
        .with_reference::<DummyNode, _>(node.key(), |node| node.modifications().to_vec())
        .unwrap();
    assert_eq!(seen, vec!["Early", "Late"]);
}
