//! Message routing: direct, group, subscriber and broadcast delivery plus
//! the four delayed queues.

use log::{trace, warn};
use smallvec::SmallVec;

use crate::{DeliveryKind, Message, RefId, ReferenceKey, ReferenceManager, Uid};

/// Which queued messages a pump pass touches.
#[derive(Clone, Copy, Debug)]
pub(crate) enum MessageFilter {
    Any,
    From(RefId),
    /// Messages sent by the id, or addressed to it directly.
    Involving(RefId),
}

impl MessageFilter {
    fn matches(self, message: &Message) -> bool {
        match self {
            MessageFilter::Any => true,
            MessageFilter::From(id) => message.from_id == id,
            MessageFilter::Involving(id) => {
                message.from_id == id
                    || (message.kind == Some(DeliveryKind::Individual) && message.to_id == id)
            }
        }
    }
}

type Targets = SmallVec<[RefId; 8]>;

impl ReferenceManager {
    /// Sends `message` to one reference. Returns false when `to` is not
    /// registered. Immediate sends return the handler's result; delayed
    /// sends return true once queued.
    pub fn send_message_to(&mut self, from: RefId, to: RefId, mut message: Message, delay: f64) -> bool {
        if self.get_reference(to).is_none() {
            trace!("message {} dropped: 0x{to:x} is not registered", message.message_id);
            return false;
        }
        self.stamp(&mut message, from, DeliveryKind::Individual);
        message.to_id = to;
        self.dispatch(message, delay)
    }

    /// Sends `message` to every member of `group`. False for unknown groups.
    pub fn send_message_to_group(
        &mut self,
        from: RefId,
        group: Uid,
        mut message: Message,
        delay: f64,
    ) -> bool {
        if !self.groups.contains_key(&group) {
            trace!("message {} dropped: group {group} does not exist", message.message_id);
            return false;
        }
        self.stamp(&mut message, from, DeliveryKind::Group);
        message.group_to_id = group;
        self.dispatch(message, delay);
        true
    }

    /// Sends `message` to every reference subscribed to `from`.
    pub fn send_message_to_subscribers(&mut self, from: RefId, mut message: Message, delay: f64) -> bool {
        self.stamp(&mut message, from, DeliveryKind::Subscribers);
        self.dispatch(message, delay);
        true
    }

    /// Sends `message` to every registered reference, internal ids first.
    pub fn send_message_to_all(&mut self, from: RefId, mut message: Message, delay: f64) -> bool {
        self.stamp(&mut message, from, DeliveryKind::All);
        self.dispatch(message, delay);
        true
    }

    fn stamp(&self, message: &mut Message, from: RefId, kind: DeliveryKind) {
        message.from_id = from;
        message.send_time = self.clock.now();
        message.delivery_time = message.send_time;
        message.delayed = false;
        message.source_unregistered = false;
        message.kind = Some(kind);
    }

    fn dispatch(&mut self, mut message: Message, delay: f64) -> bool {
        if delay <= 0.0 {
            return self.issue(&message);
        }
        message.delayed = true;
        message.delivery_time = message.send_time + delay;
        let Some(kind) = message.kind else {
            return false;
        };
        let queue = &mut self.queues[kind.queue_index()];
        let at = queue.partition_point(|queued| queued.delivery_time <= message.delivery_time);
        queue.insert(at, message);
        true
    }

    /// Delivers an already stamped message through its table. Recipients are
    /// resolved at delivery time.
    pub(crate) fn issue(&mut self, message: &Message) -> bool {
        match message.kind {
            Some(DeliveryKind::Individual) => match self.get_reference(message.to_id) {
                Some(key) => self.deliver(key, message),
                None => false,
            },
            Some(DeliveryKind::Group) => {
                let targets: Targets = self
                    .groups
                    .get(&message.group_to_id)
                    .map(|members| members.iter().copied().collect())
                    .unwrap_or_default();
                self.fan_out(&targets, message);
                true
            }
            Some(DeliveryKind::Subscribers) => {
                let targets: Targets = self
                    .subscribers
                    .get(&message.from_id)
                    .map(|subscribers| subscribers.iter().copied().collect())
                    .unwrap_or_default();
                self.fan_out(&targets, message);
                true
            }
            Some(DeliveryKind::All) => {
                let targets = self.registered_ids();
                self.fan_out(&targets, message);
                true
            }
            None => false,
        }
    }

    fn fan_out(&mut self, targets: &[RefId], message: &Message) {
        for &id in targets {
            if let Some(key) = self.get_reference(id) {
                self.deliver(key, message);
            }
        }
    }

    fn deliver(&mut self, key: ReferenceKey, message: &Message) -> bool {
        let Some(object) = self.object(key) else {
            return false;
        };
        let Ok(mut target) = object.try_borrow_mut() else {
            warn!(
                "message {} to {key:?} dropped: target is already handling a message",
                message.message_id
            );
            return false;
        };
        target.process_message(message, self)
    }

    /// Delivers every queued message whose delivery time has arrived.
    pub fn process_messages(&mut self) -> usize {
        self.pump(MessageFilter::Any, false, false)
    }

    /// Pumps the queues for one source (`None` for every source).
    ///
    /// With `clear_all`, matching messages are removed regardless of their
    /// delivery time, flagged `source_unregistered`, and delivered only when
    /// `send_on_clear` is set.
    pub fn process_messages_from(
        &mut self,
        from: Option<RefId>,
        clear_all: bool,
        send_on_clear: bool,
    ) -> usize {
        let filter = match from {
            Some(id) => MessageFilter::From(id),
            None => MessageFilter::Any,
        };
        self.pump(filter, clear_all, send_on_clear)
    }

    /// Due messages are taken out of every queue before any is delivered, so
    /// messages queued by handlers wait for the next pass.
    pub(crate) fn pump(&mut self, filter: MessageFilter, clear_all: bool, send_on_clear: bool) -> usize {
        let now = self.clock.now();
        let mut batch = Vec::new();
        for kind in DeliveryKind::PUMP_ORDER {
            let queue = &mut self.queues[kind.queue_index()];
            let mut index = 0;
            while index < queue.len() {
                if !clear_all && queue[index].delivery_time > now {
                    break;
                }
                if !filter.matches(&queue[index]) {
                    index += 1;
                    continue;
                }
                if let Some(mut message) = queue.remove(index) {
                    message.source_unregistered |= clear_all;
                    batch.push(message);
                }
            }
        }

        if clear_all && !send_on_clear {
            trace!("dropped {} queued messages", batch.len());
            return 0;
        }
        let delivered = batch.len();
        for mut message in batch {
            message.delivery_time = now;
            self.issue(&message);
        }
        delivered
    }

    /// Number of messages waiting in the delayed queues.
    pub fn pending_messages(&self) -> usize {
        self.queues.iter().map(|queue| queue.len()).sum()
    }

    pub fn pending_in(&self, kind: DeliveryKind) -> usize {
        self.queues[kind.queue_index()].len()
    }

    // ---------------------------------------------------------------------
    // Groups and subscriptions
    // ---------------------------------------------------------------------

    /// Adds a registered reference to `group`, creating the group on first
    /// use. False when the subscriber is unknown or already a member.
    pub fn subscribe_to_group(&mut self, subscriber: RefId, group: Uid) -> bool {
        if self.get_reference(subscriber).is_none() {
            return false;
        }
        self.groups.entry(group).or_default().insert(subscriber)
    }

    /// Empty groups are kept; sends to them succeed and reach nobody.
    pub fn unsubscribe_from_group(&mut self, subscriber: RefId, group: Uid) -> bool {
        self.groups
            .get_mut(&group)
            .is_some_and(|members| members.remove(&subscriber))
    }

    pub fn group_exists(&self, group: &Uid) -> bool {
        self.groups.contains_key(group)
    }

    pub fn group_members(&self, group: &Uid) -> Vec<RefId> {
        self.groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Subscribes `subscriber` to messages `target` sends to its subscribers.
    pub fn subscribe_to_reference(&mut self, subscriber: RefId, target: RefId) -> bool {
        if self.get_reference(subscriber).is_none() || self.get_reference(target).is_none() {
            return false;
        }
        let added = self.subscribers.entry(target).or_default().insert(subscriber);
        self.subscribed_to.entry(subscriber).or_default().insert(target);
        added
    }

    pub fn unsubscribe_from_reference(&mut self, subscriber: RefId, target: RefId) -> bool {
        let removed = self
            .subscribers
            .get_mut(&target)
            .is_some_and(|subscribers| subscribers.remove(&subscriber));
        if let Some(targets) = self.subscribed_to.get_mut(&subscriber) {
            targets.remove(&target);
        }
        removed
    }

    pub fn subscribers_of(&self, target: RefId) -> Vec<RefId> {
        self.subscribers
            .get(&target)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriptions_of(&self, subscriber: RefId) -> Vec<RefId> {
        self.subscribed_to
            .get(&subscriber)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default()
    }
}
