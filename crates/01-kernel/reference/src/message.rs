use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::{RefId, Uid};

/// Which delivery table a message is routed through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    /// Point-to-point (`to_id`).
    Individual,
    /// Every member of `group_to_id`.
    Group,
    /// Every subscriber of `from_id`.
    Subscribers,
    /// Every registered reference.
    All,
}

impl DeliveryKind {
    /// Order in which the delayed queues are pumped.
    pub(crate) const PUMP_ORDER: [DeliveryKind; 4] = [
        DeliveryKind::Individual,
        DeliveryKind::Group,
        DeliveryKind::Subscribers,
        DeliveryKind::All,
    ];

    pub(crate) fn queue_index(self) -> usize {
        match self {
            DeliveryKind::Individual => 0,
            DeliveryKind::Group => 1,
            DeliveryKind::Subscribers => 2,
            DeliveryKind::All => 3,
        }
    }
}

/// Payload attached to a message. The bus never interprets it.
#[derive(Clone, Default)]
pub enum MessageData {
    #[default]
    Empty,
    /// Shared with the sender; stays alive for as long as any clone does.
    Shared(Rc<dyn Any>),
    /// Copied at send time and owned by the message.
    Guaranteed(Box<[u8]>),
}

impl fmt::Debug for MessageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageData::Empty => f.write_str("Empty"),
            MessageData::Shared(_) => f.write_str("Shared(..)"),
            MessageData::Guaranteed(bytes) => write!(f, "Guaranteed({} bytes)", bytes.len()),
        }
    }
}

/// Routed notification between references.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub message_id: u32,
    pub context: String,
    pub data: MessageData,
    pub from_id: RefId,
    pub to_id: RefId,
    pub group_to_id: Uid,
    pub send_time: f64,
    pub delivery_time: f64,
    pub delayed: bool,
    /// Set when the message was pumped because its source was unregistered
    /// (or the manager was shut down) before the delivery time arrived.
    pub source_unregistered: bool,
    pub(crate) kind: Option<DeliveryKind>,
}

impl Message {
    pub fn new(message_id: u32) -> Self {
        Self {
            message_id,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_shared<T: Any>(mut self, value: T) -> Self {
        self.data = MessageData::Shared(Rc::new(value));
        self
    }

    pub fn with_guaranteed_data(mut self, bytes: &[u8]) -> Self {
        self.set_guaranteed_data(bytes);
        self
    }

    /// Copies `bytes` into storage owned by the message.
    pub fn set_guaranteed_data(&mut self, bytes: &[u8]) {
        self.data = MessageData::Guaranteed(bytes.to_vec().into_boxed_slice());
    }

    pub fn has_guaranteed_data(&self) -> bool {
        matches!(self.data, MessageData::Guaranteed(_))
    }

    pub fn guaranteed_data(&self) -> Option<&[u8]> {
        match &self.data {
            MessageData::Guaranteed(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn shared<T: Any>(&self) -> Option<&T> {
        match &self.data {
            MessageData::Shared(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn data_size(&self) -> usize {
        match &self.data {
            MessageData::Guaranteed(bytes) => bytes.len(),
            _ => 0,
        }
    }

    /// Delivery table the message was sent through, once sent.
    pub fn kind(&self) -> Option<DeliveryKind> {
        self.kind
    }
}
