//! Shared reference fixture for the kernel integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use reference::{Handle, Message, RefId, Reference, ReferenceKey, ReferenceManager, Uid};

pub const RTID_PROBE: Uid = Uid::from_u128(0x7E57_0000_0000_0000_0000_0000_0000_0001);

pub type Journal = Rc<RefCell<Vec<String>>>;

pub type Handler = Box<dyn FnMut(&Message, &mut ReferenceManager) -> bool>;

/// Records every message it receives and every teardown into a journal
/// shared between probes, so tests can assert on cross-object ordering.
pub struct Probe {
    pub name: &'static str,
    pub journal: Journal,
    pub inbox: Vec<Message>,
    pub handler: Option<Handler>,
    pub disposals: u32,
}

impl Probe {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Rc::clone(journal),
            inbox: Vec::new(),
            handler: None,
            disposals: 0,
        }
    }

    pub fn with_handler(
        mut self,
        handler: impl FnMut(&Message, &mut ReferenceManager) -> bool + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn received(&self) -> Vec<u32> {
        self.inbox.iter().map(|message| message.message_id).collect()
    }
}

impl Reference for Probe {
    fn reference_type(&self) -> Uid {
        RTID_PROBE
    }

    fn process_message(&mut self, message: &Message, manager: &mut ReferenceManager) -> bool {
        self.journal
            .borrow_mut()
            .push(format!("{}<-{}", self.name, message.message_id));
        self.inbox.push(message.clone());
        match self.handler.as_mut() {
            Some(handler) => handler(message, manager),
            None => true,
        }
    }

    fn dispose(&mut self, _key: ReferenceKey, _manager: &mut ReferenceManager) {
        self.disposals += 1;
        self.journal.borrow_mut().push(format!("dispose {}", self.name));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn journal() -> Journal {
    let _ = env_logger::builder().is_test(true).try_init();
    Rc::new(RefCell::new(Vec::new()))
}

pub fn probe(
    manager: &mut ReferenceManager,
    id: RefId,
    name: &'static str,
    journal: &Journal,
) -> Handle<Probe> {
    manager.register(id, Probe::new(name, journal))
}
