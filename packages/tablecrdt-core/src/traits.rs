use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::ids::{StoreId, Version};
use crate::transaction::Transaction;

/// Pluggable clock to allow Lamport, Hybrid Logical Clock, or custom time strategies.
pub trait Clock {
    fn tick(&mut self) -> Version;
    fn observe(&mut self, external: Version);
    fn now(&self) -> Version;
}

/// Transport between replicas. Delivery is at-least-once and unordered; inbound
/// traffic reaches the datastore through `Datastore::handle_message`.
pub trait Adapter {
    /// Allocate a store id unique for the lifetime of the collaboration session.
    fn create_store_id(&mut self) -> Result<StoreId>;
    fn broadcast(&mut self, transactions: &[Transaction]) -> Result<()>;
}

/// Basic Lamport clock implementation useful for tests and default flows.
#[derive(Clone, Debug, Default)]
pub struct LamportClock {
    counter: Version,
}

impl Clock for LamportClock {
    fn tick(&mut self) -> Version {
        self.counter += 1;
        self.counter
    }

    fn observe(&mut self, external: Version) {
        self.counter = self.counter.max(external);
    }

    fn now(&self) -> Version {
        self.counter
    }
}

/// Adapter for a replica that never talks to anyone. Store ids must come from config.
#[derive(Clone, Debug, Default)]
pub struct NoopAdapter;

impl Adapter for NoopAdapter {
    fn create_store_id(&mut self) -> Result<StoreId> {
        Err(Error::Adapter(
            "NoopAdapter cannot allocate store ids; set one in the config".into(),
        ))
    }

    fn broadcast(&mut self, _transactions: &[Transaction]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HubState {
    last_store_id: StoreId,
    outbox: Vec<Transaction>,
}

/// In-process switchboard shared by several `MemoryAdapter`s.
///
/// Hands out sequential store ids and queues every broadcast transaction until a test (or
/// host) drains and delivers it.
#[derive(Clone, Debug, Default)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adapter(&self) -> MemoryAdapter {
        MemoryAdapter {
            hub: self.clone(),
            sent: 0,
        }
    }

    /// Remove and return everything broadcast so far, oldest first.
    pub fn drain(&self) -> Vec<Transaction> {
        std::mem::take(&mut self.state.borrow_mut().outbox)
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().outbox.len()
    }
}

#[derive(Clone, Debug)]
pub struct MemoryAdapter {
    hub: MemoryHub,
    sent: usize,
}

impl MemoryAdapter {
    /// Number of broadcast calls made through this adapter.
    pub fn broadcasts(&self) -> usize {
        self.sent
    }
}

impl Adapter for MemoryAdapter {
    fn create_store_id(&mut self) -> Result<StoreId> {
        let mut state = self.hub.state.borrow_mut();
        state.last_store_id = state
            .last_store_id
            .checked_add(1)
            .ok_or_else(|| Error::Adapter("store ids exhausted".into()))?;
        Ok(state.last_store_id)
    }

    fn broadcast(&mut self, transactions: &[Transaction]) -> Result<()> {
        self.sent += 1;
        self.hub
            .state
            .borrow_mut()
            .outbox
            .extend(transactions.iter().cloned());
        Ok(())
    }
}
