use std::cell::RefCell;
use std::collections::BTreeMap;

use glam::Vec3;
use gridstream_common::{Observer, ObserverId};

/// Supplies the set of active observers, once per tick.
pub trait ObserverSource {
    fn snapshot(&self) -> Vec<Observer>;
}

/// Observer table maintained by the host as players connect, move and leave.
///
/// Shared between streamers behind an `Rc`; snapshots come out in id order.
#[derive(Debug, Default)]
pub struct ObserverTable {
    observers: RefCell<BTreeMap<ObserverId, Observer>>,
}

impl ObserverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer or replace its state.
    pub fn upsert(&self, observer: Observer) {
        self.observers.borrow_mut().insert(observer.id, observer);
    }

    /// Move an existing observer. Returns false for unknown observers.
    pub fn move_to(&self, id: ObserverId, position: Vec3) -> bool {
        match self.observers.borrow_mut().get_mut(&id) {
            Some(observer) => {
                observer.position = position;
                true
            }
            None => false,
        }
    }

    /// Drop a disconnected observer.
    pub fn remove(&self, id: ObserverId) -> Option<Observer> {
        self.observers.borrow_mut().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.observers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.borrow().is_empty()
    }
}

impl ObserverSource for ObserverTable {
    fn snapshot(&self) -> Vec<Observer> {
        self.observers.borrow().values().copied().collect()
    }
}
