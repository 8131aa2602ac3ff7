//! Per-event-type subscriber multicast.
//!
//! Consumers subscribe handlers against physical `(provider, task, opcode)`
//! keys. The mapping is many-to-many: one logical concern can span several
//! physical keys (a disk-read and a disk-write completion feeding the same
//! handler), and one key can carry several handlers. Dispatch is synchronous
//! and runs handlers in subscription order; a slow handler stalls the
//! pipeline by design, there is no yielding at this layer.

use std::collections::HashMap;

use crate::record::{EventKey, RawRecord};
use crate::session::ReadView;

pub type Handler = Box<dyn FnMut(&RawRecord, &ReadView)>;

/// Token returned by [`EventRegistry::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventRegistry {
    routes: HashMap<EventKey, Vec<u64>>,
    handlers: HashMap<u64, Handler>,
    next_id: u64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe one handler to every key in `keys`.
    pub fn subscribe<F>(&mut self, keys: &[EventKey], handler: F) -> SubscriptionId
    where
        F: FnMut(&RawRecord, &ReadView) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.insert(id, Box::new(handler));
        for key in keys {
            self.routes.entry(*key).or_default().push(id);
        }
        SubscriptionId(id)
    }

    /// Drop a subscription, including every key binding it holds.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.handlers.remove(&id.0);
        for route in self.routes.values_mut() {
            route.retain(|&h| h != id.0);
        }
        self.routes.retain(|_, route| !route.is_empty());
    }

    pub fn subscriber_count(&self, key: &EventKey) -> usize {
        self.routes.get(key).map_or(0, Vec::len)
    }

    /// Deliver `rec` to every handler subscribed to its key, in
    /// subscription order.
    pub fn dispatch(&mut self, rec: &RawRecord, view: &ReadView) {
        let Some(route) = self.routes.get(&rec.key()) else {
            return;
        };
        for id in route {
            if let Some(handler) = self.handlers.get_mut(id) {
                handler(rec, view);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskServiceTimes;
    use crate::names::NameTable;
    use crate::paths::PathMapper;
    use crate::threads::ThreadTable;
    use std::cell::RefCell;
    use std::rc::Rc;

    const KEY_A: EventKey = EventKey::new(1, 0, 10);
    const KEY_B: EventKey = EventKey::new(1, 0, 11);

    fn record(key: EventKey) -> RawRecord {
        RawRecord {
            provider: key.provider,
            task: key.task,
            opcode: key.opcode,
            version: 0,
            pointer_width: 8,
            timestamp: 0,
            thread_id: 0,
            process_id: 0,
            reporter_thread_id: None,
            reporter_process_id: None,
            payload: Vec::new(),
        }
    }

    fn with_view<F: FnOnce(&ReadView)>(f: F) {
        let threads = ThreadTable::new();
        let names = NameTable::new();
        let paths = PathMapper::new();
        let disks = DiskServiceTimes::new();
        f(&ReadView {
            threads: &threads,
            names: &names,
            paths: &paths,
            disks: &disks,
            disk_service_msec: None,
        });
    }

    #[test]
    fn test_handlers_fire_in_subscription_order() {
        let mut registry = EventRegistry::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            registry.subscribe(&[KEY_A], move |_, _| order.borrow_mut().push(tag));
        }

        with_view(|view| registry.dispatch(&record(KEY_A), view));
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_one_handler_spanning_two_keys() {
        let mut registry = EventRegistry::new();
        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        registry.subscribe(&[KEY_A, KEY_B], move |_, _| *counter.borrow_mut() += 1);

        with_view(|view| {
            registry.dispatch(&record(KEY_A), view);
            registry.dispatch(&record(KEY_B), view);
        });
        assert_eq!(*hits.borrow(), 2);
    }

    #[test]
    fn test_unsubscribe_removes_all_bindings() {
        let mut registry = EventRegistry::new();
        let hits = Rc::new(RefCell::new(0));

        let counter = Rc::clone(&hits);
        let id = registry.subscribe(&[KEY_A, KEY_B], move |_, _| *counter.borrow_mut() += 1);
        let counter = Rc::clone(&hits);
        registry.subscribe(&[KEY_A], move |_, _| *counter.borrow_mut() += 10);

        registry.unsubscribe(id);
        assert_eq!(registry.subscriber_count(&KEY_A), 1);
        assert_eq!(registry.subscriber_count(&KEY_B), 0);

        with_view(|view| {
            registry.dispatch(&record(KEY_A), view);
            registry.dispatch(&record(KEY_B), view);
        });
        assert_eq!(*hits.borrow(), 10);
    }

    #[test]
    fn test_unsubscribed_key_is_ignored() {
        let mut registry = EventRegistry::new();
        with_view(|view| registry.dispatch(&record(KEY_B), view));
    }
}
