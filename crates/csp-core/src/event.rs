//! Synchronous change notification.
//!
//! Handlers run on the emitting thread, in registration order, before
//! `emit` returns. A handler may emit again (directly or through a store
//! `set`); the nested emission completes before the outer one moves on to
//! its next handler.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Identifies a registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Rc<dyn Fn(&E)>;

/// A single-threaded event channel.
pub struct Emitter<E> {
    handlers: RefCell<Vec<(ListenerId, Handler<E>)>>,
    next_id: Cell<u64>,
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }
}

impl<E> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("handlers", &self.handlers.borrow().len())
            .finish()
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn on(&self, handler: impl Fn(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Deliver `event` to every handler registered at the time of the call.
    ///
    /// A handler removed by an earlier handler of the same emission is
    /// skipped.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(ListenerId, Handler<E>)> = self.handlers.borrow().clone();
        for (id, handler) in snapshot {
            let still_registered = self.handlers.borrow().iter().any(|(h, _)| *h == id);
            if still_registered {
                handler(event);
            }
        }
    }
}

/// Payload of every `changed` event: the path as segments, new value and
/// old value. Absent values are `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub path: Vec<String>,
    pub new_value: Value,
    pub old_value: Value,
}

impl ChangeEvent {
    /// The path joined with dots.
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }

    /// The same event with `root` segments prepended.
    pub fn prefixed(&self, root: &str) -> ChangeEvent {
        let mut path: Vec<String> = root.split('.').map(String::from).collect();
        path.extend(self.path.iter().cloned());
        ChangeEvent {
            path,
            new_value: self.new_value.clone(),
            old_value: self.old_value.clone(),
        }
    }
}
