//! Configuration store.
//!
//! The project owns one JSON document. A [`DocumentStore`] is a path-addressed
//! view over one subtree of it (`configs` or `gen`) that is the only writer
//! of that subtree and announces every effective change.

use crate::event::{ChangeEvent, Emitter, ListenerId};
use crate::expr::is_empty;
use crate::path::PathCache;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

/// The project document, shared between the project and its stores.
pub type SharedDocument = Rc<RefCell<Value>>;

/// Path-addressed read/write access to configuration values.
pub trait ConfigStore {
    /// Value at a dot-delimited path, or `None` if any segment is absent.
    fn get(&self, path: &str) -> Option<Value>;

    /// Value at `path`, or `default` if absent.
    fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// Write `value` at `path`.
    ///
    /// Returns false (and notifies nobody) when the stored value already
    /// equals `value`. Empty values are pruned: the key is removed instead.
    fn set(&self, path: &str, value: Value) -> bool;

    /// A copy of the whole subtree.
    fn snapshot(&self) -> Value;
}

/// A [`ConfigStore`] rooted at one top-level key of a shared document.
pub struct DocumentStore {
    document: SharedDocument,
    root: String,
    paths: PathCache,
    emitter: Emitter<ChangeEvent>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("root", &self.root)
            .field("listeners", &self.emitter.listener_count())
            .finish()
    }
}

impl DocumentStore {
    /// Create a store over `document[root]`, creating the subtree if missing.
    pub fn new(document: SharedDocument, root: &str) -> Self {
        {
            let mut doc = document.borrow_mut();
            if !doc.is_object() {
                *doc = Value::Object(Map::new());
            }
            if let Value::Object(map) = &mut *doc {
                let entry = map
                    .entry(root.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
            }
        }

        Self {
            document,
            root: root.to_string(),
            paths: PathCache::new(),
            emitter: Emitter::new(),
        }
    }

    /// The top-level key this store is rooted at.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// Register a `changed` handler. Paths in events are relative to the root.
    pub fn on_changed(&self, handler: impl Fn(&ChangeEvent) + 'static) -> ListenerId {
        self.emitter.on(handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    /// Typed read with a default, for plain settings values.
    pub fn get_str(&self, path: &str, default: &str) -> String {
        match self.get(path) {
            Some(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn read<T>(&self, keys: &[String], f: impl FnOnce(Option<&Value>) -> T) -> T {
        let doc = self.document.borrow();
        let mut item = doc.get(&self.root);
        for key in keys {
            item = item.and_then(|v| v.as_object()).and_then(|m| m.get(key));
        }
        f(item)
    }
}

impl ConfigStore for DocumentStore {
    fn get(&self, path: &str) -> Option<Value> {
        let keys = self.paths.segments(path);
        self.read(&keys, |v| v.cloned())
    }

    fn set(&self, path: &str, value: Value) -> bool {
        let keys = self.paths.segments(path);
        let Some((last, parents)) = keys.split_last() else {
            warn!(root = %self.root, "ignoring write to the store root");
            return false;
        };

        let old = self.read(&keys, |v| v.cloned());
        let unchanged = match &old {
            Some(old) => *old == value,
            None => is_empty(&value),
        };
        if unchanged {
            return false;
        }

        {
            let mut doc = self.document.borrow_mut();
            let mut item = doc
                .as_object_mut()
                .map(|m| {
                    m.entry(self.root.clone())
                        .or_insert_with(|| Value::Object(Map::new()))
                });
            for key in parents {
                item = item.and_then(|v| {
                    if !v.is_object() {
                        *v = Value::Object(Map::new());
                    }
                    v.as_object_mut().map(|m| {
                        m.entry(key.clone())
                            .or_insert_with(|| Value::Object(Map::new()))
                    })
                });
            }
            let Some(parent) = item.and_then(|v| {
                if !v.is_object() {
                    *v = Value::Object(Map::new());
                }
                v.as_object_mut()
            }) else {
                return false;
            };

            if is_empty(&value) {
                parent.remove(last);
            } else {
                parent.insert(last.clone(), value.clone());
            }
        }

        self.emitter.emit(&ChangeEvent {
            path: keys.to_vec(),
            new_value: value,
            old_value: old.unwrap_or(Value::Null),
        });
        true
    }

    fn snapshot(&self) -> Value {
        self.read(&[], |v| v.cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::Cell;

    fn store_over(doc: Value) -> DocumentStore {
        DocumentStore::new(Rc::new(RefCell::new(doc)), "configs")
    }

    fn recording(store: &DocumentStore) -> Rc<RefCell<Vec<ChangeEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        store.on_changed(move |e| sink.borrow_mut().push(e.clone()));
        events
    }

    #[test]
    fn test_new_store_creates_root() {
        let store = store_over(json!({"name": "demo"}));
        assert_eq!(*store.document().borrow(), json!({"name": "demo", "configs": {}}));
        assert_eq!(store.snapshot(), json!({}));
    }

    #[test]
    fn test_set_then_get() {
        let store = store_over(json!({}));
        assert!(store.set("USART1.baud_rate", json!(115200)));
        assert_eq!(store.get("USART1.baud_rate"), Some(json!(115200)));
        assert_eq!(store.get_or("USART1.parity", json!("none")), json!("none"));
        assert_eq!(
            *store.document().borrow(),
            json!({"configs": {"USART1": {"baud_rate": 115200}}})
        );
    }

    #[test]
    fn test_change_event_payload() {
        let store = store_over(json!({"configs": {"USART1": {"mode": "async"}}}));
        let events = recording(&store);
        store.set("USART1.mode", json!("sync"));
        assert_eq!(
            *events.borrow(),
            vec![ChangeEvent {
                path: vec!["USART1".into(), "mode".into()],
                new_value: json!("sync"),
                old_value: json!("async"),
            }]
        );
    }

    #[test]
    fn test_equal_value_is_a_no_op() {
        let store = store_over(json!({"configs": {"SPI1": {"cpol": "low"}}}));
        let events = recording(&store);
        assert!(!store.set("SPI1.cpol", json!("low")));
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_empty_values_are_pruned() {
        let store = store_over(json!({"configs": {"SPI1": {"label": "x", "pins": [1]}}}));
        let events = recording(&store);

        for (path, empty) in [("SPI1.label", json!("")), ("SPI1.pins", json!([]))] {
            assert!(store.set(path, empty));
            assert_eq!(store.get(path), None);
            assert_eq!(store.get_or(path, json!("d")), json!("d"));
        }
        assert_eq!(events.borrow().len(), 2);
        assert_eq!(store.snapshot(), json!({"SPI1": {}}));

        // Emptying an absent key changes nothing.
        assert!(!store.set("SPI1.other", Value::Null));
        assert!(!store.set("SPI9.other", json!({})));
        assert_eq!(events.borrow().len(), 2);
        assert_eq!(store.get("SPI9"), None);
    }

    #[test]
    fn test_scalar_intermediate_is_replaced() {
        let store = store_over(json!({"configs": {"RCM": 5}}));
        assert!(store.set("RCM.hse", json!(8000000)));
        assert_eq!(store.get("RCM"), Some(json!({"hse": 8000000})));
    }

    #[test]
    fn test_nested_set_from_handler_completes_first() {
        let store = Rc::new(store_over(json!({})));
        let order = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&store);
        let log = Rc::clone(&order);
        store.on_changed(move |e| {
            log.borrow_mut().push(format!("a:{}", e.path_string()));
            if e.path_string() == "x" {
                if let Some(store) = weak.upgrade() {
                    store.set("y", json!(1));
                }
            }
        });
        let log = Rc::clone(&order);
        store.on_changed(move |e| log.borrow_mut().push(format!("b:{}", e.path_string())));

        store.set("x", json!(1));
        assert_eq!(*order.borrow(), vec!["a:x", "a:y", "b:y", "b:x"]);
    }

    #[test]
    fn test_path_keys_are_cached() {
        let store = store_over(json!({}));
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        store.on_changed(move |_| counter.set(counter.get() + 1));
        for i in [0, 0, 1] {
            store.set("ADC1.channel", json!(i));
        }
        assert_eq!(store.paths.len(), 1);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_root_write_is_ignored() {
        let store = store_over(json!({}));
        assert!(!store.set("", json!(1)));
    }
}
