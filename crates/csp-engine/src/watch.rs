//! Dependency watch registry.
//!
//! Every live expression (an `enabled` flag, a numeric bound, a selector's
//! condition list, a reference condition) owns one watcher. A watcher
//! declares the document paths its expression reads; the registry indexes
//! watchers by those paths and, on each change, calls only the watchers
//! whose paths are related to the changed one.
//!
//! Re-declaring paths ([`WatchRegistry::rewatch`]) reconciles against the
//! previous declaration, touching only the delta, so repeated evaluation
//! never grows the index.

use csp_core::path::starts_with;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::trace;

/// Identifies one watcher. Ids grow monotonically, so ordering by id is
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

type Callback = Rc<dyn Fn(&[String])>;

struct Watcher {
    callback: Callback,
    paths: BTreeSet<Vec<String>>,
}

/// Outcome of a reconciliation, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub added: usize,
    pub removed: usize,
}

#[derive(Default)]
pub struct WatchRegistry {
    by_path: RefCell<BTreeMap<Vec<String>, BTreeSet<WatcherId>>>,
    watchers: RefCell<BTreeMap<WatcherId, Watcher>>,
    next_id: Cell<u64>,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watchers", &self.watchers.borrow().len())
            .field("paths", &self.by_path.borrow().len())
            .finish()
    }
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher with no paths yet.
    ///
    /// The callback receives the changed path. It is never called while the
    /// registry is borrowed, so it may register, rewatch or unregister.
    pub fn register(&self, callback: impl Fn(&[String]) + 'static) -> WatcherId {
        let id = WatcherId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.watchers.borrow_mut().insert(
            id,
            Watcher {
                callback: Rc::new(callback),
                paths: BTreeSet::new(),
            },
        );
        id
    }

    /// Replace the paths `id` watches with `paths` (dot-delimited).
    pub fn rewatch<S: AsRef<str>>(&self, id: WatcherId, paths: &[S]) -> Reconciled {
        let wanted: BTreeSet<Vec<String>> = paths
            .iter()
            .map(|p| p.as_ref().split('.').map(String::from).collect())
            .collect();

        let mut watchers = self.watchers.borrow_mut();
        let Some(watcher) = watchers.get_mut(&id) else {
            return Reconciled::default();
        };

        let mut by_path = self.by_path.borrow_mut();
        let mut outcome = Reconciled::default();

        for stale in watcher.paths.difference(&wanted) {
            if let Some(ids) = by_path.get_mut(stale) {
                ids.remove(&id);
                if ids.is_empty() {
                    by_path.remove(stale);
                }
            }
            outcome.removed += 1;
        }
        for fresh in wanted.difference(&watcher.paths) {
            by_path.entry(fresh.clone()).or_default().insert(id);
            outcome.added += 1;
        }

        if outcome != Reconciled::default() {
            trace!(watcher = id.0, added = outcome.added, removed = outcome.removed, "rewatched");
        }
        watcher.paths = wanted;
        outcome
    }

    /// Remove a watcher and all its paths.
    pub fn unregister(&self, id: WatcherId) -> bool {
        let Some(watcher) = self.watchers.borrow_mut().remove(&id) else {
            return false;
        };
        let mut by_path = self.by_path.borrow_mut();
        for path in &watcher.paths {
            if let Some(ids) = by_path.get_mut(path) {
                ids.remove(&id);
                if ids.is_empty() {
                    by_path.remove(path);
                }
            }
        }
        true
    }

    /// Watchers with a path that is a segment-wise prefix of `changed`, or
    /// that `changed` is a prefix of.
    pub fn matching(&self, changed: &[String]) -> BTreeSet<WatcherId> {
        self.by_path
            .borrow()
            .iter()
            .filter(|(path, _)| {
                starts_with(changed, path.as_slice()) || starts_with(path.as_slice(), changed)
            })
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Call every matching watcher, in registration order.
    ///
    /// A watcher unregistered by an earlier callback of the same
    /// notification is skipped.
    pub fn notify(&self, changed: &[String]) {
        for id in self.matching(changed) {
            let callback = self
                .watchers
                .borrow()
                .get(&id)
                .map(|w| Rc::clone(&w.callback));
            if let Some(callback) = callback {
                callback(changed);
            }
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.borrow().len()
    }

    /// Number of distinct watched paths.
    pub fn path_count(&self) -> usize {
        self.by_path.borrow().len()
    }

    pub fn paths_of(&self, id: WatcherId) -> Vec<String> {
        self.watchers
            .borrow()
            .get(&id)
            .map(|w| w.paths.iter().map(|p| p.join(".")).collect())
            .unwrap_or_default()
    }
}
