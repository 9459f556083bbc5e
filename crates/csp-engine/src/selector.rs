//! Conditional variant selection.
//!
//! A conditional block is an ordered `[{condition, content}]` list. Exactly
//! one entry is active: the last entry in list order whose condition holds,
//! else the `default` entry, else none. When two conditions both hold the
//! later entry wins, so definitions list general cases first and
//! specialisations after them.

use csp_core::event::{Emitter, ListenerId};
use csp_core::expr::Placeholders;
use csp_core::model::{Conditional, DEFAULT_CONDITION};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::project::Project;
use crate::watch::WatcherId;

/// Payload of a selector's change channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorChange {
    pub new_index: Option<usize>,
    pub old_index: Option<usize>,
}

pub struct Selector {
    conditions: Vec<String>,
    dependencies: Vec<String>,
    active: Cell<Option<usize>>,
    project: Weak<Project>,
    watcher: Cell<Option<WatcherId>>,
    changed: Emitter<SelectorChange>,
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("conditions", &self.conditions)
            .field("active", &self.active.get())
            .finish()
    }
}

impl Selector {
    /// Build a selector over `conditions` and pick the initial entry.
    pub fn new<S: AsRef<str>>(
        project: &Rc<Project>,
        conditions: &[S],
        placeholders: &Placeholders,
    ) -> Rc<Self> {
        let conditions: Vec<String> = conditions
            .iter()
            .map(|c| placeholders.substitute(c.as_ref()))
            .collect();

        let dependencies: Vec<String> = conditions
            .iter()
            .filter(|c| c.as_str() != DEFAULT_CONDITION)
            .flat_map(|c| project.evaluator().dependencies(c))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let selector = Rc::new(Self {
            conditions,
            dependencies,
            active: Cell::new(None),
            project: Rc::downgrade(project),
            watcher: Cell::new(None),
            changed: Emitter::new(),
        });
        selector.active.set(selector.scan(project));

        let weak = Rc::downgrade(&selector);
        let id = project.watches().register(move |_| {
            if let Some(selector) = weak.upgrade() {
                selector.refresh();
            }
        });
        project.watches().rewatch(id, &selector.dependencies);
        selector.watcher.set(Some(id));
        selector
    }

    fn scan(&self, project: &Project) -> Option<usize> {
        let mut matched = None;
        for (index, condition) in self.conditions.iter().enumerate() {
            if condition != DEFAULT_CONDITION && project.evaluate_bool(condition, false) {
                matched = Some(index);
            }
        }
        matched.or_else(|| self.conditions.iter().position(|c| c == DEFAULT_CONDITION))
    }

    /// Position of the active entry, `None` when none is active.
    pub fn active_index(&self) -> Option<usize> {
        self.active.get()
    }

    /// Conditions with placeholders substituted, in list order.
    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    /// Union of the dependencies of every non-default condition.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn on_changed(&self, handler: impl Fn(&SelectorChange) + 'static) -> ListenerId {
        self.changed.on(handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.changed.off(id)
    }

    /// Re-scan the conditions. Returns true (after notifying) if the active
    /// entry changed.
    pub fn refresh(&self) -> bool {
        let Some(project) = self.project.upgrade() else {
            return false;
        };
        let next = self.scan(&project);
        let previous = self.active.get();
        if next == previous {
            return false;
        }
        debug!(?previous, ?next, "selector switched entry");
        self.active.set(next);
        self.changed.emit(&SelectorChange {
            new_index: next,
            old_index: previous,
        });
        true
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        if let (Some(project), Some(id)) = (self.project.upgrade(), self.watcher.get()) {
            project.watches().unregister(id);
        }
    }
}

/// Live objects built per entry of a conditional (or plain) definition.
///
/// A plain definition is a single, always active entry.
#[derive(Debug)]
pub struct ConditionalBlock<T> {
    selector: Option<Rc<Selector>>,
    items: Vec<T>,
}

impl<T> ConditionalBlock<T> {
    /// Build one item per entry of `definition`, in list order.
    pub fn build<D>(
        project: &Rc<Project>,
        definition: &Conditional<D>,
        placeholders: &Placeholders,
        mut make: impl FnMut(&D) -> T,
    ) -> Self {
        match definition {
            Conditional::Variants(entries) => {
                let conditions: Vec<&str> = entries.iter().map(|e| e.condition.as_str()).collect();
                let selector = Selector::new(project, &conditions, placeholders);
                ConditionalBlock {
                    selector: Some(selector),
                    items: entries.iter().map(|e| make(&e.content)).collect(),
                }
            }
            Conditional::Plain(content) => ConditionalBlock::plain(make(content)),
        }
    }

    pub fn plain(item: T) -> Self {
        ConditionalBlock {
            selector: None,
            items: vec![item],
        }
    }

    /// The active item.
    pub fn current(&self) -> Option<&T> {
        self.active_index().and_then(|index| self.items.get(index))
    }

    pub fn active_index(&self) -> Option<usize> {
        match &self.selector {
            Some(selector) => selector.active_index(),
            None => Some(0),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn selector(&self) -> Option<&Rc<Selector>> {
        self.selector.as_ref()
    }
}
