//! Expression-backed derived values.
//!
//! A [`Tracked`] value caches the result of one expression, watches the
//! paths the expression reads, and re-evaluates when any of them change.
//! Handlers registered with [`Tracked::on_changed`] only run when the
//! result actually changes.

use csp_core::event::{Emitter, ListenerId};
use csp_core::expr::Placeholders;
use csp_core::model::{Bound, Toggle};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::project::Project;
use crate::watch::WatcherId;

/// Largest integer an IEEE double holds exactly; the unbounded range.
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
pub const MIN_SAFE_INTEGER: f64 = -MAX_SAFE_INTEGER;

/// Result types an expression can be tracked as.
pub trait TrackedValue: Clone + PartialEq + std::fmt::Debug + 'static {
    fn evaluate(project: &Project, expression: &str, fallback: &Self) -> Self;
}

impl TrackedValue for bool {
    fn evaluate(project: &Project, expression: &str, fallback: &Self) -> Self {
        project.evaluate_bool(expression, *fallback)
    }
}

impl TrackedValue for f64 {
    fn evaluate(project: &Project, expression: &str, fallback: &Self) -> Self {
        project.evaluate_number(expression, *fallback)
    }
}

pub struct Tracked<T> {
    expression: String,
    fallback: T,
    value: RefCell<T>,
    project: Weak<Project>,
    watcher: Cell<Option<WatcherId>>,
    changed: Emitter<T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked")
            .field("expression", &self.expression)
            .field("value", &self.value.borrow())
            .finish()
    }
}

impl<T: TrackedValue> Tracked<T> {
    /// Evaluate `expression` now and keep it current from then on.
    ///
    /// The expression must already have its placeholders substituted.
    pub fn new(project: &Rc<Project>, expression: String, fallback: T) -> Rc<Self> {
        let initial = T::evaluate(project, &expression, &fallback);
        let tracked = Rc::new(Self {
            expression,
            fallback,
            value: RefCell::new(initial),
            project: Rc::downgrade(project),
            watcher: Cell::new(None),
            changed: Emitter::new(),
        });

        let weak = Rc::downgrade(&tracked);
        let id = project.watches().register(move |_| {
            if let Some(tracked) = weak.upgrade() {
                tracked.refresh();
            }
        });
        tracked.watcher.set(Some(id));
        tracked.rewatch(project);
        tracked
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn on_changed(&self, handler: impl Fn(&T) + 'static) -> ListenerId {
        self.changed.on(handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.changed.off(id)
    }

    /// Re-evaluate. Returns true (after notifying) if the value changed.
    pub fn refresh(&self) -> bool {
        let Some(project) = self.project.upgrade() else {
            return false;
        };
        let next = T::evaluate(&project, &self.expression, &self.fallback);
        self.rewatch(&project);

        if *self.value.borrow() == next {
            return false;
        }
        *self.value.borrow_mut() = next.clone();
        self.changed.emit(&next);
        true
    }

    fn rewatch(&self, project: &Project) {
        if let Some(id) = self.watcher.get() {
            let dependencies = project.evaluator().dependencies(&self.expression);
            project.watches().rewatch(id, &dependencies);
        }
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        if let (Some(project), Some(id)) = (self.project.upgrade(), self.watcher.get()) {
            project.watches().unregister(id);
        }
    }
}

/// A value that is either fixed by the definition or tracked.
#[derive(Debug, Clone)]
pub enum Derived<T> {
    Fixed(T),
    Tracked(Rc<Tracked<T>>),
}

impl<T: TrackedValue> Derived<T> {
    pub fn get(&self) -> T {
        match self {
            Derived::Fixed(value) => value.clone(),
            Derived::Tracked(tracked) => tracked.get(),
        }
    }

    /// Register a change handler. Fixed values never change, so nothing is
    /// registered for them.
    pub fn on_changed(&self, handler: impl Fn(&T) + 'static) -> Option<ListenerId> {
        match self {
            Derived::Fixed(_) => None,
            Derived::Tracked(tracked) => Some(tracked.on_changed(handler)),
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            Derived::Fixed(_) => None,
            Derived::Tracked(tracked) => Some(tracked.expression()),
        }
    }

    /// Re-evaluate now rather than when the watch registry gets to it.
    pub fn refresh(&self) -> bool {
        match self {
            Derived::Fixed(_) => false,
            Derived::Tracked(tracked) => tracked.refresh(),
        }
    }
}

impl Derived<bool> {
    /// An `enabled`/`activated` flag: absent means true, an expression
    /// falls back to false.
    pub fn toggle(project: &Rc<Project>, toggle: Option<&Toggle>, placeholders: &Placeholders) -> Self {
        match toggle {
            None => Derived::Fixed(true),
            Some(Toggle::Fixed(value)) => Derived::Fixed(*value),
            Some(Toggle::Expression(expression)) => Derived::condition(project, expression, placeholders),
        }
    }

    /// A boolean condition expression with a false fallback.
    pub fn condition(project: &Rc<Project>, expression: &str, placeholders: &Placeholders) -> Self {
        Derived::Tracked(Tracked::new(project, placeholders.substitute(expression), false))
    }
}

impl Derived<f64> {
    /// A numeric bound: absent or failing expressions use `unbounded`.
    pub fn bound(
        project: &Rc<Project>,
        bound: Option<&Bound>,
        placeholders: &Placeholders,
        unbounded: f64,
    ) -> Self {
        match bound {
            None => Derived::Fixed(unbounded),
            Some(Bound::Literal(value)) => Derived::Fixed(*value),
            Some(Bound::Expression(expression)) => Derived::Tracked(Tracked::new(
                project,
                placeholders.substitute(expression),
                unbounded,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_core::store::ConfigStore;
    use csp_core::EngineSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn project() -> Rc<Project> {
        Project::new(json!({}), EngineSettings::default())
    }

    #[test]
    fn test_tracks_dependency_changes() {
        let project = project();
        let enabled = Tracked::new(&project, "configs.USART1.mode == 'sync'".into(), false);
        assert!(!enabled.get());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        enabled.on_changed(move |v| sink.borrow_mut().push(*v));

        project.configs().set("USART1.mode", json!("sync"));
        project.configs().set("USART1.baud", json!(9600));
        project.configs().set("USART1", json!({"mode": "async"}));
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    #[test]
    fn test_drop_unregisters_watcher() {
        let project = project();
        let bound = Tracked::new(&project, "configs.ADC1.max".into(), MAX_SAFE_INTEGER);
        assert_eq!(project.watches().watcher_count(), 1);
        assert_eq!(bound.get(), MAX_SAFE_INTEGER);
        drop(bound);
        assert_eq!(project.watches().watcher_count(), 0);
        assert_eq!(project.watches().path_count(), 0);
    }

    #[test]
    fn test_repeated_refresh_keeps_one_subscription_set() {
        let project = project();
        let tracked = Tracked::new(&project, "configs.A.x + configs.A.y".into(), 0.0);
        project.configs().set("A.y", json!(1));
        for i in 0..50 {
            project.configs().set("A.x", json!(i));
        }
        assert_eq!(project.watches().path_count(), 2);
        assert_eq!(tracked.get(), 50.0);
    }

    #[test]
    fn test_derived_variants() {
        let project = project();
        let placeholders = Placeholders::new("SPI1", "SPI");

        assert!(Derived::toggle(&project, None, &placeholders).get());
        assert!(!Derived::toggle(&project, Some(&Toggle::Fixed(false)), &placeholders).get());

        let toggle = Toggle::Expression("configs.${IP_INSTANCE}.enable".into());
        let derived = Derived::toggle(&project, Some(&toggle), &placeholders);
        assert_eq!(derived.expression(), Some("configs.SPI1.enable"));
        assert!(!derived.get());
        project.configs().set("SPI1.enable", json!(true));
        assert!(derived.get());

        let max = Derived::bound(&project, Some(&Bound::Literal(10.0)), &placeholders, MAX_SAFE_INTEGER);
        assert_eq!(max.get(), 10.0);
        assert!(max.on_changed(|_| {}).is_none());
    }
}
