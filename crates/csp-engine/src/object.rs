//! Container sections, presets and diagrams of an IP.

use csp_core::event::ListenerId;
use csp_core::model::{Conditional, ContainersDefinition, DiagramDefinition, ObjectDefinition};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::warn;

use crate::ip::IpContext;
use crate::parameter::ParameterSlot;
use crate::project::Project;
use crate::reference::RefParameter;
use crate::selector::{ConditionalBlock, Selector};

type RefMap = BTreeMap<String, Rc<RefParameter>>;

/// A group of reference overlays, one map per conditional entry.
///
/// An enforcing object keeps exactly the overlays of its active entry
/// active, switching them over whenever the selector moves.
#[derive(Debug)]
pub struct IpObject {
    block: ConditionalBlock<RefMap>,
    enforcing: bool,
    listener: Cell<Option<ListenerId>>,
}

impl IpObject {
    pub fn new(
        project: &Rc<Project>,
        context: &Rc<IpContext>,
        definition: &Conditional<ObjectDefinition>,
        slots: &BTreeMap<String, Rc<ParameterSlot>>,
        enforcing: bool,
    ) -> Rc<Self> {
        let block = ConditionalBlock::build(project, definition, context.placeholders(), |object| {
            object
                .ref_parameters
                .iter()
                .map(|(name, reference)| {
                    let slot = slots.get(name).cloned();
                    if slot.is_none() {
                        warn!(instance = context.instance(), parameter = %name, "reference to unknown parameter");
                    }
                    let overlay = RefParameter::new(project, context, name, reference, slot, enforcing);
                    (name.clone(), overlay)
                })
                .collect()
        });

        let object = Rc::new(IpObject {
            block,
            enforcing,
            listener: Cell::new(None),
        });
        if enforcing {
            object.activate(object.block.active_index(), true);
            if let Some(selector) = object.block.selector() {
                let weak = Rc::downgrade(&object);
                let id = selector.on_changed(move |change| {
                    if let Some(object) = weak.upgrade() {
                        object.activate(change.old_index, false);
                        object.activate(change.new_index, true);
                    }
                });
                object.listener.set(Some(id));
            }
        }
        object
    }

    fn activate(&self, index: Option<usize>, active: bool) {
        let Some(entry) = index.and_then(|i| self.block.items().get(i)) else {
            return;
        };
        for overlay in entry.values() {
            overlay.set_active(active);
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.enforcing
    }

    /// Overlays of the active entry; empty when no entry is active.
    pub fn ref_parameters(&self) -> RefMap {
        self.block.current().cloned().unwrap_or_default()
    }

    pub fn ref_parameter(&self, name: &str) -> Option<Rc<RefParameter>> {
        self.block.current().and_then(|entry| entry.get(name).cloned())
    }

    pub fn active_index(&self) -> Option<usize> {
        self.block.active_index()
    }

    pub fn selector(&self) -> Option<&Rc<Selector>> {
        self.block.selector()
    }

    /// Write the default of every overlay in the active entry, in name
    /// order. Returns how many store values changed.
    pub fn apply(&self) -> usize {
        let mut written = 0;
        for overlay in self.ref_parameters().values() {
            let Some(parameter) = overlay.parameter() else {
                continue;
            };
            if parameter.set(overlay.default_value()) {
                written += 1;
            }
        }
        written
    }
}

impl Drop for IpObject {
    fn drop(&mut self) {
        if let (Some(selector), Some(id)) = (self.block.selector(), self.listener.get()) {
            selector.off(id);
        }
    }
}

/// The four container sections. Each is absent when not defined.
#[derive(Debug, Default)]
pub struct Containers {
    pub overview: Option<Rc<IpObject>>,
    pub modes: Option<Rc<IpObject>>,
    pub configurations: Option<Rc<IpObject>>,
    pub clock_tree: Option<Rc<IpObject>>,
}

impl Containers {
    pub const SECTIONS: [&'static str; 4] = ["overview", "modes", "configurations", "clockTree"];

    pub fn new(
        project: &Rc<Project>,
        context: &Rc<IpContext>,
        definition: &ContainersDefinition,
        slots: &BTreeMap<String, Rc<ParameterSlot>>,
        enforcing: bool,
    ) -> Self {
        let build = |section: &Option<Conditional<ObjectDefinition>>| {
            section
                .as_ref()
                .map(|d| IpObject::new(project, context, d, slots, enforcing))
        };
        Containers {
            overview: build(&definition.overview),
            modes: build(&definition.modes),
            configurations: build(&definition.configurations),
            clock_tree: build(&definition.clock_tree),
        }
    }

    /// Look a section up by its definition key.
    pub fn get(&self, section: &str) -> Option<&Rc<IpObject>> {
        match section {
            "overview" => self.overview.as_ref(),
            "modes" => self.modes.as_ref(),
            "configurations" => self.configurations.as_ref(),
            "clockTree" => self.clock_tree.as_ref(),
            _ => None,
        }
    }

    /// Defined sections with their keys, in fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Rc<IpObject>)> {
        Self::SECTIONS
            .into_iter()
            .filter_map(move |key| self.get(key).map(|object| (key, object)))
    }
}

#[derive(Debug)]
pub struct DiagramSet {
    block: ConditionalBlock<Vec<String>>,
}

impl DiagramSet {
    pub fn new(project: &Rc<Project>, context: &IpContext, definition: &Conditional<DiagramDefinition>) -> Self {
        DiagramSet {
            block: ConditionalBlock::build(project, definition, context.placeholders(), |d| d.images.clone()),
        }
    }

    pub fn images(&self) -> Vec<String> {
        self.block.current().cloned().unwrap_or_default()
    }

    pub fn selector(&self) -> Option<&Rc<Selector>> {
        self.block.selector()
    }
}
