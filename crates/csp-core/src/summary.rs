//! Chip summary: the pin-out facts IP value units are checked against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One physical pin of the package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinDefinition {
    /// Peripheral signals this pin can be routed to (`USART1_TX`, ...).
    #[serde(default)]
    pub signals: Vec<String>,

    /// GPIO modes, written `<instance>:<mode>` (`GPIO:Input`).
    #[serde(default)]
    pub modes: Vec<String>,
}

/// One module the chip carries. `define` names the IP definition it is
/// built from; modules without one have no configurable parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleUnit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub define: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryModules {
    /// Peripheral instances (`USART1`, `SPI2`) by name.
    #[serde(default)]
    pub peripherals: BTreeMap<String, ModuleUnit>,
}

/// Static description of a target chip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChipSummary {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub vendor: String,

    #[serde(default)]
    pub pins: BTreeMap<String, PinDefinition>,

    #[serde(default)]
    pub modules: SummaryModules,
}

impl ChipSummary {
    /// Pins that can carry any of `signals`, in pin name order.
    pub fn find_pins_by_signals<S: AsRef<str>>(&self, signals: &[S]) -> Vec<String> {
        self.pins
            .iter()
            .filter(|(_, pin)| {
                signals
                    .iter()
                    .any(|s| pin.signals.iter().any(|p| p == s.as_ref()))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The IP instance that owns GPIO modes, taken from the first pin that
    /// declares one. Empty when the chip declares no modes.
    pub fn pin_instance(&self) -> &str {
        self.pins
            .values()
            .find_map(|pin| pin.modes.first())
            .and_then(|mode| mode.split(':').next())
            .unwrap_or("")
    }
}
