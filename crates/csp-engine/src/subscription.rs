//! Change filtering for a host session.

use csp_core::event::ChangeEvent;
use csp_core::path::{ConfigPath, PathPattern, PatternError};
use csp_protocol::{ChangedMessage, Channel};

/// Path patterns a host wants change notifications for.
///
/// With no patterns every change is forwarded.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    patterns: Vec<PathPattern>,
}

impl SubscriptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all patterns. On error the previous patterns are kept.
    pub fn replace<S: AsRef<str>>(&mut self, patterns: &[S]) -> Result<(), PatternError> {
        let compiled = patterns
            .iter()
            .map(|p| PathPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.patterns = compiled;
        Ok(())
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(PathPattern::as_str).collect()
    }

    pub fn matches(&self, path: &ConfigPath) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(path))
    }

    /// Convert a project change into a host message, or `None` when
    /// filtered out or not on a known channel.
    pub fn filter(&self, event: &ChangeEvent) -> Option<ChangedMessage> {
        let channel = match event.path.first().map(String::as_str) {
            Some("configs") => Channel::Configs,
            Some("gen") => Channel::Gen,
            Some("modules") => Channel::Modules,
            _ => return None,
        };
        let path = ConfigPath::from_segments(event.path.iter().map(String::as_str));
        if !self.matches(&path) {
            return None;
        }
        Some(ChangedMessage {
            channel,
            path: event.path_string(),
            new_value: event.new_value.clone(),
            old_value: event.old_value.clone(),
        })
    }
}
