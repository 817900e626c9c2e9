//! Phases requested on the command line.

use std::fmt;

use crate::blueprint::{Everything, LabelSelector};

/// Well-known phases and what they are for. Modules may render fragments
/// for any other phase name too.
pub const PHASES: &[(&str, &str)] = &[
    ("test", "Run tests"),
    ("lint", "Run linters"),
    ("package", "Package artifacts"),
    ("publish", "Publish artifacts"),
    ("run", "Run the application"),
];

/// Description of a well-known phase.
pub fn phase_description(phase: &str) -> Option<&'static str> {
    PHASES
        .iter()
        .find(|(name, _)| *name == phase)
        .map(|(_, description)| *description)
}

/// One phase to run, with the selector picking the bricks it runs for.
pub struct PhaseRequest {
    pub phase: String,
    pub selector: Box<dyn LabelSelector>,
}

impl PhaseRequest {
    pub fn new(phase: impl Into<String>, selector: Box<dyn LabelSelector>) -> Self {
        Self {
            phase: phase.into(),
            selector,
        }
    }

    /// A request selecting every brick.
    pub fn all(phase: impl Into<String>) -> Self {
        Self::new(phase, Box::new(Everything))
    }
}

impl fmt::Debug for PhaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseRequest")
            .field("phase", &self.phase)
            .field("selector", &self.selector.to_string())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Nothing to run for the phase.
    Skipped,
    Applied,
}
