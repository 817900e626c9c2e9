use std::collections::BTreeMap;
use std::fmt;

/// Label set of a brick, used for selection.
pub type Labels = BTreeMap<String, String>;

/// A predicate over label sets.
///
/// The selector language lives outside the core; anything that can say yes
/// or no to a label set and describe itself can filter a blueprint.
pub trait LabelSelector: fmt::Display + Send + Sync {
    fn matches(&self, labels: &Labels) -> bool;
}

/// Selects every label set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Everything;

impl LabelSelector for Everything {
    fn matches(&self, _labels: &Labels) -> bool {
        true
    }
}

impl fmt::Display for Everything {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ok(())
    }
}
