use serde::{Deserialize, Serialize};

use super::{Labels, ModuleRef};
use crate::fragment::PostRun;

/// A typed, labeled unit of build configuration.
///
/// Bricks are read from the files in a workspace's `.mason` directory and
/// handed as JSON to the module named by `module_ref`, which renders them
/// into script fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brick {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub module_ref: ModuleRef,
    #[serde(default)]
    pub metadata: BrickMetadata,
    /// Module specific payload, passed through untouched.
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub extra_phases: Vec<String>,
    #[serde(default)]
    pub post_run: PostRun,
}

impl Brick {
    pub fn is_valid(&self) -> bool {
        !self.kind.is_empty() && !self.module_ref.is_empty() && !self.metadata.name.is_empty()
    }

    /// The brick's labels plus the derived `module`, `kind` and `name` keys.
    pub fn selection_labels(&self) -> Labels {
        let mut labels = self.metadata.labels.clone();
        labels.insert("module".to_owned(), self.module_ref.to_string());
        labels.insert("kind".to_owned(), self.kind.clone());
        labels.insert("name".to_owned(), self.metadata.name.clone());
        labels
    }

    /// Name of the file the brick is dumped to for its module.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.kind.to_lowercase(),
            self.metadata.name.to_lowercase()
        )
    }
}
