use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Locator of the Dagger module that renders a brick.
///
/// Opaque to mason: it is handed verbatim to Dagger. Only
/// [`ModuleRef::sanitized_name`] looks inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleRef(pub String);

impl ModuleRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A file-system safe name for the module, used as a directory name.
    ///
    /// ```
    /// use mason_core::ModuleRef;
    ///
    /// let module = ModuleRef::new("git@github.com:user/repo.git");
    /// assert_eq!(module.sanitized_name(), "github_com_user_repo");
    /// ```
    pub fn sanitized_name(&self) -> String {
        let mut name = match Url::parse(&self.0) {
            Ok(url) => match url.host_str() {
                Some(host) => format!("{host}{}", url.path().trim_end_matches('/')),
                None => self.0.clone(),
            },
            Err(_) => self.0.clone(),
        };

        // `.git` ends the repository part, which may carry an `@version`.
        if let Some(stripped) = name.strip_suffix(".git") {
            name = stripped.to_owned();
        }
        name = name.replace(".git@", "@");
        for prefix in ["https://", "http://", "git@"] {
            name = name.replace(prefix, "");
        }
        name.replace(['/', ':', '@', '.', '-'], "_")
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
