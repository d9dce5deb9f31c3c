//! Resource sets extracted from an app document.

use indexmap::IndexMap;

/// A stylesheet referenced by a `link` tag. `code` is empty until fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSource {
    pub code: String,
}

/// An external or inline script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptSource {
    pub code: String,
    pub is_external: bool,
}

/// Stylesheets keyed by href and scripts keyed by src (or a generated
/// nonce for inline code), both in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    pub links: IndexMap<String, LinkSource>,
    pub scripts: IndexMap<String, ScriptSource>,
}

impl SourceSet {
    /// Keys of external scripts still waiting for their code.
    pub fn external_scripts(&self) -> Vec<String> {
        self.scripts
            .iter()
            .filter(|(_, script)| script.is_external)
            .map(|(key, _)| key.clone())
            .collect()
    }
}
