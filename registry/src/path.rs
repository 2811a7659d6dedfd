//! Registry paths.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Separator between key names.
pub const SEPARATOR: char = '\\';

/// A key path below a root key.
///
/// Case-preserving but compared case-insensitively, like the registry
/// itself. Leading, trailing and repeated separators are dropped; `/` is an
/// ordinary name character. The empty path is the root key.
#[derive(Debug, Clone, Default)]
pub struct RegistryPath {
    components: Vec<String>,
}

impl RegistryPath {
    pub fn new(path: &str) -> Self {
        Self {
            components: path
                .split(SEPARATOR)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The root key's own path.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Last component; `None` at the root.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Enclosing path; `None` at the root.
    pub fn parent(&self) -> Option<RegistryPath> {
        let (_, parent) = self.components.split_last()?;
        Some(Self {
            components: parent.to_vec(),
        })
    }

    /// Append a relative path.
    pub fn join(&self, relative: &str) -> RegistryPath {
        let mut components = self.components.clone();
        components.extend(Self::new(relative).components);
        Self { components }
    }

    /// Replace the last component. `None` at the root.
    pub fn with_name(&self, name: &str) -> Option<RegistryPath> {
        self.parent().map(|parent| parent.join(name))
    }

    /// Whether `self` is `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &RegistryPath) -> bool {
        self.components.len() >= ancestor.components.len()
            && self
                .components
                .iter()
                .zip(&ancestor.components)
                .all(|(a, b)| eq_ignore_case(a, b))
    }

    /// The path as the native layer expects it.
    pub fn to_native(&self) -> String {
        self.components.join("\\")
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl PartialEq for RegistryPath {
    fn eq(&self, other: &Self) -> bool {
        self.components.len() == other.components.len() && self.starts_with(other)
    }
}

impl Eq for RegistryPath {}

impl Hash for RegistryPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for component in &self.components {
            component.to_lowercase().hash(state);
        }
        self.components.len().hash(state);
    }
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_native())
    }
}

impl From<&str> for RegistryPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}
