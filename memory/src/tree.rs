//! Key tree storage.
//!
//! Every mutation is expressed as a [`Mutation`] so the same code path
//! applies it to the live tree, to a transaction's private workspace, and
//! again to the live tree when that transaction commits.

use std::collections::BTreeMap;
use std::time::SystemTime;

use kreg_core::{codes, KeyHandle, KeyInfo, ValueData};

/// Case-folded lookup key. Names keep their original case for display.
pub(crate) fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Split a sub-key path into components, ignoring empty segments.
pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.split('\\')
        .filter(|component| !component.is_empty())
        .map(str::to_string)
        .collect()
}

/// Absolute location of a key: a predefined root plus a component path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyPath {
    pub root: u64,
    pub components: Vec<String>,
}

impl KeyPath {
    pub fn root(root: u64) -> Self {
        Self {
            root,
            components: Vec::new(),
        }
    }

    pub fn join(&self, sub_key: &str) -> Self {
        let mut components = self.components.clone();
        components.extend(split_path(sub_key));
        Self {
            root: self.root,
            components,
        }
    }

    /// Returns true if `self` is `other` or lies beneath it.
    pub fn is_within(&self, other: &KeyPath) -> bool {
        self.root == other.root
            && self.components.len() >= other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| fold(a) == fold(b))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredValue {
    pub name: String,
    pub data: ValueData,
}

#[derive(Debug, Clone)]
pub(crate) struct KeyNode {
    pub name: String,
    pub sub_keys: BTreeMap<String, KeyNode>,
    pub values: BTreeMap<String, StoredValue>,
    pub last_write: SystemTime,
}

impl KeyNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_keys: BTreeMap::new(),
            values: BTreeMap::new(),
            last_write: SystemTime::now(),
        }
    }

    pub fn find(&self, path: &[String]) -> Option<&KeyNode> {
        path.iter()
            .try_fold(self, |node, component| node.sub_keys.get(&fold(component)))
    }

    pub fn find_mut(&mut self, path: &[String]) -> Option<&mut KeyNode> {
        let mut node = self;
        for component in path {
            node = node.sub_keys.get_mut(&fold(component))?;
        }
        Some(node)
    }

    pub fn info(&self) -> KeyInfo {
        KeyInfo {
            sub_key_count: self.sub_keys.len() as u32,
            value_count: self.values.len() as u32,
            max_sub_key_len: self
                .sub_keys
                .values()
                .map(|k| k.name.encode_utf16().count() as u32)
                .max()
                .unwrap_or(0),
            max_value_name_len: self
                .values
                .values()
                .map(|v| v.name.encode_utf16().count() as u32)
                .max()
                .unwrap_or(0),
            max_value_len: self
                .values
                .values()
                .map(|v| v.data.data.len() as u32)
                .max()
                .unwrap_or(0),
            last_write: self.last_write,
        }
    }

    fn touch(&mut self) {
        self.last_write = SystemTime::now();
    }
}

/// The five predefined trees.
#[derive(Debug, Clone)]
pub(crate) struct Hives {
    roots: BTreeMap<u64, KeyNode>,
}

impl Hives {
    pub fn new() -> Self {
        let names = [
            (KeyHandle::HKEY_CLASSES_ROOT, "HKEY_CLASSES_ROOT"),
            (KeyHandle::HKEY_CURRENT_USER, "HKEY_CURRENT_USER"),
            (KeyHandle::HKEY_LOCAL_MACHINE, "HKEY_LOCAL_MACHINE"),
            (KeyHandle::HKEY_USERS, "HKEY_USERS"),
            (KeyHandle::HKEY_CURRENT_CONFIG, "HKEY_CURRENT_CONFIG"),
        ];
        Self {
            roots: names
                .into_iter()
                .map(|(handle, name)| (handle.raw(), KeyNode::new(name)))
                .collect(),
        }
    }

    pub fn find(&self, path: &KeyPath) -> Option<&KeyNode> {
        self.roots.get(&path.root)?.find(&path.components)
    }

    pub fn find_mut(&mut self, path: &KeyPath) -> Option<&mut KeyNode> {
        self.roots.get_mut(&path.root)?.find_mut(&path.components)
    }

    pub fn exists(&self, path: &KeyPath) -> bool {
        self.find(path).is_some()
    }
}

/// A single change to the key tree.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    CreateKey(KeyPath),
    DeleteKey(KeyPath),
    RenameKey(KeyPath, String),
    SetValue(KeyPath, String, ValueData),
    DeleteValue(KeyPath, String),
}

impl Mutation {
    /// Apply to `hives`, returning a native error code on failure.
    pub fn apply(&self, hives: &mut Hives) -> Result<(), u32> {
        match self {
            Mutation::CreateKey(path) => {
                let root = hives
                    .roots
                    .get_mut(&path.root)
                    .ok_or(codes::INVALID_HANDLE)?;
                create_path(root, &path.components);
                Ok(())
            }

            Mutation::DeleteKey(path) => {
                let (last, parent_path) =
                    path.components.split_last().ok_or(codes::ACCESS_DENIED)?;
                let parent = hives
                    .find_mut(&KeyPath {
                        root: path.root,
                        components: parent_path.to_vec(),
                    })
                    .ok_or(codes::FILE_NOT_FOUND)?;
                match parent.sub_keys.get(&fold(last)) {
                    None => Err(codes::FILE_NOT_FOUND),
                    // Only leaf keys can be deleted
                    Some(child) if !child.sub_keys.is_empty() => Err(codes::ACCESS_DENIED),
                    Some(_) => {
                        parent.sub_keys.remove(&fold(last));
                        parent.touch();
                        Ok(())
                    }
                }
            }

            Mutation::RenameKey(path, new_name) => {
                if new_name.is_empty() || new_name.contains('\\') {
                    return Err(codes::INVALID_PARAMETER);
                }
                let (last, parent_path) =
                    path.components.split_last().ok_or(codes::ACCESS_DENIED)?;
                let parent = hives
                    .find_mut(&KeyPath {
                        root: path.root,
                        components: parent_path.to_vec(),
                    })
                    .ok_or(codes::FILE_NOT_FOUND)?;
                let old = fold(last);
                let new = fold(new_name);
                if old != new && parent.sub_keys.contains_key(&new) {
                    return Err(codes::ALREADY_EXISTS);
                }
                let mut node = parent.sub_keys.remove(&old).ok_or(codes::FILE_NOT_FOUND)?;
                node.name = new_name.clone();
                node.touch();
                parent.sub_keys.insert(new, node);
                parent.touch();
                Ok(())
            }

            Mutation::SetValue(path, name, data) => {
                let node = hives.find_mut(path).ok_or(codes::KEY_DELETED)?;
                node.values.insert(
                    fold(name),
                    StoredValue {
                        name: name.clone(),
                        data: data.clone(),
                    },
                );
                node.touch();
                Ok(())
            }

            Mutation::DeleteValue(path, name) => {
                let node = hives.find_mut(path).ok_or(codes::KEY_DELETED)?;
                node.values
                    .remove(&fold(name))
                    .ok_or(codes::FILE_NOT_FOUND)?;
                node.touch();
                Ok(())
            }
        }
    }
}

fn create_path(root: &mut KeyNode, components: &[String]) {
    let mut node = root;
    for component in components {
        node = node
            .sub_keys
            .entry(fold(component))
            .or_insert_with(|| KeyNode::new(component.clone()));
    }
}
