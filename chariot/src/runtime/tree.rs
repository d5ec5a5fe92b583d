// Hierarchical attribute-bearing nodes

use crate::runtime::error::{lock_poisoned, RuntimeResult};
use crate::runtime::values::Value;
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct TreeData {
    pub name: String,
    pub attributes: IndexMap<String, Value>,
    pub children: Vec<TreeNode>,
}

/// Shared handle to a tree node. Clones alias the same node.
#[derive(Debug, Clone)]
pub struct TreeNode {
    inner: Arc<RwLock<TreeData>>,
}

impl TreeNode {
    pub fn new(name: &str) -> Self {
        Self::from_data(TreeData {
            name: name.to_string(),
            ..TreeData::default()
        })
    }

    pub fn from_data(data: TreeData) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .read()
            .map(|data| data.name.clone())
            .unwrap_or_default()
    }

    pub fn ptr_eq(&self, other: &TreeNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn set_attribute(&self, key: &str, value: Value) -> RuntimeResult<()> {
        self.inner
            .write()
            .map_err(lock_poisoned)?
            .attributes
            .insert(key.to_string(), value);
        Ok(())
    }

    pub fn attribute(&self, key: &str) -> RuntimeResult<Option<Value>> {
        Ok(self
            .inner
            .read()
            .map_err(lock_poisoned)?
            .attributes
            .get(key)
            .cloned())
    }

    pub fn add_child(&self, child: TreeNode) -> RuntimeResult<()> {
        self.inner.write().map_err(lock_poisoned)?.children.push(child);
        Ok(())
    }

    pub fn children(&self) -> RuntimeResult<Vec<TreeNode>> {
        Ok(self.inner.read().map_err(lock_poisoned)?.children.clone())
    }

    /// Name, attributes and children copied out from under the lock.
    pub fn snapshot(&self) -> RuntimeResult<(String, IndexMap<String, Value>, Vec<TreeNode>)> {
        let data = self.inner.read().map_err(lock_poisoned)?;
        Ok((
            data.name.clone(),
            data.attributes.clone(),
            data.children.clone(),
        ))
    }

    pub fn to_json(&self) -> RuntimeResult<serde_json::Value> {
        let (name, attributes, children) = self.snapshot()?;
        let mut attrs = serde_json::Map::new();
        for (key, value) in attributes.iter() {
            attrs.insert(key.clone(), value.to_json()?);
        }
        let children = children
            .iter()
            .map(|child| child.to_json())
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok(serde_json::json!({
            "name": name,
            "attributes": attrs,
            "children": children,
        }))
    }
}
