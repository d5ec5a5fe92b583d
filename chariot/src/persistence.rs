//! Tree persistence
//!
//! Trees are stored as JSON. Plan-valued attributes keep the params and body
//! of each closure; on load every closure is rebound to the loading
//! runtime's global scope, so a reloaded plan satisfies the same
//! global-capture rule as a freshly built one.

use crate::ast::Block;
use crate::runtime::error::{lock_poisoned, RuntimeError, RuntimeResult};
use crate::runtime::plan::{Plan, PlanDef};
use crate::runtime::tree::{TreeData, TreeNode};
use crate::runtime::values::{CaptureKind, Closure, Function, Value};
use crate::runtime::{Runtime, Scope};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct StoredTree {
    name: String,
    attributes: IndexMap<String, StoredValue>,
    children: Vec<StoredTree>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StoredValue {
    Null,
    Number { value: f64 },
    String { value: String },
    Boolean { value: bool },
    Array { items: Vec<StoredValue> },
    Map { entries: BTreeMap<String, StoredValue> },
    Tree { node: StoredTree },
    Json { value: serde_json::Value },
    Function { closure: StoredClosure },
    Plan { plan: StoredPlan },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredClosure {
    params: Vec<String>,
    body: Block,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPlan {
    name: String,
    params: Vec<String>,
    trigger: StoredClosure,
    guard: StoredClosure,
    steps: Vec<StoredClosure>,
    drop: StoredClosure,
}

/// Serializes a tree, including plan-valued attributes.
pub fn save_tree(node: &TreeNode) -> RuntimeResult<Vec<u8>> {
    let stored = store_tree(node)?;
    serde_json::to_vec_pretty(&stored).map_err(|e| RuntimeError::Persistence(e.to_string()))
}

/// Restores a tree saved by [`save_tree`], rebinding closures to `runtime`.
pub fn load_tree(bytes: &[u8], runtime: &Runtime) -> RuntimeResult<TreeNode> {
    let stored: StoredTree =
        serde_json::from_slice(bytes).map_err(|e| RuntimeError::Persistence(e.to_string()))?;
    restore_tree(stored, runtime.global_scope())
}

fn store_tree(node: &TreeNode) -> RuntimeResult<StoredTree> {
    let (name, attributes, children) = node.snapshot()?;
    let mut stored = IndexMap::with_capacity(attributes.len());
    for (key, value) in attributes.iter() {
        stored.insert(key.clone(), store_value(value)?);
    }
    Ok(StoredTree {
        name,
        attributes: stored,
        children: children
            .iter()
            .map(store_tree)
            .collect::<RuntimeResult<Vec<_>>>()?,
    })
}

fn store_value(value: &Value) -> RuntimeResult<StoredValue> {
    Ok(match value {
        Value::Null => StoredValue::Null,
        Value::Number(n) => StoredValue::Number { value: *n },
        Value::String(s) => StoredValue::String { value: s.clone() },
        Value::Boolean(b) => StoredValue::Boolean { value: *b },
        Value::Array(items) => StoredValue::Array {
            items: items
                .read()
                .map_err(lock_poisoned)?
                .iter()
                .map(store_value)
                .collect::<RuntimeResult<Vec<_>>>()?,
        },
        Value::Map(entries) => {
            let mut stored = BTreeMap::new();
            for (key, item) in entries.read().map_err(lock_poisoned)?.iter() {
                stored.insert(key.clone(), store_value(item)?);
            }
            StoredValue::Map { entries: stored }
        }
        Value::Tree(node) => StoredValue::Tree {
            node: store_tree(node)?,
        },
        Value::Json(doc) => StoredValue::Json { value: doc.clone() },
        Value::Function(Function::Closure(closure)) => StoredValue::Function {
            closure: store_closure(closure)?,
        },
        Value::Plan(plan) => {
            let def = plan.snapshot()?;
            StoredValue::Plan {
                plan: StoredPlan {
                    trigger: store_closure(&def.trigger)?,
                    guard: store_closure(&def.guard)?,
                    drop: store_closure(&def.drop)?,
                    steps: def
                        .steps
                        .iter()
                        .map(|step| store_closure(step))
                        .collect::<RuntimeResult<Vec<_>>>()?,
                    name: def.name,
                    params: def.params,
                },
            }
        }
        other => {
            return Err(RuntimeError::Persistence(format!(
                "{} values cannot be saved",
                other.type_name()
            )))
        }
    })
}

fn store_closure(closure: &Closure) -> RuntimeResult<StoredClosure> {
    if closure.capture != CaptureKind::Global {
        return Err(RuntimeError::Persistence(format!(
            "closure '{}' captures a local scope and cannot be saved",
            closure.display_name()
        )));
    }
    Ok(StoredClosure {
        params: closure.params.clone(),
        body: closure.body.as_ref().clone(),
    })
}

fn restore_tree(stored: StoredTree, global: &Scope) -> RuntimeResult<TreeNode> {
    let mut data = TreeData {
        name: stored.name,
        ..TreeData::default()
    };
    for (key, value) in stored.attributes {
        data.attributes.insert(key, restore_value(value, global)?);
    }
    for child in stored.children {
        data.children.push(restore_tree(child, global)?);
    }
    Ok(TreeNode::from_data(data))
}

fn restore_value(stored: StoredValue, global: &Scope) -> RuntimeResult<Value> {
    Ok(match stored {
        StoredValue::Null => Value::Null,
        StoredValue::Number { value } => Value::Number(value),
        StoredValue::String { value } => Value::String(value),
        StoredValue::Boolean { value } => Value::Boolean(value),
        StoredValue::Array { items } => Value::array(
            items
                .into_iter()
                .map(|item| restore_value(item, global))
                .collect::<RuntimeResult<Vec<_>>>()?,
        ),
        StoredValue::Map { entries } => Value::map(
            entries
                .into_iter()
                .map(|(key, item)| Ok((key, restore_value(item, global)?)))
                .collect::<RuntimeResult<_>>()?,
        ),
        StoredValue::Tree { node } => Value::Tree(restore_tree(node, global)?),
        StoredValue::Json { value } => Value::Json(value),
        StoredValue::Function { closure } => {
            Value::Function(Function::Closure(restore_closure(closure, global)))
        }
        StoredValue::Plan { plan } => Value::Plan(Plan::new(PlanDef {
            trigger: restore_closure(plan.trigger, global),
            guard: restore_closure(plan.guard, global),
            drop: restore_closure(plan.drop, global),
            steps: plan
                .steps
                .into_iter()
                .map(|step| restore_closure(step, global))
                .collect(),
            name: plan.name,
            params: plan.params,
        })?),
    })
}

fn restore_closure(stored: StoredClosure, global: &Scope) -> Arc<Closure> {
    Arc::new(Closure::new(stored.params, Arc::new(stored.body), global.global()))
}
