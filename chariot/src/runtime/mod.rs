//! Chariot Runtime System
//!
//! A [`Runtime`] owns one global scope, the configuration and an optional
//! debug session. Cloning the handle shares all three; [`Runtime::clone_runtime`]
//! produces an isolated copy whose closures and plans resolve free variables
//! against a fresh global scope.

pub mod environment;
pub mod error;
pub mod evaluator;
pub mod plan;
pub mod stdlib;
pub mod tree;
pub mod values;


pub use environment::{Scope, ScopeEntry};
pub use error::{RuntimeError, RuntimeResult};
pub use evaluator::{Evaluator, Flow};
pub use plan::{Plan, PlanDef};
pub use tree::TreeNode;
pub use values::{
    Arity, BuiltinFunction, BuiltinFunctionWithContext, CaptureKind, Closure, Function,
    HostObject, TypeTag, Value,
};

use crate::ast::Block;
use crate::config::RuntimeConfig;
use crate::debugger::Debugger;
use crate::runtime::error::lock_poisoned;
use crate::runtime::stdlib::StandardLibrary;
use crate::runtime::tree::TreeData;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct Runtime {
    global: Scope,
    debugger: Option<Arc<Debugger>>,
    config: Arc<RuntimeConfig>,
}

impl Runtime {
    /// Creates a runtime with the standard library loaded.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            global: Scope::global_with(StandardLibrary::builtins()),
            debugger: None,
            config: Arc::new(config),
        }
    }

    pub fn with_debugger(mut self, debugger: Arc<Debugger>) -> Self {
        self.attach_debugger(debugger);
        self
    }

    pub fn attach_debugger(&mut self, debugger: Arc<Debugger>) {
        self.debugger = Some(debugger);
    }

    pub fn debugger(&self) -> Option<&Arc<Debugger>> {
        self.debugger.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn global_scope(&self) -> &Scope {
        &self.global
    }

    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.clone())
    }

    /// Registers a pure builtin in the global scope.
    pub fn register_builtin<F>(&self, name: &str, arity: Arity, func: F) -> RuntimeResult<()>
    where
        F: Fn(Vec<Value>) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        self.global.define(
            name,
            Value::Function(Function::Builtin(BuiltinFunction {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            })),
        )
    }

    /// Registers a builtin that receives the evaluator and calling scope.
    pub fn register_with_context<F>(&self, name: &str, arity: Arity, func: F) -> RuntimeResult<()>
    where
        F: Fn(Vec<Value>, &Evaluator, &Scope) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        self.global.define(
            name,
            Value::Function(Function::BuiltinWithContext(BuiltinFunctionWithContext {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            })),
        )
    }

    /// Runs a program block in the global scope.
    pub fn execute(&self, block: &Block) -> RuntimeResult<Value> {
        if let Some(debugger) = &self.debugger {
            debugger.register_source(&block.pos.file)?;
        }
        match self.evaluator().exec_block(block, &self.global)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
            Flow::Break | Flow::Continue => Err(RuntimeError::InvalidProgram(
                "break/continue outside of a loop".to_string(),
            )),
        }
    }

    pub fn call(&self, func: &Value, args: Vec<Value>) -> RuntimeResult<Value> {
        self.evaluator().apply(func, args)
    }

    pub fn get_variable(&self, name: &str) -> RuntimeResult<Option<Value>> {
        self.global.get(name)
    }

    pub fn set_variable(&self, name: &str, value: Value) -> RuntimeResult<()> {
        self.global.define(name, value)
    }

    /// Isolated copy: every global binding is copied into a fresh global
    /// scope and containers are deep-copied. Global-capturing closures and
    /// plans are rebound; closures over a local frame get a copy of that
    /// frame chain hung off the new global. Builtins and host objects are
    /// shared, as is the debug session.
    pub fn clone_runtime(&self) -> RuntimeResult<Runtime> {
        let global = Scope::new_global();
        let mut isolator = Isolator::new(&global);
        for (name, entry) in self.global.snapshot()? {
            global.define_entry(
                &name,
                ScopeEntry {
                    value: isolator.value(&entry.value)?,
                    type_tag: entry.type_tag,
                },
            )?;
        }
        Ok(Runtime {
            global,
            debugger: self.debugger.clone(),
            config: Arc::clone(&self.config),
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("global", &self.global)
            .field("debugger", &self.debugger.is_some())
            .finish()
    }
}

/// Copies values onto a fresh global scope. Each local scope reached through
/// a closure is copied once, so closures that shared a frame still share the
/// copy, and the chain above it ends at the new global.
struct Isolator<'a> {
    global: &'a Scope,
    scopes: HashMap<usize, Scope>,
}

impl<'a> Isolator<'a> {
    fn new(global: &'a Scope) -> Self {
        Self {
            global,
            scopes: HashMap::new(),
        }
    }

    fn value(&mut self, value: &Value) -> RuntimeResult<Value> {
        Ok(match value {
            Value::Array(items) => {
                let items = items.read().map_err(lock_poisoned)?.clone();
                Value::array(
                    items
                        .iter()
                        .map(|item| self.value(item))
                        .collect::<RuntimeResult<Vec<_>>>()?,
                )
            }
            Value::Map(entries) => {
                let entries = entries.read().map_err(lock_poisoned)?.clone();
                let mut copy = HashMap::with_capacity(entries.len());
                for (key, item) in entries {
                    let item = self.value(&item)?;
                    copy.insert(key, item);
                }
                Value::Map(Arc::new(RwLock::new(copy)))
            }
            Value::Tree(node) => Value::Tree(self.tree(node)?),
            Value::Function(Function::Closure(closure)) => {
                let copy = match closure.capture {
                    CaptureKind::Global => closure.rebind(self.global)?,
                    CaptureKind::Local => Closure {
                        scope: self.scope(&closure.scope)?,
                        ..closure.as_ref().clone()
                    },
                };
                Value::Function(Function::Closure(Arc::new(copy)))
            }
            Value::Plan(plan) => Value::Plan(plan.rebind(self.global)?),
            other => other.clone(),
        })
    }

    fn scope(&mut self, scope: &Scope) -> RuntimeResult<Scope> {
        if scope.is_global() {
            return Ok(self.global.clone());
        }
        if let Some(copy) = self.scopes.get(&scope.id()) {
            return Ok(copy.clone());
        }
        let parent = match scope.parent() {
            Some(parent) => self.scope(parent)?,
            None => self.global.clone(),
        };
        let copy = parent.child();
        // registered before the bindings so closures over this frame resolve to it
        self.scopes.insert(scope.id(), copy.clone());
        for (name, entry) in scope.snapshot()? {
            copy.define_entry(
                &name,
                ScopeEntry {
                    value: self.value(&entry.value)?,
                    type_tag: entry.type_tag,
                },
            )?;
        }
        Ok(copy)
    }

    fn tree(&mut self, node: &TreeNode) -> RuntimeResult<TreeNode> {
        let (name, attributes, children) = node.snapshot()?;
        let mut copied = TreeData {
            name,
            ..TreeData::default()
        };
        for (key, value) in attributes {
            let value = self.value(&value)?;
            copied.attributes.insert(key, value);
        }
        for child in children {
            copied.children.push(self.tree(&child)?);
        }
        Ok(TreeNode::from_data(copied))
    }
}
