// Scopes for variable bindings and lexical scope management

use crate::runtime::error::{lock_poisoned, RuntimeError, RuntimeResult};
use crate::runtime::values::{TypeTag, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A binding plus the type it was declared with, if any.
#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub value: Value,
    pub type_tag: Option<TypeTag>,
}

impl ScopeEntry {
    pub fn untyped(value: Value) -> Self {
        Self {
            value,
            type_tag: None,
        }
    }
}

struct ScopeInner {
    parent: Option<Scope>,
    bindings: RwLock<HashMap<String, ScopeEntry>>,
}

/// Shared handle to one level of the scope chain. Closures hold a `Scope`
/// by reference, so clones of the handle observe the same bindings.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates a new, empty global scope.
    pub fn new_global() -> Self {
        Self::global_with(HashMap::new())
    }

    /// Creates a global scope pre-populated with untyped bindings.
    pub fn global_with(bindings: HashMap<String, Value>) -> Self {
        Scope {
            inner: Arc::new(ScopeInner {
                parent: None,
                bindings: RwLock::new(
                    bindings
                        .into_iter()
                        .map(|(name, value)| (name, ScopeEntry::untyped(value)))
                        .collect(),
                ),
            }),
        }
    }

    /// Creates a new child scope that inherits from this one.
    pub fn child(&self) -> Scope {
        Scope {
            inner: Arc::new(ScopeInner {
                parent: Some(self.clone()),
                bindings: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    pub fn is_global(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// The root of this chain.
    pub fn global(&self) -> Scope {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.clone()
    }

    pub fn same_scope(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identity of this level, stable while any handle to it is alive.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Number of levels between this scope and the global scope.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some(parent) = current.parent() {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Looks up an entry by searching this scope and then its parents.
    pub fn get_entry(&self, name: &str) -> RuntimeResult<Option<ScopeEntry>> {
        let mut current = Some(self);
        while let Some(scope) = current {
            let bindings = scope.inner.bindings.read().map_err(lock_poisoned)?;
            if let Some(entry) = bindings.get(name) {
                return Ok(Some(entry.clone()));
            }
            current = scope.parent();
        }
        Ok(None)
    }

    pub fn get(&self, name: &str) -> RuntimeResult<Option<Value>> {
        Ok(self.get_entry(name)?.map(|entry| entry.value))
    }

    /// Like `get`, but an unbound name is an error.
    pub fn lookup(&self, name: &str) -> RuntimeResult<Value> {
        self.get(name)?
            .ok_or_else(|| RuntimeError::undefined_variable(name))
    }

    pub fn contains_local(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self
            .inner
            .bindings
            .read()
            .map_err(lock_poisoned)?
            .contains_key(name))
    }

    /// Defines (or redefines) an untyped binding in this scope.
    pub fn define(&self, name: &str, value: Value) -> RuntimeResult<()> {
        self.define_entry(name, ScopeEntry::untyped(value))
    }

    pub fn define_entry(&self, name: &str, entry: ScopeEntry) -> RuntimeResult<()> {
        self.inner
            .bindings
            .write()
            .map_err(lock_poisoned)?
            .insert(name.to_string(), entry);
        Ok(())
    }

    /// Declares a typed binding in this scope. A missing initial value takes
    /// the type's default; a present one is coerced to the type.
    pub fn define_typed(
        &self,
        name: &str,
        tag: TypeTag,
        initial: Option<Value>,
    ) -> RuntimeResult<Value> {
        let value = match initial {
            Some(value) => tag.coerce(value, &format!("declare {}", name))?,
            None => tag.default_value(),
        };
        let type_tag = if tag == TypeTag::Variant {
            None
        } else {
            Some(tag)
        };
        self.define_entry(
            name,
            ScopeEntry {
                value: value.clone(),
                type_tag,
            },
        )?;
        Ok(value)
    }

    /// Assigns to the nearest existing binding, keeping its declared type.
    /// An unbound name is created in this scope.
    pub fn assign(&self, name: &str, value: Value) -> RuntimeResult<Value> {
        let mut current = Some(self);
        while let Some(scope) = current {
            let mut bindings = scope.inner.bindings.write().map_err(lock_poisoned)?;
            if let Some(entry) = bindings.get_mut(name) {
                let value = match entry.type_tag {
                    Some(tag) => tag.coerce(value, &format!("assign {}", name))?,
                    None => value,
                };
                entry.value = value.clone();
                return Ok(value);
            }
            drop(bindings);
            current = scope.parent();
        }
        self.define(name, value.clone())?;
        Ok(value)
    }

    /// The bindings held directly by this scope, sorted by name.
    pub fn snapshot(&self) -> RuntimeResult<Vec<(String, ScopeEntry)>> {
        let bindings = self.inner.bindings.read().map_err(lock_poisoned)?;
        let mut entries: Vec<(String, ScopeEntry)> = bindings
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.inner.bindings.read().map(|b| b.len()).unwrap_or(0);
        f.debug_struct("Scope")
            .field("depth", &self.depth())
            .field("bindings", &size)
            .finish()
    }
}
