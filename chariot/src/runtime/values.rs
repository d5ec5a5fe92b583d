// Runtime value system for Chariot
// Represents values during execution (different from AST which represents parsed code)

use crate::ast::Block;
use crate::runtime::environment::Scope;
use crate::runtime::error::{lock_poisoned, RuntimeError, RuntimeResult};
use crate::runtime::evaluator::Evaluator;
use crate::runtime::plan::Plan;
use crate::runtime::tree::TreeNode;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

pub type ArrayRef = Arc<RwLock<Vec<Value>>>;
pub type MapRef = Arc<RwLock<HashMap<String, Value>>>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Number(f64),
    String(String),
    Boolean(bool),
    Array(ArrayRef),
    Map(MapRef),
    Tree(TreeNode),
    Json(serde_json::Value),
    Function(Function),
    Plan(Plan),
    HostObject(HostObject),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn map(entries: HashMap<String, Value>) -> Value {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Tree(_) => "tree",
            Value::Json(_) => "json",
            Value::Function(_) => "function",
            Value::Plan(_) => "plan",
            Value::HostObject(_) => "host object",
        }
    }

    /// Single-letter code reported by `typeOf`.
    pub fn type_code(&self) -> &'static str {
        TypeTag::of(self).code()
    }

    /// Truthiness for `if`, `while` and `switch()`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => false,
        }
    }

    /// Truthiness for plan predicates: strings never count.
    pub fn as_condition(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Structural equality for scalars and arrays; identity for handles.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                match (a.read(), b.read()) {
                    (Ok(a), Ok(b)) => {
                        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
                    }
                    _ => false,
                }
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                match (a.read(), b.read()) {
                    (Ok(a), Ok(b)) => {
                        a.len() == b.len()
                            && a.iter()
                                .all(|(k, v)| b.get(k).map(|w| v.equals(w)).unwrap_or(false))
                    }
                    _ => false,
                }
            }
            (Value::Tree(a), Value::Tree(b)) => a.ptr_eq(b),
            (Value::Plan(a), Value::Plan(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::HostObject(a), Value::HostObject(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }

    /// Converts to a JSON document. Functions, plans and host objects have no
    /// JSON form.
    pub fn to_json(&self) -> RuntimeResult<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Json(doc) => doc.clone(),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .read()
                    .map_err(lock_poisoned)?
                    .iter()
                    .map(|v| v.to_json())
                    .collect::<RuntimeResult<Vec<_>>>()?,
            ),
            Value::Map(entries) => {
                let mut out = serde_json::Map::new();
                for (k, v) in entries.read().map_err(lock_poisoned)?.iter() {
                    out.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(out)
            }
            Value::Tree(node) => node.to_json()?,
            other => {
                return Err(RuntimeError::type_error(
                    "json-compatible value",
                    other.type_name(),
                    "toJSON",
                ))
            }
        })
    }

    /// Converts a JSON document into native values.
    pub fn from_json(doc: &serde_json::Value) -> Value {
        match doc {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Array(items) => match items.read() {
                Ok(items) => {
                    let items: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                    write!(f, "[{}]", items.join(", "))
                }
                Err(_) => write!(f, "#<array: poisoned>"),
            },
            Value::Map(entries) => match entries.read() {
                Ok(entries) => {
                    let mut items: Vec<String> =
                        entries.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                    items.sort();
                    write!(f, "{{{}}}", items.join(", "))
                }
                Err(_) => write!(f, "#<map: poisoned>"),
            },
            Value::Tree(node) => write!(f, "#<tree {}>", node.name()),
            Value::Json(doc) => write!(f, "{}", doc),
            Value::Function(func) => write!(f, "#<function {}>", func.name()),
            Value::Plan(plan) => match plan.name() {
                Ok(name) => write!(f, "#<plan {}>", name),
                Err(_) => write!(f, "#<plan>"),
            },
            Value::HostObject(obj) => write!(f, "#<{}>", obj.type_name),
        }
    }
}

/// Opaque value owned by the embedding host (agents, handles).
#[derive(Clone)]
pub struct HostObject {
    pub type_name: String,
    pub inner: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new<T: Any + Send + Sync>(type_name: &str, inner: Arc<T>) -> Self {
        Self {
            type_name: type_name.to_string(),
            inner,
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({})", self.type_name)
    }
}

/// Declared type of a variable, written as a single-letter code in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Number,
    String,
    Boolean,
    Array,
    Map,
    Tree,
    Json,
    Function,
    Plan,
    HostObject,
    Variant,
}

impl TypeTag {
    pub fn code(&self) -> &'static str {
        match self {
            TypeTag::Number => "N",
            TypeTag::String => "S",
            TypeTag::Boolean => "L",
            TypeTag::Array => "A",
            TypeTag::Map => "M",
            TypeTag::Tree => "T",
            TypeTag::Json => "J",
            TypeTag::Function => "F",
            TypeTag::Plan => "P",
            TypeTag::HostObject => "H",
            TypeTag::Variant => "V",
        }
    }

    pub fn from_code(code: &str) -> Option<TypeTag> {
        Some(match code {
            "N" => TypeTag::Number,
            "S" => TypeTag::String,
            "L" => TypeTag::Boolean,
            "A" => TypeTag::Array,
            "M" => TypeTag::Map,
            "T" => TypeTag::Tree,
            "J" => TypeTag::Json,
            "F" => TypeTag::Function,
            "P" => TypeTag::Plan,
            "H" => TypeTag::HostObject,
            "V" => TypeTag::Variant,
            _ => return None,
        })
    }

    pub fn of(value: &Value) -> TypeTag {
        match value {
            Value::Null => TypeTag::Variant,
            Value::Number(_) => TypeTag::Number,
            Value::String(_) => TypeTag::String,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Array(_) => TypeTag::Array,
            Value::Map(_) => TypeTag::Map,
            Value::Tree(_) => TypeTag::Tree,
            Value::Json(_) => TypeTag::Json,
            Value::Function(_) => TypeTag::Function,
            Value::Plan(_) => TypeTag::Plan,
            Value::HostObject(_) => TypeTag::HostObject,
        }
    }

    /// Value a typed declaration receives when no initial value is given.
    pub fn default_value(&self) -> Value {
        match self {
            TypeTag::Number => Value::Number(0.0),
            TypeTag::String => Value::String(String::new()),
            TypeTag::Boolean => Value::Boolean(false),
            TypeTag::Array => Value::array(Vec::new()),
            TypeTag::Map => Value::map(HashMap::new()),
            TypeTag::Tree => Value::Tree(TreeNode::new("root")),
            _ => Value::Null,
        }
    }

    /// Coerces `value` into this type or fails with a type error.
    pub fn coerce(&self, value: Value, operation: &str) -> RuntimeResult<Value> {
        if *self == TypeTag::Variant || TypeTag::of(&value) == *self {
            return Ok(value);
        }
        let coerced = match (self, &value) {
            (TypeTag::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::Number),
            (TypeTag::String, Value::Number(n)) => Some(Value::String(format_number(*n))),
            (TypeTag::String, Value::Boolean(b)) => Some(Value::String(b.to_string())),
            (TypeTag::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Some(Value::Boolean(true)),
                "false" => Some(Value::Boolean(false)),
                _ => None,
            },
            (TypeTag::Boolean, Value::Number(n)) => Some(Value::Boolean(*n != 0.0)),
            (TypeTag::Function | TypeTag::Plan | TypeTag::HostObject, Value::Null) => {
                Some(Value::Null)
            }
            _ => None,
        };
        coerced.ok_or_else(|| {
            RuntimeError::type_error(self.code(), TypeTag::of(&value).code(), operation)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arity {
    Fixed(usize),
    Variadic(usize), // Minimum number of arguments
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == *n,
            Arity::Variadic(min) => count >= *min,
            Arity::Range(min, max) => count >= *min && count <= *max,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic(min) => write!(f, "at least {}", min),
            Arity::Range(min, max) => write!(f, "{}-{}", min, max),
        }
    }
}

pub type BuiltinFn = dyn Fn(Vec<Value>) -> RuntimeResult<Value> + Send + Sync;
pub type ContextFn = dyn Fn(Vec<Value>, &Evaluator, &Scope) -> RuntimeResult<Value> + Send + Sync;

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: String,
    pub arity: Arity,
    pub func: Arc<BuiltinFn>,
}

/// Builtin that needs the evaluator (to call back into closures) or the
/// calling scope.
#[derive(Clone)]
pub struct BuiltinFunctionWithContext {
    pub name: String,
    pub arity: Arity,
    pub func: Arc<ContextFn>,
}

/// Whether a closure captured the global scope or an enclosing local one.
/// Fixed at creation; only `Global` closures may be rebound onto another
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Global,
    Local,
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Arc<Block>,
    pub scope: Scope,
    pub capture: CaptureKind,
}

impl Closure {
    pub fn new(params: Vec<String>, body: Arc<Block>, scope: Scope) -> Self {
        let capture = if scope.is_global() {
            CaptureKind::Global
        } else {
            CaptureKind::Local
        };
        Self {
            name: None,
            params,
            body,
            scope,
            capture,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Copy of this closure capturing `global` instead. Fails for closures
    /// over a local scope, whose free variables cannot be re-established.
    pub fn rebind(&self, global: &Scope) -> RuntimeResult<Closure> {
        if self.capture != CaptureKind::Global {
            return Err(RuntimeError::argument(
                "rebind",
                format!(
                    "closure '{}' captures a local scope",
                    self.display_name()
                ),
            ));
        }
        Ok(Closure {
            name: self.name.clone(),
            params: self.params.clone(),
            body: Arc::clone(&self.body),
            scope: global.global(),
            capture: CaptureKind::Global,
        })
    }
}

#[derive(Clone)]
pub enum Function {
    Builtin(BuiltinFunction),
    BuiltinWithContext(BuiltinFunctionWithContext),
    Closure(Arc<Closure>),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Builtin(b) => &b.name,
            Function::BuiltinWithContext(b) => &b.name,
            Function::Closure(c) => c.display_name(),
        }
    }

    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match self {
            Function::Closure(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Builtin(b) => write!(f, "Builtin({}, {})", b.name, b.arity),
            Function::BuiltinWithContext(b) => {
                write!(f, "BuiltinWithContext({}, {})", b.name, b.arity)
            }
            Function::Closure(c) => write!(
                f,
                "Closure({}, params={:?}, capture={:?})",
                c.display_name(),
                c.params,
                c.capture
            ),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Function::Builtin(a), Function::Builtin(b)) => a.name == b.name && a.arity == b.arity,
            (Function::BuiltinWithContext(a), Function::BuiltinWithContext(b)) => {
                a.name == b.name && a.arity == b.arity
            }
            (Function::Closure(a), Function::Closure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
