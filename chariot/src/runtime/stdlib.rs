//! Chariot Standard Library
//!
//! The small set of builtins the execution core itself relies on:
//! comparison and arithmetic used by control flow, value introspection,
//! property access for plans, maps and trees, JSON documents and the `plan`
//! constructor. `declare`, `declareGlobal`, `setq`, `and` and `or` are
//! special forms handled by the evaluator because they see their arguments
//! unevaluated.

use crate::runtime::environment::Scope;
use crate::runtime::error::{lock_poisoned, RuntimeError, RuntimeResult};
use crate::runtime::evaluator::Evaluator;
use crate::runtime::plan::{Plan, PlanDef};
use crate::runtime::tree::TreeNode;
use crate::runtime::values::{
    Arity, BuiltinFunction, BuiltinFunctionWithContext, Function, Value,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct StandardLibrary;

type PureFn = fn(Vec<Value>) -> RuntimeResult<Value>;
type ScopedFn = fn(Vec<Value>, &Evaluator, &Scope) -> RuntimeResult<Value>;

impl StandardLibrary {
    /// All core builtins, keyed by name.
    pub fn builtins() -> HashMap<String, Value> {
        let pure: [(&str, Arity, PureFn); 21] = [
            ("not", Arity::Fixed(1), Self::not),
            ("equal", Arity::Fixed(2), Self::equal),
            ("unequal", Arity::Fixed(2), Self::unequal),
            ("bigger", Arity::Fixed(2), Self::bigger),
            ("smaller", Arity::Fixed(2), Self::smaller),
            ("add", Arity::Variadic(1), Self::add),
            ("sub", Arity::Fixed(2), Self::sub),
            ("typeOf", Arity::Fixed(1), Self::type_of),
            ("array", Arity::Variadic(0), Self::array),
            ("map", Arity::Variadic(0), Self::map),
            ("length", Arity::Fixed(1), Self::length),
            ("getProp", Arity::Fixed(2), Self::get_prop),
            ("setProp", Arity::Fixed(3), Self::set_prop),
            ("create", Arity::Fixed(1), Self::create),
            ("setAttribute", Arity::Fixed(3), Self::set_attribute),
            ("getAttribute", Arity::Fixed(2), Self::get_attribute),
            ("addChild", Arity::Fixed(2), Self::add_child),
            ("parseJSON", Arity::Fixed(1), Self::parse_json),
            ("toJSON", Arity::Fixed(1), Self::to_json),
            ("logPrint", Arity::Variadic(0), Self::log_print),
            ("plan", Arity::Fixed(6), Self::plan),
        ];
        let scoped: [(&str, Arity, ScopedFn); 2] = [
            ("getVariable", Arity::Fixed(1), Self::get_variable),
            ("call", Arity::Variadic(1), Self::call),
        ];

        let mut env = HashMap::new();
        for (name, arity, func) in pure {
            env.insert(
                name.to_string(),
                Value::Function(Function::Builtin(BuiltinFunction {
                    name: name.to_string(),
                    arity,
                    func: Arc::new(func),
                })),
            );
        }
        for (name, arity, func) in scoped {
            env.insert(
                name.to_string(),
                Value::Function(Function::BuiltinWithContext(BuiltinFunctionWithContext {
                    name: name.to_string(),
                    arity,
                    func: Arc::new(func),
                })),
            );
        }
        env
    }

    fn not(args: Vec<Value>) -> RuntimeResult<Value> {
        match &args[0] {
            Value::Null => Ok(Value::Boolean(true)),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(RuntimeError::type_error("boolean", other.type_name(), "not")),
        }
    }

    fn equal(args: Vec<Value>) -> RuntimeResult<Value> {
        Ok(Value::Boolean(args[0].equals(&args[1])))
    }

    fn unequal(args: Vec<Value>) -> RuntimeResult<Value> {
        Ok(Value::Boolean(!args[0].equals(&args[1])))
    }

    fn bigger(args: Vec<Value>) -> RuntimeResult<Value> {
        let ordering = Self::compare(&args, "bigger")?;
        Ok(Value::Boolean(ordering == Ordering::Greater))
    }

    fn smaller(args: Vec<Value>) -> RuntimeResult<Value> {
        let ordering = Self::compare(&args, "smaller")?;
        Ok(Value::Boolean(ordering == Ordering::Less))
    }

    /// Orders two numbers or two strings.
    fn compare(args: &[Value], operation: &str) -> RuntimeResult<Ordering> {
        let ordering = match (&args[0], &args[1]) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) => {
                return Err(RuntimeError::type_error(
                    a.type_name(),
                    b.type_name(),
                    operation,
                ))
            }
        };
        Ok(ordering.unwrap_or(Ordering::Equal))
    }

    fn add(args: Vec<Value>) -> RuntimeResult<Value> {
        if args.iter().all(|v| matches!(v, Value::Number(_))) {
            return Ok(Value::Number(args.iter().filter_map(Value::as_number).sum()));
        }
        if args.iter().any(|v| matches!(v, Value::String(_))) {
            return Ok(Value::String(
                args.iter().map(|v| v.to_string()).collect::<String>(),
            ));
        }
        let bad = args
            .iter()
            .find(|v| !matches!(v, Value::Number(_)))
            .map(Value::type_name)
            .unwrap_or("value");
        Err(RuntimeError::type_error("number", bad, "add"))
    }

    fn sub(args: Vec<Value>) -> RuntimeResult<Value> {
        match (&args[0], &args[1]) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
            (Value::Number(_), other) | (other, _) => {
                Err(RuntimeError::type_error("number", other.type_name(), "sub"))
            }
        }
    }

    fn type_of(args: Vec<Value>) -> RuntimeResult<Value> {
        Ok(Value::string(args[0].type_code()))
    }

    fn array(args: Vec<Value>) -> RuntimeResult<Value> {
        Ok(Value::array(args))
    }

    /// `map(key1, value1, key2, value2, ...)`
    fn map(args: Vec<Value>) -> RuntimeResult<Value> {
        if args.len() % 2 != 0 {
            return Err(RuntimeError::argument(
                "map",
                "expects alternating keys and values",
            ));
        }
        let mut entries = HashMap::new();
        let mut iter = args.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let Value::String(key) = key else {
                return Err(RuntimeError::argument("map", "keys must be strings"));
            };
            entries.insert(key, value);
        }
        Ok(Value::map(entries))
    }

    fn length(args: Vec<Value>) -> RuntimeResult<Value> {
        let len = match &args[0] {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.read().map_err(lock_poisoned)?.len(),
            Value::Map(entries) => entries.read().map_err(lock_poisoned)?.len(),
            other => {
                return Err(RuntimeError::type_error(
                    "string, array or map",
                    other.type_name(),
                    "length",
                ))
            }
        };
        Ok(Value::Number(len as f64))
    }

    fn property_key(value: &Value, function: &str) -> RuntimeResult<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RuntimeError::argument(function, "property name must be string"))
    }

    fn get_prop(args: Vec<Value>) -> RuntimeResult<Value> {
        let key = Self::property_key(&args[1], "getProp")?;
        match &args[0] {
            Value::Plan(plan) => plan.get_prop(&key),
            Value::Map(entries) => Ok(entries
                .read()
                .map_err(lock_poisoned)?
                .get(&key)
                .cloned()
                .unwrap_or(Value::Null)),
            Value::Tree(node) => {
                if key == "name" {
                    return Ok(Value::String(node.name()));
                }
                Ok(node.attribute(&key)?.unwrap_or(Value::Null))
            }
            other => Err(RuntimeError::type_error(
                "plan, map or tree",
                other.type_name(),
                "getProp",
            )),
        }
    }

    fn set_prop(args: Vec<Value>) -> RuntimeResult<Value> {
        let mut args = args.into_iter();
        let (Some(target), Some(key), Some(value)) = (args.next(), args.next(), args.next()) else {
            return Err(RuntimeError::argument("setProp", "expects target, key and value"));
        };
        let key = Self::property_key(&key, "setProp")?;
        match target {
            Value::Plan(plan) => plan.set_prop(&key, value),
            Value::Map(entries) => {
                entries
                    .write()
                    .map_err(lock_poisoned)?
                    .insert(key, value.clone());
                Ok(value)
            }
            Value::Tree(node) => {
                node.set_attribute(&key, value.clone())?;
                Ok(value)
            }
            other => Err(RuntimeError::type_error(
                "plan, map or tree",
                other.type_name(),
                "setProp",
            )),
        }
    }

    fn expect_tree<'a>(value: &'a Value, function: &str) -> RuntimeResult<&'a TreeNode> {
        match value {
            Value::Tree(node) => Ok(node),
            other => Err(RuntimeError::type_error("tree", other.type_name(), function)),
        }
    }

    fn create(args: Vec<Value>) -> RuntimeResult<Value> {
        let name = args[0]
            .as_str()
            .ok_or_else(|| RuntimeError::argument("create", "node name must be string"))?;
        Ok(Value::Tree(TreeNode::new(name)))
    }

    fn set_attribute(args: Vec<Value>) -> RuntimeResult<Value> {
        let node = Self::expect_tree(&args[0], "setAttribute")?;
        let key = Self::property_key(&args[1], "setAttribute")?;
        node.set_attribute(&key, args[2].clone())?;
        Ok(args[2].clone())
    }

    fn get_attribute(args: Vec<Value>) -> RuntimeResult<Value> {
        let node = Self::expect_tree(&args[0], "getAttribute")?;
        let key = Self::property_key(&args[1], "getAttribute")?;
        Ok(node.attribute(&key)?.unwrap_or(Value::Null))
    }

    fn add_child(args: Vec<Value>) -> RuntimeResult<Value> {
        let parent = Self::expect_tree(&args[0], "addChild")?;
        let child = Self::expect_tree(&args[1], "addChild")?;
        if parent.ptr_eq(child) {
            return Err(RuntimeError::argument("addChild", "a node cannot contain itself"));
        }
        parent.add_child(child.clone())?;
        Ok(args[0].clone())
    }

    fn parse_json(args: Vec<Value>) -> RuntimeResult<Value> {
        let text = args[0]
            .as_str()
            .ok_or_else(|| RuntimeError::argument("parseJSON", "argument must be string"))?;
        serde_json::from_str(text)
            .map(Value::Json)
            .map_err(|e| RuntimeError::argument("parseJSON", e.to_string()))
    }

    fn to_json(args: Vec<Value>) -> RuntimeResult<Value> {
        Ok(Value::String(args[0].to_json()?.to_string()))
    }

    fn log_print(args: Vec<Value>) -> RuntimeResult<Value> {
        let line: Vec<String> = args.iter().map(|v| v.to_string()).collect();
        info!(target: "chariot::script", "{}", line.join(" "));
        Ok(Value::Boolean(true))
    }

    /// `plan(name, params, trigger, guard, steps, drop)`
    fn plan(args: Vec<Value>) -> RuntimeResult<Value> {
        let def = PlanDef::from_values(&args[0], &args[1], &args[2], &args[3], &args[4], &args[5])?;
        Ok(Value::Plan(Plan::new(def)?))
    }

    fn get_variable(
        args: Vec<Value>,
        _evaluator: &Evaluator,
        scope: &Scope,
    ) -> RuntimeResult<Value> {
        let name = args[0]
            .as_str()
            .ok_or_else(|| RuntimeError::argument("getVariable", "name must be string"))?;
        scope.lookup(name)
    }

    /// `call(fn, args...)`
    fn call(args: Vec<Value>, evaluator: &Evaluator, _scope: &Scope) -> RuntimeResult<Value> {
        let mut args = args.into_iter();
        let func = args.next().unwrap_or(Value::Null);
        evaluator.apply(&func, args.collect())
    }
}
