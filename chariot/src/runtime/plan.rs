//! First-class BDI plans.
//!
//! A plan bundles a trigger, a guard and a drop predicate with an ordered
//! list of steps. Every component must be a closure over the global scope so
//! that a runner can rebind it onto a cloned runtime.

use crate::runtime::environment::Scope;
use crate::runtime::error::{lock_poisoned, RuntimeError, RuntimeResult};
use crate::runtime::values::{CaptureKind, Closure, Function, Value};
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct PlanDef {
    pub name: String,
    pub params: Vec<String>,
    pub trigger: Arc<Closure>,
    pub guard: Arc<Closure>,
    pub steps: Vec<Arc<Closure>>,
    pub drop: Arc<Closure>,
}

impl PlanDef {
    /// Builds a definition from untyped values, checking each argument in
    /// declaration order.
    pub fn from_values(
        name: &Value,
        params: &Value,
        trigger: &Value,
        guard: &Value,
        steps: &Value,
        drop: &Value,
    ) -> RuntimeResult<PlanDef> {
        let name = name
            .as_str()
            .ok_or_else(|| RuntimeError::argument("plan", "name must be string"))?
            .to_string();
        Ok(PlanDef {
            params: expect_params(params, "plan")?,
            trigger: expect_predicate(trigger, "trigger", "plan")?,
            guard: expect_predicate(guard, "guard", "plan")?,
            steps: expect_steps(steps, "plan")?,
            drop: expect_predicate(drop, "drop", "plan")?,
            name,
        })
    }

    fn closures(&self) -> impl Iterator<Item = (&'static str, &Arc<Closure>)> + '_ {
        [
            ("trigger", &self.trigger),
            ("guard", &self.guard),
            ("drop", &self.drop),
        ]
        .into_iter()
        .chain(self.steps.iter().map(|step| ("steps", step)))
    }
}

/// Shared, mutable plan handle held by `Value::Plan`.
#[derive(Clone)]
pub struct Plan {
    inner: Arc<RwLock<PlanDef>>,
}

impl Plan {
    /// Validates the global-capture rule for every component.
    pub fn new(mut def: PlanDef) -> RuntimeResult<Plan> {
        for (role, closure) in def.closures() {
            ensure_global_capture(closure, role, "plan")?;
        }
        name_components(&mut def);
        Ok(Plan {
            inner: Arc::new(RwLock::new(def)),
        })
    }

    pub fn snapshot(&self) -> RuntimeResult<PlanDef> {
        Ok(self.inner.read().map_err(lock_poisoned)?.clone())
    }

    pub fn name(&self) -> RuntimeResult<String> {
        Ok(self.inner.read().map_err(lock_poisoned)?.name.clone())
    }

    pub fn ptr_eq(&self, other: &Plan) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Independent copy whose closures capture `global`.
    pub fn rebind(&self, global: &Scope) -> RuntimeResult<Plan> {
        let def = self.snapshot()?;
        let rebind = |c: &Arc<Closure>| c.rebind(global).map(Arc::new);
        Ok(Plan {
            inner: Arc::new(RwLock::new(PlanDef {
                trigger: rebind(&def.trigger)?,
                guard: rebind(&def.guard)?,
                drop: rebind(&def.drop)?,
                steps: def
                    .steps
                    .iter()
                    .map(rebind)
                    .collect::<RuntimeResult<Vec<_>>>()?,
                name: def.name,
                params: def.params,
            })),
        })
    }

    pub fn get_prop(&self, key: &str) -> RuntimeResult<Value> {
        let def = self.inner.read().map_err(lock_poisoned)?;
        let closure = |c: &Arc<Closure>| Value::Function(Function::Closure(Arc::clone(c)));
        Ok(match key.to_lowercase().as_str() {
            "name" => Value::String(def.name.clone()),
            "params" => Value::array(
                def.params
                    .iter()
                    .map(|p| Value::string(p.as_str()))
                    .collect(),
            ),
            "trigger" => closure(&def.trigger),
            "guard" => closure(&def.guard),
            "drop" => closure(&def.drop),
            "steps" => Value::array(def.steps.iter().map(closure).collect()),
            _ => return Err(unknown_property(key)),
        })
    }

    /// Replaces one component with the same checks `plan` applies. The new
    /// value is validated before the lock is taken, so a rejected update
    /// leaves the plan untouched.
    pub fn set_prop(&self, key: &str, value: Value) -> RuntimeResult<Value> {
        let key = key.to_lowercase();
        match key.as_str() {
            "name" => {
                let name = value
                    .as_str()
                    .ok_or_else(|| RuntimeError::argument("setProp", "name must be string"))?
                    .to_string();
                let mut def = self.inner.write().map_err(lock_poisoned)?;
                def.name = name;
                name_components(&mut def);
            }
            "params" => {
                let params = expect_params(&value, "setProp")?;
                self.inner.write().map_err(lock_poisoned)?.params = params;
            }
            "trigger" | "guard" | "drop" => {
                let closure = expect_predicate(&value, &key, "setProp")?;
                let mut def = self.inner.write().map_err(lock_poisoned)?;
                match key.as_str() {
                    "trigger" => def.trigger = closure,
                    "guard" => def.guard = closure,
                    _ => def.drop = closure,
                }
                name_components(&mut def);
            }
            "steps" => {
                let steps = expect_steps(&value, "setProp")?;
                let mut def = self.inner.write().map_err(lock_poisoned)?;
                def.steps = steps;
                name_components(&mut def);
            }
            _ => return Err(unknown_property(&key)),
        }
        Ok(value)
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.read() {
            Ok(def) => f
                .debug_struct("Plan")
                .field("name", &def.name)
                .field("params", &def.params)
                .field("steps", &def.steps.len())
                .finish(),
            Err(_) => write!(f, "Plan(<poisoned>)"),
        }
    }
}

fn unknown_property(key: &str) -> RuntimeError {
    RuntimeError::UnknownProperty {
        property: key.to_string(),
        target: "Plan".to_string(),
    }
}

/// Names every component after the plan, so frames read `cool.guard` or
/// `cool.step[1]`. Runs again whenever the name or a component changes.
fn name_components(def: &mut PlanDef) {
    def.trigger = name_closure(&def.trigger, &format!("{}.trigger", def.name));
    def.guard = name_closure(&def.guard, &format!("{}.guard", def.name));
    def.drop = name_closure(&def.drop, &format!("{}.drop", def.name));
    for (i, step) in def.steps.iter_mut().enumerate() {
        *step = name_closure(step, &format!("{}.step[{}]", def.name, i));
    }
}

fn name_closure(closure: &Arc<Closure>, name: &str) -> Arc<Closure> {
    if closure.name.as_deref() == Some(name) {
        return Arc::clone(closure);
    }
    Arc::new(closure.as_ref().clone().named(name))
}

fn ensure_global_capture(closure: &Closure, role: &str, function: &str) -> RuntimeResult<()> {
    if closure.capture != CaptureKind::Global {
        return Err(RuntimeError::argument(
            function,
            format!("{} must capture only the global scope", role),
        ));
    }
    Ok(())
}

fn expect_params(value: &Value, function: &str) -> RuntimeResult<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(RuntimeError::argument(
            function,
            "params must be array of strings",
        ));
    };
    items
        .read()
        .map_err(lock_poisoned)?
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                RuntimeError::argument(function, format!("params[{}] must be string", i))
            })
        })
        .collect()
}

fn expect_predicate(value: &Value, role: &str, function: &str) -> RuntimeResult<Arc<Closure>> {
    match value {
        Value::Function(Function::Closure(closure)) => {
            ensure_global_capture(closure, role, function)?;
            Ok(Arc::clone(closure))
        }
        _ => Err(RuntimeError::argument(
            function,
            format!("{} must be function", role),
        )),
    }
}

fn expect_steps(value: &Value, function: &str) -> RuntimeResult<Vec<Arc<Closure>>> {
    let not_functions = || RuntimeError::argument(function, "steps must be array of functions");
    let Value::Array(items) = value else {
        return Err(not_functions());
    };
    items
        .read()
        .map_err(lock_poisoned)?
        .iter()
        .map(|item| match item {
            Value::Function(Function::Closure(closure)) => {
                ensure_global_capture(closure, "steps", function)?;
                Ok(Arc::clone(closure))
            }
            _ => Err(not_functions()),
        })
        .collect()
}
