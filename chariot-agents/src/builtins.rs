//! Agent builtins
//!
//! Exposes the plan runner, agents, the named registry and belief access to
//! programs. Every function is bound to one [`AgentRegistry`], so beliefs are
//! reachable only through `agentBelief` and `belief`, never through variable
//! lookup.

use crate::agent::Agent;
use crate::registry::AgentRegistry;
use crate::runner::{PlanRunner, RunMode};
use chariot::runtime::error::lock_poisoned;
use chariot::runtime::{Arity, HostObject};
use chariot::{Evaluator, Plan, Runtime, RuntimeError, RuntimeResult, Value};
use std::collections::HashMap;
use std::sync::Arc;

const AGENT_TYPE: &str = "agent";

type AgentFn = fn(&AgentRegistry, Vec<Value>, &Evaluator) -> RuntimeResult<Value>;

/// Installs the agent builtins into `runtime`'s global scope.
pub fn register_agent_functions(
    runtime: &Runtime,
    registry: Arc<AgentRegistry>,
) -> RuntimeResult<()> {
    let functions: [(&str, Arity, AgentFn); 14] = [
        ("agentNew", Arity::Range(0, 2), AgentLibrary::agent_new),
        ("agentRegister", Arity::Fixed(2), AgentLibrary::agent_register),
        ("agentStart", Arity::Fixed(1), AgentLibrary::agent_start),
        ("agentStop", Arity::Fixed(1), AgentLibrary::agent_stop),
        ("runPlanOnce", Arity::Fixed(1), AgentLibrary::run_plan_once),
        ("runPlanOnceBDI", Arity::Range(1, 2), AgentLibrary::run_plan_once_bdi),
        ("runPlanOnceEx", Arity::Range(1, 3), AgentLibrary::run_plan_once_ex),
        ("agentStartNamed", Arity::Range(2, 4), AgentLibrary::agent_start_named),
        ("agentStopNamed", Arity::Fixed(1), AgentLibrary::agent_stop_named),
        ("agentList", Arity::Fixed(0), AgentLibrary::agent_list),
        ("agentPublish", Arity::Fixed(1), AgentLibrary::agent_publish),
        ("agentBelief", Arity::Fixed(3), AgentLibrary::agent_belief),
        ("belief", Arity::Fixed(2), AgentLibrary::belief),
        ("agentInfo", Arity::Fixed(1), AgentLibrary::agent_info),
    ];
    for (name, arity, func) in functions {
        let registry = Arc::clone(&registry);
        runtime.register_with_context(name, arity, move |args, evaluator, _scope| {
            func(&registry, args, evaluator)
        })?;
    }
    Ok(())
}

struct AgentLibrary;

impl AgentLibrary {
    fn agent_new(
        registry: &AgentRegistry,
        args: Vec<Value>,
        evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let max_concurrent = count_arg(args.first(), "agentNew", "maxConcurrent")?;
        let poll_secs = seconds_arg(args.get(1), "agentNew")?;
        let agent = registry.create_agent(evaluator.runtime(), max_concurrent, poll_secs)?;
        Ok(Value::HostObject(HostObject::new(AGENT_TYPE, agent)))
    }

    fn agent_register(
        _registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let agent = agent_arg(&args[0], "agentRegister", "first arg not agent")?;
        let plan = plan_arg(&args[1], "agentRegister", "second arg not plan")?;
        agent.register(&plan)?;
        Ok(Value::Boolean(true))
    }

    fn agent_start(
        registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let agent = agent_arg(&args[0], "agentStart", "not an agent")?;
        agent.start(registry.handle())?;
        Ok(Value::Boolean(true))
    }

    fn agent_stop(
        _registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let agent = agent_arg(&args[0], "agentStop", "not an agent")?;
        agent.stop()?;
        Ok(Value::Boolean(true))
    }

    fn run_plan_once(
        registry: &AgentRegistry,
        args: Vec<Value>,
        evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let plan = plan_arg(&args[0], "runPlanOnce", "argument must be plan")?;
        runner(registry, evaluator).run_plan_once(&plan)?;
        Ok(Value::Boolean(true))
    }

    fn run_plan_once_bdi(
        registry: &AgentRegistry,
        args: Vec<Value>,
        evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let plan = plan_arg(&args[0], "runPlanOnceBDI", "first argument must be plan")?;
        let vars = vars_arg(args.get(1), "runPlanOnceBDI")?;
        let ran = runner(registry, evaluator).run_plan_once_bdi(&plan, &vars)?;
        Ok(Value::Boolean(ran))
    }

    /// `runPlanOnceEx(plan[, mode][, vars])`: a string second argument is
    /// the mode, otherwise it is taken as the vars map.
    fn run_plan_once_ex(
        registry: &AgentRegistry,
        args: Vec<Value>,
        evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let plan = plan_arg(&args[0], "runPlanOnceEx", "first argument must be plan")?;
        let (mode, vars) = match args.get(1) {
            Some(Value::String(mode)) => (RunMode::parse(mode), args.get(2)),
            other => {
                if args.len() > 2 {
                    return Err(RuntimeError::argument(
                        "runPlanOnceEx",
                        "mode must be string",
                    ));
                }
                (RunMode::default(), other)
            }
        };
        let vars = vars_arg(vars, "runPlanOnceEx")?;
        let ran = runner(registry, evaluator).run_plan_once_ex(&plan, mode, &vars)?;
        Ok(Value::Boolean(ran))
    }

    fn agent_start_named(
        registry: &AgentRegistry,
        args: Vec<Value>,
        evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let name = name_arg(&args[0], "agentStartNamed")?;
        let plan = plan_arg(&args[1], "agentStartNamed", "second arg must be plan")?;
        let max_concurrent = count_arg(args.get(2), "agentStartNamed", "maxConcurrent")?;
        let poll_secs = seconds_arg(args.get(3), "agentStartNamed")?;
        registry.start_named(&name, evaluator.runtime(), &plan, max_concurrent, poll_secs)?;
        Ok(Value::Boolean(true))
    }

    fn agent_stop_named(
        registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let name = name_arg(&args[0], "agentStopNamed")?;
        Ok(Value::Boolean(registry.stop_named(&name)?))
    }

    fn agent_list(
        registry: &AgentRegistry,
        _args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        Ok(Value::array(
            registry.list()?.into_iter().map(Value::String).collect(),
        ))
    }

    fn agent_publish(
        registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let name = name_arg(&args[0], "agentPublish")?;
        Ok(Value::Boolean(registry.publish(&name)?))
    }

    fn agent_belief(
        registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let name = name_arg(&args[0], "agentBelief")?;
        let key = key_arg(&args[1], "agentBelief")?;
        let value = args.into_iter().nth(2).unwrap_or(Value::Null);
        Ok(Value::Boolean(registry.set_belief(&name, &key, value)?))
    }

    fn belief(
        registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let name = name_arg(&args[0], "belief")?;
        let key = key_arg(&args[1], "belief")?;
        Ok(registry.belief(&name, &key)?.unwrap_or(Value::Null))
    }

    fn agent_info(
        registry: &AgentRegistry,
        args: Vec<Value>,
        _evaluator: &Evaluator,
    ) -> RuntimeResult<Value> {
        let name = name_arg(&args[0], "agentInfo")?;
        let Some(info) = registry.info(&name)? else {
            return Ok(Value::Null);
        };
        let doc = serde_json::to_value(&info).map_err(|e| RuntimeError::Internal(e.to_string()))?;
        Ok(Value::from_json(&doc))
    }
}

fn runner<'a>(registry: &AgentRegistry, evaluator: &'a Evaluator) -> PlanRunner<'a> {
    PlanRunner::new(evaluator.runtime()).with_sink(registry.events())
}

fn plan_arg(value: &Value, function: &str, message: &str) -> RuntimeResult<Plan> {
    match value {
        Value::Plan(plan) => Ok(plan.clone()),
        _ => Err(RuntimeError::argument(function, message)),
    }
}

fn agent_arg(value: &Value, function: &str, message: &str) -> RuntimeResult<Arc<Agent>> {
    match value {
        Value::HostObject(object) => object
            .downcast::<Agent>()
            .ok_or_else(|| RuntimeError::argument(function, message)),
        _ => Err(RuntimeError::argument(function, message)),
    }
}

fn name_arg(value: &Value, function: &str) -> RuntimeResult<String> {
    match value.as_str() {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(RuntimeError::argument(
            function,
            "first arg must be non-empty string name",
        )),
    }
}

fn key_arg(value: &Value, function: &str) -> RuntimeResult<String> {
    match value.as_str() {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(RuntimeError::argument(
            function,
            "second arg must be non-empty string key",
        )),
    }
}

/// Optional positive count; zero and negatives fall back to the default.
fn count_arg(value: Option<&Value>, function: &str, what: &str) -> RuntimeResult<Option<usize>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        // `as` saturates; AgentConfig::normalized applies the real ceiling
        Some(Value::Number(n)) if *n >= 1.0 => Ok(Some(*n as usize)),
        Some(Value::Number(_)) => Ok(None),
        Some(_) => Err(RuntimeError::argument(
            function,
            format!("{} must be number", what),
        )),
    }
}

fn seconds_arg(value: Option<&Value>, function: &str) -> RuntimeResult<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(*n)),
        Some(_) => Err(RuntimeError::argument(
            function,
            "pollSeconds must be number",
        )),
    }
}

fn vars_arg(value: Option<&Value>, function: &str) -> RuntimeResult<HashMap<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(HashMap::new()),
        Some(Value::Map(entries)) => Ok(entries.read().map_err(lock_poisoned)?.clone()),
        Some(_) => Err(RuntimeError::argument(function, "vars must be map")),
    }
}
