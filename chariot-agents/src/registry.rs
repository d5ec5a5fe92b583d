//! Named agent registry
//!
//! A constructible registry of running agents keyed by name. Each update of
//! the name map happens under one write lock, and agents leaving the map are
//! stopped only after the lock is released so a slow dispatch never blocks
//! other registry calls.
//!
//! Dropping the registry halts every loop it still holds but does not wait
//! for in-flight dispatches; call [`AgentRegistry::stop_all`] first for that.

use crate::agent::{Agent, AgentInfo};
use crate::config::AgentConfig;
use crate::events::{AgentEvent, EventSink};
use chariot::runtime::error::lock_poisoned;
use chariot::{Plan, Runtime, RuntimeError, RuntimeResult, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct AgentRegistry {
    handle: Handle,
    config: AgentConfig,
    sink: EventSink,
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    anonymous: AtomicU64,
}

impl AgentRegistry {
    /// Agent loops are spawned on `handle`; `config` supplies the defaults
    /// for agents created without explicit limits.
    pub fn new(handle: Handle, config: AgentConfig) -> Self {
        let config = config.normalized();
        Self {
            handle,
            sink: EventSink::new(config.event_capacity),
            config,
            agents: RwLock::new(HashMap::new()),
            anonymous: AtomicU64::new(1),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn events(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.sink.subscribe()
    }

    /// Creates an unregistered agent named `agent-<n>`.
    pub fn create_agent(
        &self,
        runtime: &Runtime,
        max_concurrent: Option<usize>,
        poll_secs: Option<f64>,
    ) -> RuntimeResult<Arc<Agent>> {
        let name = format!("agent-{}", self.anonymous.fetch_add(1, Ordering::Relaxed));
        Agent::new(
            &name,
            runtime,
            self.config.with_overrides(max_concurrent, poll_secs),
            self.sink.clone(),
        )
    }

    /// Creates an agent over a clone of `runtime`, registers `plan` and
    /// starts it under `name`. An agent already registered under that name
    /// is replaced and stopped.
    pub fn start_named(
        &self,
        name: &str,
        runtime: &Runtime,
        plan: &Plan,
        max_concurrent: Option<usize>,
        poll_secs: Option<f64>,
    ) -> RuntimeResult<bool> {
        if name.is_empty() {
            return Err(RuntimeError::argument(
                "agentStartNamed",
                "first arg must be non-empty string name",
            ));
        }
        let agent = Agent::new(
            name,
            runtime,
            self.config.with_overrides(max_concurrent, poll_secs),
            self.sink.clone(),
        )?;
        agent.register(plan)?;
        agent.start(&self.handle)?;

        let previous = self
            .agents
            .write()
            .map_err(lock_poisoned)?
            .insert(name.to_string(), Arc::clone(&agent));
        if let Some(previous) = previous {
            info!(agent = name, "replacing running agent");
            previous.stop()?;
        }
        Ok(true)
    }

    /// Stops and removes `name`. False if no such agent.
    pub fn stop_named(&self, name: &str) -> RuntimeResult<bool> {
        let removed = self.agents.write().map_err(lock_poisoned)?.remove(name);
        match removed {
            Some(agent) => {
                agent.stop()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Registered names, sorted.
    pub fn list(&self) -> RuntimeResult<Vec<String>> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .map_err(lock_poisoned)?
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn get(&self, name: &str) -> RuntimeResult<Option<Arc<Agent>>> {
        Ok(self.agents.read().map_err(lock_poisoned)?.get(name).cloned())
    }

    /// Wakes the named agent's loop. False if no such agent.
    pub fn publish(&self, name: &str) -> RuntimeResult<bool> {
        Ok(match self.get(name)? {
            Some(agent) => {
                agent.nudge();
                true
            }
            None => false,
        })
    }

    /// Stores a belief on the named agent, which also nudges it. False if no
    /// such agent.
    pub fn set_belief(&self, name: &str, key: &str, value: Value) -> RuntimeResult<bool> {
        match self.get(name)? {
            Some(agent) => {
                agent.beliefs().set(key, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn belief(&self, name: &str, key: &str) -> RuntimeResult<Option<Value>> {
        match self.get(name)? {
            Some(agent) => agent.beliefs().get(key),
            None => Ok(None),
        }
    }

    pub fn beliefs(&self, name: &str) -> RuntimeResult<Option<HashMap<String, Value>>> {
        self.get(name)?
            .map(|agent| agent.beliefs().snapshot())
            .transpose()
    }

    pub fn info(&self, name: &str) -> RuntimeResult<Option<AgentInfo>> {
        self.get(name)?.map(|agent| agent.info()).transpose()
    }

    /// Stops every registered agent and empties the registry.
    pub fn stop_all(&self) -> RuntimeResult<usize> {
        let drained: Vec<Arc<Agent>> = self
            .agents
            .write()
            .map_err(lock_poisoned)?
            .drain()
            .map(|(_, agent)| agent)
            .collect();
        for agent in &drained {
            agent.stop()?;
        }
        Ok(drained.len())
    }
}

impl Drop for AgentRegistry {
    fn drop(&mut self) {
        let agents = match self.agents.get_mut() {
            Ok(agents) => agents,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (name, agent) in agents.drain() {
            if let Err(err) = agent.halt() {
                warn!(agent = %name, error = %err, "failed to halt agent on drop");
            }
        }
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("config", &self.config)
            .field("agents", &self.list().unwrap_or_default())
            .finish()
    }
}
