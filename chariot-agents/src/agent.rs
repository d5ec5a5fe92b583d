//! Agent scheduler
//!
//! An agent owns a base runtime (an isolated clone taken at creation), a set
//! of plans and a belief store. Once started, a tokio task wakes on every
//! poll tick or nudge, checks each plan's eligibility on a fresh clone and
//! dispatches eligible plans to the blocking pool through the
//! [`PlanRunner`]. A semaphore with `max_concurrent` permits is the hard
//! ceiling on in-flight dispatches: a plan that is eligible while every
//! permit is taken is skipped for that cycle, never queued.

use crate::beliefs::BeliefStore;
use crate::config::AgentConfig;
use crate::events::EventSink;
use crate::runner::{PlanRunner, RunMode};
use chariot::runtime::error::lock_poisoned;
use chariot::{Plan, Runtime, RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Agent whose dispatch is running on this thread, if any.
    static DISPATCHING: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Snapshot of an agent for introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub name: String,
    pub plans: Vec<String>,
    pub running: bool,
    pub poll_seconds: f64,
    pub max_concurrent: usize,
    pub belief_count: usize,
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Agent {
    id: u64,
    name: String,
    base: Runtime,
    plans: RwLock<Vec<Plan>>,
    beliefs: BeliefStore,
    config: AgentConfig,
    permits: Arc<Semaphore>,
    wake: Arc<Notify>,
    sink: EventSink,
    worker: Mutex<Option<LoopHandle>>,
}

impl Agent {
    /// Creates a stopped agent over an isolated clone of `runtime`.
    pub fn new(
        name: &str,
        runtime: &Runtime,
        config: AgentConfig,
        sink: EventSink,
    ) -> RuntimeResult<Arc<Agent>> {
        let config = config.normalized();
        let wake = Arc::new(Notify::new());
        Ok(Arc::new(Agent {
            id: NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            base: runtime.clone_runtime()?,
            plans: RwLock::new(Vec::new()),
            beliefs: BeliefStore::new(Arc::clone(&wake)),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            wake,
            sink,
            worker: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn beliefs(&self) -> &BeliefStore {
        &self.beliefs
    }

    /// Adds `plan`, rebound onto this agent's runtime. A plan with the same
    /// name replaces the earlier registration.
    pub fn register(&self, plan: &Plan) -> RuntimeResult<()> {
        let plan = plan.rebind(self.base.global_scope())?;
        let name = plan.name()?;
        let mut plans = self.plans.write().map_err(lock_poisoned)?;
        for existing in plans.iter_mut() {
            if existing.name()? == name {
                *existing = plan;
                return Ok(());
            }
        }
        plans.push(plan);
        Ok(())
    }

    pub fn plan_names(&self) -> RuntimeResult<Vec<String>> {
        self.plans
            .read()
            .map_err(lock_poisoned)?
            .iter()
            .map(Plan::name)
            .collect()
    }

    pub fn is_running(&self) -> RuntimeResult<bool> {
        Ok(self.worker.lock().map_err(lock_poisoned)?.is_some())
    }

    /// Wakes the loop for an immediate cycle. Nudges made while a cycle is
    /// pending coalesce into one.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    /// Spawns the scheduling loop on `handle`. Returns false if it was
    /// already running.
    pub fn start(self: &Arc<Self>, handle: &Handle) -> RuntimeResult<bool> {
        let mut worker = self.worker.lock().map_err(lock_poisoned)?;
        if worker.is_some() {
            return Ok(false);
        }
        let (shutdown, stop_rx) = watch::channel(false);
        let agent = Arc::clone(self);
        let task = handle.spawn(async move { agent.run_loop(stop_rx).await });
        *worker = Some(LoopHandle { shutdown, task });
        info!(
            agent = %self.name,
            max_concurrent = self.config.max_concurrent,
            poll_secs = self.config.poll_interval_secs,
            "agent started"
        );
        Ok(true)
    }

    /// Stops the loop and waits for in-flight dispatches to finish. No
    /// dispatch starts after this returns. Returns false if the agent was
    /// not running.
    pub fn stop(&self) -> RuntimeResult<bool> {
        let Some(worker) = self.worker.lock().map_err(lock_poisoned)?.take() else {
            return Ok(false);
        };
        worker.shutdown.send_replace(true);
        worker.task.abort();

        // A step of this agent stopping its own agent must not wait on itself
        let own_dispatch = DISPATCHING.with(|current| current.get()) == Some(self.id);
        let in_flight = self.config.max_concurrent - usize::from(own_dispatch);
        if in_flight > 0 {
            let permits = u32::try_from(in_flight).map_err(|_| {
                RuntimeError::Internal(format!("cannot drain {} permits", in_flight))
            })?;
            let drained = futures::executor::block_on(self.permits.acquire_many(permits))
                .map_err(|e| RuntimeError::Internal(e.to_string()))?;
            drop(drained);
        }
        info!(agent = %self.name, "agent stopped");
        Ok(true)
    }

    /// Ends the loop without waiting for in-flight dispatches, which run to
    /// completion on their own. Returns false if the agent was not running.
    pub fn halt(&self) -> RuntimeResult<bool> {
        let Some(worker) = self.worker.lock().map_err(lock_poisoned)?.take() else {
            return Ok(false);
        };
        worker.shutdown.send_replace(true);
        worker.task.abort();
        info!(agent = %self.name, "agent halted");
        Ok(true)
    }

    pub fn info(&self) -> RuntimeResult<AgentInfo> {
        Ok(AgentInfo {
            name: self.name.clone(),
            plans: self.plan_names()?,
            running: self.is_running()?,
            poll_seconds: self.config.poll_interval_secs,
            max_concurrent: self.config.max_concurrent,
            belief_count: self.beliefs.len()?,
        })
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_cycle(&shutdown).await {
                warn!(agent = %self.name, error = %err, "scheduling cycle failed");
            }
        }
        debug!(agent = %self.name, "agent loop exited");
    }

    async fn run_cycle(self: &Arc<Self>, shutdown: &watch::Receiver<bool>) -> RuntimeResult<()> {
        let plans = self.plans.read().map_err(lock_poisoned)?.clone();
        for plan in plans {
            let name = plan.name()?;
            let agent = Arc::clone(self);
            let candidate = plan.clone();
            let eligible = tokio::task::spawn_blocking(move || {
                PlanRunner::new(&agent.base).is_eligible(&candidate, RunMode::Bdi, &HashMap::new())
            })
            .await
            .map_err(|e| RuntimeError::Internal(e.to_string()))?;
            match eligible {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(
                        agent = %self.name,
                        plan = %name,
                        error = %err,
                        "eligibility check failed"
                    );
                    continue;
                }
            }

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!(
                    agent = %self.name,
                    plan = %name,
                    "concurrency ceiling reached, skipping plan"
                );
                continue;
            };
            // stop() raises the flag before draining permits
            if *shutdown.borrow() {
                return Ok(());
            }
            debug!(agent = %self.name, plan = %name, "dispatching plan");
            let agent = Arc::clone(self);
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                agent.dispatch(&plan);
            });
        }
        Ok(())
    }

    fn dispatch(&self, plan: &Plan) {
        let previous = DISPATCHING.with(|current| current.replace(Some(self.id)));
        let runner = PlanRunner::new(&self.base)
            .with_agent(&self.name)
            .with_sink(self.sink.clone());
        match runner.run_plan_once_bdi(plan, &HashMap::new()) {
            Ok(ran) => debug!(agent = %self.name, ran, "dispatch finished"),
            Err(err) => warn!(agent = %self.name, error = %err, "dispatch failed"),
        }
        DISPATCHING.with(|current| current.set(previous));
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}
