//! One-shot plan runner
//!
//! Every run happens on an isolated clone of the caller's runtime: the plan
//! is rebound onto the clone, an instance scope (a child of the clone's
//! global scope) receives the overlay variables, and the trigger, guard,
//! drop and step bodies all execute directly in that instance scope. The
//! caller's global bindings are never touched.

use crate::events::{AgentEvent, EventSink, EventStatus};
use chariot::runtime::PlanDef;
use chariot::{Closure, Plan, Runtime, RuntimeError, RuntimeResult, Scope, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// How a one-shot run gates on the plan's predicates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Trigger and guard must hold, drop must not
    #[default]
    Bdi,
    /// Same eligibility as `Bdi`, but steps never run
    DryRun,
    /// Skips the trigger
    GuardOnly,
    /// Skips trigger and guard, still honours drop
    Force,
    /// Skips every predicate
    ForceAll,
}

impl RunMode {
    /// Maps a mode name onto a mode. Anything unrecognized is `Bdi`.
    pub fn parse(text: &str) -> RunMode {
        match text.trim().to_ascii_lowercase().as_str() {
            "dry-run" => RunMode::DryRun,
            "guard-only" => RunMode::GuardOnly,
            "force" => RunMode::Force,
            "force-all" => RunMode::ForceAll,
            _ => RunMode::Bdi,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Bdi => "bdi",
            RunMode::DryRun => "dry-run",
            RunMode::GuardOnly => "guard-only",
            RunMode::Force => "force",
            RunMode::ForceAll => "force-all",
        }
    }

    fn checks_trigger(&self) -> bool {
        matches!(self, RunMode::Bdi | RunMode::DryRun)
    }

    fn checks_guard(&self) -> bool {
        matches!(self, RunMode::Bdi | RunMode::DryRun | RunMode::GuardOnly)
    }

    fn respects_drop(&self) -> bool {
        !matches!(self, RunMode::ForceAll)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs plans once against a snapshot of `runtime`.
pub struct PlanRunner<'a> {
    runtime: &'a Runtime,
    agent: Option<String>,
    sink: Option<EventSink>,
}

impl<'a> PlanRunner<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        Self {
            runtime,
            agent: None,
            sink: None,
        }
    }

    /// Attributes emitted events to `agent`.
    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Gates on trigger, guard and drop and runs the steps when eligible.
    /// Returns `Ok(true)` whether or not the steps ran; a failing step is a
    /// `StepFailure`.
    pub fn run_plan_once(&self, plan: &Plan) -> RuntimeResult<bool> {
        self.run_plan_once_ex(plan, RunMode::Bdi, &HashMap::new())?;
        Ok(true)
    }

    /// Returns true iff trigger and guard held, drop did not, and the steps
    /// ran. `vars` are bound in the run's instance scope.
    pub fn run_plan_once_bdi(
        &self,
        plan: &Plan,
        vars: &HashMap<String, Value>,
    ) -> RuntimeResult<bool> {
        self.run_plan_once_ex(plan, RunMode::Bdi, vars)
    }

    /// Runs under `mode`. `DryRun` answers whether the plan would run
    /// without executing any step.
    pub fn run_plan_once_ex(
        &self,
        plan: &Plan,
        mode: RunMode,
        vars: &HashMap<String, Value>,
    ) -> RuntimeResult<bool> {
        let instance = PlanInstance::prepare(self.runtime, plan, vars)?;
        if !instance.eligible(mode) {
            debug!(plan = %instance.def.name, mode = %mode, "plan not eligible");
            return Ok(false);
        }
        if mode == RunMode::DryRun {
            return Ok(true);
        }
        self.execute(&instance, mode.respects_drop())?;
        Ok(true)
    }

    /// Eligibility under `mode`, evaluated on a throwaway clone.
    pub fn is_eligible(
        &self,
        plan: &Plan,
        mode: RunMode,
        vars: &HashMap<String, Value>,
    ) -> RuntimeResult<bool> {
        Ok(PlanInstance::prepare(self.runtime, plan, vars)?.eligible(mode))
    }

    fn execute(&self, instance: &PlanInstance, respect_drop: bool) -> RuntimeResult<()> {
        let plan = instance.def.name.as_str();
        let agent = self.agent.as_deref();
        info!(agent = agent.unwrap_or("-"), plan, "plan started");
        self.emit(AgentEvent::plan(agent, plan, EventStatus::Start));

        let evaluator = instance.runtime.evaluator();
        for (index, step) in instance.def.steps.iter().enumerate() {
            // Drop was checked at entry; re-check it between steps
            if index > 0 && respect_drop && instance.predicate(&instance.def.drop, "drop") {
                info!(agent = agent.unwrap_or("-"), plan, step = index, "plan dropped");
                self.emit(AgentEvent::plan(agent, plan, EventStatus::Drop).at_step(index));
                return Ok(());
            }
            self.emit(AgentEvent::step(agent, plan, index, EventStatus::Start));
            if let Err(err) = evaluator.run_in_scope(step, &instance.scope) {
                warn!(
                    agent = agent.unwrap_or("-"),
                    plan,
                    step = index,
                    error = %err,
                    "plan step failed"
                );
                self.emit(
                    AgentEvent::step(agent, plan, index, EventStatus::Error)
                        .with_error(err.to_string()),
                );
                return Err(RuntimeError::StepFailure {
                    plan: plan.to_string(),
                    step: index,
                    source: Box::new(err),
                });
            }
            self.emit(AgentEvent::step(agent, plan, index, EventStatus::Finish));
        }

        self.emit(AgentEvent::plan(agent, plan, EventStatus::Finish));
        info!(agent = agent.unwrap_or("-"), plan, "plan finished");
        Ok(())
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }
}

/// One run's isolated runtime, rebound plan and instance scope.
struct PlanInstance {
    runtime: Runtime,
    def: PlanDef,
    scope: Scope,
}

impl PlanInstance {
    fn prepare(
        runtime: &Runtime,
        plan: &Plan,
        vars: &HashMap<String, Value>,
    ) -> RuntimeResult<PlanInstance> {
        let runtime = runtime.clone_runtime()?;
        let def = plan.rebind(runtime.global_scope())?.snapshot()?;
        let scope = runtime.global_scope().child();
        for (name, value) in vars {
            scope.define(name, value.clone())?;
        }
        Ok(PlanInstance {
            runtime,
            def,
            scope,
        })
    }

    fn eligible(&self, mode: RunMode) -> bool {
        (!mode.checks_trigger() || self.predicate(&self.def.trigger, "trigger"))
            && (!mode.checks_guard() || self.predicate(&self.def.guard, "guard"))
            && (!mode.respects_drop() || !self.predicate(&self.def.drop, "drop"))
    }

    /// Evaluates a predicate in the instance scope. Errors count as false.
    fn predicate(&self, closure: &Closure, role: &str) -> bool {
        match self.runtime.evaluator().run_in_scope(closure, &self.scope) {
            Ok(value) => value.as_condition(),
            Err(err) => {
                warn!(plan = %self.def.name, role, error = %err, "plan predicate failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_names_fall_back_to_bdi() {
        assert_eq!(RunMode::parse("dry-run"), RunMode::DryRun);
        assert_eq!(RunMode::parse("  Force-All "), RunMode::ForceAll);
        assert_eq!(RunMode::parse("bdi"), RunMode::Bdi);
        assert_eq!(RunMode::parse("anything-else"), RunMode::Bdi);
        assert_eq!(RunMode::parse(""), RunMode::Bdi);
        assert_eq!(RunMode::default(), RunMode::Bdi);
    }

    #[test]
    fn modes_skip_the_documented_predicates() {
        assert!(RunMode::DryRun.checks_trigger() && RunMode::DryRun.respects_drop());
        assert!(!RunMode::GuardOnly.checks_trigger() && RunMode::GuardOnly.checks_guard());
        assert!(!RunMode::Force.checks_guard() && RunMode::Force.respects_drop());
        assert!(!RunMode::ForceAll.respects_drop());
    }
}
