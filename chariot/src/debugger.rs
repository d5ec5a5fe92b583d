//! Debug instrumentation
//!
//! The evaluator calls [`Debugger::checkpoint`] before every statement. The
//! checkpoint consults the shared session (breakpoints, step mode, call
//! stack) and answers [`CheckpointAction::Continue`] or
//! [`CheckpointAction::Wait`]; on `Wait` the interpreter thread parks in
//! [`Debugger::wait_until_resumed`] until a transport calls continue, a step
//! or stop.
//!
//! Each interpreter thread keeps its own call stack, so executions sharing
//! one session never see each other's frames. A step request follows the
//! execution that paused; other executions only stop on breakpoints.
//!
//! Events go onto a bounded broadcast queue. Emitting never blocks: when the
//! queue is full the oldest events are overwritten.

use crate::ast::SourcePos;
use crate::runtime::environment::Scope;
use crate::runtime::error::{lock_poisoned, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Condvar, Mutex, RwLock};
use std::thread::{self, ThreadId};
use tokio::sync::broadcast;
use tracing::debug;

pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebugState {
    Stopped,
    Running,
    Paused,
    SteppingOver,
    SteppingInto,
    SteppingOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: String,
    pub file: String,
    pub line: u32,
    pub enabled: bool,
    /// Variable that must be truthy in the current scope for the breakpoint
    /// to fire.
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugEventKind {
    Breakpoint,
    Step,
    Error,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEvent {
    pub kind: DebugEventKind,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: Option<String>,
    pub call_stack: Vec<StackFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointAction {
    Continue,
    Wait,
}

#[derive(Debug)]
struct DebugSession {
    state: DebugState,
    breakpoints: BTreeMap<String, Breakpoint>,
    call_stacks: HashMap<ThreadId, Vec<StackFrame>>,
    /// Call depth of the focused execution when the step request was made
    step_depth: usize,
    /// Execution that last paused; `None` lets any execution take a step
    focus: Option<ThreadId>,
    position: Option<SourcePos>,
    sources: HashSet<String>,
}

pub struct Debugger {
    session: RwLock<DebugSession>,
    gate: Mutex<u64>,
    resumed: Condvar,
    events: broadcast::Sender<DebugEvent>,
    queue: Mutex<broadcast::Receiver<DebugEvent>>,
}

impl DebugSession {
    fn depth(&self, thread: ThreadId) -> usize {
        self.call_stacks.get(&thread).map_or(0, Vec::len)
    }

    fn stack(&self, thread: ThreadId) -> Vec<StackFrame> {
        self.call_stacks.get(&thread).cloned().unwrap_or_default()
    }
}

impl Debugger {
    pub fn new(event_capacity: usize) -> Self {
        let (events, queue) = broadcast::channel(event_capacity.max(1));
        Self {
            session: RwLock::new(DebugSession {
                state: DebugState::Stopped,
                breakpoints: BTreeMap::new(),
                call_stacks: HashMap::new(),
                step_depth: 0,
                focus: None,
                position: None,
                sources: HashSet::new(),
            }),
            gate: Mutex::new(0),
            resumed: Condvar::new(),
            events,
            queue: Mutex::new(queue),
        }
    }

    pub fn state(&self) -> RuntimeResult<DebugState> {
        Ok(self.session.read().map_err(lock_poisoned)?.state)
    }

    /// Makes `file` a valid breakpoint target.
    pub fn register_source(&self, file: &str) -> RuntimeResult<()> {
        self.session
            .write()
            .map_err(lock_poisoned)?
            .sources
            .insert(file.to_string());
        Ok(())
    }

    /// Stores a breakpoint at `file:line`. A file no program has been loaded
    /// from is reported as an error event, the breakpoint is kept regardless.
    pub fn set_breakpoint(
        &self,
        file: &str,
        line: u32,
        condition: Option<String>,
    ) -> RuntimeResult<Breakpoint> {
        let breakpoint = Breakpoint {
            id: format!("{}:{}", file, line),
            file: file.to_string(),
            line,
            enabled: true,
            condition,
        };
        let known = {
            let mut session = self.session.write().map_err(lock_poisoned)?;
            session
                .breakpoints
                .insert(breakpoint.id.clone(), breakpoint.clone());
            session.sources.contains(file)
        };
        if !known {
            self.emit(DebugEvent {
                kind: DebugEventKind::Error,
                file: Some(file.to_string()),
                line: Some(line),
                message: Some(format!("no source loaded for file '{}'", file)),
                call_stack: Vec::new(),
            });
        }
        Ok(breakpoint)
    }

    pub fn remove_breakpoint(&self, id: &str) -> RuntimeResult<bool> {
        Ok(self
            .session
            .write()
            .map_err(lock_poisoned)?
            .breakpoints
            .remove(id)
            .is_some())
    }

    pub fn enable_breakpoint(&self, id: &str, enabled: bool) -> RuntimeResult<bool> {
        let mut session = self.session.write().map_err(lock_poisoned)?;
        Ok(match session.breakpoints.get_mut(id) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        })
    }

    pub fn breakpoints(&self) -> RuntimeResult<Vec<Breakpoint>> {
        Ok(self
            .session
            .read()
            .map_err(lock_poisoned)?
            .breakpoints
            .values()
            .cloned()
            .collect())
    }

    /// `Stopped -> Running`. Clears any stale call stacks.
    pub fn start(&self) -> RuntimeResult<bool> {
        let mut session = self.session.write().map_err(lock_poisoned)?;
        if session.state != DebugState::Stopped {
            return Ok(false);
        }
        session.state = DebugState::Running;
        session.call_stacks.clear();
        session.focus = None;
        Ok(true)
    }

    /// Requests a pause at the next checkpoint.
    pub fn pause(&self) -> RuntimeResult<bool> {
        let mut session = self.session.write().map_err(lock_poisoned)?;
        if session.state != DebugState::Running {
            return Ok(false);
        }
        session.state = DebugState::SteppingInto;
        session.focus = None;
        Ok(true)
    }

    pub fn continue_execution(&self) -> RuntimeResult<bool> {
        self.resume(DebugState::Running)
    }

    pub fn step_over(&self) -> RuntimeResult<bool> {
        self.resume(DebugState::SteppingOver)
    }

    pub fn step_into(&self) -> RuntimeResult<bool> {
        self.resume(DebugState::SteppingInto)
    }

    pub fn step_out(&self) -> RuntimeResult<bool> {
        self.resume(DebugState::SteppingOut)
    }

    /// Any state goes to `Stopped`; paused executions are released and run
    /// free from then on.
    pub fn stop(&self) -> RuntimeResult<()> {
        let position = {
            let mut session = self.session.write().map_err(lock_poisoned)?;
            session.state = DebugState::Stopped;
            session.position.clone()
        };
        self.emit(DebugEvent {
            kind: DebugEventKind::Stopped,
            file: position.as_ref().map(|p| p.file.clone()),
            line: position.as_ref().map(|p| p.line),
            message: None,
            call_stack: Vec::new(),
        });
        self.signal()
    }

    fn resume(&self, next: DebugState) -> RuntimeResult<bool> {
        {
            let mut session = self.session.write().map_err(lock_poisoned)?;
            if session.state != DebugState::Paused {
                return Ok(false);
            }
            session.state = next;
            session.step_depth = session.focus.map_or(0, |focus| session.depth(focus));
        }
        self.signal()?;
        Ok(true)
    }

    fn signal(&self) -> RuntimeResult<()> {
        let mut generation = self.gate.lock().map_err(lock_poisoned)?;
        *generation = generation.wrapping_add(1);
        self.resumed.notify_all();
        Ok(())
    }

    /// Decides whether execution may proceed past the statement at `pos`.
    pub fn checkpoint(&self, pos: &SourcePos, scope: &Scope) -> RuntimeResult<CheckpointAction> {
        let event = {
            let mut session = self.session.write().map_err(lock_poisoned)?;
            session.position = Some(pos.clone());
            let thread = thread::current().id();
            let depth = session.depth(thread);
            let focused = session.focus.map_or(true, |focus| focus == thread);
            let stepped = match session.state {
                DebugState::Stopped => return Ok(CheckpointAction::Continue),
                DebugState::Paused => return Ok(CheckpointAction::Wait),
                DebugState::Running => false,
                DebugState::SteppingInto => focused,
                DebugState::SteppingOver => focused && depth <= session.step_depth,
                DebugState::SteppingOut => focused && depth < session.step_depth,
            };
            let kind = if stepped {
                DebugEventKind::Step
            } else if breakpoint_hit(&session, pos, scope)? {
                DebugEventKind::Breakpoint
            } else {
                return Ok(CheckpointAction::Continue);
            };
            session.state = DebugState::Paused;
            session.focus = Some(thread);
            DebugEvent {
                kind,
                file: Some(pos.file.clone()),
                line: Some(pos.line),
                message: None,
                call_stack: session.stack(thread),
            }
        };
        debug!(file = %pos.file, line = pos.line, kind = ?event.kind, "debugger paused");
        self.emit(event);
        Ok(CheckpointAction::Wait)
    }

    /// Blocks the calling interpreter thread while the session is paused.
    pub fn wait_until_resumed(&self) -> RuntimeResult<()> {
        let mut generation = self.gate.lock().map_err(lock_poisoned)?;
        while self.state()? == DebugState::Paused {
            generation = self.resumed.wait(generation).map_err(lock_poisoned)?;
        }
        Ok(())
    }

    /// Pushes onto the calling thread's stack.
    pub fn push_frame(&self, frame: StackFrame) -> RuntimeResult<()> {
        self.session
            .write()
            .map_err(lock_poisoned)?
            .call_stacks
            .entry(thread::current().id())
            .or_default()
            .push(frame);
        Ok(())
    }

    pub fn pop_frame(&self) -> RuntimeResult<Option<StackFrame>> {
        let thread = thread::current().id();
        let mut session = self.session.write().map_err(lock_poisoned)?;
        let Some(stack) = session.call_stacks.get_mut(&thread) else {
            return Ok(None);
        };
        let frame = stack.pop();
        if stack.is_empty() {
            session.call_stacks.remove(&thread);
        }
        Ok(frame)
    }

    /// The calling thread's frames, outermost first.
    pub fn call_stack(&self) -> RuntimeResult<Vec<StackFrame>> {
        let session = self.session.read().map_err(lock_poisoned)?;
        Ok(session.stack(thread::current().id()))
    }

    /// Frames of the execution that paused last, for transports that inspect
    /// a paused program from another thread.
    pub fn paused_call_stack(&self) -> RuntimeResult<Vec<StackFrame>> {
        let session = self.session.read().map_err(lock_poisoned)?;
        Ok(session
            .focus
            .map(|focus| session.stack(focus))
            .unwrap_or_default())
    }

    pub fn current_position(&self) -> RuntimeResult<Option<SourcePos>> {
        Ok(self.session.read().map_err(lock_poisoned)?.position.clone())
    }

    /// Live feed of events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.events.subscribe()
    }

    /// Takes everything buffered in the internal queue. Events overwritten
    /// while the queue was full are skipped.
    pub fn drain_events(&self) -> RuntimeResult<Vec<DebugEvent>> {
        let mut queue = self.queue.lock().map_err(lock_poisoned)?;
        let mut drained = Vec::new();
        loop {
            match queue.try_recv() {
                Ok(event) => drained.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        Ok(drained)
    }

    fn emit(&self, event: DebugEvent) {
        // The internal receiver keeps the channel open, so send only fails
        // once the debugger itself is being dropped.
        let _ = self.events.send(event);
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debugger")
            .field("state", &self.state().ok())
            .finish()
    }
}

fn breakpoint_hit(session: &DebugSession, pos: &SourcePos, scope: &Scope) -> RuntimeResult<bool> {
    let id = format!("{}:{}", pos.file, pos.line);
    let Some(bp) = session.breakpoints.get(&id) else {
        return Ok(false);
    };
    if !bp.enabled {
        return Ok(false);
    }
    match &bp.condition {
        Some(variable) => Ok(scope
            .get(variable)?
            .map(|value| value.is_truthy())
            .unwrap_or(false)),
        None => Ok(true),
    }
}
