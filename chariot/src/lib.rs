//! Chariot language core
//!
//! Tree-walking execution for Chariot programs: the value and scope model,
//! the evaluator, cooperative debug instrumentation, first-class plans and
//! tree persistence. Orchestration (schedulers, registries) lives in
//! `chariot-agents`.

pub mod ast;
pub mod builders;
pub mod config;
pub mod debugger;
pub mod persistence;
pub mod runtime;

pub use ast::{Block, Literal, Node, NodeKind, SourcePos, SwitchCase};
pub use config::RuntimeConfig;
pub use debugger::{
    Breakpoint, CheckpointAction, DebugEvent, DebugEventKind, DebugState, Debugger, StackFrame,
};
pub use runtime::error::{RuntimeError, RuntimeResult};
pub use runtime::values::{CaptureKind, Closure, Function, TypeTag, Value};
pub use runtime::{Evaluator, Plan, Runtime, Scope};
