// Tree-walking evaluator for Chariot programs

use crate::ast::{Block, Literal, Node, NodeKind, SourcePos};
use crate::debugger::{CheckpointAction, StackFrame};
use crate::runtime::environment::Scope;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::{Arity, Closure, Function, TypeTag, Value};
use crate::runtime::Runtime;
use std::cell::Cell;
use std::sync::Arc;

/// Outcome of executing a statement or block.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal(Value),
    Break,
    Continue,
    Return(Value),
}

/// Walks one runtime's syntax trees on the calling thread.
pub struct Evaluator {
    runtime: Runtime,
    depth: Cell<usize>,
}

impl Evaluator {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            depth: Cell::new(0),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Executes statements in order, running the debug checkpoint before each.
    pub fn exec_block(&self, block: &Block, scope: &Scope) -> RuntimeResult<Flow> {
        let mut last = Value::Null;
        for stmt in &block.stmts {
            self.checkpoint(&stmt.pos, scope)?;
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal(value) => last = value,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn checkpoint(&self, pos: &SourcePos, scope: &Scope) -> RuntimeResult<()> {
        if let Some(debugger) = self.runtime.debugger() {
            if debugger.checkpoint(pos, scope)? == CheckpointAction::Wait {
                debugger.wait_until_resumed()?;
            }
        }
        Ok(())
    }

    pub fn exec_stmt(&self, node: &Node, scope: &Scope) -> RuntimeResult<Flow> {
        match &node.kind {
            NodeKind::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval(cond, scope)?.is_truthy() {
                    self.exec_block(then_block, &scope.child())
                } else if let Some(else_block) = else_block {
                    self.exec_block(else_block, &scope.child())
                } else {
                    Ok(Flow::Normal(Value::Null))
                }
            }
            NodeKind::While { cond, body } => {
                while self.eval(cond, scope)?.is_truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(_) | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            NodeKind::Switch {
                subject,
                cases,
                default,
            } => self.exec_switch(subject.as_deref(), cases, default.as_ref(), scope),
            NodeKind::Break => Ok(Flow::Break),
            NodeKind::Continue => Ok(Flow::Continue),
            NodeKind::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            _ => Ok(Flow::Normal(self.eval(node, scope)?)),
        }
    }

    fn exec_switch(
        &self,
        subject: Option<&Node>,
        cases: &[crate::ast::SwitchCase],
        default: Option<&Block>,
        scope: &Scope,
    ) -> RuntimeResult<Flow> {
        let subject = match subject {
            Some(expr) => Some(self.eval(expr, scope)?),
            None => None,
        };
        for case in cases {
            let candidate = self.eval(&case.value, scope)?;
            let matched = match &subject {
                Some(subject) => subject.equals(&candidate),
                None => candidate.is_truthy(),
            };
            if matched {
                return self.finish_branch(&case.body, scope);
            }
        }
        match default {
            Some(block) => self.finish_branch(block, scope),
            None => Ok(Flow::Normal(Value::Null)),
        }
    }

    fn finish_branch(&self, block: &Block, scope: &Scope) -> RuntimeResult<Flow> {
        match self.exec_block(block, &scope.child())? {
            Flow::Normal(_) => Ok(Flow::Normal(Value::Null)),
            flow => Ok(flow),
        }
    }

    /// Evaluates an expression to a value.
    pub fn eval(&self, node: &Node, scope: &Scope) -> RuntimeResult<Value> {
        match &node.kind {
            NodeKind::Literal { value } => Ok(match value {
                Literal::Null => Value::Null,
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
            }),
            NodeKind::VarRef { name } => scope.lookup(name),
            NodeKind::Array { items } => Ok(Value::array(
                items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<RuntimeResult<Vec<_>>>()?,
            )),
            NodeKind::FuncDef { params, body } => Ok(Value::Function(Function::Closure(
                Arc::new(Closure::new(params.clone(), Arc::clone(body), scope.clone())),
            ))),
            NodeKind::Call { name, args } => self.eval_call(name, args, &node.pos, scope),
            _ => match self.exec_stmt(node, scope)? {
                Flow::Normal(value) => Ok(value),
                _ => Err(RuntimeError::InvalidProgram(format!(
                    "control flow used as a value at {}",
                    node.pos
                ))),
            },
        }
    }

    fn eval_call(
        &self,
        name: &str,
        args: &[Node],
        pos: &SourcePos,
        scope: &Scope,
    ) -> RuntimeResult<Value> {
        if let Some(result) = self.eval_special_form(name, args, scope)? {
            return Ok(result);
        }
        let callee = scope
            .get(name)?
            .ok_or_else(|| RuntimeError::undefined_function(name))?;
        let values = args
            .iter()
            .map(|arg| self.eval(arg, scope))
            .collect::<RuntimeResult<Vec<_>>>()?;
        self.call_value(&callee, name, values, pos, scope)
    }

    /// Forms that see their arguments unevaluated. Returns `None` for any
    /// other name.
    fn eval_special_form(
        &self,
        name: &str,
        args: &[Node],
        scope: &Scope,
    ) -> RuntimeResult<Option<Value>> {
        let value = match name {
            "declare" => self.eval_declare(name, args, scope, scope)?,
            "declareGlobal" => self.eval_declare(name, args, scope, &scope.global())?,
            "setq" => {
                if args.len() != 2 {
                    return Err(RuntimeError::ArityMismatch {
                        function: name.to_string(),
                        expected: "2".to_string(),
                        actual: args.len(),
                    });
                }
                let target = binding_name(name, &args[0])?;
                let value = self.eval(&args[1], scope)?;
                scope.assign(&target, value)?
            }
            "and" => {
                for arg in args {
                    match self.eval(arg, scope)? {
                        Value::Null | Value::Boolean(false) => {
                            return Ok(Some(Value::Boolean(false)))
                        }
                        Value::Boolean(true) => {}
                        other => {
                            return Err(RuntimeError::type_error(
                                "boolean",
                                other.type_name(),
                                "and",
                            ))
                        }
                    }
                }
                Value::Boolean(true)
            }
            "or" => {
                for arg in args {
                    match self.eval(arg, scope)? {
                        Value::Null | Value::Boolean(true) => {
                            return Ok(Some(Value::Boolean(true)))
                        }
                        Value::Boolean(false) => {}
                        other => {
                            return Err(RuntimeError::type_error(
                                "boolean",
                                other.type_name(),
                                "or",
                            ))
                        }
                    }
                }
                Value::Boolean(false)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// `declare(name[, type[, initial]])`
    fn eval_declare(
        &self,
        function: &str,
        args: &[Node],
        scope: &Scope,
        target: &Scope,
    ) -> RuntimeResult<Value> {
        if args.is_empty() || args.len() > 3 {
            return Err(RuntimeError::ArityMismatch {
                function: function.to_string(),
                expected: "1-3".to_string(),
                actual: args.len(),
            });
        }
        let name = binding_name(function, &args[0])?;
        let tag = match args.get(1) {
            Some(node) => {
                let code = self.eval(node, scope)?;
                let code = code.as_str().ok_or_else(|| {
                    RuntimeError::argument(function, "type specifier must be string")
                })?;
                TypeTag::from_code(code).ok_or_else(|| {
                    RuntimeError::argument(function, format!("invalid type specifier '{}'", code))
                })?
            }
            None => TypeTag::Variant,
        };
        let initial = match args.get(2) {
            Some(node) => Some(self.eval(node, scope)?),
            None => None,
        };
        target.define_typed(&name, tag, initial)
    }

    fn call_value(
        &self,
        callee: &Value,
        name: &str,
        args: Vec<Value>,
        pos: &SourcePos,
        scope: &Scope,
    ) -> RuntimeResult<Value> {
        match callee {
            Value::Function(Function::Builtin(builtin)) => {
                check_arity(&builtin.name, &builtin.arity, args.len())?;
                (builtin.func)(args)
            }
            Value::Function(Function::BuiltinWithContext(builtin)) => {
                check_arity(&builtin.name, &builtin.arity, args.len())?;
                (builtin.func)(args, self, scope)
            }
            Value::Function(Function::Closure(closure)) => {
                self.apply_closure(closure, args, name, pos)
            }
            other => Err(RuntimeError::type_error("function", other.type_name(), name)),
        }
    }

    /// Calls any function value with already evaluated arguments.
    pub fn apply(&self, func: &Value, args: Vec<Value>) -> RuntimeResult<Value> {
        let name = match func {
            Value::Function(f) => f.name().to_string(),
            _ => "<value>".to_string(),
        };
        let global = self.runtime.global_scope().clone();
        self.call_value(func, &name, args, &SourcePos::default(), &global)
    }

    fn apply_closure(
        &self,
        closure: &Closure,
        args: Vec<Value>,
        name: &str,
        pos: &SourcePos,
    ) -> RuntimeResult<Value> {
        if args.len() != closure.params.len() {
            return Err(RuntimeError::ArityMismatch {
                function: closure.name.as_deref().unwrap_or(name).to_string(),
                expected: closure.params.len().to_string(),
                actual: args.len(),
            });
        }
        let frame = closure.scope.child();
        for (param, value) in closure.params.iter().zip(args) {
            frame.define(param, value)?;
        }
        let function = closure.name.as_deref().unwrap_or(name);
        self.enter(function, pos, || self.exec_block(&closure.body, &frame))
    }

    /// Runs a zero-parameter closure's body directly in `scope`, which must
    /// descend from the closure's captured scope. Plan runs use this so every
    /// step shares one instance scope.
    pub fn run_in_scope(&self, closure: &Closure, scope: &Scope) -> RuntimeResult<Value> {
        if !closure.params.is_empty() {
            return Err(RuntimeError::ArityMismatch {
                function: closure.display_name().to_string(),
                expected: closure.params.len().to_string(),
                actual: 0,
            });
        }
        self.enter(closure.display_name(), &closure.body.pos, || {
            self.exec_block(&closure.body, scope)
        })
    }

    /// Tracks call depth and the debugger frame around a function body.
    fn enter<F>(&self, function: &str, pos: &SourcePos, body: F) -> RuntimeResult<Value>
    where
        F: FnOnce() -> RuntimeResult<Flow>,
    {
        let limit = self.runtime.config().max_call_depth;
        let depth = self.depth.get() + 1;
        if depth > limit {
            return Err(RuntimeError::RecursionLimit { limit });
        }
        self.depth.set(depth);
        let debugger = self.runtime.debugger();
        if let Some(debugger) = debugger {
            debugger.push_frame(StackFrame {
                function: function.to_string(),
                file: pos.file.clone(),
                line: pos.line,
            })?;
        }
        let result = body();
        if let Some(debugger) = debugger {
            debugger.pop_frame()?;
        }
        self.depth.set(depth - 1);
        match result? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
            Flow::Break | Flow::Continue => Err(RuntimeError::InvalidProgram(format!(
                "break/continue outside of a loop in '{}'",
                function
            ))),
        }
    }
}

fn check_arity(function: &str, arity: &Arity, actual: usize) -> RuntimeResult<()> {
    if arity.accepts(actual) {
        Ok(())
    } else {
        Err(RuntimeError::ArityMismatch {
            function: function.to_string(),
            expected: arity.to_string(),
            actual,
        })
    }
}

/// The unevaluated name argument of `declare`/`setq`.
fn binding_name(function: &str, node: &Node) -> RuntimeResult<String> {
    match &node.kind {
        NodeKind::VarRef { name } => Ok(name.clone()),
        NodeKind::Literal {
            value: Literal::String(name),
        } => Ok(name.clone()),
        _ => Err(RuntimeError::argument(
            function,
            "first argument must be a variable name",
        )),
    }
}
