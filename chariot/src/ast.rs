// Annotated syntax tree consumed by the evaluator.
// Every node carries the source position the front end attached to it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(file: &str, line: u32, column: u32) -> Self {
        Self {
            file: file.to_string(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Number(f64),
    String(String),
    Boolean(bool),
}

/// A sequence of statements executed in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Node>,
    pub pos: SourcePos,
}

impl Block {
    pub fn new(stmts: Vec<Node>, pos: SourcePos) -> Self {
        Self { stmts, pos }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: SourcePos,
}

impl Node {
    pub fn new(kind: NodeKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Node,
    pub body: Block,
}

/// Node kinds. Expressions use call syntax only; there are no infix operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum NodeKind {
    Literal {
        value: Literal,
    },
    VarRef {
        name: String,
    },
    Array {
        items: Vec<Node>,
    },
    /// Anonymous function literal; evaluates to a closure over the current scope.
    FuncDef {
        params: Vec<String>,
        body: Arc<Block>,
    },
    Call {
        name: String,
        args: Vec<Node>,
    },
    If {
        cond: Box<Node>,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: Box<Node>,
        body: Block,
    },
    /// `switch(expr)` when `subject` is present, `switch()` otherwise.
    Switch {
        subject: Option<Box<Node>>,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    Break,
    Continue,
    Return {
        value: Option<Box<Node>>,
    },
}
