// Node constructors. Positions default to empty; `BlockBuilder` stamps the
// file and line of each statement it receives.

use crate::ast::{Block, Literal, Node, NodeKind, SourcePos, SwitchCase};
use std::sync::Arc;

fn node(kind: NodeKind) -> Node {
    Node::new(kind, SourcePos::default())
}

fn literal(value: Literal) -> Node {
    node(NodeKind::Literal { value })
}

pub fn num(n: f64) -> Node {
    literal(Literal::Number(n))
}

pub fn text(s: &str) -> Node {
    literal(Literal::String(s.to_string()))
}

pub fn boolean(b: bool) -> Node {
    literal(Literal::Boolean(b))
}

pub fn null() -> Node {
    literal(Literal::Null)
}

pub fn var(name: &str) -> Node {
    node(NodeKind::VarRef {
        name: name.to_string(),
    })
}

pub fn array(items: Vec<Node>) -> Node {
    node(NodeKind::Array { items })
}

pub fn call(name: &str, args: Vec<Node>) -> Node {
    node(NodeKind::Call {
        name: name.to_string(),
        args,
    })
}

/// `func(params) { body }`
pub fn func(params: &[&str], body: Block) -> Node {
    node(NodeKind::FuncDef {
        params: params.iter().map(|p| p.to_string()).collect(),
        body: Arc::new(body),
    })
}

/// Zero-argument function whose body is a single expression.
pub fn thunk(expr: Node) -> Node {
    let pos = expr.pos.clone();
    func(&[], Block::new(vec![expr], pos))
}

pub fn if_else(cond: Node, then_block: Block, else_block: Option<Block>) -> Node {
    node(NodeKind::If {
        cond: Box::new(cond),
        then_block,
        else_block,
    })
}

pub fn while_loop(cond: Node, body: Block) -> Node {
    node(NodeKind::While {
        cond: Box::new(cond),
        body,
    })
}

pub fn switch(subject: Option<Node>, cases: Vec<SwitchCase>, default: Option<Block>) -> Node {
    node(NodeKind::Switch {
        subject: subject.map(Box::new),
        cases,
        default,
    })
}

pub fn case(value: Node, body: Block) -> SwitchCase {
    SwitchCase { value, body }
}

pub fn brk() -> Node {
    node(NodeKind::Break)
}

pub fn cont() -> Node {
    node(NodeKind::Continue)
}

pub fn ret(value: Option<Node>) -> Node {
    node(NodeKind::Return {
        value: value.map(Box::new),
    })
}
