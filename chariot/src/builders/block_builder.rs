use super::{BuilderError, ObjectBuilder};
use crate::ast::{Block, Node, SourcePos};

/// Fluent interface builder for statement blocks
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    file: String,
    next_line: u32,
    stmts: Vec<Node>,
}

impl BlockBuilder {
    /// Create a new BlockBuilder whose first statement sits on line 1
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            next_line: 1,
            stmts: Vec::new(),
        }
    }

    /// Place the next statement on `line`
    pub fn at(mut self, line: u32) -> Self {
        self.next_line = line;
        self
    }

    /// Add a statement on the next line
    pub fn stmt(mut self, mut node: Node) -> Self {
        node.pos = SourcePos::new(&self.file, self.next_line, 1);
        self.next_line += 1;
        self.stmts.push(node);
        self
    }

    /// Add several statements, one per line
    pub fn stmts(self, nodes: Vec<Node>) -> Self {
        nodes.into_iter().fold(self, |builder, node| builder.stmt(node))
    }
}

impl ObjectBuilder<Block> for BlockBuilder {
    fn build(self) -> Result<Block, BuilderError> {
        if let Err(errors) = self.validate() {
            return Err(BuilderError::Validation(errors.join("; ")));
        }
        let pos = self
            .stmts
            .first()
            .map(|stmt| stmt.pos.clone())
            .unwrap_or_else(|| SourcePos::new(&self.file, self.next_line, 1));
        Ok(Block::new(self.stmts, pos))
    }

    fn validate(&self) -> Result<(), Vec<String>> {
        if self.file.is_empty() {
            return Err(vec!["file name is empty".to_string()]);
        }
        Ok(())
    }
}
