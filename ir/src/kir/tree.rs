//! Tree visualization for lowered statement lists.

use std::borrow::Cow;
use std::io;

use ptree::{Style, TreeItem};

use super::{Kernel, Stmt};

#[derive(Clone, Copy)]
enum Node<'a> {
    Root(&'a [Stmt]),
    Stmt(&'a Stmt),
    Else(&'a [Stmt]),
}

/// `ptree` adapter over a statement list.
#[derive(Clone)]
pub struct StmtTree<'a> {
    kernel: &'a Kernel,
    node: Node<'a>,
}

impl<'a> StmtTree<'a> {
    pub fn new(kernel: &'a Kernel, stmts: &'a [Stmt]) -> Self {
        Self { kernel, node: Node::Root(stmts) }
    }

    fn child(&self, node: Node<'a>) -> Self {
        Self { kernel: self.kernel, node }
    }
}

impl TreeItem for StmtTree<'_> {
    type Child = Self;

    fn write_self<W: io::Write>(&self, f: &mut W, _style: &Style) -> io::Result<()> {
        let k = self.kernel;
        match self.node {
            Node::Root(_) => write!(f, "kernel"),
            Node::Else(_) => write!(f, "else"),
            Node::Stmt(Stmt::Expr(e)) => write!(f, "{}", k.describe_expr(*e)),
            Node::Stmt(Stmt::Allocate { buffer, memory_type, size, .. }) => {
                write!(f, "alloc {} {memory_type:?}[{}]", k.describe(*buffer), k.describe(*size))
            }
            Node::Stmt(Stmt::ForLoop { axis, index, start, stop, .. }) => {
                let pt = k.axis(*axis).parallel_type;
                write!(f, "for {} in {}..{} ({pt})", k.describe(*index), k.describe(*start), k.describe(*stop))
            }
            Node::Stmt(Stmt::IfThenElse { cond, .. }) => write!(f, "if {}", k.describe(*cond)),
        }
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        let children: Vec<Self> = match self.node {
            Node::Root(stmts) | Node::Else(stmts) => stmts.iter().map(|s| self.child(Node::Stmt(s))).collect(),
            Node::Stmt(Stmt::ForLoop { body, .. }) => body.iter().map(|s| self.child(Node::Stmt(s))).collect(),
            Node::Stmt(Stmt::IfThenElse { then_body, else_body, .. }) => {
                let mut c: Vec<Self> = then_body.iter().map(|s| self.child(Node::Stmt(s))).collect();
                if !else_body.is_empty() {
                    c.push(self.child(Node::Else(else_body)));
                }
                c
            }
            Node::Stmt(Stmt::Expr(_) | Stmt::Allocate { .. }) => Vec::new(),
        };
        Cow::Owned(children)
    }
}

/// Render a statement list as an ASCII tree.
pub fn render_stmts(kernel: &Kernel, stmts: &[Stmt]) -> String {
    let mut buf = Vec::new();
    ptree::write_tree(&StmtTree::new(kernel, stmts), &mut buf).expect("tree rendering failed");
    String::from_utf8(buf).expect("invalid utf8 in tree")
}
