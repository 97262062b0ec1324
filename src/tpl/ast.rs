use crate::tpl::binding::BindingTarget;
use crate::tpl::expr::Expression;
use std::collections::HashMap;
use std::sync::Arc;

/// Block bodies declared by one template, keyed by block name.
pub type BlockMap = HashMap<String, Fragment>;

/// An ordered run of nodes, each paired with the source line of the token that
/// produced it, plus the owning template's name.
///
/// Cloning is cheap; the node list is shared.
#[derive(Debug, Clone)]
pub struct Fragment {
    name: Arc<str>,
    nodes: Arc<[(usize, AstNode)]>,
}

impl Fragment {
    pub fn new(name: Arc<str>, nodes: Vec<(usize, AstNode)>) -> Self {
        Self {
            name,
            nodes: nodes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[(usize, AstNode)] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum AstNode {
    Text(String),
    /// `{{ expr }}`, autoescaped when an escaping function is active.
    Expr(Expression),
    /// `{% print expr %}`, never autoescaped.
    Print(Expression),
    Set {
        expr: Expression,
        target: BindingTarget,
    },
    If {
        clauses: Vec<(Expression, Fragment)>,
        else_body: Option<Fragment>,
    },
    For {
        target: BindingTarget,
        expr: Expression,
        body: Fragment,
    },
    With {
        expr: Expression,
        target: BindingTarget,
        body: Fragment,
    },
    Include(Expression),
    Block {
        name: String,
        body: Fragment,
    },
    Extends {
        parent: Expression,
        blocks: Arc<BlockMap>,
    },
    Super,
}
