//! Arena-backed expression trees.
//!
//! Nodes live in a flat arena owned by the tree and refer to each other
//! through [`NodeId`] indices, so trees are cheap to clone and carry no
//! lifetime or pointer plumbing. Binary trees (built from postfix
//! streams) keep the invariant that every node has zero or two
//! children; trees built from the parenthesized prefix form may have
//! any arity.

use std::fmt;

use crate::op::{OpKind, Token};

/// Index of a node within its owning [`ExprTree`] arena.
///
/// Ids are only meaningful for the tree that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> NodeId {
        NodeId(index as u32)
    }

    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A single node of an access expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprNode {
    /// Kind of this node.
    pub op: OpKind,
    /// Argument or recurrence index, if the token carried one.
    pub index: Option<u32>,
    /// Literal value, for constant nodes.
    pub value: Option<i64>,
    /// Parent node, `None` for the root.
    pub parent: Option<NodeId>,
    /// Child nodes, in operand order.
    pub children: Vec<NodeId>,
}

/// An access expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprTree {
    nodes: Vec<ExprNode>,
    root: NodeId,
}

impl ExprTree {
    /// Creates a single-node tree from one token.
    pub fn leaf(token: Token) -> ExprTree {
        let mut tree = ExprTree::empty();
        let root = tree.push(token);
        tree.root = root;
        tree
    }

    /// An arena with no nodes yet; builders set the root before returning.
    pub(crate) fn empty() -> ExprTree {
        ExprTree { nodes: Vec::new(), root: NodeId(0) }
    }

    /// Appends a detached node; the builder wires it up afterwards.
    pub(crate) fn push(&mut self, token: Token) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(ExprNode {
            op: token.kind,
            index: token.index,
            value: token.value,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Attaches `child` under `parent`, preserving operand order.
    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the arena is empty; builders never return such a tree.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrows a node by id.
    pub fn node(&self, id: NodeId) -> &ExprNode {
        &self.nodes[id.index()]
    }

    /// Kind of the node at `id`.
    pub fn op(&self, id: NodeId) -> OpKind {
        self.nodes[id.index()].op
    }

    /// Parent of `id`, `None` at the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// Children of `id`, in operand order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// The other child of a two-child parent, if `id` has one.
    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        if siblings.len() != 2 {
            return None;
        }
        if siblings[0] == id {
            Some(siblings[1])
        } else {
            Some(siblings[0])
        }
    }

    /// Post-order (operands before operator) walk of the subtree at `id`.
    pub fn postfix_from(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend_from_slice(self.children(next));
        }
        out.reverse();
        out
    }

    /// Post-order walk of the whole tree.
    pub fn postfix(&self) -> Vec<NodeId> {
        self.postfix_from(self.root)
    }

    /// First node of the given kind in post order.
    pub fn find_first(&self, kind: OpKind) -> Option<NodeId> {
        self.postfix().into_iter().find(|&id| self.op(id) == kind)
    }

    /// All nodes of the given kind, in post order.
    pub fn collect_kind(&self, kind: OpKind) -> Vec<NodeId> {
        self.postfix()
            .into_iter()
            .filter(|&id| self.op(id) == kind)
            .collect()
    }

    /// All `arg` terminals with a specific index.
    pub fn collect_arg(&self, index: u32) -> Vec<NodeId> {
        self.postfix()
            .into_iter()
            .filter(|&id| {
                let node = self.node(id);
                node.op == OpKind::Arg && node.index == Some(index)
            })
            .collect()
    }

    /// Count of nodes of the given kind.
    pub fn count_kind(&self, kind: OpKind) -> usize {
        self.nodes.iter().filter(|n| n.op == kind).count()
    }

    /// True if any node has the given kind.
    pub fn contains_kind(&self, kind: OpKind) -> bool {
        self.nodes.iter().any(|n| n.op == kind)
    }

    /// True if `target` lies in the subtree rooted at `root`.
    pub fn subtree_contains(&self, root: NodeId, target: NodeId) -> bool {
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            if id == root {
                return true;
            }
            cursor = self.parent(id);
        }
        false
    }

    /// True when the root is the pointer-chase marker.
    pub fn is_pointer_chase(&self) -> bool {
        self.op(self.root) == OpKind::PointerChase
    }

    /// True when the root is the incomplete-expression marker.
    pub fn is_incomplete(&self) -> bool {
        self.op(self.root) == OpKind::Incomplete
    }

    fn fmt_node(&self, id: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node(id);
        if node.children.is_empty() {
            return match (node.op, node.value, node.index) {
                (OpKind::Const, Some(v), _) => write!(f, "{v}"),
                (op, _, Some(i)) => write!(f, "{op}{i}"),
                (op, _, None) => write!(f, "{op}"),
            };
        }
        write!(f, "({}", node.op)?;
        if let Some(i) = node.index {
            write!(f, "{i}")?;
        }
        for &child in &node.children {
            write!(f, " ")?;
            self.fmt_node(child, f)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for ExprTree {
    /// Renders the tree as an s-expression, mainly for logs and tests.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(self.root, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(text: &str) -> Token {
        Token::parse(text).unwrap()
    }

    fn small_tree() -> ExprTree {
        // (mul 4 arg0)
        let mut tree = ExprTree::leaf(tok("MUL"));
        let root = tree.root();
        let lhs = tree.push(tok("4"));
        let rhs = tree.push(tok("ARG0"));
        tree.attach(root, lhs);
        tree.attach(root, rhs);
        tree
    }

    #[test]
    fn postfix_order_is_operands_then_operator() {
        let tree = small_tree();
        let order: Vec<OpKind> = tree.postfix().iter().map(|&id| tree.op(id)).collect();
        assert_eq!(order, vec![OpKind::Const, OpKind::Arg, OpKind::Mul]);
    }

    #[test]
    fn parents_and_siblings_line_up() {
        let tree = small_tree();
        let arg = tree.find_first(OpKind::Arg).unwrap();
        assert_eq!(tree.parent(arg), Some(tree.root()));
        assert_eq!(tree.op(tree.sibling(arg).unwrap()), OpKind::Const);
    }

    #[test]
    fn collects_by_kind_and_index() {
        let tree = small_tree();
        assert_eq!(tree.collect_arg(0).len(), 1);
        assert!(tree.collect_arg(1).is_empty());
        assert_eq!(tree.count_kind(OpKind::Mul), 1);
    }

    #[test]
    fn subtree_containment_follows_parent_links() {
        let tree = small_tree();
        let arg = tree.find_first(OpKind::Arg).unwrap();
        assert!(tree.subtree_contains(tree.root(), arg));
        assert!(!tree.subtree_contains(arg, tree.root()));
    }

    #[test]
    fn displays_as_s_expression() {
        let tree = small_tree();
        assert_eq!(tree.to_string(), "(mul 4 arg0)");
    }
}
