//! Terminal resolution against a concrete invocation.
//!
//! Evaluation never mutates trees; anything a walk needs to pin (axis
//! extremes, loop entry values, previously computed intermediates) is
//! passed in as [`Bindings`] and results flow back out of band.

use std::collections::HashMap;

use gridmem_expr::{ExprError, ExprResult, ExprTree, NodeId, OpKind};

use crate::emit::Scalar;
use crate::invocation::{ArgValue, InvocationRecord};

/// Values pinned for one evaluation walk.
///
/// Node bindings win over kind bindings; kind bindings are how the
/// interval modes substitute axis extremes without touching the tree.
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    node: HashMap<NodeId, Scalar>,
    kind: HashMap<OpKind, Scalar>,
}

impl Bindings {
    /// No bindings.
    pub fn new() -> Bindings {
        Bindings::default()
    }

    /// Pins one specific node.
    pub fn bind_node(&mut self, id: NodeId, value: Scalar) -> &mut Self {
        self.node.insert(id, value);
        self
    }

    /// Pins every terminal of a kind.
    pub fn bind_kind(&mut self, kind: OpKind, value: Scalar) -> &mut Self {
        self.kind.insert(kind, value);
        self
    }

    fn node_value(&self, id: NodeId) -> Option<Scalar> {
        self.node.get(&id).copied()
    }

    fn kind_value(&self, kind: OpKind) -> Option<Scalar> {
        self.kind.get(&kind).copied()
    }
}

/// Resolves one terminal node to a scalar.
///
/// Resolution order: node binding, kind binding, literal value, block
/// dimension, argument binding. Anything left over is
/// [`ExprError::UnresolvedTerminal`]; passing a non-terminal is
/// [`ExprError::NonTerminalOperand`].
pub fn resolve_terminal(
    tree: &ExprTree,
    id: NodeId,
    inv: &InvocationRecord,
    bindings: &Bindings,
) -> ExprResult<Scalar> {
    let node = tree.node(id);
    if !node.op.is_terminal() {
        return Err(ExprError::NonTerminalOperand(node.op.to_string()));
    }
    if let Some(v) = bindings.node_value(id) {
        return Ok(v);
    }
    if let Some(v) = bindings.kind_value(node.op) {
        return Ok(v);
    }
    match node.op {
        OpKind::Const => node
            .value
            .map(Scalar::Imm)
            .ok_or_else(|| ExprError::UnresolvedTerminal("const without a value".into())),
        OpKind::BDimX => dim_scalar(inv, 0),
        OpKind::BDimY => dim_scalar(inv, 1),
        OpKind::Arg => {
            let index = node
                .index
                .ok_or_else(|| ExprError::UnresolvedTerminal("arg without an index".into()))?;
            match inv.args.get(&index) {
                Some(ArgValue::Const(v)) => Ok(Scalar::Imm(*v)),
                Some(ArgValue::Induction(h)) | Some(ArgValue::Rt(h)) => Ok(Scalar::Rt(*h)),
                None => Err(ExprError::UnresolvedTerminal(format!("arg{index}"))),
            }
        }
        other => Err(ExprError::UnresolvedTerminal(other.to_string())),
    }
}

fn dim_scalar(inv: &InvocationRecord, axis: usize) -> ExprResult<Scalar> {
    inv.block[axis]
        .as_scalar()
        .ok_or_else(|| ExprError::UnresolvedTerminal(format!("block dim {axis}")))
}
