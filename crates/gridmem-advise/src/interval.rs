//! Interval evaluation of access expressions.
//!
//! An index expression is evaluated twice, once with every varying
//! terminal pinned to its smallest value and once to its largest; the
//! difference bounds the set of addresses one launch touches. Thread
//! and block indices pin to `0` and `extent - 1`, loop recurrences pin
//! to the enclosing loop's entry and final bounds, and `phi` merge
//! points reduce to whichever side suits the requested bound.

use tracing::trace;

use gridmem_expr::{ExprError, ExprResult, ExprTree, NodeId, OpKind};

use crate::catalogue::KernelCatalogue;
use crate::emit::{combine, extremum, Emitter, Scalar};
use crate::invocation::{DimValue, InvocationRecord};
use crate::resolve::{resolve_terminal, Bindings};

/// Which end of the interval to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Smallest value any thread computes.
    Lower,
    /// Largest value any thread computes.
    Upper,
}

impl Bound {
    fn largest(self) -> bool {
        self == Bound::Upper
    }
}

/// Evaluates expressions for one kernel under one invocation.
pub struct Evaluator<'a> {
    pub(crate) cat: &'a KernelCatalogue,
    pub(crate) inv: &'a InvocationRecord,
}

impl<'a> Evaluator<'a> {
    /// Evaluator over one kernel's records and one launch.
    pub fn new(cat: &'a KernelCatalogue, inv: &'a InvocationRecord) -> Evaluator<'a> {
        Evaluator { cat, inv }
    }

    // ===== Binary (postfix) trees =====

    /// Evaluates a subtree to a single scalar with no interval pinning.
    ///
    /// The host loop argument, if any, is taken at iteration zero.
    /// Merge points have no single concrete value and fail with
    /// [`ExprError::NonTerminalOperand`].
    pub fn concrete(
        &self,
        tree: &ExprTree,
        root: NodeId,
        bindings: &Bindings,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        self.reduce(tree, root, bindings, None, 0, emitter)
    }

    /// Evaluates a whole tree at one end of its interval.
    ///
    /// `loop_id` is the innermost loop enclosing the access; its bounds
    /// stand in for any recurrence entry terminal in the tree.
    pub fn extremal(
        &self,
        tree: &ExprTree,
        bound: Bound,
        loop_id: u32,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        self.extremal_from(tree, tree.root(), bound, loop_id, emitter)
    }

    /// [`Evaluator::extremal`] over the subtree rooted at `root`.
    pub fn extremal_from(
        &self,
        tree: &ExprTree,
        root: NodeId,
        bound: Bound,
        loop_id: u32,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let bindings = self.axis_bindings(tree, bound, emitter)?;
        let v = self.reduce(tree, root, &bindings, Some(bound), loop_id, emitter)?;
        trace!(%tree, ?bound, "extremal value {v:?}");
        Ok(v)
    }

    /// Width of the interval: largest minus smallest value.
    pub fn span(
        &self,
        tree: &ExprTree,
        loop_id: u32,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let hi = self.extremal(tree, Bound::Upper, loop_id, emitter)?;
        let lo = self.extremal(tree, Bound::Lower, loop_id, emitter)?;
        combine(emitter, OpKind::Sub, hi, lo)
    }

    fn reduce(
        &self,
        tree: &ExprTree,
        root: NodeId,
        bindings: &Bindings,
        bound: Option<Bound>,
        loop_id: u32,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let mut stack: Vec<Scalar> = Vec::new();
        for id in tree.postfix_from(root) {
            let op = tree.op(id);
            if op.is_operation() {
                let rhs = stack.pop().ok_or_else(underflow)?;
                let lhs = stack.pop().ok_or_else(underflow)?;
                let v = match op {
                    OpKind::Phi => match bound {
                        Some(b) => extremum(emitter, b.largest(), lhs, rhs),
                        None => return Err(ExprError::NonTerminalOperand(op.to_string())),
                    },
                    other => combine(emitter, other, lhs, rhs)?,
                };
                stack.push(v);
            } else {
                stack.push(self.leaf(tree, id, bindings, bound, loop_id, emitter)?);
            }
        }
        stack.pop().ok_or_else(underflow)
    }

    fn leaf(
        &self,
        tree: &ExprTree,
        id: NodeId,
        bindings: &Bindings,
        bound: Option<Bound>,
        loop_id: u32,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let node = tree.node(id);
        if node.op == OpKind::Arg && self.inv.loop_arg.is_some() && node.index == self.inv.loop_arg
        {
            // Host loop argument, taken at iteration zero.
            return Ok(Scalar::Imm(0));
        }
        if node.op == OpKind::PhiTerm {
            if let Some(b) = bound {
                return self.loop_bound(loop_id, b, emitter);
            }
        }
        resolve_terminal(tree, id, self.inv, bindings)
    }

    fn axis_bindings(
        &self,
        tree: &ExprTree,
        bound: Bound,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Bindings> {
        let mut bindings = Bindings::new();
        match bound {
            Bound::Lower => {
                for kind in [OpKind::TIdX, OpKind::TIdY, OpKind::BIdX, OpKind::BIdY] {
                    if tree.contains_kind(kind) {
                        bindings.bind_kind(kind, Scalar::Imm(0));
                    }
                }
            }
            Bound::Upper => {
                let axes = [
                    (OpKind::TIdX, Extent::Block(0)),
                    (OpKind::TIdY, Extent::Block(1)),
                    (OpKind::BIdX, Extent::Grid(0)),
                    (OpKind::BIdY, Extent::Grid(1)),
                ];
                for (kind, extent) in axes {
                    if tree.contains_kind(kind) {
                        let size = match extent {
                            Extent::Block(axis) => self.block_extent(axis, emitter)?,
                            Extent::Grid(axis) => self.grid_extent(axis, emitter)?,
                        };
                        let top = combine(emitter, OpKind::Sub, size, Scalar::Imm(1))?;
                        bindings.bind_kind(kind, top);
                    }
                }
            }
        }
        Ok(bindings)
    }

    /// Block extent along one axis as a scalar.
    pub fn block_extent(&self, axis: usize, emitter: &mut dyn Emitter) -> ExprResult<Scalar> {
        self.dim_value(&self.inv.block[axis], emitter)
    }

    /// Grid extent along one axis as a scalar.
    pub fn grid_extent(&self, axis: usize, emitter: &mut dyn Emitter) -> ExprResult<Scalar> {
        self.dim_value(&self.inv.grid[axis], emitter)
    }

    fn dim_value(&self, dim: &DimValue, emitter: &mut dyn Emitter) -> ExprResult<Scalar> {
        match dim {
            DimValue::Const(v) => Ok(Scalar::Imm(*v)),
            DimValue::Rt(h) => Ok(Scalar::Rt(*h)),
            DimValue::Expr(tree) => {
                self.concrete(tree, tree.root(), &Bindings::new(), emitter)
            }
        }
    }

    /// Value a loop's recurrence takes at one end of its range.
    ///
    /// Loop id 0 means "no enclosing loop"; the recurrence then
    /// contributes a single iteration's worth, i.e. 1. A recurrence
    /// terminal inside a loop's own bounds refers to the parent loop
    /// and resolves recursively.
    pub fn loop_bound(
        &self,
        loop_id: u32,
        bound: Bound,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        if loop_id == 0 {
            return Ok(Scalar::Imm(1));
        }
        let record = self
            .cat
            .loop_record(loop_id)
            .ok_or(ExprError::IncomputableLoop(loop_id))?;
        let tree = match bound {
            Bound::Lower => record.init.as_ref(),
            Bound::Upper => record.fin.as_ref(),
        }
        .ok_or(ExprError::IncomputableLoop(loop_id))?;
        self.eval_loop_expr(tree, record.parent_loop_id, bound, emitter)
    }

    /// Evaluates a loop bound or step expression. Axis terminals and
    /// incomplete markers drop to zero; a recurrence terminal refers to
    /// the parent loop.
    pub(crate) fn eval_loop_expr(
        &self,
        tree: &ExprTree,
        parent_loop_id: u32,
        bound: Bound,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let mut bindings = Bindings::new();
        for kind in [OpKind::TIdX, OpKind::TIdY, OpKind::BIdX, OpKind::BIdY, OpKind::Incomplete]
        {
            bindings.bind_kind(kind, Scalar::Imm(0));
        }
        self.reduce(tree, tree.root(), &bindings, Some(bound), parent_loop_id, emitter)
    }

    // ===== N-ary (prefix) trees =====

    /// Extremal value of an arity-preserving tree.
    ///
    /// Recurrences are handled structurally: a childless `phi` is the
    /// entry value, and a `phi` merge enclosing one accumulates drift,
    /// the per-iteration increment gathered along the chain of `add`
    /// ancestors times the driving loop's trip count.
    pub fn nary_extremal(
        &self,
        tree: &ExprTree,
        bound: Bound,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let bindings = self.axis_bindings(tree, bound, emitter)?;
        self.nary_node(tree, tree.root(), bound, &bindings, emitter)
    }

    /// Interval width of an arity-preserving tree.
    pub fn nary_span(&self, tree: &ExprTree, emitter: &mut dyn Emitter) -> ExprResult<Scalar> {
        let hi = self.nary_extremal(tree, Bound::Upper, emitter)?;
        let lo = self.nary_extremal(tree, Bound::Lower, emitter)?;
        combine(emitter, OpKind::Sub, hi, lo)
    }

    fn nary_node(
        &self,
        tree: &ExprTree,
        id: NodeId,
        bound: Bound,
        bindings: &Bindings,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let node = tree.node(id);
        if node.children.is_empty() {
            if node.op == OpKind::Phi || node.op == OpKind::PhiTerm {
                let loop_id = self.phi_loop(node.index);
                return self.loop_bound(loop_id, bound, emitter);
            }
            return self.leaf(tree, id, bindings, Some(bound), 0, emitter);
        }
        match node.op {
            OpKind::Phi => self.nary_phi(tree, id, bound, bindings, emitter),
            op if op.is_operation() => {
                let children = tree.children(id);
                let mut acc = self.nary_node(tree, children[0], bound, bindings, emitter)?;
                for &child in &children[1..] {
                    let rhs = self.nary_node(tree, child, bound, bindings, emitter)?;
                    acc = combine(emitter, op, acc, rhs)?;
                }
                Ok(acc)
            }
            _ => {
                // Structural wrapper; the last operand is the varying index.
                let children = tree.children(id);
                let last = children[children.len() - 1];
                self.nary_node(tree, last, bound, bindings, emitter)
            }
        }
    }

    fn nary_phi(
        &self,
        tree: &ExprTree,
        merge: NodeId,
        bound: Bound,
        bindings: &Bindings,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let children = tree.children(merge);
        let term = self.recurrence_term(tree, merge);

        let Some(term) = term else {
            // No recurrence below: a plain merge of alternatives.
            let mut acc = self.nary_node(tree, children[0], bound, bindings, emitter)?;
            for &child in &children[1..] {
                let rhs = self.nary_node(tree, child, bound, bindings, emitter)?;
                acc = extremum(emitter, bound.largest(), acc, rhs);
            }
            return Ok(acc);
        };

        // Per-iteration increment: siblings along the term-to-merge
        // chain, every link of which must be an add.
        let mut increment = Scalar::Imm(0);
        let mut cursor = term;
        loop {
            let parent = tree
                .parent(cursor)
                .ok_or_else(|| ExprError::MalformedExpression("detached recurrence".into()))?;
            if parent == merge {
                break;
            }
            if tree.op(parent) != OpKind::Add {
                return Err(ExprError::UnsupportedPhiChain(tree.op(parent).to_string()));
            }
            for &sibling in tree.children(parent) {
                if sibling != cursor {
                    let v = self.nary_node(tree, sibling, bound, bindings, emitter)?;
                    increment = combine(emitter, OpKind::Add, increment, v)?;
                }
            }
            cursor = parent;
        }

        let loop_id = self.phi_loop(tree.node(term).index);
        let iters = self.loop_iterations(loop_id, emitter)?;
        let drift = combine(emitter, OpKind::Mul, increment, iters)?;

        // Entry side of the merge: every child not feeding the recurrence.
        let mut entry: Option<Scalar> = None;
        for &child in children {
            if tree.subtree_contains(child, term) {
                continue;
            }
            let v = self.nary_node(tree, child, bound, bindings, emitter)?;
            entry = Some(match entry {
                Some(prev) => extremum(emitter, bound.largest(), prev, v),
                None => v,
            });
        }
        let entry = match entry {
            Some(v) => v,
            None => self.loop_bound(loop_id, Bound::Lower, emitter)?,
        };
        // The recurrence runs from the entry to the fully drifted value;
        // either end can be the extreme depending on the drift's sign.
        let drifted = combine(emitter, OpKind::Add, entry, drift)?;
        Ok(extremum(emitter, bound.largest(), entry, drifted))
    }

    /// Childless recurrence token whose nearest enclosing merge is `merge`.
    fn recurrence_term(&self, tree: &ExprTree, merge: NodeId) -> Option<NodeId> {
        for id in tree.postfix_from(merge) {
            if id == merge {
                continue;
            }
            let node = tree.node(id);
            let is_term = (node.op == OpKind::Phi || node.op == OpKind::PhiTerm)
                && node.children.is_empty();
            if !is_term {
                continue;
            }
            // Walk up to the first merge above this token.
            let mut cursor = tree.parent(id);
            while let Some(up) = cursor {
                if tree.op(up) == OpKind::Phi {
                    break;
                }
                cursor = tree.parent(up);
            }
            if cursor == Some(merge) {
                return Some(id);
            }
        }
        None
    }

    fn phi_loop(&self, index: Option<u32>) -> u32 {
        index.and_then(|i| self.cat.loop_of_phi(i)).unwrap_or(0)
    }
}

enum Extent {
    Block(usize),
    Grid(usize),
}

fn underflow() -> ExprError {
    ExprError::MalformedExpression("operand stack underflow".into())
}
