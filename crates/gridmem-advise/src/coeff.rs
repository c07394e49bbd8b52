//! Stride extraction: how fast an address moves per unit of one term.
//!
//! The stride along a terminal (block index, loop recurrence) is read
//! off the tree structurally. Walking from an occurrence to the root,
//! every `mul` ancestor contributes its other operand as a multiplier,
//! a `shl` with the occurrence on the value side contributes one
//! shifted by its amount, and a division with the occurrence on the
//! dividend side contributes a divisor. An occurrence in a shift
//! amount or a divisor has no per-unit stride; those ancestors pass it
//! through unscaled. Strides of several occurrences of the same
//! terminal add up.

use tracing::trace;

use gridmem_expr::{ExprError, ExprResult, ExprTree, NodeId, OpKind};

use crate::emit::{combine, Emitter, Scalar};
use crate::interval::Evaluator;
use crate::resolve::Bindings;

impl Evaluator<'_> {
    /// Stride of the expression along all occurrences of one terminal
    /// kind. A kind that never occurs has stride zero.
    pub fn coefficient_of_kind(
        &self,
        tree: &ExprTree,
        kind: OpKind,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let mut total = Scalar::Imm(0);
        for id in tree.collect_kind(kind) {
            let c = self.occurrence_coefficient(tree, id, emitter)?;
            total = combine(emitter, OpKind::Add, total, c)?;
        }
        trace!(%kind, "stride {total:?}");
        Ok(total)
    }

    /// Stride along the loop recurrence: the per-iteration increment
    /// gathered between the recurrence entry and its merge, scaled by
    /// every multiplier above the merge.
    ///
    /// Expressions without a recurrence have stride zero. Chains that
    /// pass through anything but `add` are
    /// [`ExprError::UnsupportedPhiChain`].
    pub fn coefficient_of_phi(
        &self,
        tree: &ExprTree,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let Some(term) = tree.find_first(OpKind::PhiTerm) else {
            return Ok(Scalar::Imm(0));
        };

        // Nearest merge above the entry token.
        let mut merge = None;
        let mut cursor = tree.parent(term);
        while let Some(up) = cursor {
            if tree.op(up) == OpKind::Phi {
                merge = Some(up);
                break;
            }
            cursor = tree.parent(up);
        }
        let Some(merge) = merge else {
            return Ok(Scalar::Imm(0));
        };

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
            if let Some(sibling) = tree.sibling(cursor) {
                let v = self.concrete(tree, sibling, &Bindings::new(), emitter)?;
                increment = combine(emitter, OpKind::Add, increment, v)?;
            }
            cursor = parent;
        }

        let outer = self.occurrence_coefficient(tree, merge, emitter)?;
        combine(emitter, OpKind::Mul, outer, increment)
    }

    fn occurrence_coefficient(
        &self,
        tree: &ExprTree,
        id: NodeId,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let bindings = Bindings::new();
        let mut coeff = Scalar::Imm(1);
        let mut divisors = Vec::new();
        let mut cursor = id;
        while let Some(parent) = tree.parent(cursor) {
            let children = tree.children(parent);
            let on_lhs = children.first() == Some(&cursor);
            match tree.op(parent) {
                OpKind::Mul => {
                    if let Some(other) = tree.sibling(cursor) {
                        let v = self.concrete(tree, other, &bindings, emitter)?;
                        coeff = combine(emitter, OpKind::Mul, coeff, v)?;
                    }
                }
                OpKind::Shl if on_lhs => {
                    let amount = self.concrete(tree, children[1], &bindings, emitter)?;
                    let m = combine(emitter, OpKind::Shl, Scalar::Imm(1), amount)?;
                    coeff = combine(emitter, OpKind::Mul, coeff, m)?;
                }
                OpKind::UDiv | OpKind::SDiv | OpKind::Div if on_lhs => {
                    divisors.push(self.concrete(tree, children[1], &bindings, emitter)?);
                }
                _ => {}
            }
            cursor = parent;
        }
        for d in divisors {
            coeff = combine(emitter, OpKind::SDiv, coeff, d)?;
        }
        Ok(coeff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::KernelCatalogue;
    use crate::emit::ConstFolder;
    use crate::invocation::{ArgValue, InvocationRecord};
    use gridmem_expr::{build_postfix, BuildConfig};

    fn tree_of(s: &str) -> ExprTree {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        build_postfix(&tokens, &BuildConfig::default()).unwrap().unwrap()
    }

    fn launch() -> InvocationRecord {
        let mut inv = InvocationRecord::new(0, "k");
        inv.bind_arg(0, ArgValue::Const(10));
        inv
    }

    #[test]
    fn multiplier_is_the_other_mul_operand() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        let tree = tree_of("BIDX 32 MUL TIDX ADD");
        let c = ev.coefficient_of_kind(&tree, OpKind::BIdX, &mut em).unwrap();
        assert_eq!(c, Scalar::Imm(32));
    }

    #[test]
    fn shift_contributes_a_power_of_two() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        let tree = tree_of("BIDX 4 SHL TIDX ADD");
        let c = ev.coefficient_of_kind(&tree, OpKind::BIdX, &mut em).unwrap();
        assert_eq!(c, Scalar::Imm(16));
    }

    #[test]
    fn shift_amount_side_occurrence_is_not_scaled() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        // The terminal sits in the shift amount, not the shifted value.
        let tree = tree_of("4 BIDX SHL TIDX ADD");
        let c = ev.coefficient_of_kind(&tree, OpKind::BIdX, &mut em).unwrap();
        assert_eq!(c, Scalar::Imm(1));
    }

    #[test]
    fn occurrences_sum() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        let tree = tree_of("BIDX 8 MUL BIDX 4 MUL ADD");
        let c = ev.coefficient_of_kind(&tree, OpKind::BIdX, &mut em).unwrap();
        assert_eq!(c, Scalar::Imm(12));
    }

    #[test]
    fn dividend_side_division_divides_the_stride() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        let tree = tree_of("BIDX ARG0 MUL 2 SDIV");
        let c = ev.coefficient_of_kind(&tree, OpKind::BIdX, &mut em).unwrap();
        assert_eq!(c, Scalar::Imm(5));
    }

    #[test]
    fn absent_terminal_has_zero_stride() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        let tree = tree_of("TIDX 4 MUL");
        let c = ev.coefficient_of_kind(&tree, OpKind::BIdY, &mut em).unwrap();
        assert_eq!(c, Scalar::Imm(0));
        assert_eq!(ev.coefficient_of_phi(&tree, &mut em).unwrap(), Scalar::Imm(0));
    }

    #[test]
    fn recurrence_stride_scales_the_increment() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        // (phi(entry + arg0, 0)) * 4
        let tree = tree_of("PHI1 ARG0 ADD 0 PHI1 4 MUL");
        let c = ev.coefficient_of_phi(&tree, &mut em).unwrap();
        assert_eq!(c, Scalar::Imm(40));
    }

    #[test]
    fn multiplicative_recurrence_is_rejected() {
        let kernel = KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        let tree = tree_of("PHI1 2 MUL 0 PHI1");
        let err = ev.coefficient_of_phi(&tree, &mut em).unwrap_err();
        assert!(matches!(err, ExprError::UnsupportedPhiChain(_)));
    }
}
