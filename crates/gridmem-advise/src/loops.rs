//! Loop trip counts.
//!
//! A kernel loop's trip count is `(final - initial) / step` over its
//! catalogued bound expressions, unless the instrumentation already
//! proved a count. Counts recorded at 32 bits on the kernel side are
//! widened to `i64` on ingest, so nested products here cannot wrap at
//! 32 bits.

use gridmem_expr::{ExprError, ExprResult, OpKind};

use crate::emit::{combine, Emitter, Scalar};
use crate::interval::{Bound, Evaluator};

// Parent chains longer than this are treated as corrupt records.
const MAX_NEST_DEPTH: u32 = 64;

impl Evaluator<'_> {
    /// Trip count of a single loop.
    ///
    /// Loop id 0 is "not in a loop" and counts as one iteration. A
    /// loop whose bounds failed to build, or which was never
    /// catalogued, is [`ExprError::IncomputableLoop`].
    pub fn loop_iterations(&self, loop_id: u32, emitter: &mut dyn Emitter) -> ExprResult<Scalar> {
        if loop_id == 0 {
            return Ok(Scalar::Imm(1));
        }
        let record = self
            .cat
            .loop_record(loop_id)
            .ok_or(ExprError::IncomputableLoop(loop_id))?;
        if let Some(n) = record.known_iters {
            return Ok(Scalar::Imm(n as i64));
        }

        let fin = self.loop_bound(loop_id, Bound::Upper, emitter)?;
        let init = self.loop_bound(loop_id, Bound::Lower, emitter)?;
        let span = combine(emitter, OpKind::Sub, fin, init)?;

        let step = match record.step.as_ref() {
            Some(tree) => {
                self.eval_loop_expr(tree, record.parent_loop_id, Bound::Upper, emitter)?
            }
            None => Scalar::Imm(1),
        };
        combine(emitter, OpKind::SDiv, span, step)
    }

    /// Total iterations of a loop including every enclosing loop.
    pub fn nested_iterations(
        &self,
        loop_id: u32,
        emitter: &mut dyn Emitter,
    ) -> ExprResult<Scalar> {
        let mut total = self.loop_iterations(loop_id, emitter)?;
        let mut cursor = loop_id;
        let mut depth = 0;
        while cursor != 0 {
            depth += 1;
            if depth > MAX_NEST_DEPTH {
                return Err(ExprError::MalformedExpression(
                    "loop parent chain does not terminate".into(),
                ));
            }
            let record = self
                .cat
                .loop_record(cursor)
                .ok_or(ExprError::IncomputableLoop(cursor))?;
            let parent = record.parent_loop_id;
            if parent == 0 {
                break;
            }
            let iters = self.loop_iterations(parent, emitter)?;
            total = combine(emitter, OpKind::Mul, total, iters)?;
            cursor = parent;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Catalogue, LoopRow};
    use crate::emit::ConstFolder;
    use crate::invocation::{ArgValue, InvocationRecord};

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_owned).collect()
    }

    fn loop_row(loop_id: u32, parent: u32, init: &str, fin: &str, step: &str) -> LoopRow {
        LoopRow {
            kernel: "k".into(),
            loop_id,
            parent_loop_id: parent,
            init_tokens: toks(init),
            final_tokens: toks(fin),
            step_tokens: toks(step),
            known_iters: None,
        }
    }

    fn launch() -> InvocationRecord {
        let mut inv = InvocationRecord::new(0, "k");
        inv.bind_arg(0, ArgValue::Const(10));
        inv
    }

    #[test]
    fn trip_count_is_span_over_step() {
        let mut cat = Catalogue::new();
        cat.add_loop(&loop_row(1, 0, "0", "ARG0", "1")).unwrap();
        cat.add_loop(&loop_row(2, 0, "0", "ARG0", "2")).unwrap();
        let inv = launch();
        let ev = Evaluator::new(cat.kernel("k").unwrap(), &inv);
        let mut em = ConstFolder::new();
        assert_eq!(ev.loop_iterations(1, &mut em).unwrap(), Scalar::Imm(10));
        assert_eq!(ev.loop_iterations(2, &mut em).unwrap(), Scalar::Imm(5));
    }

    #[test]
    fn proven_counts_bypass_bound_evaluation() {
        let mut cat = Catalogue::new();
        let mut row = loop_row(1, 0, "", "", "");
        row.known_iters = Some(128);
        cat.add_loop(&row).unwrap();
        let inv = launch();
        let ev = Evaluator::new(cat.kernel("k").unwrap(), &inv);
        let mut em = ConstFolder::new();
        assert_eq!(ev.loop_iterations(1, &mut em).unwrap(), Scalar::Imm(128));
    }

    #[test]
    fn missing_bounds_are_incomputable() {
        let mut cat = Catalogue::new();
        cat.add_loop(&loop_row(1, 0, "", "", "1")).unwrap();
        let inv = launch();
        let ev = Evaluator::new(cat.kernel("k").unwrap(), &inv);
        let mut em = ConstFolder::new();
        assert_eq!(
            ev.loop_iterations(1, &mut em).unwrap_err(),
            ExprError::IncomputableLoop(1)
        );
    }

    #[test]
    fn nested_totals_multiply_up_the_parent_chain() {
        let mut cat = Catalogue::new();
        cat.add_loop(&loop_row(1, 0, "0", "8", "1")).unwrap();
        // Inner bound runs to the outer induction value.
        cat.add_loop(&loop_row(2, 1, "0", "PHI_TERM", "1")).unwrap();
        let inv = launch();
        let ev = Evaluator::new(cat.kernel("k").unwrap(), &inv);
        let mut em = ConstFolder::new();
        assert_eq!(ev.nested_iterations(2, &mut em).unwrap(), Scalar::Imm(64));
    }

    #[test]
    fn outside_any_loop_counts_once() {
        let kernel = crate::catalogue::KernelCatalogue::default();
        let inv = launch();
        let ev = Evaluator::new(&kernel, &inv);
        let mut em = ConstFolder::new();
        assert_eq!(ev.nested_iterations(0, &mut em).unwrap(), Scalar::Imm(1));
    }
}
