//! Per-launch estimation, the top of the analysis.
//!
//! For every catalogued access of a launched kernel this produces one
//! [`AccessOutcome`]: either the access is flagged (pointer chasing,
//! incomplete instrumentation, unanalyzable loop nest) or it gets an
//! [`AccessEstimate`] with execution count, working-set width and
//! per-axis strides. Outcomes stream into a caller-supplied
//! [`RuntimeSink`], which in a full deployment backs the code that
//! chooses placement advice for each allocation at launch time.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use gridmem_expr::{ExprError, ExprResult, ExprTree, OpKind};

use crate::catalogue::Catalogue;
use crate::emit::{combine, Emitter, Scalar};
use crate::interval::{Bound, Evaluator};
use crate::invocation::InvocationRecord;

/// Identity of one estimate: which access, on which allocation, at
/// which launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AccessKey {
    /// Access id within the kernel.
    pub access_id: u32,
    /// Allocation argument index.
    pub alloc_arg: u32,
    /// Launch occurrence.
    pub invocation_id: u32,
}

/// Working-set width of one access across a whole launch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum WorkingSet {
    /// Interval width of the index expression.
    Span(Scalar),
    /// The expression never computes an address offset; the access
    /// touches a single element.
    Trivial,
    /// The address depends on loaded data; no static width exists.
    Indirect,
    /// Evaluation failed; only the flags above are known.
    Unavailable,
}

/// Numbers attached to an analyzable access.
#[derive(Debug, Clone, Serialize)]
pub struct AccessEstimate {
    /// Times the access executes across the launch: every thread times
    /// every enclosing loop iteration.
    pub exec_count: Option<Scalar>,
    /// Width of the touched index interval.
    pub working_set: WorkingSet,
    /// Stride per block along x.
    pub stride_bidx: Option<Scalar>,
    /// Stride per block along y.
    pub stride_bidy: Option<Scalar>,
    /// Stride per iteration of the innermost loop.
    pub stride_phi: Option<Scalar>,
    /// Fraction of executions the guarding branch admits, when the
    /// access is conditional and the guard could be bounded.
    pub probability: Option<f64>,
}

/// What the analysis concluded about one access.
#[derive(Debug, Clone, Serialize)]
pub enum AccessOutcome {
    /// The index chases pointers; prefetching cannot help.
    PointerChase,
    /// The instrumentation could not serialize the expression, or the
    /// recorded stream failed to parse.
    Incomplete,
    /// An enclosing loop has no computable trip count.
    IncomputableLoop {
        /// The loop that failed.
        loop_id: u32,
    },
    /// The access was analyzed.
    Estimate(AccessEstimate),
}

/// Receives analysis results as they are produced.
///
/// Implementations range from plain collectors in tests to code
/// generators that materialize the numbers into the host binary.
pub trait RuntimeSink {
    /// One access outcome.
    fn record_access(&mut self, key: AccessKey, outcome: AccessOutcome);
    /// Trip count of one loop under one launch; `None` when the loop
    /// is incomputable.
    fn record_loop(&mut self, invocation_id: u32, loop_id: u32, iters: Option<Scalar>);
}

/// Sink that collects everything into vectors.
#[derive(Debug, Default)]
pub struct VecSink {
    /// Recorded access outcomes in production order.
    pub accesses: Vec<(AccessKey, AccessOutcome)>,
    /// Recorded loop trip counts as (invocation, loop, iters).
    pub loops: Vec<(u32, u32, Option<Scalar>)>,
}

impl RuntimeSink for VecSink {
    fn record_access(&mut self, key: AccessKey, outcome: AccessOutcome) {
        self.accesses.push((key, outcome));
    }

    fn record_loop(&mut self, invocation_id: u32, loop_id: u32, iters: Option<Scalar>) {
        self.loops.push((invocation_id, loop_id, iters));
    }
}

/// Runs the analysis for whole launches against one catalogue.
pub struct Estimator<'a> {
    cat: &'a Catalogue,
}

impl<'a> Estimator<'a> {
    /// Estimator over one catalogue.
    pub fn new(cat: &'a Catalogue) -> Estimator<'a> {
        Estimator { cat }
    }

    /// Analyzes every access of one launch.
    ///
    /// A launch of a kernel that was never instrumented records
    /// nothing. Failures local to one access degrade that access's
    /// outcome instead of aborting the launch.
    pub fn analyze_invocation(
        &self,
        inv: &InvocationRecord,
        emitter: &mut dyn Emitter,
        sink: &mut dyn RuntimeSink,
    ) -> ExprResult<()> {
        let Some(kernel) = self.cat.kernel(&inv.kernel) else {
            warn!(kernel = %inv.kernel, "launch of a kernel with no records");
            return Ok(());
        };
        let ev = Evaluator::new(kernel, inv);

        for loop_id in kernel.loop_ids() {
            match ev.loop_iterations(loop_id, emitter) {
                Ok(iters) => sink.record_loop(inv.invocation_id, loop_id, Some(iters)),
                Err(e) => {
                    debug!(loop_id, error = %e, "loop trip count unavailable");
                    sink.record_loop(inv.invocation_id, loop_id, None);
                }
            }
        }

        let threads = self.thread_count(&ev, emitter);

        for access in kernel.accesses() {
            let key = AccessKey {
                access_id: access.access_id,
                alloc_arg: access.alloc_arg,
                invocation_id: inv.invocation_id,
            };

            if access.malformed {
                sink.record_access(key, AccessOutcome::Incomplete);
                continue;
            }

            if let Some(expr) = &access.expr {
                if expr.is_pointer_chase() {
                    sink.record_access(key, AccessOutcome::PointerChase);
                    continue;
                }
                if expr.is_incomplete() {
                    sink.record_access(key, AccessOutcome::Incomplete);
                    continue;
                }
            }

            let iters = match ev.nested_iterations(access.loop_id, emitter) {
                Ok(v) => v,
                Err(ExprError::IncomputableLoop(loop_id)) => {
                    sink.record_access(key, AccessOutcome::IncomputableLoop { loop_id });
                    continue;
                }
                Err(e) => {
                    debug!(access_id = access.access_id, error = %e, "loop nest rejected");
                    sink.record_access(
                        key,
                        AccessOutcome::IncomputableLoop { loop_id: access.loop_id },
                    );
                    continue;
                }
            };

            let exec_count = match &threads {
                Ok(t) => log_err(combine(emitter, OpKind::Mul, *t, iters), "exec count"),
                Err(_) => None,
            };

            let (stride_bidx, stride_bidy, stride_phi) = match &access.expr {
                Some(expr) => (
                    log_err(ev.coefficient_of_kind(expr, OpKind::BIdX, emitter), "bidx stride"),
                    log_err(ev.coefficient_of_kind(expr, OpKind::BIdY, emitter), "bidy stride"),
                    log_err(ev.coefficient_of_phi(expr, emitter), "phi stride"),
                ),
                None => (None, None, None),
            };

            let working_set = match &access.nary {
                None => WorkingSet::Unavailable,
                Some(t) if t.count_kind(OpKind::Load) > 1 => WorkingSet::Indirect,
                Some(t) if !t.contains_kind(OpKind::Gep) => WorkingSet::Trivial,
                Some(t) => match ev.nary_span(t, emitter) {
                    Ok(v) => WorkingSet::Span(v),
                    Err(e) => {
                        debug!(access_id = access.access_id, error = %e, "span unavailable");
                        WorkingSet::Unavailable
                    }
                },
            };

            let probability = match access.cond_id {
                0 => None,
                cond_id => kernel
                    .condition(cond_id)
                    .and_then(|tree| ev.condition_probability(tree, emitter)),
            };

            sink.record_access(
                key,
                AccessOutcome::Estimate(AccessEstimate {
                    exec_count,
                    working_set,
                    stride_bidx,
                    stride_bidy,
                    stride_phi,
                    probability,
                }),
            );
        }
        Ok(())
    }

    /// Threads in the launch: grid extents times block extents.
    fn thread_count(&self, ev: &Evaluator<'_>, emitter: &mut dyn Emitter) -> ExprResult<Scalar> {
        let mut total = Scalar::Imm(1);
        for axis in 0..3 {
            let g = ev.grid_extent(axis, emitter)?;
            let b = ev.block_extent(axis, emitter)?;
            total = combine(emitter, OpKind::Mul, total, g)?;
            total = combine(emitter, OpKind::Mul, total, b)?;
        }
        Ok(total)
    }
}

fn log_err(result: ExprResult<Scalar>, what: &str) -> Option<Scalar> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, "{what} unavailable");
            None
        }
    }
}

impl Evaluator<'_> {
    /// Fraction of executions an `icmp` guard admits, as the ratio of
    /// the compared bound to the compared expression's largest value,
    /// clamped to `[0, 1]`. `None` when either side stays symbolic.
    pub fn condition_probability(
        &self,
        tree: &ExprTree,
        emitter: &mut dyn Emitter,
    ) -> Option<f64> {
        let cmp = tree.find_first(OpKind::ICmp)?;
        let children = tree.children(cmp);
        if children.len() != 2 {
            return None;
        }
        let lhs = self
            .extremal_from(tree, children[0], Bound::Upper, 0, emitter)
            .ok()?
            .as_imm()?;
        let rhs = self
            .extremal_from(tree, children[1], Bound::Upper, 0, emitter)
            .ok()?
            .as_imm()?;
        if lhs == 0 {
            return None;
        }
        Some((rhs as f64 / lhs as f64).clamp(0.0, 1.0))
    }
}

/// Per-allocation aggregate across recorded outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationSummary {
    /// Allocation argument index.
    pub alloc_arg: u32,
    /// Allocation size in bytes.
    pub size: u64,
    /// Folded executions touching the allocation.
    pub access_count: i64,
    /// Accesses per byte; the ranking key.
    pub density: f64,
}

/// Ranks allocations by access density, densest first.
///
/// Only folded execution counts participate; deferred counts are left
/// out of the aggregate.
pub fn rank_allocations(
    outcomes: &[(AccessKey, AccessOutcome)],
    sizes: &HashMap<u32, u64>,
) -> Vec<AllocationSummary> {
    let mut counts: HashMap<u32, i64> = HashMap::new();
    for (key, outcome) in outcomes {
        if let AccessOutcome::Estimate(est) = outcome {
            if let Some(n) = est.exec_count.and_then(Scalar::as_imm) {
                *counts.entry(key.alloc_arg).or_insert(0) += n;
            }
        }
    }
    let mut out: Vec<AllocationSummary> = sizes
        .iter()
        .map(|(&alloc_arg, &size)| {
            let access_count = counts.get(&alloc_arg).copied().unwrap_or(0);
            let density = if size == 0 {
                0.0
            } else {
                access_count as f64 / size as f64
            };
            AllocationSummary { alloc_arg, size, access_count, density }
        })
        .collect();
    out.sort_by(|a, b| b.density.total_cmp(&a.density));
    out
}
