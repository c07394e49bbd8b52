//! Compile-time memory access estimation for GPU kernel launches.
//!
//! Given a [`Catalogue`] of instrumentation records and an
//! [`InvocationRecord`] describing one launch, the [`Estimator`]
//! produces per-access numbers a host runtime can act on before the
//! kernel ever runs:
//!
//! - **Execution count**: how often the access runs across all threads
//!   and enclosing loop iterations.
//! - **Working set**: the width of the index interval the launch
//!   touches, from independent smallest/largest evaluations.
//! - **Strides**: how fast the address moves per block along each grid
//!   axis and per iteration of the innermost loop.
//!
//! Values that depend on launch-time state stay symbolic as
//! [`Scalar::Rt`] handles behind an [`Emitter`], so the same analysis
//! drives both ahead-of-time reporting and host code generation.

#![warn(missing_docs)]

pub mod catalogue;
pub mod coeff;
pub mod emit;
pub mod estimate;
pub mod interval;
pub mod invocation;
pub mod loops;
pub mod resolve;

pub use catalogue::{AccessRecord, AccessRow, Catalogue, KernelCatalogue, LoopRecord, LoopRow};
pub use emit::{combine, extremum, fold, ConstFolder, Emitter, RtHandle, Scalar};
pub use estimate::{
    rank_allocations, AccessEstimate, AccessKey, AccessOutcome, AllocationSummary, Estimator,
    RuntimeSink, VecSink, WorkingSet,
};
pub use interval::{Bound, Evaluator};
pub use invocation::{ArgValue, DimValue, InvocationRecord};
pub use resolve::{resolve_terminal, Bindings};

pub use gridmem_expr::{ExprError, ExprResult};
