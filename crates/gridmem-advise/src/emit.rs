//! Boundary between compile-time folding and deferred runtime values.
//!
//! Every quantity the analysis produces is a [`Scalar`]: either an
//! immediate the analysis folded itself, or a handle to a value the
//! host program must compute at launch time (a runtime kernel argument,
//! a host loop variable). An [`Emitter`] materializes the deferred
//! side; the analysis only ever asks it for constants and binary
//! combinations, so any code generator slots in behind the trait.

use serde::{Deserialize, Serialize};
use tracing::warn;

use gridmem_expr::{ExprError, ExprResult, OpKind};

/// Handle to a value that is only known when the host program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtHandle(pub u32);

/// A value that is either folded now or materialized at launch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scalar {
    /// Compile-time immediate.
    Imm(i64),
    /// Deferred value owned by an [`Emitter`].
    Rt(RtHandle),
}

impl Scalar {
    /// The immediate value, if this scalar was folded.
    pub fn as_imm(self) -> Option<i64> {
        match self {
            Scalar::Imm(v) => Some(v),
            Scalar::Rt(_) => None,
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Scalar {
        Scalar::Imm(v)
    }
}

/// Materializes deferred computations.
///
/// Object safe so drivers can pass `&mut dyn Emitter` through the
/// analysis without generics spreading everywhere.
pub trait Emitter {
    /// Materializes a constant.
    fn emit_const(&mut self, value: i64) -> RtHandle;
    /// Materializes `lhs <op> rhs`.
    fn emit_binop(&mut self, op: OpKind, lhs: RtHandle, rhs: RtHandle) -> RtHandle;
    /// Materializes the larger or smaller of two values.
    fn emit_extremum(&mut self, largest: bool, lhs: RtHandle, rhs: RtHandle) -> RtHandle;
}

/// Folds `lhs <op> rhs` over immediates.
///
/// `or` participates in index arithmetic as addition of disjoint bit
/// ranges, so it folds as `add`. The shift amount of `shl` is always
/// the second operand.
pub fn fold(op: OpKind, lhs: i64, rhs: i64) -> ExprResult<i64> {
    let v = match op {
        OpKind::Add | OpKind::Or => lhs.wrapping_add(rhs),
        OpKind::Sub => lhs.wrapping_sub(rhs),
        OpKind::Mul => lhs.wrapping_mul(rhs),
        OpKind::And => lhs & rhs,
        OpKind::Shl => lhs.wrapping_shl(rhs as u32),
        OpKind::LShr => ((lhs as u64).wrapping_shr(rhs as u32)) as i64,
        OpKind::UDiv => {
            if rhs == 0 {
                return Err(ExprError::DivisionByZero(op.to_string()));
            }
            ((lhs as u64) / (rhs as u64)) as i64
        }
        OpKind::SDiv | OpKind::Div => {
            if rhs == 0 {
                return Err(ExprError::DivisionByZero(op.to_string()));
            }
            lhs.wrapping_div(rhs)
        }
        OpKind::SRem => {
            if rhs == 0 {
                return Err(ExprError::DivisionByZero(op.to_string()));
            }
            lhs.wrapping_rem(rhs)
        }
        _ => return Err(ExprError::NonTerminalOperand(op.to_string())),
    };
    Ok(v)
}

fn lower(emitter: &mut dyn Emitter, scalar: Scalar) -> RtHandle {
    match scalar {
        Scalar::Imm(v) => emitter.emit_const(v),
        Scalar::Rt(h) => h,
    }
}

/// Combines two scalars, folding when both are immediate and emitting
/// deferred code otherwise.
pub fn combine(
    emitter: &mut dyn Emitter,
    op: OpKind,
    lhs: Scalar,
    rhs: Scalar,
) -> ExprResult<Scalar> {
    match (lhs, rhs) {
        (Scalar::Imm(a), Scalar::Imm(b)) => Ok(Scalar::Imm(fold(op, a, b)?)),
        _ => {
            let a = lower(emitter, lhs);
            let b = lower(emitter, rhs);
            Ok(Scalar::Rt(emitter.emit_binop(op, a, b)))
        }
    }
}

/// Larger or smaller of two scalars, deferring when either side is.
pub fn extremum(
    emitter: &mut dyn Emitter,
    largest: bool,
    lhs: Scalar,
    rhs: Scalar,
) -> Scalar {
    match (lhs, rhs) {
        (Scalar::Imm(a), Scalar::Imm(b)) => {
            Scalar::Imm(if largest { a.max(b) } else { a.min(b) })
        }
        _ => {
            let a = lower(emitter, lhs);
            let b = lower(emitter, rhs);
            Scalar::Rt(emitter.emit_extremum(largest, a, b))
        }
    }
}

/// Emitter that keeps every deferred value as a concrete `i64`.
///
/// Drivers that never see true runtime values use this to get fully
/// folded results; it also stands in for a code generator in tests.
#[derive(Debug, Default)]
pub struct ConstFolder {
    values: Vec<i64>,
}

impl ConstFolder {
    /// New folder with no values.
    pub fn new() -> ConstFolder {
        ConstFolder::default()
    }

    /// Registers an externally supplied value, e.g. a launch argument.
    pub fn insert(&mut self, value: i64) -> RtHandle {
        self.emit_const(value)
    }

    /// Value behind a handle this folder produced.
    pub fn value(&self, handle: RtHandle) -> i64 {
        self.values[handle.0 as usize]
    }

    /// Resolves a scalar to its concrete value.
    pub fn concretize(&self, scalar: Scalar) -> i64 {
        match scalar {
            Scalar::Imm(v) => v,
            Scalar::Rt(h) => self.value(h),
        }
    }
}

impl Emitter for ConstFolder {
    fn emit_const(&mut self, value: i64) -> RtHandle {
        let handle = RtHandle(self.values.len() as u32);
        self.values.push(value);
        handle
    }

    fn emit_binop(&mut self, op: OpKind, lhs: RtHandle, rhs: RtHandle) -> RtHandle {
        let v = match fold(op, self.value(lhs), self.value(rhs)) {
            Ok(v) => v,
            Err(e) => {
                warn!(%op, error = %e, "deferred fold failed, substituting zero");
                0
            }
        };
        self.emit_const(v)
    }

    fn emit_extremum(&mut self, largest: bool, lhs: RtHandle, rhs: RtHandle) -> RtHandle {
        let (a, b) = (self.value(lhs), self.value(rhs));
        self.emit_const(if largest { a.max(b) } else { a.min(b) })
    }
}
