//! Per-launch bindings of kernel formals and launch geometry.

use std::collections::HashMap;

use gridmem_expr::ExprTree;

use crate::emit::{RtHandle, Scalar};

/// One launch dimension (a grid or block extent).
#[derive(Debug, Clone)]
pub enum DimValue {
    /// Known at compile time.
    Const(i64),
    /// Runtime value behind an emitter handle.
    Rt(RtHandle),
    /// Host expression over other launch state; evaluated at iteration
    /// zero of the enclosing host loop when a number is needed.
    Expr(ExprTree),
}

impl DimValue {
    /// Scalar form for the constant and deferred cases.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            DimValue::Const(v) => Some(Scalar::Imm(*v)),
            DimValue::Rt(h) => Some(Scalar::Rt(*h)),
            DimValue::Expr(_) => None,
        }
    }
}

/// Resolved actual value bound to a kernel formal argument.
#[derive(Debug, Clone, Copy)]
pub enum ArgValue {
    /// Constant propagated from the host call site.
    Const(i64),
    /// The induction variable of the host loop wrapping the launch.
    Induction(RtHandle),
    /// Opaque runtime value.
    Rt(RtHandle),
}

/// One kernel launch: geometry plus argument bindings.
///
/// Invocation ids order launches of the same kernel from the same call
/// site; estimates are keyed by them downstream.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    /// Dense id of this launch site occurrence.
    pub invocation_id: u32,
    /// Kernel symbol name.
    pub kernel: String,
    /// Grid extents, x/y/z.
    pub grid: [DimValue; 3],
    /// Block extents, x/y/z.
    pub block: [DimValue; 3],
    /// Formal argument index to resolved actual.
    pub args: HashMap<u32, ArgValue>,
    /// Formal argument fed by the host loop induction variable, if the
    /// launch sits inside a host loop.
    pub loop_arg: Option<u32>,
}

impl InvocationRecord {
    /// A launch with 1x1x1 geometry and no argument bindings.
    pub fn new(invocation_id: u32, kernel: impl Into<String>) -> InvocationRecord {
        InvocationRecord {
            invocation_id,
            kernel: kernel.into(),
            grid: [DimValue::Const(1), DimValue::Const(1), DimValue::Const(1)],
            block: [DimValue::Const(1), DimValue::Const(1), DimValue::Const(1)],
            args: HashMap::new(),
            loop_arg: None,
        }
    }

    /// Binds a formal argument.
    pub fn bind_arg(&mut self, index: u32, value: ArgValue) -> &mut Self {
        self.args.insert(index, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_single_thread_geometry() {
        let inv = InvocationRecord::new(0, "saxpy");
        for dim in inv.grid.iter().chain(inv.block.iter()) {
            assert_eq!(dim.as_scalar(), Some(Scalar::Imm(1)));
        }
    }

    #[test]
    fn binds_and_reads_arguments() {
        let mut inv = InvocationRecord::new(0, "saxpy");
        inv.bind_arg(2, ArgValue::Const(1024));
        assert!(matches!(inv.args.get(&2), Some(ArgValue::Const(1024))));
    }
}
