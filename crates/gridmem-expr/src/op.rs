//! Operator and terminal vocabulary for access expressions.
//!
//! Every token emitted by the kernel-side instrumentation maps to one
//! [`OpKind`]. Kinds fall into three categories: terminals carry values,
//! operations combine two reduced operands, and structural kinds record
//! IR shape (casts, address computation, control flow) that the
//! evaluators either pass through or refuse to reduce.

use std::fmt;

use crate::error::{ExprError, ExprResult};

/// Classification of an [`OpKind`] for evaluation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCategory {
    /// Carries a value once resolved against an invocation.
    Terminal,
    /// Combines two reduced operands into a new value.
    Operation,
    /// Shape-only node; never produces a value of its own.
    Structural,
}

/// Kind of a node in an access expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    // ===== Terminals =====
    /// Thread index, x dimension.
    TIdX,
    /// Thread index, y dimension.
    TIdY,
    /// Block index, x dimension.
    BIdX,
    /// Block index, y dimension.
    BIdY,
    /// Block dimension, x.
    BDimX,
    /// Block dimension, y.
    BDimY,
    /// Loop-carried recurrence variable at its entry value.
    PhiTerm,
    /// Kernel formal argument, identified by index.
    Arg,
    /// Integer literal.
    Const,
    /// Intermediate value produced by an earlier reduction.
    Interm,
    /// Marker for an expression the instrumentation could not complete.
    Incomplete,

    // ===== Operations =====
    /// Integer addition.
    Add,
    /// Integer subtraction.
    Sub,
    /// Integer multiplication.
    Mul,
    /// Bitwise and.
    And,
    /// Bitwise or; index arithmetic treats this as addition of
    /// disjoint bit ranges.
    Or,
    /// Unsigned division.
    UDiv,
    /// Signed division.
    SDiv,
    /// Left shift; the shift amount is always the second operand.
    Shl,
    /// Recurrence merge point; childless occurrences denote the entry
    /// value and behave as [`OpKind::PhiTerm`].
    Phi,
    /// Integer comparison.
    ICmp,

    // ===== Structural =====
    /// Marker for a chain of dependent loads (pointer chasing).
    PointerChase,
    /// Division of unrecorded signedness.
    Div,
    /// Signed remainder.
    SRem,
    /// Logical right shift.
    LShr,
    /// Floating multiply.
    FMul,
    /// Floating divide.
    FDiv,
    /// Floating comparison.
    FCmp,
    /// Floating-point literal.
    Double,
    /// Memory operation of unrecorded kind.
    MemOp,
    /// Address computation step.
    Gep,
    /// Zero extension.
    ZExt,
    /// Sign extension.
    SExt,
    /// Freeze of a possibly-poison value.
    Freeze,
    /// Integer truncation.
    Trunc,
    /// Float-to-signed-integer conversion.
    FpToSi,
    /// Unsigned-integer-to-float conversion.
    UiToFp,
    /// Signed-integer-to-float conversion.
    SiToFp,
    /// Conditional select.
    Select,
    /// Atomic read-modify-write.
    AtomicRmw,
    /// Undefined value.
    Undef,
    /// Opaque call result.
    Call,
    /// Value loaded from memory.
    Load,
    /// Anything the instrumentation did not classify.
    Unknown,
}

impl OpKind {
    /// Category of this kind.
    pub fn category(self) -> OpCategory {
        match self {
            OpKind::TIdX
            | OpKind::TIdY
            | OpKind::BIdX
            | OpKind::BIdY
            | OpKind::BDimX
            | OpKind::BDimY
            | OpKind::PhiTerm
            | OpKind::Arg
            | OpKind::Const
            | OpKind::Interm
            | OpKind::Incomplete => OpCategory::Terminal,

            OpKind::Add
            | OpKind::Sub
            | OpKind::Mul
            | OpKind::And
            | OpKind::Or
            | OpKind::UDiv
            | OpKind::SDiv
            | OpKind::Shl
            | OpKind::Phi
            | OpKind::ICmp => OpCategory::Operation,

            OpKind::PointerChase
            | OpKind::Div
            | OpKind::SRem
            | OpKind::LShr
            | OpKind::FMul
            | OpKind::FDiv
            | OpKind::FCmp
            | OpKind::Double
            | OpKind::MemOp
            | OpKind::Gep
            | OpKind::ZExt
            | OpKind::SExt
            | OpKind::Freeze
            | OpKind::Trunc
            | OpKind::FpToSi
            | OpKind::UiToFp
            | OpKind::SiToFp
            | OpKind::Select
            | OpKind::AtomicRmw
            | OpKind::Undef
            | OpKind::Call
            | OpKind::Load
            | OpKind::Unknown => OpCategory::Structural,
        }
    }

    /// True for kinds the binary builder reduces with two operands.
    pub fn is_operation(self) -> bool {
        self.category() == OpCategory::Operation
    }

    /// True for kinds that resolve to a value.
    pub fn is_terminal(self) -> bool {
        self.category() == OpCategory::Terminal
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::TIdX => "tidx",
            OpKind::TIdY => "tidy",
            OpKind::BIdX => "bidx",
            OpKind::BIdY => "bidy",
            OpKind::BDimX => "bdimx",
            OpKind::BDimY => "bdimy",
            OpKind::PhiTerm => "phi_term",
            OpKind::Arg => "arg",
            OpKind::Const => "const",
            OpKind::Interm => "interm",
            OpKind::Incomplete => "incomplete",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::And => "and",
            OpKind::Or => "or",
            OpKind::UDiv => "udiv",
            OpKind::SDiv => "sdiv",
            OpKind::Shl => "shl",
            OpKind::Phi => "phi",
            OpKind::ICmp => "icmp",
            OpKind::PointerChase => "pointer_chase",
            OpKind::Div => "div",
            OpKind::SRem => "srem",
            OpKind::LShr => "lshr",
            OpKind::FMul => "fmul",
            OpKind::FDiv => "fdiv",
            OpKind::FCmp => "fcmp",
            OpKind::Double => "double",
            OpKind::MemOp => "memop",
            OpKind::Gep => "gep",
            OpKind::ZExt => "zext",
            OpKind::SExt => "sext",
            OpKind::Freeze => "freeze",
            OpKind::Trunc => "trunc",
            OpKind::FpToSi => "fptosi",
            OpKind::UiToFp => "uitofp",
            OpKind::SiToFp => "sitofp",
            OpKind::Select => "select",
            OpKind::AtomicRmw => "atomicrmw",
            OpKind::Undef => "undef",
            OpKind::Call => "call",
            OpKind::Load => "load",
            OpKind::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// A classified token together with any payload it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Kind of node this token produces.
    pub kind: OpKind,
    /// Argument or recurrence index, for `ARG<i>` and `PHI<i>` spellings.
    pub index: Option<u32>,
    /// Literal value, for integer tokens.
    pub value: Option<i64>,
}

impl Token {
    fn plain(kind: OpKind) -> Token {
        Token { kind, index: None, value: None }
    }

    /// Parses one instrumentation token.
    ///
    /// Integer spellings (optionally negative) become [`OpKind::Const`]
    /// with the parsed value. `ARG<i>` and `PHI<i>` carry their index;
    /// a bare `PHI` is a merge point with no index.
    pub fn parse(text: &str) -> ExprResult<Token> {
        let kind = match text {
            "ADD" => OpKind::Add,
            "SUB" => OpKind::Sub,
            "MUL" => OpKind::Mul,
            "AND" => OpKind::And,
            "OR" => OpKind::Or,
            "UDIV" => OpKind::UDiv,
            "SDIV" => OpKind::SDiv,
            "SHL" => OpKind::Shl,
            "ICMP" => OpKind::ICmp,
            "TIDX" => OpKind::TIdX,
            "TIDY" => OpKind::TIdY,
            "BIDX" => OpKind::BIdX,
            "BIDY" => OpKind::BIdY,
            "BDIMX" => OpKind::BDimX,
            "BDIMY" => OpKind::BDimY,
            "PHI_TERM" => OpKind::PhiTerm,
            "PHI" => OpKind::Phi,
            "CONST" => OpKind::Const,
            "INTERM" => OpKind::Interm,
            "INCOMP" => OpKind::Incomplete,
            "PC" => OpKind::PointerChase,
            "DIV" => OpKind::Div,
            "SREM" => OpKind::SRem,
            "LSHR" => OpKind::LShr,
            "FMUL" => OpKind::FMul,
            "FDIV" => OpKind::FDiv,
            "FCMP" => OpKind::FCmp,
            "DOUBLE" => OpKind::Double,
            "MEMOP" => OpKind::MemOp,
            "GEP" => OpKind::Gep,
            "ZEXT" => OpKind::ZExt,
            "SEXT" => OpKind::SExt,
            "FREEZE" => OpKind::Freeze,
            "TRUNC" => OpKind::Trunc,
            "FPTOSI" => OpKind::FpToSi,
            "UITOFP" => OpKind::UiToFp,
            "SITOFP" => OpKind::SiToFp,
            "SELECT" => OpKind::Select,
            "ATOMICRMW" => OpKind::AtomicRmw,
            "UNDEF" => OpKind::Undef,
            "CALL" => OpKind::Call,
            "LOAD" => OpKind::Load,
            "UNKNOWN" => OpKind::Unknown,
            _ => return Token::parse_payload(text),
        };
        Ok(Token::plain(kind))
    }

    fn parse_payload(text: &str) -> ExprResult<Token> {
        if let Some(rest) = text.strip_prefix("ARG") {
            let index = rest
                .parse::<u32>()
                .map_err(|_| ExprError::UnknownToken(text.to_owned()))?;
            return Ok(Token { kind: OpKind::Arg, index: Some(index), value: None });
        }
        if let Some(rest) = text.strip_prefix("PHI") {
            let index = rest
                .parse::<u32>()
                .map_err(|_| ExprError::UnknownToken(text.to_owned()))?;
            return Ok(Token { kind: OpKind::Phi, index: Some(index), value: None });
        }
        if let Ok(value) = text.parse::<i64>() {
            return Ok(Token { kind: OpKind::Const, index: None, value: Some(value) });
        }
        Err(ExprError::UnknownToken(text.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operators_and_terminals() {
        assert_eq!(Token::parse("MUL").unwrap().kind, OpKind::Mul);
        assert_eq!(Token::parse("TIDX").unwrap().kind, OpKind::TIdX);
        assert_eq!(Token::parse("GEP").unwrap().kind, OpKind::Gep);
    }

    #[test]
    fn parses_indexed_spellings() {
        let arg = Token::parse("ARG3").unwrap();
        assert_eq!(arg.kind, OpKind::Arg);
        assert_eq!(arg.index, Some(3));

        let phi = Token::parse("PHI12").unwrap();
        assert_eq!(phi.kind, OpKind::Phi);
        assert_eq!(phi.index, Some(12));

        let bare = Token::parse("PHI").unwrap();
        assert_eq!(bare.kind, OpKind::Phi);
        assert_eq!(bare.index, None);
    }

    #[test]
    fn parses_integer_literals() {
        let tok = Token::parse("-42").unwrap();
        assert_eq!(tok.kind, OpKind::Const);
        assert_eq!(tok.value, Some(-42));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(Token::parse("ARGx"), Err(ExprError::UnknownToken(_))));
        assert!(matches!(Token::parse("1.5"), Err(ExprError::UnknownToken(_))));
    }

    #[test]
    fn category_partition_is_stable() {
        assert_eq!(OpKind::PhiTerm.category(), OpCategory::Terminal);
        assert_eq!(OpKind::Incomplete.category(), OpCategory::Terminal);
        assert_eq!(OpKind::Or.category(), OpCategory::Operation);
        assert_eq!(OpKind::Gep.category(), OpCategory::Structural);
        assert!(OpKind::Phi.is_operation());
    }
}
