//! Error types for expression construction and evaluation.

use thiserror::Error;

/// Result type for expression operations.
pub type ExprResult<T> = Result<T, ExprError>;

/// Errors raised while building or evaluating access expressions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// A token stream could not be reduced to a well-formed tree.
    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    /// A token did not match any known operator or terminal spelling.
    #[error("unknown token: {0:?}")]
    UnknownToken(String),

    /// A terminal carried no resolvable value under the active invocation.
    #[error("unresolved terminal: {0}")]
    UnresolvedTerminal(String),

    /// A binary reduction saw an operand that is not in terminal form.
    #[error("non-terminal operand under {0}")]
    NonTerminalOperand(String),

    /// A phi recurrence chain passed through an operator other than add.
    #[error("unsupported phi chain: ancestor {0} is not an add")]
    UnsupportedPhiChain(String),

    /// A loop trip count could not be computed from its bound expressions.
    #[error("incomputable bounds for loop {0}")]
    IncomputableLoop(u32),

    /// A division step saw a zero divisor.
    #[error("division by zero while reducing {0}")]
    DivisionByZero(String),
}
