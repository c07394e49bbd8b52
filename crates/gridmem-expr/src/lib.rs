//! Access-expression model for GPU kernel memory analysis.
//!
//! Kernel-side instrumentation serializes every analyzable memory
//! access as a stream of tokens over thread/block builtins, kernel
//! arguments, constants and loop recurrences. This crate turns those
//! streams back into arena-backed trees that the analysis crates walk,
//! evaluate over intervals and differentiate.
//!
//! # Example
//!
//! ```
//! use gridmem_expr::{build_postfix, BuildConfig, OpKind};
//!
//! let tokens = ["TIDX", "4", "MUL", "ARG0", "ADD"];
//! let tree = build_postfix(&tokens, &BuildConfig::default())
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(tree.op(tree.root()), OpKind::Add);
//! assert_eq!(tree.to_string(), "(add (mul tidx 4) arg0)");
//! ```

#![warn(missing_docs)]

pub mod build;
pub mod error;
pub mod op;
pub mod tree;

pub use build::{build_postfix, build_prefix, BuildConfig};
pub use error::{ExprError, ExprResult};
pub use op::{OpCategory, OpKind, Token};
pub use tree::{ExprNode, ExprTree, NodeId};
