//! Tree builders for the two serialized expression forms.
//!
//! The instrumentation records each access expression twice: as a
//! postfix (reverse-Polish) token stream, reduced here with an operand
//! stack into a strictly binary tree, and as a fully parenthesized
//! prefix stream that preserves the original operand arity.

use tracing::warn;

use crate::error::{ExprError, ExprResult};
use crate::op::{OpKind, Token};
use crate::tree::ExprTree;

/// Limits applied while building trees from token streams.
#[derive(Debug, Clone, Copy)]
pub struct BuildConfig {
    /// Postfix streams longer than this are flagged as pointer chasing
    /// instead of being built.
    pub max_postfix_tokens: usize,
    /// Prefix construction stops adding nodes past this count.
    pub max_prefix_nodes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig { max_postfix_tokens: 50, max_prefix_nodes: 100 }
    }
}

/// Builds a binary tree from a postfix token stream.
///
/// Returns `Ok(None)` for an empty stream. Over-long streams yield a
/// single [`OpKind::PointerChase`] node and a stream whose first token
/// is `INCOMP` yields a single [`OpKind::Incomplete`] node; callers
/// check for those markers before evaluating.
///
/// A recurrence is serialized as two `PHI` tokens: the first denotes
/// the entry value and becomes a [`OpKind::PhiTerm`] terminal, the
/// second is the merge operator. The builder tracks that state
/// explicitly and resets it once the merge is consumed.
pub fn build_postfix<S: AsRef<str>>(
    tokens: &[S],
    config: &BuildConfig,
) -> ExprResult<Option<ExprTree>> {
    if tokens.is_empty() {
        return Ok(None);
    }
    if tokens.len() > config.max_postfix_tokens {
        warn!(len = tokens.len(), "postfix stream over limit, flagging pointer chase");
        return Ok(Some(ExprTree::leaf(Token::parse("PC")?)));
    }
    if tokens[0].as_ref() == "INCOMP" {
        return Ok(Some(ExprTree::leaf(Token::parse("INCOMP")?)));
    }

    let mut tree = ExprTree::empty();
    let mut stack = Vec::new();
    let mut awaiting_phi_term = false;

    for raw in tokens {
        let text = raw.as_ref();
        let mut token = Token::parse(text)?;

        if token.kind == OpKind::Phi {
            if !awaiting_phi_term {
                // Entry value of the recurrence; the merge comes later.
                token.kind = OpKind::PhiTerm;
                awaiting_phi_term = true;
                stack.push(tree.push(token));
                continue;
            }
            awaiting_phi_term = false;
        }

        if token.kind.is_operation() {
            let rhs = stack
                .pop()
                .ok_or_else(|| ExprError::MalformedExpression(format!("{text} lacks operands")))?;
            let lhs = stack
                .pop()
                .ok_or_else(|| ExprError::MalformedExpression(format!("{text} lacks operands")))?;
            let node = tree.push(token);
            tree.attach(node, lhs);
            tree.attach(node, rhs);
            stack.push(node);
        } else {
            stack.push(tree.push(token));
        }
    }

    let root = stack
        .pop()
        .ok_or_else(|| ExprError::MalformedExpression("stream reduced to nothing".into()))?;
    if !stack.is_empty() {
        return Err(ExprError::MalformedExpression(format!(
            "{} operands left unreduced",
            stack.len()
        )));
    }
    tree.set_root(root);
    Ok(Some(tree))
}

/// Builds a tree from the parenthesized prefix form, preserving arity.
///
/// Each `(` opens a scope whose first token is the operator and whose
/// remaining entries are its operands. Construction stops quietly once
/// the node limit is reached; the truncated tree keeps whatever was
/// built so far.
pub fn build_prefix<S: AsRef<str>>(
    tokens: &[S],
    config: &BuildConfig,
) -> ExprResult<Option<ExprTree>> {
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut tree = ExprTree::empty();
    let mut open: Vec<crate::tree::NodeId> = Vec::new();
    let mut expect_operator = false;
    let mut truncated = false;

    for raw in tokens {
        let text = raw.as_ref();
        match text {
            "(" => {
                if expect_operator {
                    return Err(ExprError::MalformedExpression("empty group".into()));
                }
                expect_operator = true;
            }
            ")" => {
                if expect_operator {
                    return Err(ExprError::MalformedExpression("empty group".into()));
                }
                if open.pop().is_none() {
                    return Err(ExprError::MalformedExpression("unbalanced parentheses".into()));
                }
            }
            _ => {
                if tree.len() >= config.max_prefix_nodes {
                    warn!(limit = config.max_prefix_nodes, "prefix stream over limit, truncating");
                    truncated = true;
                    break;
                }
                let token = Token::parse(text)?;
                let node = tree.push(token);
                match open.last() {
                    Some(&parent) => tree.attach(parent, node),
                    None if tree.len() > 1 => {
                        return Err(ExprError::MalformedExpression(
                            "tokens after the root closed".into(),
                        ));
                    }
                    None => {}
                }
                if expect_operator {
                    open.push(node);
                    expect_operator = false;
                }
            }
        }
    }

    if tree.is_empty() {
        return Err(ExprError::MalformedExpression("no nodes in stream".into()));
    }
    if !truncated && (!open.is_empty() || expect_operator) {
        return Err(ExprError::MalformedExpression("unbalanced parentheses".into()));
    }
    // The first token opened the outermost scope, so node 0 is the root
    // that ExprTree::empty already points at.
    Ok(Some(tree))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn builds_binary_tree_from_postfix() {
        let tree = build_postfix(&split("4 ARG0 MUL"), &BuildConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(tree.to_string(), "(mul 4 arg0)");
    }

    #[test]
    fn empty_stream_is_absent_not_an_error() {
        let none: Vec<&str> = Vec::new();
        assert!(build_postfix(&none, &BuildConfig::default()).unwrap().is_none());
        assert!(build_prefix(&none, &BuildConfig::default()).unwrap().is_none());
    }

    #[test]
    fn overlong_postfix_becomes_pointer_chase() {
        let tokens: Vec<String> = (0..60).map(|i| i.to_string()).collect();
        let tree = build_postfix(&tokens, &BuildConfig::default()).unwrap().unwrap();
        assert!(tree.is_pointer_chase());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn leading_incomp_becomes_marker() {
        let tree = build_postfix(&split("INCOMP ARG0 ADD"), &BuildConfig::default())
            .unwrap()
            .unwrap();
        assert!(tree.is_incomplete());
    }

    #[test]
    fn phi_pair_builds_term_then_merge() {
        // i = phi(0, i + 1), then indexed by it
        let tree = build_postfix(&split("PHI3 1 ADD 0 PHI3"), &BuildConfig::default())
            .unwrap()
            .unwrap();
        let merge = tree.root();
        assert_eq!(tree.op(merge), OpKind::Phi);
        assert_eq!(tree.children(merge).len(), 2);
        assert_eq!(tree.count_kind(OpKind::PhiTerm), 1);
        assert_eq!(tree.count_kind(OpKind::Phi), 1);
    }

    #[test]
    fn second_recurrence_starts_a_fresh_phi_state() {
        let tokens = split("PHI1 1 ADD 0 PHI1 PHI2 2 ADD 0 PHI2 ADD");
        let tree = build_postfix(&tokens, &BuildConfig::default()).unwrap().unwrap();
        assert_eq!(tree.count_kind(OpKind::PhiTerm), 2);
        assert_eq!(tree.count_kind(OpKind::Phi), 2);
    }

    #[test]
    fn operand_underflow_is_malformed() {
        let err = build_postfix(&split("MUL"), &BuildConfig::default()).unwrap_err();
        assert!(matches!(err, ExprError::MalformedExpression(_)));
    }

    #[test]
    fn leftover_operands_are_malformed() {
        let err = build_postfix(&split("1 2"), &BuildConfig::default()).unwrap_err();
        assert!(matches!(err, ExprError::MalformedExpression(_)));
    }

    #[test]
    fn builds_nary_tree_from_prefix() {
        let tree = build_prefix(&split("( GEP ( ADD ARG0 TIDX ) )"), &BuildConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(tree.to_string(), "(gep (add arg0 tidx))");
        assert_eq!(tree.op(tree.root()), OpKind::Gep);
    }

    #[test]
    fn prefix_keeps_wide_operand_lists() {
        let tree = build_prefix(&split("( PHI4 0 ARG1 TIDX )"), &BuildConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(tree.children(tree.root()).len(), 3);
        assert_eq!(tree.node(tree.root()).index, Some(4));
    }

    #[test]
    fn prefix_truncates_at_node_limit() {
        let mut text = String::new();
        for _ in 0..80 {
            text.push_str("( ADD 1 ");
        }
        text.push('2');
        for _ in 0..80 {
            text.push_str(" )");
        }
        let config = BuildConfig::default();
        let tree = build_prefix(&split(&text), &config).unwrap().unwrap();
        assert!(tree.len() <= config.max_prefix_nodes);
        assert_eq!(tree.op(tree.root()), OpKind::Add);
    }

    #[test]
    fn unbalanced_prefix_is_malformed() {
        let err = build_prefix(&split("( ADD 1 2"), &BuildConfig::default()).unwrap_err();
        assert!(matches!(err, ExprError::MalformedExpression(_)));
    }
}
