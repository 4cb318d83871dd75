//! A small interpreter for JSON-logic style rule trees.
//!
//! A rule is either a literal (returned as-is) or a single-key object
//! `{operator: operands}`. Operands are evaluated bottom-up before the
//! operator is applied, so operators only ever see resolved values.

mod context;
mod errors;
mod operators;
mod rule_tree;

pub use context::lookup;
pub use errors::{EvaluationError, LookupError};
pub use operators::Operator;
pub use rule_tree::{evaluate, RuleTree, MAX_RULE_DEPTH};
