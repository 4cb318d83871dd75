use thiserror::Error;

/// Failure to resolve a `var` path against the caller's context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Invalid context: key '{0}' not found")]
    KeyNotFound(String),
    #[error("Invalid context: key '{0}': list index out of range")]
    IndexOutOfRange(String),
    #[error("Invalid context: key '{segment}' cannot be resolved on a {kind}")]
    Unresolvable { segment: String, kind: &'static str },
}

/// Everything that can go wrong while compiling or evaluating a rule tree.
///
/// These never escape flag evaluation: the message becomes the `reason`
/// reported next to the flag's default value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error(transparent)]
    ContextLookup(#[from] LookupError),
    #[error("Unrecognized operation {0}")]
    UnrecognizedOperation(String),
    #[error("Malformed rule: {0}")]
    MalformedRule(String),
    #[error("Operator '{operator}' expects {expected} operands, got {got}")]
    Arity {
        operator: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("Operator '{operator}' cannot be applied to {detail}")]
    TypeMismatch {
        operator: &'static str,
        detail: String,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Rule evaluated to a non-scalar value of type {0}")]
    NonScalarResult(&'static str),
    #[error("Rule nesting exceeds the maximum depth of {0}")]
    NestingTooDeep(usize),
}
