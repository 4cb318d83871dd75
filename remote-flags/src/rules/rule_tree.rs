use serde_json::Value;

use super::context::kind_of;
use super::errors::EvaluationError;
use super::operators::Operator;

/// Rule trees nested deeper than this are rejected instead of recursed into.
pub const MAX_RULE_DEPTH: usize = 100;

/// A parsed rule tree.
///
/// Parsing resolves every operator symbol up front, so an evaluation never
/// starts on a tree that references an operator outside the fixed table.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleTree {
    Literal(Value),
    Operation {
        operator: Operator,
        operands: Vec<RuleTree>,
    },
}

impl RuleTree {
    pub fn parse(rules: &Value) -> Result<RuleTree, EvaluationError> {
        Self::parse_at(rules, 0)
    }

    fn parse_at(rules: &Value, depth: usize) -> Result<RuleTree, EvaluationError> {
        if depth > MAX_RULE_DEPTH {
            return Err(EvaluationError::NestingTooDeep(MAX_RULE_DEPTH));
        }

        let Value::Object(map) = rules else {
            return Ok(RuleTree::Literal(rules.clone()));
        };

        let mut entries = map.iter();
        let (symbol, operands) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(EvaluationError::MalformedRule(
                    "an operation needs exactly one operator, found none".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(EvaluationError::MalformedRule(format!(
                    "an operation needs exactly one operator, found {}",
                    map.len()
                )))
            }
        };

        let operator: Operator = symbol.parse()?;
        let operands = match operands {
            Value::Array(items) => items
                .iter()
                .map(|item| Self::parse_at(item, depth + 1))
                .collect::<Result<Vec<_>, _>>()?,
            // {"var": "x"} is shorthand for {"var": ["x"]}
            single => vec![Self::parse_at(single, depth + 1)?],
        };

        Ok(RuleTree::Operation { operator, operands })
    }

    /// Evaluates operands bottom-up, then applies the operator to the results.
    pub fn evaluate(&self, context: &Value) -> Result<Value, EvaluationError> {
        match self {
            RuleTree::Literal(value) => Ok(value.clone()),
            RuleTree::Operation { operator, operands } => {
                let args = operands
                    .iter()
                    .map(|operand| operand.evaluate(context))
                    .collect::<Result<Vec<_>, _>>()?;
                operator.apply(args, context)
            }
        }
    }
}

/// Parses and evaluates `rules` against `context`, requiring a scalar result.
///
/// A missing or falsy context (`null`, `false`, `0`, `""`, `[]`) is read as
/// an empty object.
pub fn evaluate(rules: &Value, context: &Value) -> Result<Value, EvaluationError> {
    let empty = Value::Object(Default::default());
    let context = if super::operators::is_truthy(context) {
        context
    } else {
        &empty
    };

    let value = RuleTree::parse(rules)?.evaluate(context)?;
    match value {
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(value),
        other => Err(EvaluationError::NonScalarResult(kind_of(&other))),
    }
}
