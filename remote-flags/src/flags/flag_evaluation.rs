use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    flags::flag_models::{FlagRule, Scalar},
    metrics_utils::FLAG_EVALUATIONS_COUNTER,
    rules,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagEvaluationStatus {
    Ok,
    Error,
}

impl FlagEvaluationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FlagEvaluationStatus::Ok => "ok",
            FlagEvaluationStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagEvaluationResult {
    pub value: Scalar,
    pub status: FlagEvaluationStatus,
    pub reason: String,
}

impl FlagEvaluationResult {
    fn ok(value: Scalar) -> Self {
        Self {
            value,
            status: FlagEvaluationStatus::Ok,
            reason: String::new(),
        }
    }

    fn error(value: Scalar, reason: String) -> Self {
        Self {
            value,
            status: FlagEvaluationStatus::Error,
            reason,
        }
    }
}

impl FlagRule {
    /// Evaluates the rule against a caller's context.
    ///
    /// Never fails: a rule that cannot be evaluated reports its default value
    /// with an `error` status and the failure message as the reason.
    pub fn evaluate(&self, context: &Value) -> FlagEvaluationResult {
        let result = match &self.rules {
            None => FlagEvaluationResult::ok(self.default.clone()),
            Some(tree) => match rules::evaluate(tree, context) {
                Ok(value) => match Scalar::try_from(value) {
                    Ok(value) => FlagEvaluationResult::ok(value),
                    // rules::evaluate only hands back scalars
                    Err(_) => FlagEvaluationResult::error(
                        self.default.clone(),
                        "Rule evaluated to a non-scalar value".to_string(),
                    ),
                },
                Err(e) => {
                    tracing::debug!("flag evaluation failed: {}", e);
                    FlagEvaluationResult::error(self.default.clone(), e.to_string())
                }
            },
        };

        metrics::counter!(FLAG_EVALUATIONS_COUNTER, "status" => result.status.as_str())
            .increment(1);

        result
    }
}
