use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::RngCore;
use serde_json::Value;

use crate::{
    environments::environment_models::{ApiKey, Environment, KeyDescriptor, KeyMap, KeyScope},
    flags::{flag_evaluation::FlagEvaluationResult, flag_models::FlagMap},
    store::new_id,
};

const API_KEY_BYTES: usize = 32;

impl Environment {
    /// A fresh environment whose flags start out as the given copy.
    pub fn new(name: impl Into<String>, flags: FlagMap) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            flags,
            server_side_keys: KeyMap::new(),
            client_side_keys: KeyMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn keys(&self, scope: KeyScope) -> &KeyMap {
        match scope {
            KeyScope::ServerSide => &self.server_side_keys,
            KeyScope::ClientSide => &self.client_side_keys,
        }
    }

    pub fn keys_mut(&mut self, scope: KeyScope) -> &mut KeyMap {
        match scope {
            KeyScope::ServerSide => &mut self.server_side_keys,
            KeyScope::ClientSide => &mut self.client_side_keys,
        }
    }

    /// Evaluates one flag, or `None` if the environment has no flag by that name.
    pub fn evaluate_flag(&self, flag_name: &str, context: &Value) -> Option<FlagEvaluationResult> {
        self.flags
            .get(flag_name)
            .map(|rule| rule.evaluate(context))
    }

    /// Evaluates every flag independently; one flag failing never affects another.
    pub fn evaluate_flags(&self, context: &Value) -> BTreeMap<String, FlagEvaluationResult> {
        self.flags
            .iter()
            .map(|(name, rule)| (name.clone(), rule.evaluate(context)))
            .collect()
    }
}

impl ApiKey {
    /// Generates a new credential. Keys are random and never derived from the name.
    pub fn generate(name: impl Into<String>) -> Self {
        let mut bytes = [0u8; API_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);

        Self {
            key: URL_SAFE_NO_PAD.encode(bytes),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    pub fn descriptor(&self) -> KeyDescriptor {
        KeyDescriptor {
            name: self.name.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::flags::{
        flag_evaluation::FlagEvaluationStatus,
        flag_models::{FlagRule, Scalar},
    };

    fn environment_with_flags() -> Environment {
        let mut flags = FlagMap::new();
        flags.insert(
            "hot_weather".to_string(),
            FlagRule::new(Some(json!({">": [{"var": "temp"}, 30]})), Scalar::Bool(false)),
        );
        flags.insert(
            "theme".to_string(),
            FlagRule::new(None, Scalar::from("dark")),
        );
        Environment::new("staging", flags)
    }

    #[test]
    fn test_evaluate_flag() {
        let environment = environment_with_flags();

        let result = environment
            .evaluate_flag("hot_weather", &json!({"temp": 35}))
            .unwrap();
        assert_eq!(result.value, Scalar::Bool(true));
        assert_eq!(result.status, FlagEvaluationStatus::Ok);

        assert!(environment.evaluate_flag("missing", &json!({})).is_none());
    }

    #[test]
    fn test_one_failing_flag_does_not_affect_others() {
        let environment = environment_with_flags();
        let results = environment.evaluate_flags(&json!({}));

        assert_eq!(results.len(), 2);
        assert_eq!(results["hot_weather"].status, FlagEvaluationStatus::Error);
        assert_eq!(results["hot_weather"].value, Scalar::Bool(false));
        assert_eq!(results["theme"].status, FlagEvaluationStatus::Ok);
        assert_eq!(results["theme"].value, Scalar::from("dark"));
    }

    #[test]
    fn test_no_flags_evaluates_to_empty_map() {
        let environment = Environment::new("empty", FlagMap::new());
        assert!(environment.evaluate_flags(&json!({"a": 1})).is_empty());
    }

    #[test]
    fn test_generated_keys_are_unique_and_url_safe() {
        let first = ApiKey::generate("backend");
        let second = ApiKey::generate("backend");

        assert_ne!(first.key, second.key);
        assert_eq!(first.key.len(), 43);
        assert!(first
            .key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(first.descriptor().name, "backend");
    }
}
