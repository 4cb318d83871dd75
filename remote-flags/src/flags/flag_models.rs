use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

/// The value types a flag may resolve to.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    String(String),
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::Bool(false)
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Number(n) => Value::Number(n),
            Scalar::String(s) => Value::String(s),
        }
    }
}

impl TryFrom<Value> for Scalar {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(Scalar::Bool(b)),
            Value::Number(n) => Ok(Scalar::Number(n)),
            Value::String(s) => Ok(Scalar::String(s)),
            other => Err(other),
        }
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

/// A rule tree paired with the value returned when there is no rule or the
/// rule cannot be evaluated.
///
/// The same record lives in a project's flag map and in each environment's.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlagRule {
    #[serde(default)]
    pub rules: Option<Value>,
    #[serde(default)]
    pub default: Scalar,
}

impl FlagRule {
    pub fn new(rules: Option<Value>, default: Scalar) -> Self {
        Self { rules, default }
    }
}

/// Flags keyed by name. Ordered so responses list flags deterministically.
pub type FlagMap = BTreeMap<String, FlagRule>;

/// A named flag, as sent when adding a flag to a project.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Flag {
    pub name: String,
    #[serde(default)]
    pub rules: Option<Value>,
    #[serde(default)]
    pub default: Scalar,
}

impl Flag {
    pub fn new(name: impl Into<String>, rule: FlagRule) -> Self {
        Self {
            name: name.into(),
            rules: rule.rules,
            default: rule.default,
        }
    }

    pub fn rule(&self) -> FlagRule {
        FlagRule::new(self.rules.clone(), self.default.clone())
    }
}

/// A partial update to a [`FlagRule`]. Only the fields present in the request
/// are written.
///
/// `rules` distinguishes "absent" (`None`) from an explicit `null`
/// (`Some(None)`), which clears the rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlagRulePatch {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub rules: Option<Option<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Scalar>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Value>::deserialize(deserializer).map(Some)
}

impl FlagRulePatch {
    pub fn is_empty(&self) -> bool {
        self.rules.is_none() && self.default.is_none()
    }

    pub fn apply_to(&self, rule: &mut FlagRule) {
        if let Some(rules) = &self.rules {
            rule.rules = rules.clone();
        }
        if let Some(default) = &self.default {
            rule.default = default.clone();
        }
    }
}
