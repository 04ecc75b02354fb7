use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::get_path_first;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Exists,
    Gt,
    Lt,
    Regex,
}

/// Guard evaluated against the document root before a rule applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<Value>,
}

impl RuleCondition {
    pub fn matches(&self, root: &Value) -> bool {
        let found = get_path_first(root, &self.field);
        match self.operator {
            ConditionOperator::Exists => found.is_some(),
            ConditionOperator::Equals => match (found, &self.value) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            },
            ConditionOperator::Contains => match (found, &self.value) {
                (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                    haystack.contains(needle.as_str())
                }
                (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
                _ => false,
            },
            ConditionOperator::Gt => compare(found, self.value.as_ref()).is_some_and(|ord| ord > 0.0),
            ConditionOperator::Lt => compare(found, self.value.as_ref()).is_some_and(|ord| ord < 0.0),
            ConditionOperator::Regex => match (found, &self.value) {
                (Some(Value::String(actual)), Some(Value::String(pattern))) => {
                    regex::Regex::new(pattern)
                        .map(|re| re.is_match(actual))
                        .unwrap_or(false)
                }
                _ => false,
            },
        }
    }
}

fn compare(found: Option<&Value>, expected: Option<&Value>) -> Option<f64> {
    let actual = found?.as_f64()?;
    let expected = expected?.as_f64()?;
    Some(actual - expected)
}
