pub mod condition;
pub mod path;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use self::condition::RuleCondition;
use self::path::{get_path, get_path_first, remove_path, set_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Mapping,
    Rename,
    Extract,
    Combine,
    Conditional,
    Structure,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    #[default]
    Concat,
    Merge,
}

/// One configured reshape step. The populated fields depend on `kind`;
/// unknown combinations are ignored with a warning rather than failing the
/// whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub source_paths: Option<Vec<String>>,
    #[serde(default)]
    pub target_path: Option<String>,
    /// Child-key renames for `mapping` rules.
    #[serde(default)]
    pub mapping: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    #[serde(default)]
    pub remove_source: Option<bool>,
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(default)]
    pub combine_mode: Option<CombineMode>,
    /// Template for `structure` rules.
    #[serde(default)]
    pub value: Option<Value>,
    /// Nested rules for `conditional`.
    #[serde(default)]
    pub rules: Option<Vec<TransformationRule>>,
    /// Registered function name for `custom`.
    #[serde(default)]
    pub custom: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TransformationResult {
    pub data: Value,
    pub applied: usize,
    pub warnings: Vec<String>,
}

type CustomFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Applies rule lists to JSON trees. Custom rules dispatch through the
/// registered function map; everything else is pure path surgery.
#[derive(Default, Clone)]
pub struct TransformEngine {
    custom: BTreeMap<String, CustomFn>,
}

impl TransformEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_custom<F>(&mut self, name: &str, transform: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.custom.insert(name.to_string(), Arc::new(transform));
    }

    pub fn transform(&self, data: Value, rules: &[TransformationRule]) -> TransformationResult {
        let mut result = TransformationResult {
            data,
            applied: 0,
            warnings: Vec::new(),
        };
        for rule in rules {
            self.apply_rule(&mut result, rule);
        }
        result
    }

    fn apply_rule(&self, result: &mut TransformationResult, rule: &TransformationRule) {
        if let Some(condition) = &rule.condition
            && !condition.matches(&result.data)
        {
            return;
        }

        match rule.kind {
            RuleKind::Mapping => self.apply_mapping(result, rule),
            RuleKind::Rename | RuleKind::Extract => self.apply_move(result, rule),
            RuleKind::Combine => self.apply_combine(result, rule),
            RuleKind::Conditional => {
                // The condition gate above already passed; run the branch.
                if let Some(rules) = &rule.rules {
                    for nested in rules {
                        self.apply_rule(result, nested);
                    }
                    result.applied += 1;
                } else {
                    result
                        .warnings
                        .push("conditional rule without nested rules".to_string());
                }
            }
            RuleKind::Structure => self.apply_structure(result, rule),
            RuleKind::Custom => self.apply_custom(result, rule),
        }
    }

    fn apply_mapping(&self, result: &mut TransformationResult, rule: &TransformationRule) {
        let (Some(source), Some(mapping)) = (&rule.source_path, &rule.mapping) else {
            result
                .warnings
                .push("mapping rule missing sourcePath or mapping".to_string());
            return;
        };
        let Some(current) = get_path_first(&result.data, source).cloned() else {
            return;
        };
        let Value::Object(map) = current else {
            result
                .warnings
                .push(format!("mapping source {source} is not an object"));
            return;
        };

        let mut renamed = Map::new();
        for (key, value) in map {
            let target_key = mapping.get(&key).cloned().unwrap_or(key);
            renamed.insert(target_key, value);
        }

        let target = rule.target_path.as_deref().unwrap_or(source);
        if rule.remove_source.unwrap_or(false) && target != source {
            remove_path(&mut result.data, source);
        }
        set_path(&mut result.data, target, Value::Object(renamed));
        result.applied += 1;
    }

    fn apply_move(&self, result: &mut TransformationResult, rule: &TransformationRule) {
        let (Some(source), Some(target)) = (&rule.source_path, &rule.target_path) else {
            result
                .warnings
                .push("rename/extract rule missing sourcePath or targetPath".to_string());
            return;
        };
        let Some(value) = get_path_first(&result.data, source).cloned() else {
            return;
        };
        // Rename moves; extract copies unless removeSource is set.
        let remove = rule
            .remove_source
            .unwrap_or(rule.kind == RuleKind::Rename);
        if remove {
            remove_path(&mut result.data, source);
        }
        set_path(&mut result.data, target, value);
        result.applied += 1;
    }

    fn apply_combine(&self, result: &mut TransformationResult, rule: &TransformationRule) {
        let (Some(sources), Some(target)) = (&rule.source_paths, &rule.target_path) else {
            result
                .warnings
                .push("combine rule missing sourcePaths or targetPath".to_string());
            return;
        };
        let mut values = Vec::new();
        for source in sources {
            for found in get_path(&result.data, source) {
                values.push(found.clone());
            }
        }
        if values.is_empty() {
            return;
        }

        let combined = match rule.combine_mode.unwrap_or_default() {
            CombineMode::Concat => {
                let separator = rule.separator.as_deref().unwrap_or("");
                let joined = values
                    .iter()
                    .map(stringify)
                    .collect::<Vec<String>>()
                    .join(separator);
                Value::String(joined)
            }
            CombineMode::Merge => {
                let mut merged = Map::new();
                for value in values {
                    if let Value::Object(map) = value {
                        for (key, entry) in map {
                            merged.insert(key, entry);
                        }
                    }
                }
                Value::Object(merged)
            }
        };

        if rule.remove_source.unwrap_or(false) {
            for source in sources {
                remove_path(&mut result.data, source);
            }
        }
        set_path(&mut result.data, target, combined);
        result.applied += 1;
    }

    fn apply_structure(&self, result: &mut TransformationResult, rule: &TransformationRule) {
        let (Some(target), Some(template)) = (&rule.target_path, &rule.value) else {
            result
                .warnings
                .push("structure rule missing targetPath or value".to_string());
            return;
        };
        set_path(&mut result.data, target, template.clone());
        result.applied += 1;
    }

    fn apply_custom(&self, result: &mut TransformationResult, rule: &TransformationRule) {
        let Some(name) = &rule.custom else {
            result.warnings.push("custom rule missing name".to_string());
            return;
        };
        let Some(transform) = self.custom.get(name) else {
            result
                .warnings
                .push(format!("custom transform {name} is not registered"));
            return;
        };
        let data = std::mem::take(&mut result.data);
        result.data = transform(data);
        result.applied += 1;
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(kind: RuleKind) -> TransformationRule {
        TransformationRule {
            kind,
            source_path: None,
            source_paths: None,
            target_path: None,
            mapping: None,
            condition: None,
            remove_source: None,
            separator: None,
            combine_mode: None,
            value: None,
            rules: None,
            custom: None,
        }
    }

    #[test]
    fn rename_moves_value() {
        let mut step = rule(RuleKind::Rename);
        step.source_path = Some("usage.prompt_tokens".to_string());
        step.target_path = Some("usage.input_tokens".to_string());

        let out = TransformEngine::new().transform(json!({"usage": {"prompt_tokens": 3}}), &[step]);
        assert_eq!(out.data, json!({"usage": {"input_tokens": 3}}));
        assert_eq!(out.applied, 1);
    }

    #[test]
    fn extract_copies_value() {
        let mut step = rule(RuleKind::Extract);
        step.source_path = Some("a.b".to_string());
        step.target_path = Some("c".to_string());

        let out = TransformEngine::new().transform(json!({"a": {"b": 1}}), &[step]);
        assert_eq!(out.data, json!({"a": {"b": 1}, "c": 1}));
    }

    #[test]
    fn mapping_renames_child_keys() {
        let mut step = rule(RuleKind::Mapping);
        step.source_path = Some("usage".to_string());
        step.mapping = Some(BTreeMap::from([
            ("prompt_tokens".to_string(), "input_tokens".to_string()),
            ("completion_tokens".to_string(), "output_tokens".to_string()),
        ]));

        let out = TransformEngine::new().transform(
            json!({"usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}}),
            &[step],
        );
        assert_eq!(
            out.data,
            json!({"usage": {"input_tokens": 3, "output_tokens": 1, "total_tokens": 4}})
        );
    }

    #[test]
    fn combine_concat_with_separator() {
        let mut step = rule(RuleKind::Combine);
        step.source_paths = Some(vec!["first".to_string(), "last".to_string()]);
        step.target_path = Some("full".to_string());
        step.separator = Some(" ".to_string());
        step.remove_source = Some(true);

        let out = TransformEngine::new().transform(json!({"first": "Ada", "last": "Lovelace"}), &[step]);
        assert_eq!(out.data, json!({"full": "Ada Lovelace"}));
    }

    #[test]
    fn combine_merge_objects() {
        let mut step = rule(RuleKind::Combine);
        step.source_paths = Some(vec!["a".to_string(), "b".to_string()]);
        step.target_path = Some("merged".to_string());
        step.combine_mode = Some(CombineMode::Merge);

        let out = TransformEngine::new().transform(json!({"a": {"x": 1}, "b": {"y": 2}}), &[step]);
        assert_eq!(out.data["merged"], json!({"x": 1, "y": 2}));
    }

    #[test]
    fn condition_blocks_rule() {
        let mut step = rule(RuleKind::Rename);
        step.source_path = Some("a".to_string());
        step.target_path = Some("b".to_string());
        step.condition = Some(RuleCondition {
            field: "enabled".to_string(),
            operator: condition::ConditionOperator::Equals,
            value: Some(json!(true)),
        });

        let out = TransformEngine::new().transform(json!({"a": 1, "enabled": false}), &[step]);
        assert_eq!(out.data, json!({"a": 1, "enabled": false}));
        assert_eq!(out.applied, 0);
    }

    #[test]
    fn custom_rule_dispatches_registered_fn() {
        let mut engine = TransformEngine::new();
        engine.register_custom("drop_nulls", |mut data| {
            if let Value::Object(map) = &mut data {
                map.retain(|_, v| !v.is_null());
            }
            data
        });
        let mut step = rule(RuleKind::Custom);
        step.custom = Some("drop_nulls".to_string());

        let out = engine.transform(json!({"a": 1, "b": null}), &[step]);
        assert_eq!(out.data, json!({"a": 1}));
    }

    #[test]
    fn unregistered_custom_warns_and_keeps_data() {
        let mut step = rule(RuleKind::Custom);
        step.custom = Some("nope".to_string());

        let out = TransformEngine::new().transform(json!({"a": 1}), &[step]);
        assert_eq!(out.data, json!({"a": 1}));
        assert_eq!(out.warnings.len(), 1);
    }
}
