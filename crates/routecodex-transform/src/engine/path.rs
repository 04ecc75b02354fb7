use serde_json::{Map, Value};

/// One segment of a dotted JSON path.
///
/// `foo.bar` addresses object keys, `foo[]` fans out over every element of
/// the array at `foo`, and a bare `*` matches any object key or array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Each,
    Any,
}

pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        if part == "*" {
            segments.push(PathSegment::Any);
            continue;
        }
        if let Some(key) = part.strip_suffix("[]") {
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            segments.push(PathSegment::Each);
            continue;
        }
        segments.push(PathSegment::Key(part.to_string()));
    }
    segments
}

/// Collect references to every value matched by `path`.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments = parse_path(path);
    let mut out = Vec::new();
    collect(root, &segments, &mut out);
    out
}

pub fn get_path_first<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    get_path(root, path).into_iter().next()
}

fn collect<'a>(node: &'a Value, segments: &[PathSegment], out: &mut Vec<&'a Value>) {
    let Some(segment) = segments.first() else {
        out.push(node);
        return;
    };
    let rest = &segments[1..];
    match segment {
        PathSegment::Key(key) => {
            if let Value::Object(map) = node
                && let Some(child) = map.get(key)
            {
                collect(child, rest, out);
            }
        }
        PathSegment::Each => {
            if let Value::Array(items) = node {
                for item in items {
                    collect(item, rest, out);
                }
            }
        }
        PathSegment::Any => match node {
            Value::Object(map) => {
                for child in map.values() {
                    collect(child, rest, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect(item, rest, out);
                }
            }
            _ => {}
        },
    }
}

/// Set `value` at `path`, creating intermediate objects for plain keys.
/// Wildcard segments apply to every existing match and never create nodes.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments = parse_path(path);
    if segments.is_empty() {
        return;
    }
    assign(root, &segments, &value);
}

fn assign(node: &mut Value, segments: &[PathSegment], value: &Value) {
    let segment = &segments[0];
    let rest = &segments[1..];
    match segment {
        PathSegment::Key(key) => {
            if !node.is_object() {
                if rest.is_empty() || matches!(node, Value::Null) {
                    *node = Value::Object(Map::new());
                } else {
                    return;
                }
            }
            let Value::Object(map) = node else { return };
            if rest.is_empty() {
                map.insert(key.clone(), value.clone());
                return;
            }
            let child = map.entry(key.clone()).or_insert(Value::Null);
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            assign(child, rest, value);
        }
        PathSegment::Each => {
            if let Value::Array(items) = node {
                for item in items {
                    if rest.is_empty() {
                        *item = value.clone();
                    } else {
                        assign(item, rest, value);
                    }
                }
            }
        }
        PathSegment::Any => match node {
            Value::Object(map) => {
                for child in map.values_mut() {
                    if rest.is_empty() {
                        *child = value.clone();
                    } else {
                        assign(child, rest, value);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    if rest.is_empty() {
                        *item = value.clone();
                    } else {
                        assign(item, rest, value);
                    }
                }
            }
            _ => {}
        },
    }
}

/// Remove every value matched by `path`. Returns how many were removed.
pub fn remove_path(root: &mut Value, path: &str) -> usize {
    let segments = parse_path(path);
    if segments.is_empty() {
        return 0;
    }
    prune(root, &segments)
}

fn prune(node: &mut Value, segments: &[PathSegment]) -> usize {
    let segment = &segments[0];
    let rest = &segments[1..];
    match segment {
        PathSegment::Key(key) => {
            let Value::Object(map) = node else { return 0 };
            if rest.is_empty() {
                return usize::from(map.remove(key).is_some());
            }
            map.get_mut(key).map_or(0, |child| prune(child, rest))
        }
        PathSegment::Each => {
            let Value::Array(items) = node else { return 0 };
            if rest.is_empty() {
                let removed = items.len();
                items.clear();
                return removed;
            }
            items.iter_mut().map(|item| prune(item, rest)).sum()
        }
        PathSegment::Any => match node {
            Value::Object(map) => {
                if rest.is_empty() {
                    let removed = map.len();
                    map.clear();
                    return removed;
                }
                map.values_mut().map(|child| prune(child, rest)).sum()
            }
            Value::Array(items) => {
                if rest.is_empty() {
                    let removed = items.len();
                    items.clear();
                    return removed;
                }
                items.iter_mut().map(|item| prune(item, rest)).sum()
            }
            _ => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_with_array_wildcard() {
        let data = json!({"choices": [{"message": {"content": "a"}}, {"message": {"content": "b"}}]});
        let found = get_path(&data, "choices[].message.content");
        assert_eq!(found, vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn get_with_star_wildcard() {
        let data = json!({"tools": {"first": {"strict": true}, "second": {"strict": false}}});
        let found = get_path(&data, "tools.*.strict");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut data = json!({});
        set_path(&mut data, "a.b.c", json!(1));
        assert_eq!(data, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_through_arrays() {
        let mut data = json!({"items": [{"x": 1}, {"x": 2}]});
        set_path(&mut data, "items[].x", json!(0));
        assert_eq!(data, json!({"items": [{"x": 0}, {"x": 0}]}));
    }

    #[test]
    fn remove_nested_through_wildcard() {
        let mut data = json!({"tools": [{"function": {"strict": true, "name": "a"}}, {"function": {"name": "b"}}]});
        let removed = remove_path(&mut data, "tools[].function.strict");
        assert_eq!(removed, 1);
        assert_eq!(
            data,
            json!({"tools": [{"function": {"name": "a"}}, {"function": {"name": "b"}}]})
        );
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut data = json!({"a": 1});
        assert_eq!(remove_path(&mut data, "b.c"), 0);
        assert_eq!(data, json!({"a": 1}));
    }
}
