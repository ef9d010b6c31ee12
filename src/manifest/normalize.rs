//! Key normalization over arbitrary JSON values.

use serde_json::{Map, Value};

/// Identity fields lifted from `project` when absent at the top level.
const LIFTED_FIELDS: [&str; 3] = ["title", "description", "license"];

/// Convert an identifier written in camelCase, PascalCase, kebab-case or
/// with spaces to snake_case. Leading underscores are kept (`_meta`).
pub fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Recursively rewrite every object key to snake_case.
///
/// When two spellings collide (`fileName` and `file_name`), the one already in
/// canonical form wins regardless of map iteration order.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let canonical = to_snake_case(&key);
                let is_canonical = canonical == key;
                if out.contains_key(&canonical) && !is_canonical {
                    continue;
                }
                out.insert(canonical, normalize_keys(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        scalar => scalar,
    }
}

/// Copy `project.{title,description,license}` to the top level where the
/// top-level field is missing or null.
pub fn lift_identity(value: &mut Value) {
    let Value::Object(root) = value else {
        return;
    };
    let Some(Value::Object(project)) = root.get("project") else {
        return;
    };

    let lifted: Vec<(String, Value)> = LIFTED_FIELDS
        .iter()
        .filter(|field| root.get(**field).is_none_or(Value::is_null))
        .filter_map(|field| {
            project
                .get(*field)
                .filter(|v| !v.is_null())
                .map(|v| (field.to_string(), v.clone()))
        })
        .collect();

    for (field, v) in lifted {
        root.insert(field, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snake_case_conversions() {
        assert_eq!(to_snake_case("dataEntries"), "data_entries");
        assert_eq!(to_snake_case("FileName"), "file_name");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("camera-target"), "camera_target");
        assert_eq!(to_snake_case("_meta"), "_meta");
        assert_eq!(to_snake_case("scene_0"), "scene_0");
        assert_eq!(to_snake_case("pointcloud"), "pointcloud");
        assert_eq!(to_snake_case("max2DSize"), "max2_d_size");
    }

    #[test]
    fn normalizes_nested_objects_and_arrays() {
        let value = json!({
            "dataEntries": { "scene_0": { "fileName": "assets/scene.spz" } },
            "annotations": [ { "cameraPosition": [0, 1, 2] } ],
        });
        let normalized = normalize_keys(value);
        assert_eq!(
            normalized,
            json!({
                "data_entries": { "scene_0": { "file_name": "assets/scene.spz" } },
                "annotations": [ { "camera_position": [0, 1, 2] } ],
            })
        );
    }

    #[test]
    fn canonical_spelling_wins_collisions() {
        let value = json!({ "fileName": "camel", "file_name": "snake" });
        assert_eq!(normalize_keys(value), json!({ "file_name": "snake" }));
    }

    #[test]
    fn lifts_identity_only_when_absent() {
        let mut value = json!({
            "title": "Top",
            "project": { "title": "Nested", "description": "From project", "license": null }
        });
        lift_identity(&mut value);
        assert_eq!(value["title"], "Top");
        assert_eq!(value["description"], "From project");
        assert!(value.get("license").is_none());
    }
}
