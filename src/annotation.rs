//! Annotation record transforms and serialization.
//!
//! Annotations are arbitrary nested JSON objects. Before any output the two
//! reserved keys `source_id` and `frame_time` are merged in, overwriting any
//! same-named keys the publisher set. An optional flatten pass collapses
//! nested objects and arrays into single-level dotted keys; array elements
//! get numeric index segments, and element order follows arrival order.

use anyhow::Result;
use serde_json::{Map, Value};

pub const SOURCE_ID_KEY: &str = "source_id";
pub const FRAME_TIME_KEY: &str = "frame_time";

/// Merge the reserved subscriber keys into a record, overwriting.
pub fn merge_reserved(annotation: &mut Map<String, Value>, source_id: &str, frame_time: f64) {
    annotation.insert(SOURCE_ID_KEY.to_string(), Value::String(source_id.to_string()));
    annotation.insert(FRAME_TIME_KEY.to_string(), frame_time.into());
}

/// Collapse nested objects/arrays into a single-level map with dotted keys.
///
/// `{"a":1,"c":{"x":2}}` becomes `{"a":1,"c.x":2}`; an already-flat map is
/// returned unchanged. Empty containers contribute no keys.
pub fn flatten(annotation: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in annotation {
        flatten_into(key, value, &mut out);
    }
    out
}

fn flatten_into(key: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (child, value) in map {
                flatten_into(&format!("{}.{}", key, child), value, out);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_into(&format!("{}.{}", key, index), value, out);
            }
        }
        leaf => {
            out.insert(key.to_string(), leaf.clone());
        }
    }
}

/// Serialize a record as one JSON object line (no trailing newline).
pub fn to_json_line(annotation: &Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string(annotation)?)
}

/// CSV header row implied by the configured field list.
pub fn csv_header(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// One CSV row restricted to the configured fields. Unlisted keys are
/// ignored; missing keys produce empty cells.
pub fn to_csv_row(annotation: &Map<String, Value>, fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| csv_cell(annotation.get(field)))
        .collect::<Vec<_>>()
        .join(",")
}

fn csv_cell(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    csv_escape(&text)
}

fn csv_escape(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') || text.contains('\r') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {:?}", other),
        }
    }

    #[test]
    fn flatten_collapses_nested_objects() {
        let flat = flatten(&obj(json!({"a": 1, "c": {"x": 2}})));
        assert_eq!(Value::Object(flat), json!({"a": 1, "c.x": 2}));
    }

    #[test]
    fn flatten_is_a_no_op_on_flat_maps() {
        let input = obj(json!({"a": 1, "b": "two", "c": true}));
        assert_eq!(flatten(&input), input);
    }

    #[test]
    fn flatten_indexes_sequence_elements() {
        let flat = flatten(&obj(json!({"tags": ["x", "y"], "box": {"pts": [1, 2]}})));
        assert_eq!(
            Value::Object(flat),
            json!({"tags.0": "x", "tags.1": "y", "box.pts.0": 1, "box.pts.1": 2})
        );
    }

    #[test]
    fn reserved_keys_overwrite_publisher_values() {
        let mut record = obj(json!({"source_id": "forged", "frame_time": 0, "label": "dog"}));
        merge_reserved(&mut record, "cam0", 12.5);
        assert_eq!(record["source_id"], json!("cam0"));
        assert_eq!(record["frame_time"], json!(12.5));
        assert_eq!(record["label"], json!("dog"));
    }

    #[test]
    fn csv_row_uses_fixed_field_list() {
        let record = obj(json!({"label": "cat", "score": 0.5, "ignored": "x"}));
        let fields = vec![
            "label".to_string(),
            "missing".to_string(),
            "score".to_string(),
        ];
        assert_eq!(csv_header(&fields), "label,missing,score");
        assert_eq!(to_csv_row(&record, &fields), "cat,,0.5");
    }

    #[test]
    fn csv_cells_are_quoted_when_needed() {
        let record = obj(json!({"note": "a,b", "quote": "say \"hi\""}));
        let fields = vec!["note".to_string(), "quote".to_string()];
        assert_eq!(to_csv_row(&record, &fields), "\"a,b\",\"say \"\"hi\"\"\"");
    }
}
