use serde_json::Value;

/// One exported row, keyed by column name in source order
pub type Record = serde_json::Map<String, Value>;

/// Columns to export: the requested list, or every field of the first record.
pub fn resolve_fields(requested: &[String], rows: &[Record]) -> Vec<String> {
    if !requested.is_empty() {
        return requested.to_vec();
    }
    rows.first()
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default()
}

/// Flatten a JSON value into cell text
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(arr) => arr.iter().map(cell_text).collect::<Vec<_>>().join("; "),
        // nested objects are kept as compact JSON
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Cell text for a field, empty when the record lacks it
pub fn field_text(record: &Record, field: &str) -> String {
    record.get(field).map(cell_text).unwrap_or_default()
}

/// Keep only `fields`, in order; absent fields become null
pub fn project(record: &Record, fields: &[String]) -> Record {
    fields
        .iter()
        .map(|f| (f.clone(), record.get(f).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Human readable rendering of the filter map for metadata sections
pub fn describe_filters(filters: &serde_json::Map<String, Value>) -> String {
    if filters.is_empty() {
        return "none".to_string();
    }
    filters
        .iter()
        .map(|(k, v)| format!("{}={}", k, cell_text(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolve_fields_uses_first_record_order() {
        let rows = vec![record(json!({"id": 1, "name": "Ada", "email": "ada@example.com"}))];
        assert_eq!(resolve_fields(&[], &rows), vec!["id", "name", "email"]);
        assert_eq!(resolve_fields(&["email".to_string()], &rows), vec!["email"]);
        assert!(resolve_fields(&[], &[]).is_empty());
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!(true)), "true");
        assert_eq!(cell_text(&json!(2.5)), "2.5");
        assert_eq!(cell_text(&json!(["a", "b"])), "a; b");
        assert_eq!(cell_text(&json!({"k": 1})), "{\"k\":1}");
    }

    #[test]
    fn test_project_fills_missing_fields() {
        let r = record(json!({"id": 7, "email": "x@y.z"}));
        let projected = project(&r, &["email".to_string(), "phone".to_string()]);
        assert_eq!(projected.keys().collect::<Vec<_>>(), vec!["email", "phone"]);
        assert_eq!(projected["phone"], Value::Null);
    }
}
