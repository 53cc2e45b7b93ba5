// Firestore typed-value codec
// Documents are plain serde structs; this maps their JSON form to Firestore's
// {"stringValue": ...} / {"mapValue": {"fields": ...}} representation and back.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::services::store::StoreError;

/// Encode a plain JSON value as a Firestore `Value`
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({"nullValue": null}),
        Value::Bool(b) => json!({"booleanValue": b}),
        Value::Number(n) => match n.as_i64() {
            // Firestore integers travel as strings
            Some(i) => json!({"integerValue": i.to_string()}),
            None => json!({"doubleValue": n.as_f64().unwrap_or(0.0)}),
        },
        Value::String(s) => json!({"stringValue": s}),
        Value::Array(values) => json!({
            "arrayValue": {"values": values.iter().map(encode_value).collect::<Vec<_>>()}
        }),
        Value::Object(map) => json!({"mapValue": {"fields": encode_fields(map)}}),
    }
}

fn encode_fields(map: &Map<String, Value>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

/// Decode a Firestore `Value` into plain JSON
pub fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };

    if let Some(s) = obj.get("stringValue").or_else(|| obj.get("timestampValue")) {
        return s.clone();
    }
    if let Some(b) = obj.get("booleanValue") {
        return b.clone();
    }
    if let Some(i) = obj.get("integerValue") {
        return i
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| i.clone());
    }
    if let Some(d) = obj.get("doubleValue") {
        return d.clone();
    }
    if let Some(arr) = obj.get("arrayValue") {
        let values = arr
            .get("values")
            .and_then(|v| v.as_array())
            .map(|vs| vs.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(map) = obj.get("mapValue") {
        return decode_fields(map.get("fields"));
    }
    Value::Null
}

fn decode_fields(fields: Option<&Value>) -> Value {
    Value::Object(
        fields
            .and_then(|f| f.as_object())
            .map(|f| f.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect())
            .unwrap_or_default(),
    )
}

/// Serialize a model into a Firestore document body: {"fields": {...}}
pub fn encode_document<T: Serialize>(doc: &T) -> Result<Value, StoreError> {
    match serde_json::to_value(doc)? {
        Value::Object(map) => Ok(json!({"fields": encode_fields(&map)})),
        other => Err(StoreError::Backend(format!(
            "expected an object document, got {}",
            other
        ))),
    }
}

/// Deserialize a Firestore document (as returned by GET or runQuery) into a model
/// A missing `id` field is filled from the last segment of the document name.
pub fn decode_document<T: DeserializeOwned>(doc: &Value) -> Result<T, StoreError> {
    let mut plain = decode_fields(doc.get("fields"));
    let doc_id = doc
        .get("name")
        .and_then(|n| n.as_str())
        .and_then(|n| n.rsplit('/').next());
    if let (Value::Object(map), Some(doc_id)) = (&mut plain, doc_id) {
        map.entry("id").or_insert_with(|| json!(doc_id));
    }
    Ok(serde_json::from_value(plain)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MaterialRequestItem, NewItemInput};
    use chrono::Utc;

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(encode_value(&json!(3)), json!({"integerValue": "3"}));
        assert_eq!(encode_value(&json!(2.5)), json!({"doubleValue": 2.5}));
        assert_eq!(encode_value(&json!(null)), json!({"nullValue": null}));
        assert_eq!(
            decode_value(&json!({"integerValue": "42"})),
            json!(42)
        );
        assert_eq!(
            decode_value(&json!({"timestampValue": "2024-05-01T00:00:00Z"})),
            json!("2024-05-01T00:00:00Z")
        );
    }

    #[test]
    fn test_item_document_survives_codec() {
        let item = NewItemInput {
            item_name: Some("Cement".into()),
            quantity_requested: Some(25.0),
            estimated_unit_cost: Some(7.5),
            ..Default::default()
        }
        .into_item("req-1", Utc::now());

        let doc = encode_document(&item).unwrap();
        assert_eq!(
            doc["fields"]["quantityRequested"],
            json!({"doubleValue": 25.0})
        );
        let decoded: MaterialRequestItem = decode_document(&doc).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_id_taken_from_document_name() {
        let doc = json!({
            "name": "projects/p/databases/(default)/documents/tasks/task-9",
            "fields": {"name": {"stringValue": "Pour slab"}}
        });
        let task: crate::models::TaskRecord = decode_document(&doc).unwrap();
        assert_eq!(task.id, "task-9");
        assert_eq!(task.name, "Pour slab");
        assert!(task.assigned_user_ids.is_empty());
    }
}
