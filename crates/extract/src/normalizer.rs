use serde_json::{Map, Value};

use crate::error::ExtractError;
use crate::schema::{Entity, ExtractionResult, Relation};

pub const UNNAMED_ENTITY: &str = "未命名实体";
pub const UNKNOWN_ENTITY_TYPE: &str = "未知类型";
pub const UNKNOWN_RELATION: &str = "未知关系";

/// Turn a decoded model reply into a well-formed extraction result.
///
/// Entities get positional defaults for a missing `id`, `label` or `type`.
/// Relations without both endpoints are dropped; a missing `label` is filled in.
/// Items that are not objects are skipped.
pub fn normalize_extraction(value: Value) -> Result<ExtractionResult, ExtractError> {
    let mut root = match value {
        Value::Object(root) => root,
        other => {
            return Err(ExtractError::Validation(format!(
                "expected a JSON object, got {}",
                kind(&other)
            )));
        }
    };

    let entities = take_list(&mut root, "entities")?
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Value::Object(fields) => Some(normalize_entity(i + 1, &fields)),
            _ => None,
        })
        .collect();

    let relations = take_list(&mut root, "relations")?
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(fields) => normalize_relation(&fields),
            _ => None,
        })
        .collect();

    Ok(ExtractionResult {
        entities,
        relations,
    })
}

fn normalize_entity(position: usize, fields: &Map<String, Value>) -> Entity {
    Entity {
        id: text_field(fields, "id").unwrap_or_else(|| format!("entity_{}", position)),
        label: text_field(fields, "label")
            .unwrap_or_else(|| format!("{}_{}", UNNAMED_ENTITY, position)),
        entity_type: text_field(fields, "type").unwrap_or_else(|| UNKNOWN_ENTITY_TYPE.to_string()),
    }
}

fn normalize_relation(fields: &Map<String, Value>) -> Option<Relation> {
    Some(Relation {
        from: text_field(fields, "from")?,
        to: text_field(fields, "to")?,
        label: text_field(fields, "label").unwrap_or_else(|| UNKNOWN_RELATION.to_string()),
    })
}

fn take_list(root: &mut Map<String, Value>, key: &str) -> Result<Vec<Value>, ExtractError> {
    match root.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ExtractError::Validation(format!(
            "`{}` must be a list, got {}",
            key,
            kind(&other)
        ))),
    }
}

/// A usable string for `key`: blank strings and nulls count as missing,
/// scalars are stringified.
fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
