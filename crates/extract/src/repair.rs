//! Best-effort repair of almost-JSON emitted by language models.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json|JSON)?\s*|\s*```").expect("code fence pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepairError {
    #[error("no JSON object or array left to parse")]
    NoStructure,
}

#[derive(Debug)]
enum Frame {
    Object { expect_key: bool },
    Array,
}

/// Apply the repair heuristics in order: strip code fences, separate adjacent
/// containers (`}{` becomes `},{`), then give bare keys their missing colon.
///
/// Already-valid JSON passes through with the same meaning.
pub fn repair_json(text: &str) -> Result<String, RepairError> {
    let unfenced = CODE_FENCE.replace_all(text, "");
    let repaired = insert_missing_separators(&unfenced);
    let repaired = repaired.trim();

    if !repaired.contains(['{', '[']) {
        return Err(RepairError::NoStructure);
    }
    Ok(repaired.to_string())
}

/// Single pass over the text, tracking string literals and container nesting so
/// that brackets or quotes inside strings are never rewritten.
fn insert_missing_separators(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut string_is_key = false;
    let mut awaiting_colon = false;
    let mut last: Option<char> = None;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                awaiting_colon = string_is_key;
                last = Some(c);
            }
            continue;
        }

        if c.is_whitespace() {
            out.push(c);
            continue;
        }

        if awaiting_colon {
            awaiting_colon = false;
            if !matches!(c, ':' | ',' | '}' | ']') {
                out.push(':');
                last = Some(':');
            }
        }

        if matches!(c, '{' | '[') && matches!(last, Some('}' | ']')) {
            out.push(',');
            if let Some(Frame::Object { expect_key }) = stack.last_mut() {
                *expect_key = true;
            }
        }

        match c {
            '"' => {
                in_string = true;
                string_is_key = matches!(stack.last(), Some(Frame::Object { expect_key: true }));
                if let Some(Frame::Object { expect_key }) = stack.last_mut() {
                    *expect_key = false;
                }
            }
            '{' => stack.push(Frame::Object { expect_key: true }),
            '[' => stack.push(Frame::Array),
            '}' | ']' => {
                stack.pop();
            }
            ',' => {
                if let Some(Frame::Object { expect_key }) = stack.last_mut() {
                    *expect_key = true;
                }
            }
            _ => {}
        }

        out.push(c);
        last = Some(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn reparse(text: &str) -> Value {
        serde_json::from_str(&repair_json(text).unwrap()).unwrap()
    }

    #[test]
    fn test_strips_code_fences() {
        let text = "```json\n{\"entities\": [], \"relations\": []}\n```";
        assert_eq!(reparse(text), json!({"entities": [], "relations": []}));
    }

    #[test]
    fn test_separates_adjacent_objects() {
        let text = r#"{"entities": [{"id": "entity_1"}{"id": "entity_2"}
            {"id": "entity_3"}], "relations": []}"#;
        let value = reparse(text);
        assert_eq!(value["entities"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_separates_adjacent_arrays() {
        assert_eq!(reparse("[[1] [2]]"), json!([[1], [2]]));
    }

    #[test]
    fn test_inserts_missing_colons() {
        let text = r#"{"entities": [{"id" "entity_1", "label": "骨骼", "type" "概念", "rank" 2}]}"#;
        assert_eq!(
            reparse(text),
            json!({"entities": [{"id": "entity_1", "label": "骨骼", "type": "概念", "rank": 2}]})
        );
    }

    #[test]
    fn test_all_repairs_together() {
        let text = "Here you go:\n```json\n{\"entities\": [{\"id\": \"entity_1\", \"label\" \"动画\", \"type\": \"概念\"}{\"id\": \"entity_2\", \"label\": \"帧\", \"type\": \"概念\"}], \"relations\": [{\"from\": \"entity_1\", \"to\": \"entity_2\", \"label\": \"包含\"}]}\n```";
        let repaired = repair_json(text).unwrap();
        let start = repaired.find('{').unwrap();
        let value: Value = serde_json::from_str(&repaired[start..]).unwrap();

        assert_eq!(value["entities"][0]["label"], "动画");
        assert_eq!(value["entities"][1]["id"], "entity_2");
    }

    #[test]
    fn test_valid_json_keeps_its_meaning() {
        let samples = [
            r#"{"entities": [], "relations": []}"#,
            r#"{"entities": [{"id": "entity_1", "label": "a}{b", "type": "\"quoted\" t"}], "relations": [{"from": "entity_1", "to": "entity_1", "label": "x [y] {z}"}]}"#,
            r#"[{"a": [1, 2, {"b": null}]}, [true, false]]"#,
            "{\n  \"label\": \"text with \\\\ backslash\",\n  \"n\": -1.5e3\n}",
        ];

        for sample in samples {
            let expected: Value = serde_json::from_str(sample).unwrap();
            assert_eq!(reparse(sample), expected, "{sample}");
        }
    }

    #[test]
    fn test_plain_text_is_unrepairable() {
        assert_eq!(
            repair_json("抱歉，我无法从这段文字中提取实体。"),
            Err(RepairError::NoStructure)
        );
        assert_eq!(repair_json("```\n```"), Err(RepairError::NoStructure));
    }
}
