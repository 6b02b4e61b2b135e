use crate::llm::ChatMessage;

/// System instruction fixing the `{"entities": [...], "relations": [...]}` output shape.
pub const KG_SYSTEM_PROMPT: &str = r#"
你是一个专业的实体关系提取助手。请遵循以下规则：
1. 仔细分析文本内容，识别出所有实体和它们之间的关系
2. 实体包括：人物、地点、组织、概念、事件等
3. 关系包括：包含、属于、导致、参与、使用等
4. 返回格式必须为严格的JSON格式
5. 每个实体必须有唯一的id和label，id格式为"entity_数字"
6. 每个关系必须包含from和to，指向实体的id
7. 如果文本中没有可提取的实体和关系，返回空列表

返回格式示例：
{
    "entities": [
        {"id": "entity_1", "label": "实体1", "type": "类型"},
        {"id": "entity_2", "label": "实体2", "type": "类型"}
    ],
    "relations": [
        {"from": "entity_1", "to": "entity_2", "label": "关系描述"}
    ]
}
"#;

pub fn build_extraction_messages(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(KG_SYSTEM_PROMPT),
        ChatMessage::user(format!("请从以下文本中提取实体和关系：\n\n{}", text)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_embed_text_after_instruction() {
        let messages = build_extraction_messages("关键帧决定动作的节奏");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains(r#""relations""#));
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.ends_with("关键帧决定动作的节奏"));
    }
}
