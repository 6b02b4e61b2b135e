use anyhow::{Context, Result};
use extract::{ChatBackend, ChatMessage, fragment_content};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SYSTEM_PROMPT: &str = "你是一个专业的文档问答助手。请遵循以下规则：
1. 仔细分析上下文中的所有信息
2. 提供详尽的答案，包含具体的例子、时间、人物和事件
3. 按时间顺序或逻辑顺序组织内容
4. 使用专业术语，但要确保通俗易懂
5. 如果上下文包含数字、日期、人名等具体信息，请务必在回答中体现
6. 如果上下文中的信息不完整或缺失，请基于你的专业知识进行补充和扩展

回答要求：
1. 内容完整、准确
2. 结构清晰，分段合理
3. 语言流畅，易于理解
4. 重要信息需要突出
5. 适当融入你的专业见解";

#[derive(Clone)]
pub struct QueryLLM {
    client: Arc<dyn ChatBackend>,
}

impl QueryLLM {
    pub fn new(client: Arc<dyn ChatBackend>) -> Self {
        Self { client }
    }

    pub fn messages(context: &str, question: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "基于以下上下文信息回答用户问题。\n上下文信息：{}\n用户问题：{}",
                context, question
            )),
        ]
    }

    /// Single-shot answer.
    pub async fn generate(&self, context: &str, question: &str) -> Result<String> {
        let response = self
            .client
            .chat(&Self::messages(context, question))
            .await
            .context("Failed to get answer from LLM")?;

        response
            .message
            .map(|m| m.content)
            .context("LLM response has no message")
    }

    /// Streamed answer, with content increments joined in arrival order.
    ///
    /// Fragments that do not decode are skipped.
    pub async fn stream_answer(&self, context: &str, question: &str) -> Result<String> {
        let mut fragments = self
            .client
            .chat_stream(&Self::messages(context, question))
            .await
            .context("Failed to start answer stream")?;

        let mut answer = String::new();
        let mut skipped = 0usize;
        while let Some(line) = fragments.next().await {
            let line = line?;
            match fragment_content(&line) {
                Some(content) => answer.push_str(&content),
                None => skipped += 1,
            }
        }

        if answer.is_empty() {
            warn!(skipped, "Answer stream produced no content");
        }
        debug!(chars = answer.chars().count(), skipped, "Answer stream finished");
        Ok(answer)
    }
}
