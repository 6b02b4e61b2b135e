use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Non-streaming chat reply. `message` is absent when the server answered
/// with something other than a chat completion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
}

/// Newline-delimited fragments of a streamed reply, undecoded.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream>;
}

/// Content increment carried by one streamed fragment, if it decodes.
pub fn fragment_content(line: &str) -> Option<String> {
    let response: ChatResponse = serde_json::from_str(line).ok()?;
    response
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty())
}

#[derive(Clone)]
pub struct OllamaChat {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

impl OllamaChat {
    pub fn with_timeout(base_url: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url,
            model,
            client,
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let response = self.send(messages, false).await?;

        response
            .json()
            .await
            .context("Failed to parse Ollama response")
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream> {
        let response = self.send(messages, true).await?;
        let bytes = Box::pin(response.bytes_stream());

        let lines = futures::stream::unfold(
            (bytes, LineBuffer::default(), VecDeque::new(), false),
            |(mut bytes, mut buffer, mut ready, mut finished)| async move {
                loop {
                    if let Some(line) = ready.pop_front() {
                        return Some((Ok(line), (bytes, buffer, ready, finished)));
                    }
                    if finished {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => ready.extend(buffer.push(&chunk)),
                        Some(Err(e)) => {
                            finished = true;
                            let err = anyhow::Error::new(e).context("Ollama stream interrupted");
                            return Some((Err(err), (bytes, buffer, ready, finished)));
                        }
                        None => {
                            finished = true;
                            ready.extend(buffer.finish());
                        }
                    }
                }
            },
        );

        Ok(Box::pin(lines))
    }
}

/// Reassembles newline-delimited lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed bytes, returning every line completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.trim_end_matches('\r');
            if !text.trim().is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_handles_split_utf8_and_lines() {
        let payload = "{\"message\":{\"content\":\"动画\"}}\n{\"done\":true}\n".as_bytes();
        let (a, b) = payload.split_at(25); // splits inside a multi-byte character

        let mut buffer = LineBuffer::default();
        let mut lines = buffer.push(a);
        assert!(lines.is_empty());
        lines.extend(buffer.push(b));

        assert_eq!(lines.len(), 2);
        assert_eq!(fragment_content(&lines[0]).as_deref(), Some("动画"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_flushes_unterminated_tail() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"message\":{\"content\":\"a\"}}").is_empty());
        assert_eq!(
            buffer.finish().as_deref(),
            Some("{\"message\":{\"content\":\"a\"}}")
        );
    }

    #[test]
    fn test_fragment_content_skips_noise() {
        assert_eq!(fragment_content("not json"), None);
        assert_eq!(fragment_content("{\"done\":true}"), None);
        assert_eq!(
            fragment_content("{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}"),
            None
        );
        assert_eq!(
            fragment_content("{\"message\":{\"role\":\"assistant\",\"content\":\"关键帧\"}}").as_deref(),
            Some("关键帧")
        );
    }

    #[test]
    fn test_request_shape() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let request = OllamaChatRequest {
            model: "qwen2.5",
            messages: &messages,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "qwen2.5");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }
}
