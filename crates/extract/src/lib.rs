pub mod error;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod repair;
pub mod retry;
pub mod schema;

pub use error::ExtractError;
pub use llm::{ChatBackend, ChatMessage, ChatResponse, FragmentStream, OllamaChat, fragment_content};
pub use normalizer::normalize_extraction;
pub use repair::{RepairError, repair_json};
pub use retry::{Backoff, RetryPolicy, Sleeper, TokioSleeper};
pub use schema::{Entity, ExtractionResult, Relation};

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Receives the user-facing message when extraction gives up.
pub trait FailureReporter: Send + Sync {
    fn report(&self, message: &str);
}

/// Reporter for callers without a user-facing surface.
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, message: &str) {
        tracing::warn!(notice = message, "Extraction failure notice");
    }
}

pub struct Extractor {
    llm_client: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    reporter: Arc<dyn FailureReporter>,
}

impl Extractor {
    pub fn new(llm_client: Arc<dyn ChatBackend>) -> Self {
        Self {
            llm_client,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Extract entities and relations from text.
    ///
    /// Never fails: once every attempt is spent the failure is reported and an
    /// empty result comes back.
    pub async fn extract(&self, text: &str) -> ExtractionResult {
        match self.try_extract(text).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, attempts = self.retry.max_attempts, "Knowledge graph extraction failed");
                self.reporter
                    .report(&format!("Knowledge graph extraction failed: {}", e));
                ExtractionResult::default()
            }
        }
    }

    /// Same pipeline as [`Extractor::extract`], surfacing the last error.
    pub async fn try_extract(&self, text: &str) -> Result<ExtractionResult, ExtractError> {
        let messages = prompt::build_extraction_messages(text);
        let messages = messages.as_slice();

        let result = self
            .retry
            .run("kg_extraction", self.sleeper.as_ref(), move |attempt| {
                debug!(attempt, "Extraction attempt");
                self.attempt(messages)
            })
            .await?;

        info!(
            entities = result.entities.len(),
            relations = result.relations.len(),
            "Extraction succeeded"
        );
        Ok(result)
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<ExtractionResult, ExtractError> {
        let response = self
            .llm_client
            .chat(messages)
            .await
            .map_err(|e| ExtractError::Transport(format!("{:#}", e)))?;

        let content = response
            .message
            .map(|m| m.content)
            .ok_or_else(|| ExtractError::Transport("response has no message".to_string()))?;
        if content.trim().is_empty() {
            return Err(ExtractError::EmptyResponse);
        }

        let value = parse_structured(&content)?;
        normalize_extraction(value)
    }
}

/// Strict parse, then one more strict parse after the repair heuristics.
pub fn parse_structured(content: &str) -> Result<Value, ExtractError> {
    match serde_json::from_str(content) {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!(error = %first, "Strict parse failed, repairing");
            let repaired = repair_json(content)
                .map_err(|e| ExtractError::Malformed(format!("{}; {}", first, e)))?;
            serde_json::from_str(&repaired).map_err(|e| ExtractError::Malformed(e.to_string()))
        }
    }
}
