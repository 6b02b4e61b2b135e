use anyhow::{Context, Result};
use extract::{ChatBackend, ExtractionResult, Extractor, FailureReporter, RetryPolicy, Sleeper};
use graph::{GraphModel, MergeReport};
use index::{IndexReport, Indexer};
use ingest::ChunkerConfig;
use query::{QueryEngine, Source};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::metrics::{Metrics, TimedOperation};

/// Collects user-facing warnings raised while serving one request.
#[derive(Debug, Default)]
pub struct NoticeBoard {
    notices: Mutex<Vec<String>>,
}

impl NoticeBoard {
    pub fn push(&self, message: impl Into<String>) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl FailureReporter for NoticeBoard {
    fn report(&self, message: &str) {
        self.push(message);
    }
}

/// Knowledge graph accumulated over one user session.
#[derive(Debug, Default)]
pub struct Session {
    graph: GraphModel,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    pub fn merge(&mut self, result: ExtractionResult) -> MergeReport {
        self.graph.merge(result)
    }

    pub fn reset(&mut self) {
        info!(entities = self.graph.len(), "Session graph reset");
        self.graph.clear();
    }

    pub fn counts(&self) -> GraphCounts {
        GraphCounts {
            entities: self.graph.len(),
            relations: self.graph.relations().len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct GraphCounts {
    pub entities: usize,
    pub relations: usize,
}

#[derive(Debug, Serialize)]
pub struct ImportOutcome {
    pub chunks: usize,
    pub report: Option<IndexReport>,
    pub notices: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AskOutcome {
    pub answer: String,
    pub sources: Vec<Source>,
    pub extracted: GraphCounts,
    pub merged: MergeReport,
    pub graph: GraphCounts,
    pub notices: Vec<String>,
}

/// Import, retrieval, answering and extraction, wired to their backends.
pub struct Pipeline {
    chat: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    query: QueryEngine,
    indexer: Arc<Indexer>,
    chunker: ChunkerConfig,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        query: QueryEngine,
        indexer: Arc<Indexer>,
        chunker: ChunkerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chat,
            retry,
            sleeper,
            query,
            indexer,
            chunker,
            metrics,
        }
    }

    /// Chunk a file or directory and rebuild the vector collection from it.
    ///
    /// Unreadable input is a notice; a failing vector store is an error.
    pub async fn import(&self, path: &Path) -> Result<ImportOutcome> {
        let timer = TimedOperation::start();
        let notices = NoticeBoard::default();

        let chunks = if path.is_dir() {
            ingest::ingest_directory(path, &self.chunker).await
        } else {
            ingest::ingest_file(path, &self.chunker).await
        };
        let chunks = match chunks {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(path = ?path, error = %e, "Document import failed");
                notices.push(format!("Failed to read {}: {:#}", path.display(), e));
                return Ok(ImportOutcome {
                    chunks: 0,
                    report: None,
                    notices: notices.take(),
                });
            }
        };

        if chunks.is_empty() {
            notices.push(format!("{} contains no text to import", path.display()));
            return Ok(ImportOutcome {
                chunks: 0,
                report: None,
                notices: notices.take(),
            });
        }

        let count = chunks.len();
        let report = self
            .indexer
            .rebuild(chunks)
            .await
            .context("Failed to index document")?;
        if report.embedded < report.chunks {
            notices.push(format!(
                "{} of {} chunks could not be embedded and were skipped",
                report.chunks - report.embedded,
                report.chunks
            ));
        }

        self.metrics.record_import(timer.elapsed(), report.inserted);
        Ok(ImportOutcome {
            chunks: count,
            report: Some(report),
            notices: notices.take(),
        })
    }

    /// Answer a question, then grow the session graph from the answer.
    pub async fn ask(&self, session: &tokio::sync::Mutex<Session>, question: &str) -> Result<AskOutcome> {
        let timer = TimedOperation::start();
        let result = self.answer_and_extract(session, question).await;
        self.metrics.record_ask(timer.elapsed(), result.is_ok());
        result
    }

    async fn answer_and_extract(
        &self,
        session: &tokio::sync::Mutex<Session>,
        question: &str,
    ) -> Result<AskOutcome> {
        let answer = self.query.ask(question).await?;

        let notices = Arc::new(NoticeBoard::default());
        let extractor = Extractor::new(self.chat.clone())
            .with_retry(self.retry.clone())
            .with_sleeper(self.sleeper.clone())
            .with_reporter(notices.clone());

        let timer = TimedOperation::start();
        let result = extractor.extract(&answer.answer).await;
        let extracted = GraphCounts {
            entities: result.entities.len(),
            relations: result.relations.len(),
        };
        self.metrics
            .record_extract(timer.elapsed(), extracted.entities, extracted.relations);

        if result.is_empty() {
            warn!(question, "No entities or relations extracted from answer");
        } else {
            info!(
                entities = extracted.entities,
                relations = extracted.relations,
                "Extracted knowledge from answer"
            );
        }

        let mut session = session.lock().await;
        let merged = session.merge(result);
        let graph = session.counts();
        drop(session);

        Ok(AskOutcome {
            answer: answer.answer,
            sources: answer.sources,
            extracted,
            merged,
            graph,
            notices: notices.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::{Backoff, ChatMessage, ChatResponse, FragmentStream};
    use index::{Embedder, Passage, VectorStore};
    use ingest::Chunk;
    use query::QueryLLM;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const EXTRACTION: &str = r#"{"entities": [{"id": "entity_1", "label": "关键帧", "type": "概念"}, {"id": "entity_2", "label": "中间帧", "type": "概念"}], "relations": [{"from": "entity_1", "to": "entity_2", "label": "生成"}]}"#;

    /// Streams a fixed answer; non-streaming calls return `extraction`.
    struct FakeChat {
        extraction: &'static str,
        chat_calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for FakeChat {
        async fn chat(&self, _messages: &[ChatMessage]) -> anyhow::Result<ChatResponse> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                message: Some(ChatMessage {
                    role: "assistant".into(),
                    content: self.extraction.into(),
                }),
                done: true,
            })
        }

        async fn chat_stream(&self, _messages: &[ChatMessage]) -> anyhow::Result<FragmentStream> {
            let lines: Vec<anyhow::Result<String>> = vec![
                Ok(r#"{"message":{"content":"关键帧之间"}}"#.to_string()),
                Ok(r#"{"message":{"content":"生成中间帧。"}}"#.to_string()),
            ];
            Ok(Box::pin(futures::stream::iter(lines)))
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inserted: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        async fn recreate_collection(&self, _dimension: usize) -> anyhow::Result<()> {
            self.inserted.store(0, Ordering::SeqCst);
            Ok(())
        }

        async fn insert(&self, items: Vec<(Chunk, Vec<f32>)>) -> anyhow::Result<usize> {
            self.inserted.fetch_add(items.len(), Ordering::SeqCst);
            Ok(items.len())
        }

        async fn search(&self, _vector: Vec<f32>, _limit: usize) -> anyhow::Result<Vec<Passage>> {
            Ok(vec![Passage {
                text: "关键帧定义动作的起止。".into(),
                distance: 0.2,
            }])
        }
    }

    fn pipeline(extraction: &'static str) -> (Pipeline, Arc<FakeChat>, Arc<CountingStore>) {
        let chat = Arc::new(FakeChat {
            extraction,
            chat_calls: AtomicUsize::new(0),
        });
        let store = Arc::new(CountingStore::default());
        let indexer = Arc::new(Indexer::new(
            Arc::new(UnitEmbedder),
            store.clone(),
            Arc::new(Semaphore::new(4)),
        ));
        let query = QueryEngine::new(indexer.clone(), QueryLLM::new(chat.clone()), 3);
        let pipeline = Pipeline::new(
            chat.clone(),
            RetryPolicy::new(3, Backoff::Fixed { delay_ms: 1000 }),
            Arc::new(NoSleep),
            query,
            indexer,
            ChunkerConfig::default(),
            Metrics::new(),
        );
        (pipeline, chat, store)
    }

    #[tokio::test]
    async fn test_ask_merges_extraction_into_session() {
        let (pipeline, chat, _) = pipeline(EXTRACTION);
        let session = tokio::sync::Mutex::new(Session::new());

        let outcome = pipeline.ask(&session, "什么是关键帧？").await.unwrap();

        assert_eq!(outcome.answer, "关键帧之间生成中间帧。");
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.extracted, GraphCounts { entities: 2, relations: 1 });
        assert_eq!(outcome.graph, GraphCounts { entities: 2, relations: 1 });
        assert!(outcome.notices.is_empty());
        assert_eq!(chat.chat_calls.load(Ordering::SeqCst), 1);

        let again = pipeline.ask(&session, "什么是关键帧？").await.unwrap();
        assert_eq!(again.merged, MergeReport::default());
        assert_eq!(again.graph, GraphCounts { entities: 2, relations: 1 });

        session.lock().await.reset();
        assert!(session.lock().await.graph().is_empty());
    }

    #[tokio::test]
    async fn test_failed_extraction_becomes_notice() {
        let (pipeline, chat, _) = pipeline("这不是JSON");
        let session = tokio::sync::Mutex::new(Session::new());

        let outcome = pipeline.ask(&session, "问题").await.unwrap();

        assert_eq!(outcome.extracted, GraphCounts { entities: 0, relations: 0 });
        assert_eq!(outcome.graph, GraphCounts { entities: 0, relations: 0 });
        assert_eq!(outcome.notices.len(), 1);
        assert_eq!(chat.chat_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_import_indexes_chunks() {
        let (pipeline, _, store) = pipeline(EXTRACTION);
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("wz.md");
        std::fs::write(&file, "### 1.1 动画\n#### 关键帧\n关键帧定义动作。\n").unwrap();

        let outcome = pipeline.import(&file).await.unwrap();

        assert_eq!(outcome.chunks, 1);
        assert!(outcome.notices.is_empty());
        assert_eq!(outcome.report.unwrap().inserted, 1);
        assert_eq!(store.inserted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreadable_import_is_a_notice() {
        let (pipeline, _, store) = pipeline(EXTRACTION);
        let dir = tempfile::tempdir().unwrap();

        let missing = pipeline.import(&dir.path().join("missing.md")).await.unwrap();
        assert_eq!(missing.chunks, 0);
        assert_eq!(missing.notices.len(), 1);

        let empty = pipeline.import(dir.path()).await.unwrap();
        assert_eq!(empty.notices.len(), 1);
        assert_eq!(store.inserted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_notice_board_drains() {
        let board = NoticeBoard::default();
        board.report("first");
        board.push("second");
        assert_eq!(board.take(), vec!["first", "second"]);
        assert!(board.take().is_empty());
    }
}
