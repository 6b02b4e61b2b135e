mod cache;
mod config;
mod course;
mod error;
mod metrics;
mod routes;
mod session;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::CachedEmbedder;
use crate::config::{AppConfig, LogFormat, LoggingConfig};
use crate::course::CourseSource;
use crate::metrics::Metrics;
use crate::routes::{AppState, HealthTargets};
use crate::session::{Pipeline, Session};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    let _guard = init_tracing(&config.logging)?;

    tracing::info!(
        model = %config.llm.model,
        collection = %config.vector.collection_name,
        workers = config.concurrency.workers,
        "Starting RAG server"
    );

    let state = Arc::new(build_state(&config)?);
    state.course.preload().await;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    tracing::info!("Server listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into());

    let console = match logging.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    let (file, guard) = match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("LOG_FILE has no file name: {:?}", path))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(guard)
}

fn build_state(config: &AppConfig) -> Result<AppState> {
    let metrics = Metrics::new();
    let workers = Arc::new(Semaphore::new(config.concurrency.workers));

    let chat: Arc<dyn extract::ChatBackend> = Arc::new(extract::OllamaChat::with_timeout(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    )?);

    let client = Arc::new(index::EmbeddingClient::new(
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
    ));
    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(CachedEmbedder::new(client.clone(), config.cache.max_entries)));
    let embedder: Arc<dyn index::Embedder> = match &cache {
        Some(cache) => cache.clone() as Arc<dyn index::Embedder>,
        None => client,
    };

    let store = Arc::new(index::QdrantStore::new(
        config.vector.endpoint.clone(),
        config.vector.collection_name.clone(),
    ));
    let indexer = Arc::new(index::Indexer::new(embedder, store, workers));
    let query = query::QueryEngine::new(
        indexer.clone(),
        query::QueryLLM::new(chat.clone()),
        config.vector.top_k,
    );

    let pipeline = Pipeline::new(
        chat,
        config.retry.clone(),
        Arc::new(extract::TokioSleeper),
        query,
        indexer,
        config.chunker_config(),
        metrics.clone(),
    );

    Ok(AppState {
        pipeline,
        session: Mutex::new(Session::new()),
        documents: config.paths.documents.clone(),
        course: CourseSource::new(config.paths.clone()),
        metrics,
        cache,
        health: HealthTargets {
            vector_endpoint: config.vector.endpoint.clone(),
            ollama_url: config.llm.base_url.clone(),
        },
    })
}
