use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Metrics {
    // Counters
    questions_asked: AtomicUsize,
    questions_failed: AtomicUsize,
    imports: AtomicUsize,
    extractions: AtomicUsize,
    empty_extractions: AtomicUsize,

    // Timing (in microseconds)
    total_import_time_us: AtomicU64,
    total_ask_time_us: AtomicU64,
    total_extract_time_us: AtomicU64,

    // Counts
    total_chunks_indexed: AtomicUsize,
    total_entities_extracted: AtomicUsize,
    total_relations_extracted: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_ask(&self, duration: Duration, success: bool) {
        self.questions_asked.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.questions_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_ask_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_import(&self, duration: Duration, chunks: usize) {
        self.imports.fetch_add(1, Ordering::Relaxed);
        self.total_import_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_chunks_indexed.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_extract(&self, duration: Duration, entities: usize, relations: usize) {
        self.extractions.fetch_add(1, Ordering::Relaxed);
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_entities_extracted.fetch_add(entities, Ordering::Relaxed);
        self.total_relations_extracted.fetch_add(relations, Ordering::Relaxed);
        if entities == 0 && relations == 0 {
            self.empty_extractions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let asked = self.questions_asked.load(Ordering::Relaxed);
        let imports = self.imports.load(Ordering::Relaxed);
        let extractions = self.extractions.load(Ordering::Relaxed);
        MetricsSnapshot {
            questions_asked: asked,
            questions_failed: self.questions_failed.load(Ordering::Relaxed),
            imports,
            empty_extractions: self.empty_extractions.load(Ordering::Relaxed),
            avg_import_time_ms: avg_time_ms(&self.total_import_time_us, imports),
            avg_ask_time_ms: avg_time_ms(&self.total_ask_time_us, asked),
            avg_extract_time_ms: avg_time_ms(&self.total_extract_time_us, extractions),
            total_chunks_indexed: self.total_chunks_indexed.load(Ordering::Relaxed),
            total_entities_extracted: self.total_entities_extracted.load(Ordering::Relaxed),
            total_relations_extracted: self.total_relations_extracted.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: usize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    if count > 0 {
        total / count as f64 / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub questions_asked: usize,
    pub questions_failed: usize,
    pub imports: usize,
    pub empty_extractions: usize,
    pub avg_import_time_ms: f64,
    pub avg_ask_time_ms: f64,
    pub avg_extract_time_ms: f64,
    pub total_chunks_indexed: usize,
    pub total_entities_extracted: usize,
    pub total_relations_extracted: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
