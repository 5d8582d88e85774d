//! Prometheus metrics

use crate::error::PulseAvgError;

use lazy_static::lazy_static;
use prometheus::{self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Task counter by outcome
    pub static ref TASKS: IntCounterVec = IntCounterVec::new(
        Opts::new("tasks", "The number of reduction tasks run"),
        &["outcome"]
    ).expect("valid metric definition");
    // Bytes read from chunk files, before decoding
    pub static ref CHUNK_BYTES_READ: IntCounter = IntCounter::new(
        "chunk_bytes_read", "The number of bytes read from chunk files"
    ).expect("valid metric definition");
    // Chunk files read
    pub static ref CHUNKS_READ: IntCounter = IntCounter::new(
        "chunks_read", "The number of chunk files read"
    ).expect("valid metric definition");
    // Task histogram by run time
    pub static ref TASK_TIME: Histogram = Histogram::with_opts(
        HistogramOpts::new("task_time", "The time taken to run each reduction task")
            .buckets(prometheus::DEFAULT_BUCKETS.to_vec()), // Change buckets here if desired
    ).expect("valid metric definition");
}

/// Register all metrics with the registry.
pub fn register_metrics() -> Result<(), PulseAvgError> {
    REGISTRY.register(Box::new(TASKS.clone()))?;
    REGISTRY.register(Box::new(CHUNK_BYTES_READ.clone()))?;
    REGISTRY.register(Box::new(CHUNKS_READ.clone()))?;
    REGISTRY.register(Box::new(TASK_TIME.clone()))?;
    Ok(())
}

/// Render the registered metrics in the Prometheus text format.
pub fn render() -> Result<String, PulseAvgError> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Record the outcome of a task.
pub fn record_task<T>(result: &Result<T, PulseAvgError>, seconds: f64) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    TASKS.with_label_values(&[outcome]).inc();
    TASK_TIME.observe(seconds);
}
