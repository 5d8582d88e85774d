//! This crate computes per-pulse averages of large pixel-detector runs. Each detector module
//! records a stream of frames grouped into trains of a fixed number of pulses. The average over
//! all trains is computed for every pulse and pixel of every module, and the modules are stacked
//! into a single (module, pulse, row, column) array.
//!
//! Runs are far larger than memory, so averages are described lazily and evaluated on a local
//! worker cluster, which reduces train-aligned blocks of frames in parallel and merges the
//! partial sums.
//!
//! The crate is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime, schedules tasks and bounds the
//!   resources they use.
//! * [Rayon](rayon) runs the CPU-bound reductions on a thread pool, bridged to Tokio by
//!   [tokio_rayon].
//! * [Serde](serde) performs (de)serialisation of source metadata, checked by [validator].
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used in numerical
//!   computation.

pub mod app;
pub mod array;
pub mod average;
pub mod cli;
pub mod cluster;
pub mod compression;
pub mod error;
pub mod filter_pipeline;
pub mod filters;
pub mod lazy;
pub mod metrics;
pub mod models;
pub mod operation;
pub mod operations;
pub mod report;
pub mod resource_manager;
pub mod source;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
