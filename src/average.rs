//! Per-pulse averaging of detector modules.
//!
//! Builds lazy per-module means over trains and stacks them into a single
//! (module, pulse, row, column) array.

use crate::error::PulseAvgError;
use crate::lazy::{LazyArray, ModuleMean};
use crate::source::{self, DataSource};

use std::sync::Arc;
use tracing::debug;

/// Number of modules of the AGIPD 1M detector.
pub const DEFAULT_MODULES: usize = 16;

/// Number of pulses recorded per train.
pub const DEFAULT_PULSES_PER_TRAIN: usize = 64;

/// Number of trains reduced by each task.
pub const DEFAULT_TRAINS_PER_TASK: usize = 16;

/// Options of a per-pulse average.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AverageOptions {
    /// Number of consecutive frames forming one train
    pub pulses_per_train: usize,
    /// Number of trains reduced by each task
    pub trains_per_task: usize,
    /// Check the train index of each source
    pub validate_trains: bool,
}

impl Default for AverageOptions {
    fn default() -> Self {
        Self {
            pulses_per_train: DEFAULT_PULSES_PER_TRAIN,
            trains_per_task: DEFAULT_TRAINS_PER_TASK,
            validate_trains: false,
        }
    }
}

/// Lazy mean over trains of one module, per pulse and pixel.
///
/// Frames of shape (frames, 1, rows, columns) are regrouped as (trains, pulses, rows, columns)
/// and averaged over trains. No data is read until the result is computed.
///
/// # Arguments
///
/// * `source`: Data source of the run
/// * `pattern`: Source name pattern containing `{module}`
/// * `module`: Module index
/// * `options`: Averaging options
pub fn module_pulse_mean(
    source: &Arc<dyn DataSource>,
    pattern: &str,
    module: usize,
    options: &AverageOptions,
) -> Result<LazyArray, PulseAvgError> {
    let name = source::source_name(pattern, module)?;
    let mean = ModuleMean::new(
        source.clone(),
        &name,
        options.pulses_per_train,
        options.trains_per_task,
    )?;
    if options.validate_trains {
        mean.validate_trains()?;
    }
    debug!(
        "Module {} ({}) has {} trains of shape {:?}",
        module,
        name,
        mean.trains(),
        mean.shape()
    );
    Ok(LazyArray::ModuleMean(mean))
}

/// Stack arrays along a new leading axis, preserving their order.
pub fn stack(arrays: Vec<LazyArray>) -> Result<LazyArray, PulseAvgError> {
    LazyArray::stack(arrays)
}

/// Lazy per-pulse means of modules `0..modules`, stacked in module order.
pub fn stacked_pulse_mean(
    source: &Arc<dyn DataSource>,
    pattern: &str,
    modules: usize,
    options: &AverageOptions,
) -> Result<LazyArray, PulseAvgError> {
    let means = (0..modules)
        .map(|module| module_pulse_mean(source, pattern, module, options))
        .collect::<Result<Vec<_>, _>>()?;
    stack(means)
}
