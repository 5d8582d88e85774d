//! Summaries of computed averages.

use ndarray::{ArrayD, ArrayViewD, Axis};
use ndarray_stats::QuantileExt;
use std::fmt;

/// Statistics of the average of one module.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleSummary {
    /// Module index
    pub module: usize,
    /// Smallest value, ignoring NaN
    pub min: f32,
    /// Largest value, ignoring NaN
    pub max: f32,
    /// Mean over pulses and pixels
    pub mean: f32,
}

impl ModuleSummary {
    /// Summarise the average of one module.
    pub fn new(module: usize, average: ArrayViewD<f32>) -> Self {
        Self {
            module,
            min: *average.min_skipnan(),
            max: *average.max_skipnan(),
            mean: average.mean().unwrap_or(f32::NAN),
        }
    }
}

impl fmt::Display for ModuleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "module {:2}: min {:.3} max {:.3} mean {:.3}",
            self.module, self.min, self.max, self.mean
        )
    }
}

/// Summarise each module of a stacked (module, pulse, row, column) average.
///
/// An unstacked (pulse, row, column) average is summarised as module 0.
pub fn summarise(average: &ArrayD<f32>) -> Vec<ModuleSummary> {
    if average.ndim() < 4 {
        return vec![ModuleSummary::new(0, average.view())];
    }
    average
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(module, view)| ModuleSummary::new(module, view))
        .collect()
}
