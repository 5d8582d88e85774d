//! Command Line Interface (CLI) arguments.

use crate::average::{
    AverageOptions, DEFAULT_MODULES, DEFAULT_PULSES_PER_TRAIN, DEFAULT_TRAINS_PER_TASK,
};
use crate::cluster::ClusterConfig;
use crate::error::PulseAvgError;
use crate::source::{RunLocator, DEFAULT_SOURCE_PATTERN};

use clap::Parser;
use std::path::PathBuf;

/// Per-pulse averaging command line interface
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Root directory holding proposal directories
    #[arg(long, default_value = "/gpfs/exfel/exp/SPB/202202", env = "PULSEAVG_DATA_ROOT")]
    pub data_root: String,
    /// Proposal number
    #[arg(long, default_value_t = 3104, env = "PULSEAVG_PROPOSAL")]
    pub proposal: u32,
    /// Run number
    #[arg(long, default_value_t = 1, env = "PULSEAVG_RUN")]
    pub run: u32,
    /// Path of the run directory, overriding the data root, proposal and run
    #[arg(long, env = "PULSEAVG_RUN_DIR")]
    pub run_dir: Option<String>,
    /// Source name pattern, where `{module}` is replaced by the module index
    #[arg(long, default_value = DEFAULT_SOURCE_PATTERN, env = "PULSEAVG_SOURCE_PATTERN")]
    pub source_pattern: String,
    /// Number of detector modules
    #[arg(long, default_value_t = DEFAULT_MODULES, env = "PULSEAVG_MODULES")]
    pub modules: usize,
    /// Number of frames per train
    #[arg(long, default_value_t = DEFAULT_PULSES_PER_TRAIN, env = "PULSEAVG_PULSES_PER_TRAIN")]
    pub pulses_per_train: usize,
    /// Number of trains reduced by each task
    #[arg(long, default_value_t = DEFAULT_TRAINS_PER_TASK, env = "PULSEAVG_TRAINS_PER_TASK")]
    pub trains_per_task: usize,
    /// Check the frame count of every train before computing
    #[arg(long, default_value_t = false, env = "PULSEAVG_VALIDATE_TRAINS")]
    pub validate_trains: bool,
    /// Queue that worker jobs are submitted to
    #[arg(long, default_value = "exfel", env = "PULSEAVG_QUEUE")]
    pub queue: String,
    /// Number of worker jobs
    #[arg(long, default_value_t = 1, env = "PULSEAVG_JOBS")]
    pub jobs: usize,
    /// Worker processes per job
    #[arg(long, default_value_t = 4, env = "PULSEAVG_PROCESSES")]
    pub processes: usize,
    /// Cores per job
    #[arg(long, default_value_t = 4, env = "PULSEAVG_CORES")]
    pub cores: usize,
    /// Memory per job, e.g. "4 GiB"
    #[arg(long, default_value = "4 GiB", env = "PULSEAVG_MEMORY")]
    pub memory: String,
    /// Print Prometheus metrics after computing
    #[arg(long, default_value_t = false, env = "PULSEAVG_METRICS")]
    pub metrics: bool,
    /// Write a synthetic run with this many trains to the run directory before computing
    #[arg(long, env = "PULSEAVG_GENERATE_SYNTHETIC", requires = "run_dir")]
    pub generate_synthetic: Option<usize>,
}

impl CommandLineArgs {
    /// Path of the run directory, with `~` expanded.
    pub fn run_path(&self) -> Result<PathBuf, PulseAvgError> {
        let expand = |path: &str| {
            expanduser::expanduser(path).map_err(|err| PulseAvgError::io(path, err))
        };
        match &self.run_dir {
            Some(run_dir) => expand(run_dir),
            None => Ok(RunLocator {
                data_root: expand(&self.data_root)?,
                proposal: self.proposal,
                run: self.run,
            }
            .path()),
        }
    }

    /// Cluster configuration requested on the command line.
    pub fn cluster_config(&self) -> Result<ClusterConfig, PulseAvgError> {
        Ok(ClusterConfig {
            queue: self.queue.clone(),
            jobs: self.jobs,
            processes: self.processes,
            cores: self.cores,
            memory: ClusterConfig::parse_memory(&self.memory)?,
        })
    }

    /// Averaging options requested on the command line.
    pub fn average_options(&self) -> AverageOptions {
        AverageOptions {
            pulses_per_train: self.pulses_per_train,
            trains_per_task: self.trains_per_task,
            validate_trains: self.validate_trains,
        }
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
