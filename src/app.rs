//! Top level application flow of the `pulseavg` binary.

use crate::average;
use crate::cli::CommandLineArgs;
use crate::cluster::Cluster;
use crate::error::PulseAvgError;
use crate::metrics;
use crate::report;
use crate::source::{self, DataSource, RunDirectory, RunWriter, SourceLayout};

use ndarray::Array4;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Pixel rows of a synthetic module.
const SYNTHETIC_ROWS: usize = 512;

/// Pixel columns of a synthetic module.
const SYNTHETIC_COLUMNS: usize = 128;

/// Trains stored in each chunk file of a synthetic run.
const SYNTHETIC_TRAINS_PER_CHUNK: usize = 4;

/// Run the per-pulse average described by the command line arguments.
///
/// Workers are provisioned before the run is opened and released once the result has been
/// printed, whether or not the computation succeeded.
pub async fn run(args: &CommandLineArgs) -> Result<(), PulseAvgError> {
    if args.metrics {
        metrics::register_metrics()?;
    }
    let path = args.run_path()?;
    if let Some(trains) = args.generate_synthetic {
        write_synthetic_run(&path, args, trains)?;
    }
    let mut cluster = Cluster::provision(args.cluster_config()?)?;
    let result = average_run(&cluster, &path, args).await;
    cluster.close();
    result?;
    if args.metrics {
        print!("{}", metrics::render()?);
    }
    Ok(())
}

/// Compute and print the stacked per-pulse average of a run.
async fn average_run(
    cluster: &Cluster,
    path: &Path,
    args: &CommandLineArgs,
) -> Result<(), PulseAvgError> {
    let run: Arc<dyn DataSource> = Arc::new(RunDirectory::open(path)?);
    let lazy = average::stacked_pulse_mean(
        &run,
        &args.source_pattern,
        args.modules,
        &args.average_options(),
    )?;
    info!("Averaging {} modules of {}", args.modules, path.display());
    let result = cluster.client()?.compute(&lazy).await?;
    println!("shape: {:?}", result.shape());
    for summary in report::summarise(&result) {
        println!("{}", summary);
    }
    println!("{}", result);
    Ok(())
}

/// Write a run of `trains` trains of deterministic frames for every module, a chunk at a time.
fn write_synthetic_run(
    path: &Path,
    args: &CommandLineArgs,
    trains: usize,
) -> Result<(), PulseAvgError> {
    if trains == 0 {
        return Err(PulseAvgError::ZeroParameter { name: "trains" });
    }
    let pulses = args.pulses_per_train;
    let frames = trains * pulses;
    let writer = RunWriter::create(path)?;
    let layout = SourceLayout::regular(frames, pulses, SYNTHETIC_TRAINS_PER_CHUNK * pulses);
    for module in 0..args.modules {
        let name = source::source_name(&args.source_pattern, module)?;
        let shape = [frames, 1, SYNTHETIC_ROWS, SYNTHETIC_COLUMNS];
        writer.write_generated_source(&name, shape, &layout, |range| {
            let first = range.start;
            Array4::from_shape_fn(
                (range.len(), 1, SYNTHETIC_ROWS, SYNTHETIC_COLUMNS),
                |(offset, _, row, column)| {
                    let frame = first + offset;
                    let (train, pulse) = (frame / pulses, frame % pulses);
                    ((module * 1000 + pulse * 10 + train % 7 + (row + column) % 5) % 4096) as u16
                },
            )
        })?;
    }
    info!(
        "Wrote synthetic run of {} trains for {} modules to {}",
        trains,
        args.modules,
        path.display()
    );
    Ok(())
}
