//! Local worker cluster
//!
//! A [Cluster] provisions worker "jobs" the way a batch scheduler would, each job contributing a
//! number of worker processes, cores and memory. Workers are threads of a single rayon pool. A
//! [Client] evaluates [LazyArray]s on the cluster.

use crate::error::PulseAvgError;
use crate::lazy::{LazyArray, ModuleMean};
use crate::metrics;
use crate::operations::PartialSum;
use crate::resource_manager::ResourceManager;

use byte_unit::Byte;
use ndarray::{Array3, ArrayD};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_rayon::AsyncThreadPool;
use tracing::{debug, info};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Resources requested for each job.
#[derive(Clone, Debug, PartialEq, Eq, Validate)]
#[validate(schema(function = "validate_cluster_config"))]
pub struct ClusterConfig {
    /// Name of the queue jobs are submitted to
    #[validate(length(min = 1, message = "queue must not be empty"))]
    pub queue: String,
    /// Number of jobs
    #[validate(range(min = 1, message = "jobs must be greater than 0"))]
    pub jobs: usize,
    /// Worker processes per job
    #[validate(range(min = 1, message = "processes must be greater than 0"))]
    pub processes: usize,
    /// Cores per job
    #[validate(range(min = 1, message = "cores must be greater than 0"))]
    pub cores: usize,
    /// Memory per job in bytes
    #[validate(range(min = 1, message = "memory must be greater than 0"))]
    pub memory: usize,
}

impl ClusterConfig {
    /// Parse a human readable memory size such as `"4 GiB"` into bytes.
    pub fn parse_memory(memory: &str) -> Result<usize, PulseAvgError> {
        let bytes = Byte::parse_str(memory, /* ignore case */ true)?.as_u64();
        Ok(usize::try_from(bytes)?)
    }

    /// A single job using all cores of this machine.
    pub fn local() -> Self {
        let cores = num_cpus::get();
        Self {
            queue: "local".to_string(),
            jobs: 1,
            processes: cores,
            cores,
            memory: 4 << 30,
        }
    }
}

/// Validate that each worker process has at least one core
fn validate_cluster_config(config: &ClusterConfig) -> Result<(), ValidationError> {
    if config.cores < config.processes {
        let mut error = ValidationError::new("Each worker process needs at least one core");
        error.add_param("cores".into(), &config.cores);
        error.add_param("processes".into(), &config.processes);
        return Err(error);
    }
    Ok(())
}

/// Total memory of `jobs` jobs with `memory` bytes each.
fn total_memory(jobs: usize, memory: usize) -> Result<usize, PulseAvgError> {
    jobs.checked_mul(memory)
        .ok_or(PulseAvgError::MemoryOverflow { jobs, memory })
}

/// A job providing workers to the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// Job identifier
    pub id: Uuid,
    /// Queue the job was submitted to
    pub queue: String,
    /// Worker processes of the job
    pub processes: usize,
}

/// Workers and resource limits of a provisioned cluster.
#[derive(Debug)]
struct Workers {
    pool: Arc<rayon::ThreadPool>,
    resource_manager: Arc<ResourceManager>,
}

/// A cluster of local workers.
#[derive(Debug)]
pub struct Cluster {
    config: ClusterConfig,
    jobs: Vec<Job>,
    workers: Option<Workers>,
}

impl Cluster {
    /// Provision a cluster with `config.jobs` jobs.
    pub fn provision(config: ClusterConfig) -> Result<Self, PulseAvgError> {
        config.validate()?;
        let jobs = config.jobs;
        let mut cluster = Self {
            config,
            jobs: vec![],
            workers: None,
        };
        cluster.scale(jobs)?;
        Ok(cluster)
    }

    /// Scale the cluster to `jobs` jobs.
    ///
    /// Workers are restarted with the new job count.
    pub fn scale(&mut self, jobs: usize) -> Result<(), PulseAvgError> {
        if jobs == 0 {
            return Err(PulseAvgError::ZeroParameter { name: "jobs" });
        }
        let memory = total_memory(jobs, self.config.memory)?;
        self.jobs.truncate(jobs);
        while self.jobs.len() < jobs {
            let job = Job {
                id: Uuid::new_v4(),
                queue: self.config.queue.clone(),
                processes: self.config.processes,
            };
            debug!("Submitted job {} to queue {}", job.id, job.queue);
            self.jobs.push(job);
        }
        let workers = self.workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("pulseavg-worker-{}", index))
            .build()?;
        let resource_manager = ResourceManager::new(Some(memory), Some(workers));
        self.workers = Some(Workers {
            pool: Arc::new(pool),
            resource_manager: Arc::new(resource_manager),
        });
        info!(
            "Cluster scaled to {} jobs with {} workers on queue {}",
            jobs, workers, self.config.queue
        );
        Ok(())
    }

    /// Number of worker processes.
    pub fn workers(&self) -> usize {
        self.jobs.iter().map(|job| job.processes).sum()
    }

    /// Jobs of the cluster.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Total memory of the cluster in bytes.
    pub fn memory(&self) -> usize {
        // Checked when the cluster was scaled.
        self.jobs.len().saturating_mul(self.config.memory)
    }

    /// Whether the cluster has been closed.
    pub fn is_closed(&self) -> bool {
        self.workers.is_none()
    }

    /// Returns a client for running computations on the cluster.
    pub fn client(&self) -> Result<Client<'_>, PulseAvgError> {
        if self.is_closed() {
            return Err(PulseAvgError::ClusterClosed);
        }
        Ok(Client { cluster: self })
    }

    /// Release all workers.
    ///
    /// Computations already running keep their workers until they complete.
    pub fn close(&mut self) {
        if self.workers.take().is_some() {
            info!("Released {} jobs", self.jobs.len());
        }
        self.jobs.clear();
    }
}

/// Client evaluating lazy arrays on a cluster.
#[derive(Debug)]
pub struct Client<'a> {
    cluster: &'a Cluster,
}

impl Client<'_> {
    /// Evaluate a lazy array.
    ///
    /// Tasks of all modules are scheduled together. The first failing task aborts the
    /// computation. Evaluating a concrete array returns a copy of it.
    #[tracing::instrument(level = "DEBUG", skip_all)]
    pub async fn compute(&self, array: &LazyArray) -> Result<ArrayD<f32>, PulseAvgError> {
        if let LazyArray::Concrete(array) = array {
            return Ok(array.clone());
        }
        let workers = self
            .cluster
            .workers
            .as_ref()
            .ok_or(PulseAvgError::ClusterClosed)?;
        let means = array.module_means();
        let mut tasks = JoinSet::new();
        let mut partials = Vec::with_capacity(means.len());
        for (module, mean) in means.iter().enumerate() {
            let ranges = mean.tasks();
            partials.push(vec![None; ranges.len()]);
            for (task, frames) in ranges.into_iter().enumerate() {
                tasks.spawn(run_task(
                    TaskId { module, task },
                    (*mean).clone(),
                    frames,
                    workers.pool.clone(),
                    workers.resource_manager.clone(),
                ));
            }
        }
        info!(
            "Computing {} modules in {} tasks on {} workers",
            means.len(),
            tasks.len(),
            self.cluster.workers()
        );
        while let Some(joined) = tasks.join_next().await {
            let (id, partial) = joined??;
            partials[id.module][id.task] = Some(partial);
        }
        let results = partials
            .into_iter()
            .zip(&means)
            .map(|(partials, mean)| -> Result<Array3<f32>, PulseAvgError> {
                let result = merge_in_task_order(partials)?;
                debug!("Finished {} over {} trains", mean.name(), mean.trains());
                Ok(result)
            })
            .collect::<Result<Vec<_>, _>>()?;
        array.assemble(&mut results.into_iter())
    }
}

/// Position of a task within a computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TaskId {
    /// Index of the module mean
    module: usize,
    /// Index of the task within the module
    task: usize,
}

/// Merge the partial sums of one module in task order and finish the mean.
///
/// Tasks complete in any order, but f32 addition is not associative, so the merge order is fixed
/// to keep results reproducible.
fn merge_in_task_order(partials: Vec<Option<PartialSum>>) -> Result<Array3<f32>, PulseAvgError> {
    let mut partials = partials.into_iter();
    let mut total = partials
        .next()
        .flatten()
        .ok_or(PulseAvgError::ZeroParameter { name: "trains" })?;
    for partial in partials {
        let partial = partial.ok_or(PulseAvgError::ZeroParameter { name: "trains" })?;
        total.merge(&partial)?;
    }
    total.finish()
}

/// Run one task of a module on the worker pool.
async fn run_task(
    id: TaskId,
    mean: ModuleMean,
    frames: Range<usize>,
    pool: Arc<rayon::ThreadPool>,
    resource_manager: Arc<ResourceManager>,
) -> Result<(TaskId, PartialSum), PulseAvgError> {
    let _task_permit = resource_manager.task().await?;
    let _memory_permit = resource_manager.memory(mean.task_memory(&frames)).await?;
    let partial = pool
        .spawn_async(move || {
            let start = Instant::now();
            let result = mean.run_task(frames);
            metrics::record_task(&result, start.elapsed().as_secs_f64());
            result
        })
        .await?;
    Ok((id, partial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DataSource, MemorySource, SourceLayout};

    use ndarray::{array, Array, Array4, Axis};

    fn config(jobs: usize) -> ClusterConfig {
        ClusterConfig {
            queue: "exfel".to_string(),
            jobs,
            processes: 2,
            cores: 4,
            memory: 1 << 20,
        }
    }

    fn source_with_modules(modules: usize, frames: usize) -> Arc<dyn DataSource> {
        let mut source = MemorySource::new();
        for module in 0..modules {
            let data = Array::from_iter((1..=frames).map(|v| (v + 100 * module) as u32))
                .into_shape((frames, 1, 1, 1))
                .unwrap();
            source
                .insert(
                    &format!("DET/{}CH0:xtdf", module),
                    data.view(),
                    &SourceLayout::regular(frames, 2, 4),
                )
                .unwrap();
        }
        Arc::new(source)
    }

    #[test]
    fn parse_memory() {
        assert_eq!(4 << 30, ClusterConfig::parse_memory("4 GiB").unwrap());
        assert_eq!(256_000_000_000, ClusterConfig::parse_memory("256GB").unwrap());
        assert!(matches!(
            ClusterConfig::parse_memory("lots"),
            Err(PulseAvgError::InvalidMemorySize(_))
        ));
    }

    #[test]
    fn config_validation() {
        config(1).validate().unwrap();
        ClusterConfig::local().validate().unwrap();
        let mut invalid = config(1);
        invalid.queue = "".to_string();
        assert!(invalid.validate().is_err());
        let mut invalid = config(1);
        invalid.cores = 1;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn provision_and_scale() {
        let mut cluster = Cluster::provision(config(2)).unwrap();
        assert_eq!(2, cluster.jobs().len());
        assert_eq!(4, cluster.workers());
        assert_eq!(2 << 20, cluster.memory());
        assert_ne!(cluster.jobs()[0].id, cluster.jobs()[1].id);
        let first = cluster.jobs()[0].id;
        cluster.scale(3).unwrap();
        assert_eq!(6, cluster.workers());
        assert_eq!(first, cluster.jobs()[0].id);
        cluster.scale(1).unwrap();
        assert_eq!(2, cluster.workers());
        assert!(matches!(
            cluster.scale(0),
            Err(PulseAvgError::ZeroParameter { name: "jobs" })
        ));
    }

    #[test]
    fn provision_invalid() {
        assert!(matches!(
            Cluster::provision(config(0)),
            Err(PulseAvgError::Validation(_))
        ));
    }

    #[test]
    fn closed_cluster() {
        let mut cluster = Cluster::provision(config(1)).unwrap();
        cluster.close();
        assert!(cluster.is_closed());
        assert_eq!(0, cluster.workers());
        assert!(matches!(cluster.client(), Err(PulseAvgError::ClusterClosed)));
    }

    #[tokio::test]
    async fn compute_module_mean() {
        let cluster = Cluster::provision(config(1)).unwrap();
        let client = cluster.client().unwrap();
        let source = source_with_modules(1, 8);
        let mean = ModuleMean::new(source, "DET/0CH0:xtdf", 2, 1).unwrap();
        let result = client.compute(&LazyArray::ModuleMean(mean)).await.unwrap();
        assert_eq!(array![[[4.0_f32]], [[5.0]]].into_dyn(), result);
    }

    #[tokio::test]
    async fn compute_stack_preserves_module_order() {
        let cluster = Cluster::provision(config(2)).unwrap();
        let client = cluster.client().unwrap();
        let source = source_with_modules(4, 8);
        let means = (0..4)
            .map(|module| {
                ModuleMean::new(source.clone(), &format!("DET/{}CH0:xtdf", module), 2, 1)
                    .map(LazyArray::ModuleMean)
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let stacked = LazyArray::stack(means.clone()).unwrap();
        let result = client.compute(&stacked).await.unwrap();
        assert_eq!(vec![4, 2, 1, 1], result.shape());
        for (module, mean) in means.iter().enumerate() {
            let single = client.compute(mean).await.unwrap();
            assert_eq!(single, result.index_axis(Axis(0), module));
            let expected = 4.0 + 100.0 * module as f32;
            assert_eq!(expected, result[[module, 0, 0, 0]]);
        }
    }

    #[tokio::test]
    async fn compute_independent_of_task_size() {
        let cluster = Cluster::provision(config(1)).unwrap();
        let client = cluster.client().unwrap();
        let data = Array4::from_shape_fn((24, 1, 3, 2), |(f, _, r, c)| {
            ((f * 13 + r * 5 + c * 3) % 17) as u16
        });
        let mut source = MemorySource::new();
        source
            .insert("DET/0CH0:xtdf", data.view(), &SourceLayout::regular(24, 4, 5))
            .unwrap();
        let source: Arc<dyn DataSource> = Arc::new(source);
        let mut results = vec![];
        for trains_per_task in [1, 2, 4, 6] {
            let mean = ModuleMean::new(source.clone(), "DET/0CH0:xtdf", 4, trains_per_task)
                .unwrap();
            results.push(client.compute(&LazyArray::ModuleMean(mean)).await.unwrap());
        }
        for result in &results[1..] {
            assert_eq!(results[0], *result);
        }
    }

    #[tokio::test]
    async fn compute_concrete_is_idempotent() {
        let cluster = Cluster::provision(config(1)).unwrap();
        let client = cluster.client().unwrap();
        let mean = ModuleMean::new(source_with_modules(1, 8), "DET/0CH0:xtdf", 2, 1).unwrap();
        let first = client.compute(&LazyArray::ModuleMean(mean)).await.unwrap();
        let concrete = LazyArray::from(first.clone());
        let second = client.compute(&concrete).await.unwrap();
        let third = client.compute(&concrete).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn compute_task_failure_aborts() {
        let cluster = Cluster::provision(config(1)).unwrap();
        let client = cluster.client().unwrap();
        let dir = crate::test_utils::temp_dir();
        let writer = crate::source::RunWriter::create(&dir).unwrap();
        let data = Array4::<u16>::zeros((8, 1, 1, 1));
        writer
            .write_source("DET/0CH0:xtdf", data.view(), &SourceLayout::regular(8, 2, 2))
            .unwrap();
        std::fs::remove_file(dir.path().join("DET_0CH0_xtdf").join("chunk-00003.bin")).unwrap();
        let run: Arc<dyn DataSource> =
            Arc::new(crate::source::RunDirectory::open(&dir).unwrap());
        let mean = ModuleMean::new(run, "DET/0CH0:xtdf", 2, 1).unwrap();
        let result = client.compute(&LazyArray::ModuleMean(mean)).await;
        assert!(matches!(result, Err(PulseAvgError::Io { .. })));
    }

    #[tokio::test]
    async fn compute_task_exceeding_memory() {
        let mut small = config(1);
        small.memory = 8;
        let cluster = Cluster::provision(small).unwrap();
        let client = cluster.client().unwrap();
        let mean = ModuleMean::new(source_with_modules(1, 8), "DET/0CH0:xtdf", 2, 4).unwrap();
        let result = client.compute(&LazyArray::ModuleMean(mean)).await;
        assert!(matches!(
            result,
            Err(PulseAvgError::InsufficientMemory { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn compute_is_reproducible_for_float_data() {
        let mut wide = config(1);
        wide.processes = 8;
        wide.cores = 8;
        let cluster = Cluster::provision(wide).unwrap();
        let client = cluster.client().unwrap();
        let data = Array::from_iter((0..400_usize).map(|i| {
            let scale = 10_f32.powi((i % 7) as i32 - 3);
            ((i * 7919) % 1000) as f32 * scale + 0.1
        }))
        .into_shape((400, 1, 1, 1))
        .unwrap();
        let mut source = MemorySource::new();
        source
            .insert("DET/0CH0:xtdf", data.view(), &SourceLayout::regular(400, 1, 16))
            .unwrap();
        let source: Arc<dyn DataSource> = Arc::new(source);
        let mean = LazyArray::ModuleMean(ModuleMean::new(source, "DET/0CH0:xtdf", 1, 1).unwrap());
        let first = client.compute(&mean).await.unwrap();
        for _ in 0..10 {
            assert_eq!(first, client.compute(&mean).await.unwrap());
        }
    }

    #[test]
    fn merge_follows_task_order() {
        let partial = |value: f32| PartialSum {
            sum: Array3::from_elem((1, 1, 1), value),
            trains: 1,
        };
        let values = [1.0e8_f32, 1.0, -1.0e8, 0.5];
        let merged =
            merge_in_task_order(values.iter().map(|v| Some(partial(*v))).collect()).unwrap();
        let expected = values.iter().fold(0.0_f32, |acc, v| acc + v) / 4.0;
        assert_eq!(expected, merged[[0, 0, 0]]);
    }

    #[test]
    fn merge_missing_task() {
        let partial = PartialSum {
            sum: Array3::zeros((1, 1, 1)),
            trains: 1,
        };
        assert!(merge_in_task_order(vec![Some(partial), None]).is_err());
        assert!(merge_in_task_order(vec![]).is_err());
    }

    #[test]
    fn provision_memory_overflow() {
        let mut huge = config(2);
        huge.memory = ClusterConfig::parse_memory("10 EiB").unwrap();
        match Cluster::provision(huge).unwrap_err() {
            PulseAvgError::MemoryOverflow { jobs, .. } => assert_eq!(2, jobs),
            err => panic!("unexpected error {}", err),
        }
        let mut cluster = Cluster::provision(config(1)).unwrap();
        assert!(matches!(
            cluster.scale(usize::MAX),
            Err(PulseAvgError::MemoryOverflow { .. })
        ));
        assert_eq!(1, cluster.jobs().len());
    }
}
