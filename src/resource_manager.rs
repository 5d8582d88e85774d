//! Resource management

use crate::error::PulseAvgError;

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Memory permits are counted in KiB, so that one task may hold up to `u32::MAX` KiB.
const MEMORY_UNIT: usize = 1024;

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate various resources
/// to tasks. Resource management is performed using a Tokio Semaphore for each type of resource.
///
/// Permits are owned, so that they can be held by spawned tasks.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for memory (KiB).
    memory: Option<Arc<Semaphore>>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,

    /// Optional semaphore for tasks.
    tasks: Option<Arc<Semaphore>>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(memory_limit: Option<usize>, task_limit: Option<usize>) -> Self {
        Self {
            memory: memory_limit.map(|bytes| Arc::new(Semaphore::new(bytes / MEMORY_UNIT))),
            total_memory: memory_limit,
            tasks: task_limit.map(|tasks| Arc::new(Semaphore::new(tasks))),
        }
    }

    /// Acquire memory resource.
    pub async fn memory(
        &self,
        bytes: usize,
    ) -> Result<Option<OwnedSemaphorePermit>, PulseAvgError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(PulseAvgError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        // Round down, so that a task never needs more units than the pool holds.
        optional_acquire(&self.memory, bytes / MEMORY_UNIT).await
    }

    /// Acquire a task resource.
    pub async fn task(&self) -> Result<Option<OwnedSemaphorePermit>, PulseAvgError> {
        optional_acquire(&self.tasks, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Arc<Semaphore>>,
    n: usize,
) -> Result<Option<OwnedSemaphorePermit>, PulseAvgError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.clone()
            .acquire_many_owned(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
