use txqueue_core::error::EngineError;

/// Handle for a single background loop that can be shut down gracefully
pub struct WorkerHandle {
    pub name: String,
    pub join_handle: tokio::task::JoinHandle<Result<(), EngineError>>,
    pub shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl WorkerHandle {
    /// Shutdown this worker gracefully
    pub async fn shutdown(self) -> Result<(), EngineError> {
        tracing::info!(worker = self.name, "Initiating graceful shutdown of worker");

        if self.shutdown_tx.send(()).is_err() {
            tracing::warn!(worker = self.name, "Worker was already shutting down");
        }

        match self.join_handle.await {
            Ok(Ok(())) => {
                tracing::info!(worker = self.name, "Worker shut down gracefully");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(worker = self.name, error = ?e, "Worker shut down with error");
                Err(e)
            }
            Err(e) => {
                tracing::error!(worker = self.name, error = ?e, "Worker task panicked during shutdown");
                Err(EngineError::InternalError {
                    message: format!("Worker panic: {e}"),
                })
            }
        }
    }
}

/// Handle for coordinating shutdown of multiple workers
#[derive(Default)]
pub struct ShutdownHandle {
    workers: Vec<WorkerHandle>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(&mut self, worker: WorkerHandle) {
        self.workers.push(worker);
    }

    /// Builder-style method to add a worker
    pub fn and_worker(mut self, worker: WorkerHandle) -> Self {
        self.add_worker(worker);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker first, then waits for all of them.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        let worker_count = self.workers.len();
        tracing::info!("Initiating graceful shutdown of {} workers", worker_count);

        let mut join_handles = Vec::with_capacity(worker_count);
        let mut names = Vec::with_capacity(worker_count);
        for worker in self.workers {
            if worker.shutdown_tx.send(()).is_err() {
                tracing::warn!(worker = worker.name, "Worker was already shutting down");
            }
            names.push(worker.name);
            join_handles.push(worker.join_handle);
        }

        let results = futures::future::join_all(join_handles).await;
        let mut first_error = None;

        for (name, result) in names.iter().zip(results) {
            let error = match result {
                Ok(Ok(())) => {
                    tracing::debug!(worker = name, "Worker shut down gracefully");
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) => EngineError::InternalError {
                    message: format!("Worker {name} panic: {e}"),
                },
            };
            tracing::error!(worker = name, error = ?error, "Worker had an error during shutdown");
            first_error.get_or_insert(error);
        }

        match first_error {
            None => {
                tracing::info!("All {} workers shut down gracefully", worker_count);
                Ok(())
            }
            Some(error) => Err(error),
        }
    }
}
