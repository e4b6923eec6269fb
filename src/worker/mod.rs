use rayon::ThreadPool;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Bounded thread pool for synchronous handler code.
///
/// The request path is cooperatively scheduled; handlers that block (CPU
/// work, sync IO) run here instead, so they never stall the async workers.
/// Results come back through a oneshot channel.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl WorkerPool {
    /// Create a pool with a fixed number of worker threads.
    ///
    /// # Panics
    /// Panics if the pool cannot be built; pool construction only happens at
    /// bootstrap.
    pub fn new(num_threads: usize) -> Self {
        debug!(threads = num_threads, "starting worker pool");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("trellis-worker-{index}"))
            .build()
            .expect("failed to build worker thread pool");
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Run a blocking task on the pool and await its result.
    pub async fn execute<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let result = f();
            let _ = tx.send(result);
        });

        rx.await.expect("worker task panicked")
    }
}
