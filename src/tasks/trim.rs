//! Periodic Trim Task
//!
//! Background worker that applies a tier's configured limits on a fixed
//! interval. The worker runs on a caller-supplied tokio runtime and each pass
//! executes on its blocking pool, since both tiers take a blocking lock.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::disk::DiskCache;
use crate::memory::MemoryCache;

/// Shortest pause between passes; smaller configured intervals are raised to it.
pub const MIN_TRIM_INTERVAL: Duration = Duration::from_millis(10);

// == Auto Trim ==
/// A cache tier that can enforce its own limits.
pub trait AutoTrim: Send + Sync + 'static {
    /// Name used in log output.
    fn label(&self) -> &str;

    /// Time between trim passes.
    fn trim_interval(&self) -> Duration;

    /// Runs one pass and returns the number of evicted items.
    fn auto_trim(&self) -> usize;
}

impl<K, V> AutoTrim for MemoryCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn label(&self) -> &str {
        self.name().unwrap_or("memory")
    }

    fn trim_interval(&self) -> Duration {
        self.config().auto_trim_interval
    }

    fn auto_trim(&self) -> usize {
        self.trim()
    }
}

impl AutoTrim for DiskCache {
    fn label(&self) -> &str {
        "disk"
    }

    fn trim_interval(&self) -> Duration {
        self.config().auto_trim_interval
    }

    fn auto_trim(&self) -> usize {
        match self.trim() {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "disk trim pass failed");
                0
            }
        }
    }
}

// == Trim Worker ==
/// Handle to a running trim task.
///
/// Dropping the handle asks the task to stop after its current pass;
/// [`TrimWorker::shutdown`] also waits for it.
#[derive(Debug)]
pub struct TrimWorker {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl TrimWorker {
    /// Spawns a task on `runtime` that trims `target` every
    /// [`AutoTrim::trim_interval`], but never more often than
    /// [`MIN_TRIM_INTERVAL`].
    ///
    /// # Example
    /// ```ignore
    /// let memory = Arc::new(MemoryCache::<String, Vec<u8>>::new(config));
    /// let worker = TrimWorker::spawn(memory.clone(), &Handle::current());
    /// // Later, during shutdown:
    /// worker.shutdown().await;
    /// ```
    pub fn spawn<T>(target: Arc<T>, runtime: &Handle) -> Self
    where
        T: AutoTrim + ?Sized,
    {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();

        let handle = runtime.spawn(async move {
            info!(
                cache = target.label(),
                interval_ms = pass_interval(&*target).as_millis() as u64,
                "starting trim worker"
            );

            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(pass_interval(&*target)) => {}
                }

                let pass_target = target.clone();
                match tokio::task::spawn_blocking(move || pass_target.auto_trim()).await {
                    Ok(removed) if removed > 0 => {
                        info!(cache = target.label(), removed, "trim pass evicted entries");
                    }
                    Ok(_) => debug!(cache = target.label(), "trim pass: nothing to evict"),
                    Err(e) => warn!(cache = target.label(), error = %e, "trim pass aborted"),
                }
            }

            debug!(cache = target.label(), "trim worker stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops the task and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "trim worker ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

fn pass_interval<T: AutoTrim + ?Sized>(target: &T) -> Duration {
    target.trim_interval().max(MIN_TRIM_INTERVAL)
}

impl Drop for TrimWorker {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}
