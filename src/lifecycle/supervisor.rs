use crate::error::{Result, SyncError};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

struct UnitEntry {
    path: PathBuf,
    abort: Option<AbortHandle>,
}

struct Shared {
    token: CancellationToken,
    workers: Arc<Semaphore>,
    units: Mutex<HashMap<u64, UnitEntry>>,
    next_id: AtomicU64,
    changed: Notify,
}

impl Shared {
    fn units(&self) -> MutexGuard<'_, HashMap<u64, UnitEntry>> {
        self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deregisters a unit when its future completes or is dropped by an abort
struct UnitGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.shared.units().remove(&self.id);
        self.shared.changed.notify_waiters();
    }
}

/// Spawns and tracks descent units for one run.
///
/// Cloned into every unit. Holds the run's cancellation token, the worker
/// limit, and a registry of live units that the root controller can
/// enumerate and abort.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                token: CancellationToken::new(),
                workers: Arc::new(Semaphore::new(max_workers.max(1))),
                units: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                changed: Notify::new(),
            }),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Ask every unit to stop at its next checkpoint
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Fail with `Cancelled` once cancellation has been requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait for a free worker slot, giving up on cancellation
    pub async fn acquire_worker(&self) -> Result<OwnedSemaphorePermit> {
        let workers = Arc::clone(&self.shared.workers);
        tokio::select! {
            _ = self.shared.token.cancelled() => Err(SyncError::Cancelled),
            permit = workers.acquire_owned() => {
                permit.map_err(|_| SyncError::Cancelled)
            }
        }
    }

    /// Spawn a unit for `path` and register it until it finishes
    pub fn spawn_unit<F, T>(&self, path: PathBuf, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = UnitGuard {
            shared: Arc::clone(&self.shared),
            id,
        };

        tracing::trace!("Spawning unit {} for {}", id, path.display());
        self.shared.units().insert(id, UnitEntry { path, abort: None });

        let handle = tokio::spawn(async move {
            let _guard = guard;
            future.await
        });

        // The unit may already have finished and removed itself
        if let Some(unit) = self.shared.units().get_mut(&id) {
            unit.abort = Some(handle.abort_handle());
        }
        handle
    }

    pub fn active_count(&self) -> usize {
        self.shared.units().len()
    }

    /// Source paths of every live unit
    pub fn active_units(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self
            .shared
            .units()
            .values()
            .map(|unit| unit.path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Wait until no unit is alive. Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active_count() == 0 {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.active_count() == 0;
            }
        }
    }

    /// Abort every live unit. Returns the paths that were aborted.
    pub fn abort_all(&self) -> Vec<PathBuf> {
        let drained: Vec<_> = self.shared.units().drain().map(|(_, unit)| unit).collect();
        let mut paths = Vec::with_capacity(drained.len());
        for unit in drained {
            if let Some(abort) = unit.abort {
                abort.abort();
            }
            paths.push(unit.path);
        }
        self.shared.changed.notify_waiters();
        paths.sort();
        paths
    }
}

/// Await a unit, mapping abort and panic into `SyncError`
pub async fn join_unit<T>(handle: JoinHandle<Result<T>>, path: &Path) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(SyncError::Cancelled),
        Err(e) => Err(SyncError::UnitFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_units_deregister_on_completion() {
        let supervisor = Supervisor::new(4);
        let handle = supervisor.spawn_unit(PathBuf::from("/a"), async { 7 });

        assert_eq!(handle.await.unwrap(), 7);
        assert!(supervisor.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_active_units_lists_running() {
        let supervisor = Supervisor::new(4);
        let token = supervisor.token();
        let handle = supervisor.spawn_unit(PathBuf::from("/src/x"), async move {
            token.cancelled().await;
        });

        assert_eq!(supervisor.active_units(), vec![PathBuf::from("/src/x")]);
        supervisor.cancel();
        handle.await.unwrap();
        assert!(supervisor.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out_then_abort() {
        let supervisor = Supervisor::new(4);
        let handle = supervisor.spawn_unit(PathBuf::from("/stuck"), async {
            std::future::pending::<()>().await;
        });

        assert!(!supervisor.wait_idle(Duration::from_millis(50)).await);
        assert_eq!(supervisor.abort_all(), vec![PathBuf::from("/stuck")]);
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_join_unit_maps_abort_to_cancelled() {
        let supervisor = Supervisor::new(1);
        let handle = supervisor.spawn_unit(PathBuf::from("/p"), async {
            std::future::pending::<Result<()>>().await
        });
        supervisor.abort_all();

        let result = join_unit(handle, Path::new("/p")).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_join_unit_maps_panic_to_unit_failed() {
        let supervisor = Supervisor::new(1);
        let handle = supervisor.spawn_unit(PathBuf::from("/boom"), async {
            if true {
                panic!("unit exploded");
            }
            Ok(())
        });

        let result = join_unit(handle, Path::new("/boom")).await;
        assert!(matches!(result, Err(SyncError::UnitFailed { .. })));
    }

    #[tokio::test]
    async fn test_acquire_worker_respects_cancel() {
        let supervisor = Supervisor::new(1);
        let _held = supervisor.acquire_worker().await.unwrap();

        supervisor.cancel();
        let second = supervisor.acquire_worker().await;
        assert!(matches!(second, Err(SyncError::Cancelled)));
        assert!(supervisor.checkpoint().is_err());
    }
}
