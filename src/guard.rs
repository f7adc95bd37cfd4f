use {
    crate::{
        backend::{BackendError, LeaseBackend},
        directory::{LockDirectory, LockName},
        lock::{AcquireError, LeaseLock, ReleaseError, DEFAULT_LEASE_DURATION},
    },
    std::{future::Future, sync::Arc, time::Duration},
    thiserror::Error,
    tokio_util::sync::CancellationToken,
    tracing::{error, trace},
};

#[derive(Debug, Error)]
pub enum GuardError<E> {
    #[error("failed to resolve lock resource: {0}")]
    Resolve(#[source] BackendError),
    #[error("failed to acquire lock: {0}")]
    Acquire(#[source] AcquireError),
    #[error("failed to release lock: {0}")]
    Release(#[source] ReleaseError),
    #[error("guarded operation failed")]
    Operation(E),
}

///
/// Runs operations under an exclusive, lease-backed lock.
///
/// The guard is the boundary a request-interception layer calls into: it
/// resolves the lock name, acquires the lock, runs the guarded operation and
/// releases the lock on every path, success or failure.
///
pub struct ExclusionGuard<B> {
    directory: LockDirectory<B>,
    lease_duration: Duration,
}

impl<B> ExclusionGuard<B>
where
    B: LeaseBackend,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_directory(LockDirectory::new(backend))
    }

    pub fn with_directory(directory: LockDirectory<B>) -> Self {
        Self {
            directory,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    ///
    /// Run `op` while holding the exclusive lock named `name`.
    ///
    /// The lock is released on every path: after `op` completes, after `op`
    /// fails, and after a cancelled acquisition. An error from `op` is
    /// re-raised once the release is done. When `op` succeeded but the
    /// release itself failed, the release error is what surfaces — the
    /// operation's work is done at that point, so a caller that must know
    /// treats [`GuardError::Release`] as "completed, lease possibly leaked
    /// until it lapses".
    ///
    /// `cancel` only governs acquisition; release always runs to completion
    /// so the lease is given back even when the caller was cancelled.
    ///
    /// ```ignore
    /// let guard = ExclusionGuard::new(backend);
    /// let name = LockName::derive("Worker.ProcessQueue.Run", Some("order-42"));
    /// let processed = guard
    ///     .with_exclusive_access(&name, &CancellationToken::new(), || async {
    ///         process_queue().await
    ///     })
    ///     .await?;
    /// ```
    ///
    pub async fn with_exclusive_access<T, E, F, Fut>(
        &self,
        name: &LockName,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        trace!("invocation of {name} waiting for lock...");
        let resource = self
            .directory
            .resolve(name)
            .await
            .map_err(GuardError::Resolve)?;
        let mut lock = LeaseLock::with_lease_duration(
            Arc::clone(self.directory.backend()),
            resource,
            self.lease_duration,
        );
        if let Err(e) = lock.acquire(cancel).await {
            // Nothing was acquired, but the handle still goes through the
            // release path so its lifecycle ends in the one terminal state.
            let _ = lock.release(&CancellationToken::new()).await;
            return Err(GuardError::Acquire(e));
        }
        trace!("invocation of {name} entered lock");
        let outcome = op().await;
        let release_result = lock.release(&CancellationToken::new()).await;
        trace!("invocation of {name} released lock");
        match outcome {
            Ok(value) => match release_result {
                Ok(()) => Ok(value),
                Err(e) => Err(GuardError::Release(e)),
            },
            Err(op_err) => {
                if let Err(e) = release_result {
                    error!("failed to release lock {name} after a failed operation: {e}");
                }
                Err(GuardError::Operation(op_err))
            }
        }
    }
}
