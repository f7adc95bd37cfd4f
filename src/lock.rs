use {
    crate::{
        backend::{AcquireOutcome, BackendError, LeaseBackend, LeaseToken, ResourceId},
        retry::ExponentialBackoff,
    },
    core::fmt,
    std::{sync::Arc, time::Duration},
    thiserror::Error,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{info, trace, warn},
};

///
/// Lease duration requested on every acquisition attempt.
///
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Delay between two renewals while the last one succeeded.
const RENEW_DELAY: Duration = Duration::from_secs(30);

/// Delay before retrying after a failed renewal, well inside the lease
/// duration so a few failures in a row do not lose the lease.
const RENEW_RETRY_DELAY: Duration = Duration::from_secs(1);

///
/// Lifecycle of a [`LeaseLock`].
///
/// `Held` is the only state in which the caller's critical section may run.
/// `Released` is terminal: a lock object is single-use and never goes back to
/// `Acquiring` once it has been released.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    Acquiring,
    Held,
    Releasing,
    Released,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Acquiring => f.write_str("Acquiring"),
            Self::Held => f.write_str("Held"),
            Self::Releasing => f.write_str("Releasing"),
            Self::Released => f.write_str("Released"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("acquisition cancelled before a lease was taken")]
    Cancelled,
    #[error("lock is {0}, it can only be acquired once from Idle")]
    InvalidState(LockState),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("release cancelled before the backend confirmed it")]
    Cancelled,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

struct RenewalTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

///
/// Single-use distributed lock over one named resource.
///
/// `acquire` retries against backend conflicts with capped, jittered
/// exponential backoff until it owns the lease or the cancellation token
/// fires. While the lock is `Held` a background task renews the lease so the
/// critical section can run for longer than the lease duration. `release`
/// tears the renewal task down first, then gives the lease back.
///
/// The renewal task is exclusively owned by the lock: nobody else can renew
/// or release on its behalf, and it is always stopped before the lock leaves
/// the `Held` state.
///
pub struct LeaseLock<B> {
    backend: Arc<B>,
    resource: ResourceId,
    lease_duration: Duration,
    state: LockState,
    token: Option<LeaseToken>,
    backoff: ExponentialBackoff,
    renewal: Option<RenewalTask>,
}

impl<B> LeaseLock<B>
where
    B: LeaseBackend,
{
    pub fn new(backend: Arc<B>, resource: ResourceId) -> Self {
        Self::with_lease_duration(backend, resource, DEFAULT_LEASE_DURATION)
    }

    pub fn with_lease_duration(
        backend: Arc<B>,
        resource: ResourceId,
        lease_duration: Duration,
    ) -> Self {
        Self {
            backend,
            resource,
            lease_duration,
            state: LockState::Idle,
            token: None,
            backoff: ExponentialBackoff::new(),
            renewal: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn is_held(&self) -> bool {
        self.state == LockState::Held
    }

    ///
    /// Token of the currently held lease, if any.
    ///
    pub fn lease_token(&self) -> Option<&LeaseToken> {
        self.token.as_ref()
    }

    ///
    /// Acquire the exclusive lease on this lock's resource.
    ///
    /// Contention is an expected outcome and is retried with backoff; any
    /// other backend failure aborts the attempt and surfaces to the caller.
    /// Cancelling aborts the retry loop without side effects. On success the
    /// renewal task is already running when this returns.
    ///
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<(), AcquireError> {
        match self.state {
            LockState::Idle => {}
            state => return Err(AcquireError::InvalidState(state)),
        }
        self.state = LockState::Acquiring;
        trace!("trying to acquire lease on {}...", self.resource);
        while !cancel.is_cancelled() {
            match self
                .backend
                .acquire_lease(&self.resource, self.lease_duration)
                .await
            {
                Ok(AcquireOutcome::Acquired(token)) if !token.is_empty() => {
                    info!("acquired lease {token} on {}", self.resource);
                    self.spawn_renewal(token.clone(), cancel);
                    self.token = Some(token);
                    self.state = LockState::Held;
                    return Ok(());
                }
                // An empty token means the backend did not actually hand the
                // lease over, same as a conflict.
                Ok(AcquireOutcome::Acquired(_)) | Ok(AcquireOutcome::Conflict) => {
                    let delay = self.backoff.next_delay();
                    trace!("lease on {} is taken, retrying in {delay:?}", self.resource);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    self.state = LockState::Idle;
                    return Err(AcquireError::Backend(e));
                }
            }
        }
        self.state = LockState::Idle;
        Err(AcquireError::Cancelled)
    }

    ///
    /// Give the lease back.
    ///
    /// Idempotent: only the first call has any effect, later calls return
    /// `Ok` immediately. The renewal task is stopped and awaited before the
    /// release request goes out, so a renewal and a release are never in
    /// flight at the same time. The lock is marked `Released` even when the
    /// backend call fails.
    ///
    pub async fn release(&mut self, cancel: &CancellationToken) -> Result<(), ReleaseError> {
        if self.state == LockState::Released {
            return Ok(());
        }
        self.state = LockState::Releasing;
        if let Some(renewal) = self.renewal.take() {
            renewal.cancel.cancel();
            if let Err(e) = renewal.handle.await {
                warn!("renewal task for {} ended abnormally: {e}", self.resource);
            }
        }
        let result = match self.token.take() {
            Some(token) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ReleaseError::Cancelled),
                    result = self.backend.release_lease(&self.resource, &token) => {
                        result.map_err(ReleaseError::Backend)
                    }
                }
            }
            // Nothing was ever acquired, there is no lease to give back.
            None => Ok(()),
        };
        self.state = LockState::Released;
        if result.is_ok() {
            info!("released lease on {}", self.resource);
        }
        result
    }

    fn spawn_renewal(&mut self, token: LeaseToken, cancel: &CancellationToken) {
        // Child of the acquisition token: cancelling the caller's token stops
        // the renewal too, release cancels only the child.
        let cancel = cancel.child_token();
        let backend = Arc::clone(&self.backend);
        let resource = self.resource.clone();
        let handle = tokio::spawn(renew_until_cancelled(
            backend,
            resource,
            token,
            cancel.clone(),
        ));
        self.renewal = Some(RenewalTask { cancel, handle });
    }
}

impl<B> Drop for LeaseLock<B> {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.cancel.cancel();
            warn!(
                "lock on {} dropped while held, the lease is left to lapse",
                self.resource
            );
        }
    }
}

///
/// Keep the lease alive until cancelled.
///
/// Renewal failures are swallowed: the loop falls back to the short delay and
/// counts on a later renewal landing before the lease lapses. If the lease
/// does lapse the next contender's acquisition simply succeeds and this
/// process's `Held` belief goes stale, which the backend resolves in the
/// other holder's favor.
///
async fn renew_until_cancelled<B>(
    backend: Arc<B>,
    resource: ResourceId,
    token: LeaseToken,
    cancel: CancellationToken,
) where
    B: LeaseBackend,
{
    let mut renewed = true;
    loop {
        let delay = if renewed { RENEW_DELAY } else { RENEW_RETRY_DELAY };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            break;
        }
        match backend.renew_lease(&resource, &token).await {
            Ok(()) => {
                trace!("renewed lease {token} on {resource}");
                renewed = true;
            }
            Err(e) => {
                warn!("failed to renew lease {token} on {resource}: {e}");
                renewed = false;
            }
        }
    }
}
