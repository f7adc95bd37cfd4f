use {
    core::fmt,
    std::time::Duration,
    thiserror::Error,
};

///
/// Opaque credential proving current ownership of a lease.
///
/// The backend hands one out on a successful acquisition and requires it back
/// for every renew and release call. A token is never valid after the lease it
/// belongs to has been released.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

///
/// Backend-addressable identifier of a lock object.
///
/// Built by [`crate::directory::LockDirectory`] from a namespace and a lock
/// name, but can be constructed directly when no directory is involved.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn from_parts(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

///
/// Outcome of an acquire-lease call.
///
/// `Conflict` is an expected outcome under contention, not an error: callers
/// are supposed to back off and retry.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(LeaseToken),
    Conflict,
}

///
/// Outcome of a create-if-absent call.
///
/// `AlreadyExists` covers both the plain "object was there" case and the
/// lost-creation-race case, which are indistinguishable to the caller and
/// equally fine.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

///
/// Fatal backend failure classes.
///
/// Everything here aborts the operation that hit it; contention and
/// creation races are modelled as [`AcquireOutcome::Conflict`] and
/// [`CreateOutcome::AlreadyExists`] instead and never show up as errors.
///
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("backend denied access: {0}")]
    AccessDenied(String),
    #[error("lease token is malformed")]
    InvalidToken,
    #[error("lease is no longer held")]
    LeaseLost,
}

///
/// Remote service exposing named, leasable objects with exclusive-lease
/// semantics.
///
/// The lock state machine is written entirely against this trait so it can run
/// against etcd in production and against an in-memory backend in tests.
///
#[async_trait::async_trait]
pub trait LeaseBackend: Send + Sync + 'static {
    ///
    /// Try to take the exclusive lease on `resource` for `duration`.
    ///
    /// Returns [`AcquireOutcome::Conflict`] when another holder currently owns
    /// the lease.
    ///
    async fn acquire_lease(
        &self,
        resource: &ResourceId,
        duration: Duration,
    ) -> Result<AcquireOutcome, BackendError>;

    ///
    /// Extend the lease identified by `token` for another full duration.
    ///
    async fn renew_lease(
        &self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> Result<(), BackendError>;

    ///
    /// Give the lease up. Releasing a lease that already lapsed is a harmless
    /// no-op on every backend this crate ships.
    ///
    async fn release_lease(
        &self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> Result<(), BackendError>;

    ///
    /// Create the backing object for `resource` if it does not exist yet.
    ///
    async fn create_if_absent(&self, resource: &ResourceId) -> Result<CreateOutcome, BackendError>;

    async fn exists(&self, resource: &ResourceId) -> Result<bool, BackendError>;
}
