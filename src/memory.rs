use {
    crate::backend::{
        AcquireOutcome, BackendError, CreateOutcome, LeaseBackend, LeaseToken, ResourceId,
    },
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    },
    tokio::time::Instant,
};

///
/// In-process lease backend.
///
/// Enforces real single-holder semantics with lease expiry, which makes it
/// both the fake the test suite runs against and a usable backend when all
/// contenders live in one process. Clones share the same state.
///
#[derive(Default, Clone)]
pub struct MemoryLeaseBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<ResourceId, ObjectState>,
    next_token: u64,
}

#[derive(Default)]
struct ObjectState {
    lease: Option<Lease>,
}

struct Lease {
    token: LeaseToken,
    duration: Duration,
    expires_at: Instant,
}

impl MemoryLeaseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory backend state poisoned")
    }
}

#[async_trait::async_trait]
impl LeaseBackend for MemoryLeaseBackend {
    async fn acquire_lease(
        &self,
        resource: &ResourceId,
        duration: Duration,
    ) -> Result<AcquireOutcome, BackendError> {
        let now = Instant::now();
        let mut inner = self.lock_state();
        inner.next_token += 1;
        let token = LeaseToken::new(format!("mem-{}", inner.next_token));
        let object = inner.objects.entry(resource.clone()).or_default();
        match &object.lease {
            Some(lease) if lease.expires_at > now => Ok(AcquireOutcome::Conflict),
            _ => {
                object.lease = Some(Lease {
                    token: token.clone(),
                    duration,
                    expires_at: now + duration,
                });
                Ok(AcquireOutcome::Acquired(token))
            }
        }
    }

    async fn renew_lease(
        &self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> Result<(), BackendError> {
        let now = Instant::now();
        let mut inner = self.lock_state();
        let lease = inner
            .objects
            .get_mut(resource)
            .and_then(|object| object.lease.as_mut());
        match lease {
            Some(lease) if lease.token == *token && lease.expires_at > now => {
                lease.expires_at = now + lease.duration;
                Ok(())
            }
            _ => Err(BackendError::LeaseLost),
        }
    }

    async fn release_lease(
        &self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock_state();
        if let Some(object) = inner.objects.get_mut(resource) {
            // Only the current holder's token clears the lease; a stale
            // release must not evict whoever took over in the meantime.
            if object
                .lease
                .as_ref()
                .is_some_and(|lease| lease.token == *token)
            {
                object.lease = None;
            }
        }
        Ok(())
    }

    async fn create_if_absent(&self, resource: &ResourceId) -> Result<CreateOutcome, BackendError> {
        let mut inner = self.lock_state();
        if inner.objects.contains_key(resource) {
            Ok(CreateOutcome::AlreadyExists)
        } else {
            inner.objects.insert(resource.clone(), ObjectState::default());
            Ok(CreateOutcome::Created)
        }
    }

    async fn exists(&self, resource: &ResourceId) -> Result<bool, BackendError> {
        let inner = self.lock_state();
        Ok(inner.objects.contains_key(resource))
    }
}
