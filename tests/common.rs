#![allow(dead_code)]

use {
    async_trait::async_trait,
    lease_lock::backend::{
        AcquireOutcome, BackendError, CreateOutcome, LeaseBackend, LeaseToken, ResourceId,
    },
    std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    },
    tokio::time::Instant,
};

pub async fn get_etcd_client() -> etcd_client::Client {
    etcd_client::Client::connect(["http://localhost:2379"], None)
        .await
        .expect("failed to connect to etcd")
}

pub fn random_str(len: usize) -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};
    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

///
/// One scripted answer to an acquire-lease call.
///
#[derive(Debug, Clone, Copy)]
pub enum AcquireStep {
    Conflict,
    Grant(&'static str),
    Fail,
}

///
/// Scripted lease backend recording every call it receives.
///
/// Acquire outcomes, renew results and release results are played back from
/// queues; once a queue runs dry the configured default applies. Timestamps
/// are `tokio::time::Instant`s so paused-clock tests can assert on delays.
///
pub struct FakeBackend {
    acquire_steps: Mutex<VecDeque<AcquireStep>>,
    acquire_default: AcquireStep,
    renew_steps: Mutex<VecDeque<bool>>,
    release_steps: Mutex<VecDeque<bool>>,
    create_outcome: CreateOutcome,
    object_exists: bool,
    acquire_times: Mutex<Vec<Instant>>,
    renew_times: Mutex<Vec<Instant>>,
    release_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            acquire_steps: Mutex::new(VecDeque::new()),
            acquire_default: AcquireStep::Grant("tok"),
            renew_steps: Mutex::new(VecDeque::new()),
            release_steps: Mutex::new(VecDeque::new()),
            create_outcome: CreateOutcome::Created,
            object_exists: false,
            acquire_times: Mutex::new(Vec::new()),
            renew_times: Mutex::new(Vec::new()),
            release_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_acquire_steps(self, steps: impl IntoIterator<Item = AcquireStep>) -> Self {
        self.acquire_steps
            .lock()
            .unwrap()
            .extend(steps);
        self
    }

    pub fn always_conflicting(mut self) -> Self {
        self.acquire_default = AcquireStep::Conflict;
        self
    }

    pub fn with_renew_results(self, results: impl IntoIterator<Item = bool>) -> Self {
        self.renew_steps.lock().unwrap().extend(results);
        self
    }

    pub fn with_release_results(self, results: impl IntoIterator<Item = bool>) -> Self {
        self.release_steps.lock().unwrap().extend(results);
        self
    }

    pub fn with_create_outcome(mut self, outcome: CreateOutcome) -> Self {
        self.create_outcome = outcome;
        self
    }

    pub fn with_existing_object(mut self) -> Self {
        self.object_exists = true;
        self
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_times.lock().unwrap().len()
    }

    pub fn acquire_times(&self) -> Vec<Instant> {
        self.acquire_times.lock().unwrap().clone()
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_times.lock().unwrap().len()
    }

    pub fn renew_times(&self) -> Vec<Instant> {
        self.renew_times.lock().unwrap().clone()
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

fn injected_fault() -> BackendError {
    BackendError::Transport(Box::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "injected fault",
    )))
}

#[async_trait]
impl LeaseBackend for FakeBackend {
    async fn acquire_lease(
        &self,
        _resource: &ResourceId,
        _duration: Duration,
    ) -> Result<AcquireOutcome, BackendError> {
        self.acquire_times.lock().unwrap().push(Instant::now());
        let step = self
            .acquire_steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.acquire_default);
        match step {
            AcquireStep::Conflict => Ok(AcquireOutcome::Conflict),
            AcquireStep::Grant(token) => Ok(AcquireOutcome::Acquired(LeaseToken::new(token))),
            AcquireStep::Fail => Err(injected_fault()),
        }
    }

    async fn renew_lease(
        &self,
        _resource: &ResourceId,
        _token: &LeaseToken,
    ) -> Result<(), BackendError> {
        self.renew_times.lock().unwrap().push(Instant::now());
        let ok = self.renew_steps.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(BackendError::LeaseLost)
        }
    }

    async fn release_lease(
        &self,
        _resource: &ResourceId,
        _token: &LeaseToken,
    ) -> Result<(), BackendError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .release_steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(injected_fault())
        }
    }

    async fn create_if_absent(&self, _resource: &ResourceId) -> Result<CreateOutcome, BackendError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.create_outcome)
    }

    async fn exists(&self, _resource: &ResourceId) -> Result<bool, BackendError> {
        Ok(self.object_exists)
    }
}
