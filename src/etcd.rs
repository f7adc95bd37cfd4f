use {
    crate::{
        backend::{
            AcquireOutcome, BackendError, CreateOutcome, LeaseBackend, LeaseToken, ResourceId,
        },
        retry::retry_transient,
    },
    etcd_client::{Compare, CompareOp, PutOptions, Txn, TxnOp},
    futures::StreamExt,
    rand::{distributions::Alphanumeric, Rng},
    retry::delay::Exponential,
    serde::{Deserialize, Serialize},
    std::{error::Error, time::Duration},
    tonic::Code,
    tracing::{trace, warn},
};

///
/// JSON record written on the holder key while a lease is held, mostly for
/// operators poking at the keyspace.
///
#[derive(Debug, Serialize, Deserialize)]
struct HolderRecord {
    holder: String,
    lease_id: i64,
}

///
/// Lease backend over etcd.
///
/// A lock resource maps to two keys: the marker key (the resource itself,
/// created by `create_if_absent` and never deleted) and a holder key put
/// transactionally with an etcd lease attached. The lease id doubles as the
/// lease token. Transient gRPC failures are retried internally; everything
/// else surfaces as a [`BackendError`].
///
#[derive(Clone)]
pub struct EtcdLeaseBackend {
    etcd: etcd_client::Client,
    holder_id: String,
}

impl EtcdLeaseBackend {
    pub fn new(etcd: etcd_client::Client) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        Self {
            etcd,
            holder_id: format!("{}-{suffix}", std::process::id()),
        }
    }

    pub async fn connect<E, S>(endpoints: S) -> Result<Self, BackendError>
    where
        E: AsRef<str>,
        S: AsRef<[E]>,
    {
        let etcd = etcd_client::Client::connect(endpoints, None)
            .await
            .map_err(backend_error)?;
        Ok(Self::new(etcd))
    }

    fn holder_key(resource: &ResourceId) -> String {
        format!("{resource}/holder")
    }

    async fn revoke_lease(&self, lease_id: i64) -> Result<(), BackendError> {
        let etcd = self.etcd.clone();
        retry_transient(strategy(), is_transient, move || {
            let mut etcd = etcd.clone();
            async move {
                match etcd.lease_revoke(lease_id).await {
                    Ok(_) => Ok(()),
                    Err(etcd_client::Error::GRpcStatus(status))
                        if status.code() == Code::NotFound =>
                    {
                        warn!("lease {lease_id} was already gone");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await
        .map_err(backend_error)
    }
}

#[async_trait::async_trait]
impl LeaseBackend for EtcdLeaseBackend {
    async fn acquire_lease(
        &self,
        resource: &ResourceId,
        duration: Duration,
    ) -> Result<AcquireOutcome, BackendError> {
        let ttl = duration.as_secs().max(1) as i64;
        let etcd = self.etcd.clone();
        let lease = retry_transient(strategy(), is_transient, move || {
            let mut etcd = etcd.clone();
            async move { etcd.lease_grant(ttl, None).await }
        })
        .await
        .map_err(backend_error)?;
        let lease_id = lease.id();

        let record = HolderRecord {
            holder: self.holder_id.clone(),
            lease_id,
        };
        let value = serde_json::to_vec(&record).map_err(|e| BackendError::Transport(Box::new(e)))?;
        let holder_key = Self::holder_key(resource);
        let txn = Txn::new()
            .when(vec![Compare::version(
                holder_key.clone(),
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![TxnOp::put(
                holder_key,
                value,
                Some(PutOptions::new().with_lease(lease_id)),
            )]);
        let etcd = self.etcd.clone();
        let txn_resp = retry_transient(strategy(), is_transient, move || {
            let etcd = etcd.clone();
            let txn = txn.clone();
            async move { etcd.kv_client().txn(txn).await }
        })
        .await
        .map_err(backend_error)?;

        if txn_resp.succeeded() {
            trace!("took lease {lease_id} on {resource}");
            Ok(AcquireOutcome::Acquired(LeaseToken::new(
                lease_id.to_string(),
            )))
        } else {
            // Another holder owns the key; the lease we just granted must not
            // linger until its ttl runs out.
            self.revoke_lease(lease_id).await?;
            Ok(AcquireOutcome::Conflict)
        }
    }

    async fn renew_lease(
        &self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> Result<(), BackendError> {
        let lease_id = lease_id_from(token)?;
        let mut etcd = self.etcd.clone();
        let (mut keeper, mut responses) = etcd
            .lease_keep_alive(lease_id)
            .await
            .map_err(backend_error)?;
        keeper.keep_alive().await.map_err(backend_error)?;
        match responses.next().await {
            Some(Ok(resp)) if resp.ttl() > 0 => {
                trace!("kept lease {lease_id} on {resource} alive, ttl {}", resp.ttl());
                Ok(())
            }
            Some(Ok(_)) => Err(BackendError::LeaseLost),
            Some(Err(e)) => Err(backend_error(e)),
            None => Err(BackendError::LeaseLost),
        }
    }

    async fn release_lease(
        &self,
        resource: &ResourceId,
        token: &LeaseToken,
    ) -> Result<(), BackendError> {
        let lease_id = lease_id_from(token)?;
        let holder_key = Self::holder_key(resource);
        let etcd = self.etcd.clone();
        retry_transient(strategy(), is_transient, move || {
            let etcd = etcd.clone();
            let holder_key = holder_key.clone();
            async move { etcd.kv_client().delete(holder_key, None).await }
        })
        .await
        .map_err(backend_error)?;
        self.revoke_lease(lease_id).await
    }

    async fn create_if_absent(&self, resource: &ResourceId) -> Result<CreateOutcome, BackendError> {
        let key = resource.as_str().to_string();
        let txn = Txn::new()
            .when(vec![Compare::version(key.clone(), CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, Vec::new(), None)]);
        let etcd = self.etcd.clone();
        let txn_resp = retry_transient(strategy(), is_transient, move || {
            let etcd = etcd.clone();
            let txn = txn.clone();
            async move { etcd.kv_client().txn(txn).await }
        })
        .await
        .map_err(backend_error)?;
        if txn_resp.succeeded() {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    async fn exists(&self, resource: &ResourceId) -> Result<bool, BackendError> {
        let key = resource.as_str().to_string();
        let etcd = self.etcd.clone();
        let get_resp = retry_transient(strategy(), is_transient, move || {
            let etcd = etcd.clone();
            let key = key.clone();
            async move { etcd.kv_client().get(key, None).await }
        })
        .await
        .map_err(backend_error)?;
        Ok(get_resp.count() > 0)
    }
}

fn strategy() -> impl Iterator<Item = Duration> {
    Exponential::from_millis_with_factor(10, 10.0).take(3)
}

fn lease_id_from(token: &LeaseToken) -> Result<i64, BackendError> {
    token
        .as_str()
        .parse::<i64>()
        .map_err(|_| BackendError::InvalidToken)
}

fn backend_error(err: etcd_client::Error) -> BackendError {
    match err {
        etcd_client::Error::GRpcStatus(status)
            if matches!(status.code(), Code::Unauthenticated | Code::PermissionDenied) =>
        {
            BackendError::AccessDenied(status.message().to_string())
        }
        other => BackendError::Transport(Box::new(other)),
    }
}

///
/// Errors worth another attempt: outside forces like a network partition, not
/// anything the request itself caused.
///
fn is_transient(err: &etcd_client::Error) -> bool {
    match err {
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Internal
            | Code::Unavailable
            | Code::DataLoss => true,
            Code::Unknown => status.source().is_none(),
            _ => false,
        },
        _ => false,
    }
}
