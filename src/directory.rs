use {
    crate::backend::{BackendError, CreateOutcome, LeaseBackend, ResourceId},
    core::fmt,
    std::sync::Arc,
    tracing::trace,
};

///
/// Namespace every lock object lives under, unless the directory is built
/// with a custom one.
///
pub const DEFAULT_NAMESPACE: &str = "lease-lock-objects";

/// Suffix marking a backend object as a lock object.
const LOCK_SUFFIX: &str = ".lock";

/// Longest lock name the directory will produce, suffix included.
const MAX_NAME_LEN: usize = 255;

///
/// Validated name of a lock, derived from a stable operation identifier and an
/// optional invocation-specific partial key.
///
/// Derivation sanitizes the input down to `[A-Za-z0-9._/-]`, length-limits it
/// and appends the `.lock` suffix, so the result is always a valid backend
/// resource identifier.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockName(String);

impl LockName {
    pub fn derive(operation: &str, partial_key: Option<&str>) -> Self {
        let mut stem = String::from(operation);
        if let Some(key) = partial_key.filter(|key| !key.is_empty()) {
            stem.push('/');
            stem.push_str(key);
        }
        let mut stem: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        // All sanitized characters are ASCII, truncation cannot split a char.
        stem.truncate(MAX_NAME_LEN - LOCK_SUFFIX.len());
        Self(format!("{stem}{LOCK_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

///
/// Maps lock names to backend resources inside a fixed namespace, creating
/// the backing object on first use.
///
pub struct LockDirectory<B> {
    backend: Arc<B>,
    namespace: String,
}

impl<B> LockDirectory<B>
where
    B: LeaseBackend,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_namespace(backend, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(backend: Arc<B>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    ///
    /// Resolve `name` to a backend resource, creating the backing object if it
    /// is not there yet.
    ///
    /// Losing a creation race to another process resolving the same name is
    /// treated as success; any other creation failure propagates.
    ///
    pub async fn resolve(&self, name: &LockName) -> Result<ResourceId, BackendError> {
        let resource = ResourceId::from_parts(&self.namespace, name.as_str());
        if !self.backend.exists(&resource).await? {
            match self.backend.create_if_absent(&resource).await? {
                CreateOutcome::Created => {
                    trace!("created lock object {resource}");
                }
                CreateOutcome::AlreadyExists => {}
            }
        }
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_should_join_operation_and_partial_key() {
        let name = LockName::derive("Worker.ProcessQueue.Run", Some("order-42"));
        assert_eq!(name.as_str(), "Worker.ProcessQueue.Run/order-42.lock");
    }

    #[test]
    fn derive_without_partial_key_should_only_append_the_suffix() {
        let name = LockName::derive("Worker.ProcessQueue.Run", None);
        assert_eq!(name.as_str(), "Worker.ProcessQueue.Run.lock");
        let name = LockName::derive("Worker.ProcessQueue.Run", Some(""));
        assert_eq!(name.as_str(), "Worker.ProcessQueue.Run.lock");
    }

    #[test]
    fn derive_should_sanitize_invalid_characters() {
        let name = LockName::derive("ns::op name", Some("a b"));
        assert_eq!(name.as_str(), "ns--op-name/a-b.lock");
    }

    #[test]
    fn derive_should_length_limit_and_keep_the_suffix() {
        let long = "x".repeat(1000);
        let name = LockName::derive(&long, None);
        assert_eq!(name.as_str().len(), MAX_NAME_LEN);
        assert!(name.as_str().ends_with(LOCK_SUFFIX));
    }
}
