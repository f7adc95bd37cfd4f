use {
    core::fmt,
    rand::Rng,
    std::{future::Future, time::Duration},
    tracing::{error, warn},
};

///
/// Hard ceiling on the delay between two acquisition attempts.
///
pub const MAX_BACKOFF: Duration = Duration::from_millis(3000);

/// Upper bound (exclusive) of the random jitter added to each delay.
const MAX_JITTER_MS: u64 = 100;

///
/// Reactive exponential backoff for lock acquisition.
///
/// Each failed attempt waits `2^attempt` milliseconds plus a random jitter in
/// `[0, 100)` milliseconds, capped at [`MAX_BACKOFF`]. The jitter spreads out
/// contenders that all lost the lease to the same holder, so they do not hit
/// the backend in lockstep on every retry.
///
/// The attempt counter is monotone over the lifetime of the value: a lock
/// object is single-use, so there is no success to reset it on.
///
#[derive(Debug)]
pub struct ExponentialBackoff {
    attempt: u32,
    max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_max(MAX_BACKOFF)
    }

    pub fn with_max(max: Duration) -> Self {
        Self { attempt: 0, max }
    }

    ///
    /// Compute the delay for the attempt that just failed and bump the
    /// counter.
    ///
    pub fn next_delay(&mut self) -> Duration {
        let base = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        self.attempt = self.attempt.saturating_add(1);
        let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
        self.max
            .min(Duration::from_millis(base.saturating_add(jitter)))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

///
/// Retry an operation on transient failures, following a delay strategy.
///
/// `is_transient` decides which errors are worth another try; everything else
/// is returned to the caller immediately. Once the strategy iterator runs dry
/// the last transient error is returned as-is.
///
/// Strategies come from the `retry` crate, e.g.
/// `retry::delay::Fixed::from_millis(10).take(3)`.
///
pub async fn retry_transient<T, E, F, Fut, P>(
    retry_strategy: impl IntoIterator<Item = Duration>,
    is_transient: P,
    mut f: F,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    F: FnMut() -> Fut,
    P: Fn(&E) -> bool,
    E: fmt::Debug,
{
    let mut retry_strategy = retry_strategy.into_iter();
    loop {
        match f().await {
            Ok(o) => return Ok(o),
            Err(e) => {
                if is_transient(&e) {
                    warn!("failed due to transient state {:?}", e);
                    match retry_strategy.next() {
                        Some(duration) => {
                            tokio::time::sleep(duration).await;
                        }
                        None => return Err(e),
                    }
                } else {
                    error!("failed due to non-transient state: {:?}", e);
                    return Err(e);
                }
            }
        }
    }
}
