use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff, FixedInterval};
use tokio_retry::RetryIf;

use super::error::{BridgeError, ExchangeError, LiquidityError, PipelineError, RpcError, SwapError};

pub mod constants {
    pub const MAX_RETRIES: usize = 4;
    // Delays run 500ms, 1s, 2s, ... up to MAX_DELAY_MS.
    pub const BACKOFF_BASE: u64 = 2;
    pub const BACKOFF_FACTOR_MS: u64 = 250;
    pub const MAX_DELAY_MS: u64 = 30_000;
    pub const FIXED_DELAY_MS: u64 = 2_000;
}

pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

macro_rules! impl_retryable {
    ($($ty:ty),*) => {
        $(impl Retryable for $ty {
            fn is_retryable(&self) -> bool {
                <$ty>::is_retryable(self)
            }
        })*
    };
}

impl_retryable!(RpcError, ExchangeError, BridgeError, SwapError, LiquidityError, PipelineError);

/// Unbounded doubling delays capped at `max_delay`.
pub fn backoff_delays(max_delay: Duration) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(constants::BACKOFF_BASE)
        .factor(constants::BACKOFF_FACTOR_MS)
        .max_delay(max_delay)
}

pub fn exponential_strategy(attempts: usize) -> impl Iterator<Item = Duration> {
    backoff_delays(Duration::from_millis(constants::MAX_DELAY_MS))
        .map(jitter)
        .take(attempts)
}

pub fn fixed_strategy(delay: Duration, attempts: usize) -> impl Iterator<Item = Duration> {
    FixedInterval::new(delay).take(attempts)
}

/// Retries `action` while it fails with a retryable error.
pub async fn retry_transient<T, E, A, Fut, S>(label: &str, strategy: S, action: A) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: IntoIterator<Item = Duration>,
{
    RetryIf::spawn(strategy, action, |error: &E| {
        let retry = error.is_retryable();
        if retry {
            warn!("{} failed with a transient error, retrying: {}", label, error);
        }
        retry
    })
    .await
}
