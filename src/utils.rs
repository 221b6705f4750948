use chrono::Utc;
use rand::RngCore;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Random `0x`-prefixed 32-byte hash for simulated transactions.
pub fn mock_tx_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// Retries `action` with jittered exponential backoff, starting at
/// `base_delay` and giving up after `max_attempts` tries.
pub async fn retry_with_backoff<A, F, T, E>(base_delay: Duration, max_attempts: usize, action: A) -> Result<T, E>
where
    A: FnMut() -> F,
    F: Future<Output = Result<T, E>>,
{
    let base_ms = base_delay.as_millis().max(1) as u64;
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(base_ms / 2 + 1)
        .max_delay(Duration::from_secs(30))
        .map(jitter)
        .take(max_attempts.saturating_sub(1));
    Retry::spawn(strategy, action).await
}
