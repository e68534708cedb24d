use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Run `probe` every `interval` until it yields a value or `timeout` elapses.
///
/// The probe is always run at least once, so a zero timeout still checks the
/// current state. Probes swallow their own transient errors (a page that is
/// mid-navigation cannot be evaluated) and report them as `None`.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let Some(value) = probe().await {
            debug!("{}: ready after {} probe(s)", what, attempts);
            return Some(value);
        }
        let now = Instant::now();
        if now >= deadline {
            debug!("{}: gave up after {} probe(s)", what, attempts);
            return None;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

// ── Tests ──
