use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::token;

/// Default safety margin between scheduled renewal and real expiry.
pub const REFRESH_BUFFER: Duration = Duration::from_millis(120_000);

/// Time until the access token should be renewed.
///
/// `exp * 1000 - now - buffer`, clamped at zero: a token that is already
/// inside the buffer (or already expired, or without a readable `exp`) is
/// renewed immediately instead of being rejected.
#[must_use]
pub fn refresh_delay(access_token: &str, now_ms: i64, buffer: Duration) -> Duration {
    let Some(exp) = token::expires_at(access_token) else {
        return Duration::ZERO;
    };
    let buffer_ms = i64::try_from(buffer.as_millis()).unwrap_or(i64::MAX);
    let delay_ms = exp
        .saturating_mul(1000)
        .saturating_sub(now_ms)
        .saturating_sub(buffer_ms);
    Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0))
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Owner of the single pending refresh timer.
///
/// Arming always cancels the previous timer first, so at most one timer is
/// pending at any instant. Once a timer fires it detaches from the slot
/// before running its callback; the callback is then free to arm the next one.
pub struct RefreshScheduler {
    slot: Arc<Mutex<TimerSlot>>,
    buffer: Duration,
    clock: Arc<dyn Clock>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(buffer: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(TimerSlot::default())),
            buffer,
            clock,
        }
    }

    /// Schedules `on_fire(refresh_token)` shortly before `access_token` expires.
    ///
    /// Skipped (returning `false`) when either token is missing or the
    /// refresh token itself has expired. Must run inside a Tokio runtime;
    /// outside of one the call is logged and skipped.
    pub fn arm<F, Fut>(&self, access_token: &str, refresh_token: &str, on_fire: F) -> bool
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if access_token.is_empty() || refresh_token.is_empty() {
            tracing::debug!("Refresh not scheduled: token pair incomplete");
            return false;
        }
        let now_ms = self.clock.now_ms();
        if token::is_expired_at(refresh_token, now_ms) {
            tracing::debug!("Refresh not scheduled: refresh token expired");
            return false;
        }

        let delay = refresh_delay(access_token, now_ms, self.buffer);
        self.schedule(delay, refresh_token.to_owned(), on_fire)
    }

    /// Schedules `on_fire(refresh_token)` for immediate execution.
    ///
    /// Used on bootstrap when the access token is already gone but the
    /// refresh token is still usable. Replaces any pending timer.
    pub fn schedule_now<F, Fut>(&self, refresh_token: &str, on_fire: F) -> bool
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if refresh_token.is_empty() {
            return false;
        }
        self.schedule(Duration::ZERO, refresh_token.to_owned(), on_fire)
    }

    fn schedule<F, Fut>(&self, delay: Duration, refresh_token: String, on_fire: F) -> bool
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Refresh not scheduled: no Tokio runtime");
                return false;
            }
        };

        let mut slot = self.slot.lock();
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);

        tracing::debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Refresh scheduled"
        );

        slot.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock();
                if slot.generation != generation {
                    return;
                }
                // Detach: dropping a JoinHandle does not abort the task.
                slot.handle = None;
            }
            on_fire(refresh_token).await;
        }));
        true
    }

    /// Drops the pending timer, if any. Idempotent.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
            tracing::debug!("Pending refresh cancelled");
        }
    }

    /// Whether a timer is pending (armed and not yet fired).
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot.lock().handle.is_some()
    }

    #[must_use]
    pub fn buffer(&self) -> Duration {
        self.buffer
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
