//! Token-bucket admission gate with a full periodic reset.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Grants up to `max_tokens` requests per `refill_interval`.
///
/// Every tick the bucket is refilled to `max_tokens` outright; tokens do not
/// drip back in proportionally.
pub struct RateLimiter {
    tokens: Arc<Mutex<u32>>,
    max_tokens: u32,
    refill_interval: Duration,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl RateLimiter {
    /// Starts the refill timer. Must be called from within a tokio runtime.
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        let tokens = Arc::new(Mutex::new(max_tokens));
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(refill(Arc::clone(&tokens), max_tokens, refill_interval, stop_rx));

        Self {
            tokens,
            max_tokens,
            refill_interval,
            stop: Mutex::new(Some(stop_tx)),
        }
    }

    /// Takes one token if any is left.
    pub fn allow(&self) -> bool {
        let mut tokens = self.tokens.lock();
        if *tokens > 0 {
            *tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> u32 {
        *self.tokens.lock()
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Stops the refill timer. Later calls do nothing.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refill(
    tokens: Arc<Mutex<u32>>,
    max_tokens: u32,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    // `interval_at` panics on a zero period.
    let period = period.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                *tokens.lock() = max_tokens;
            }
            _ = &mut stop => break,
        }
    }
    debug!("Rate limiter refill stopped");
}
