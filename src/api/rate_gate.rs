//! Rate-limit priority gate between foreground chat and background
//! compression.
//!
//! Chat never touches the gate. Compression must hold a permit for the whole
//! request, and the permit carries a cancellation token that a foreground
//! 429 fires: in-flight compressions abort, queued ones wait out the
//! retry-after window.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct GateState {
    backoff_until: Option<Instant>,
    cancel: CancellationToken,
}

pub struct RateGate {
    permits: Semaphore,
    state: Mutex<GateState>,
}

/// A held admission slot. Dropping it releases the slot.
pub struct GatePermit<'a> {
    _permit: tokio::sync::SemaphorePermit<'a>,
    /// Fired when a foreground rate limit pre-empts background work.
    pub preempt: CancellationToken,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGate {
    pub fn new() -> Self {
        Self {
            // One background request in flight at a time; the foreground
            // bypasses the gate entirely.
            permits: Semaphore::new(1),
            state: Mutex::new(GateState {
                backoff_until: None,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Record a provider rate limit: abort in-flight background work and
    /// hold new admissions until the window elapses.
    pub fn trip(&self, retry_after: Duration) {
        let mut state = self.state.lock().expect("rate gate lock poisoned");
        state.backoff_until = Some(Instant::now() + retry_after);
        let old = std::mem::replace(&mut state.cancel, CancellationToken::new());
        old.cancel();
        tracing::warn!(
            "rate limited: background compression paused for {:?}",
            retry_after
        );
    }

    /// Whether the gate is currently inside a retry-after window.
    pub fn is_backing_off(&self) -> bool {
        let state = self.state.lock().expect("rate gate lock poisoned");
        state
            .backoff_until
            .is_some_and(|until| until > Instant::now())
    }

    /// Wait out any retry-after window, then take the admission slot.
    pub async fn acquire(&self) -> GatePermit<'_> {
        loop {
            let wait = {
                let state = self.state.lock().expect("rate gate lock poisoned");
                state
                    .backoff_until
                    .and_then(|until| until.checked_duration_since(Instant::now()))
            };
            match wait {
                Some(delay) => tokio::time::sleep(delay).await,
                None => break,
            }
        }

        let permit = self
            .permits
            .acquire()
            .await
            .expect("rate gate semaphore closed");

        let preempt = {
            let state = self.state.lock().expect("rate gate lock poisoned");
            state.cancel.clone()
        };

        GatePermit {
            _permit: permit,
            preempt,
        }
    }
}
