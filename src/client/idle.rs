//! Idle-timeout monitoring for client-side connections.
//!
//! A pooled client connection that has no in-flight requests should not
//! be kept open forever. The monitor tracks outstanding requests and the
//! last moment of I/O; once the connection has been quiet for the
//! configured interval with nothing in flight, it cancels the
//! connection's token so the owner tears it down.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use log::debug;
use tokio::{
    task::JoinHandle,
    time::{sleep_until, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

struct IdleShared {
    in_flight: AtomicU32,
    last_activity: Mutex<Instant>,
}

impl IdleShared {
    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    fn last_activity(&self) -> Instant {
        self.last_activity
            .lock()
            .map_or_else(|_| Instant::now(), |last| *last)
    }
}

/// Activity feed for an [`IdleTimeoutMonitor`].
///
/// The connection's I/O path calls these as traffic passes; they are
/// cheap and lock only briefly.
#[derive(Clone)]
pub struct IdleHandle {
    shared: Arc<IdleShared>,
}

impl IdleHandle {
    /// A request went out; the connection now has work in flight.
    pub fn record_request(&self) {
        self.shared.in_flight.fetch_add(1, Ordering::Relaxed);
        self.shared.touch();
    }

    /// A response came back for an outstanding request.
    pub fn record_response(&self) {
        let _ = self
            .shared
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.shared.touch();
    }

    /// Raw I/O happened without changing the in-flight count.
    pub fn record_activity(&self) { self.shared.touch(); }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn in_flight(&self) -> u32 { self.shared.in_flight.load(Ordering::Relaxed) }
}

/// Closes a client connection once it has sat idle for too long.
///
/// "Idle" means two things at once: no request is awaiting its response,
/// and no I/O has been recorded within the timeout interval. A request
/// issued between the timer firing and the close decision is observed,
/// because the in-flight count is re-read immediately before cancelling.
pub struct IdleTimeoutMonitor {
    handle: IdleHandle,
    task: JoinHandle<()>,
}

impl IdleTimeoutMonitor {
    /// Start monitoring; `close` is cancelled when the idle decision
    /// fires.
    ///
    /// `idle_timeout` must be positive.
    #[must_use]
    pub fn spawn(idle_timeout: Duration, close: CancellationToken) -> Self {
        assert!(!idle_timeout.is_zero(), "idle_timeout must be positive");

        let shared = Arc::new(IdleShared {
            in_flight: AtomicU32::new(0),
            last_activity: Mutex::new(Instant::now()),
        });
        let handle = IdleHandle {
            shared: Arc::clone(&shared),
        };

        let task = tokio::spawn(async move {
            let mut deadline = shared.last_activity() + idle_timeout;
            loop {
                sleep_until(deadline).await;

                // Re-read right before deciding: a request issued after
                // the timer armed must keep the connection open.
                let in_flight = shared.in_flight.load(Ordering::Relaxed);
                let quiet_for = shared.last_activity().elapsed();
                if in_flight == 0 && quiet_for >= idle_timeout {
                    debug!("closing idle connection: quiet_for={quiet_for:?}");
                    close.cancel();
                    return;
                }
                deadline = if quiet_for >= idle_timeout {
                    // A response is still owed; check again in a full
                    // interval.
                    Instant::now() + idle_timeout
                } else {
                    shared.last_activity() + idle_timeout
                };
            }
        });

        Self { handle, task }
    }

    /// The activity feed connected I/O should report through.
    #[must_use]
    pub fn handle(&self) -> IdleHandle { self.handle.clone() }
}

impl Drop for IdleTimeoutMonitor {
    fn drop(&mut self) { self.task.abort(); }
}
