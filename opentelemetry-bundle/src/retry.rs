//! Background drain of one spool with capped exponential backoff.
//!
//! Every spool owns exactly one [`RetryDriver`] thread. The driver delivers
//! strictly in sequence order: an entry that keeps failing retriably blocks
//! its successors until the backend accepts it or rejects it terminally.
//! That is deliberate — reordering would break the FIFO contract, and a
//! backend that rejects the head of the queue retriably is not going to
//! accept its tail either.
//!
//! The thread suspends in exactly three places: waiting for a wake-up while
//! the spool is empty (bounded by a 1 s poll), the transport send itself, and
//! the backoff sleep. All three return promptly when shutdown is requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::diag;
use crate::error::Error;
use crate::spool::{Spool, SpoolError};
use crate::transport::{Transport, TransportError};
use crate::{Protocol, Signal};

/// First retry delay after a failure.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);
/// Backoff ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Poll interval while the spool is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default grace given to the driver on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Capped doubling schedule: `min, 2·min, 4·min, …, max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Backoff {
            min,
            max,
            current: min,
        }
    }

    /// The delay to sleep now; advances the schedule.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Tuning knobs for one driver. Defaults are the normative schedule.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// First retry delay.
    pub min_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Poll interval while the spool is empty.
    pub poll_interval: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct Shared {
    stop: AtomicBool,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    sleep_lock: Mutex<()>,
    sleep_cv: Condvar,
}

impl Shared {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Interruptible sleep: returns early when shutdown is requested.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut guard = self
            .sleep_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !self.stopping() {
            let now = Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                break;
            };
            let (next, _) = self
                .sleep_cv
                .wait_timeout(guard, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard = next;
        }
    }
}

/// Spawns and owns the drain thread for one spool.
pub struct RetryDriver;

impl RetryDriver {
    /// Start a driver for `spool`, delivering through `transport`.
    pub fn spawn(
        signal: Signal,
        protocol: Protocol,
        spool: Spool,
        transport: Box<dyn Transport>,
        options: RetryOptions,
    ) -> Result<RetryHandle, Error> {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
            sleep_lock: Mutex::new(()),
            sleep_cv: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_spool = spool.clone();
        thread::Builder::new()
            .name(format!("otel-bundle-retry-{signal}"))
            .spawn(move || {
                run_loop(
                    signal,
                    protocol,
                    &thread_spool,
                    transport,
                    &options,
                    &thread_shared,
                );
                let mut finished = thread_shared
                    .finished
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *finished = true;
                thread_shared.finished_cv.notify_all();
            })
            .map_err(Error::Spawn)?;

        Ok(RetryHandle { shared, spool })
    }
}

fn run_loop(
    signal: Signal,
    protocol: Protocol,
    spool: &Spool,
    mut transport: Box<dyn Transport>,
    options: &RetryOptions,
    shared: &Shared,
) {
    let mut backoff = Backoff::new(options.min_backoff, options.max_backoff);
    // Retriable failures are reported once per transition into the failing
    // state, not once per attempt.
    let mut failure_reported = false;

    while !shared.stopping() {
        let generation = spool.generation();
        let entry = match spool.peek_oldest() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                spool.wait_wake(generation, options.poll_interval);
                continue;
            }
            Err(SpoolError::Closed) => break,
            Err(err) => {
                diag::error(signal, Some(protocol), "spool", &err);
                shared.sleep(options.poll_interval);
                continue;
            }
        };

        match transport.send(&entry) {
            Ok(()) => {
                if let Err(err) = spool.acknowledge(entry.seq) {
                    diag::error(signal, Some(protocol), "spool", &err);
                }
                backoff.reset();
                failure_reported = false;
            }
            Err(TransportError::Retriable {
                reason,
                retry_after,
            }) => {
                if !failure_reported {
                    diag::error(signal, Some(protocol), "retry", &reason);
                    failure_reported = true;
                }
                // A server hint overrides the schedule without advancing it.
                let delay = retry_after.unwrap_or_else(|| backoff.next_delay());
                shared.sleep(delay);
            }
            Err(TransportError::Terminal { reason }) => {
                diag::error(
                    signal,
                    Some(protocol),
                    "drop",
                    &format!("dropping entry {}: {reason}", entry.seq),
                );
                if let Err(err) = spool.acknowledge(entry.seq) {
                    diag::error(signal, Some(protocol), "spool", &err);
                }
                failure_reported = false;
            }
        }
    }
}

/// Handle to a running driver; stops it with a bounded grace period.
pub struct RetryHandle {
    shared: Arc<Shared>,
    spool: Spool,
}

impl RetryHandle {
    /// Request shutdown and wait up to `grace` for the driver to finish its
    /// current attempt. On expiry the thread is abandoned; whatever entry was
    /// in flight stays spooled and is retried on the next process start.
    /// The spool is closed either way.
    pub fn shutdown(&self, grace: Duration) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.sleep_cv.notify_all();
        self.spool.wake();

        let deadline = Instant::now() + grace;
        let mut finished = self
            .shared
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*finished {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            let (next, timeout) = self
                .shared
                .finished_cv
                .wait_timeout(finished, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            finished = next;
            if timeout.timed_out() {
                break;
            }
        }
        drop(finished);

        self.spool.close();
    }
}

impl std::fmt::Debug for RetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandle").finish()
    }
}
