//! Send cadence and run termination.
//!
//! The flags shared with asynchronous contexts (the interval timer and the
//! interrupt handler) live in [`RunFlags`] and are plain atomics: those
//! contexts never see the run statistics. Everything else is owned by the
//! probe loop thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::ProbeStats;

/// Longest single receive wait, so interrupts are noticed promptly
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Shortest single receive wait
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(1);

const END_UNSET: u64 = u64::MAX;

/// Flags written from the timer and interrupt tasks, read by the probe loop
#[derive(Debug)]
pub struct RunFlags {
    origin: Instant,
    running: AtomicBool,
    send_due: AtomicBool,
    /// Microseconds from `origin` to the end of the run, `END_UNSET` until stopped
    end_micros: AtomicU64,
}

impl RunFlags {
    /// Flags for a run starting at `origin`: running, first send due immediately
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            running: AtomicBool::new(true),
            send_due: AtomicBool::new(true),
            end_micros: AtomicU64::new(END_UNSET),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Operator cancellation: stop the run and stamp its end time
    ///
    /// Only stores atomics, so it is safe from any context.
    pub fn interrupt(&self) {
        self.stop_at(Instant::now());
    }

    /// Stop the run as of `now` (the first recorded end time is kept)
    pub fn stop_at(&self, now: Instant) {
        let micros = now.saturating_duration_since(self.origin).as_micros() as u64;
        let _ = self.end_micros.compare_exchange(
            END_UNSET,
            micros.min(END_UNSET - 1),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.running.store(false, Ordering::Release);
    }

    /// Time from run start to stop, once stopped
    pub fn end_elapsed(&self) -> Option<Duration> {
        match self.end_micros.load(Ordering::Acquire) {
            END_UNSET => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }

    pub fn mark_send_due(&self) {
        self.send_due.store(true, Ordering::Release);
    }

    /// Consume the send-due flag
    pub fn take_send_due(&self) -> bool {
        self.send_due.swap(false, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn is_send_due(&self) -> bool {
        self.send_due.load(Ordering::Acquire)
    }
}

/// Owns the send timer and evaluates the stop condition
pub struct Scheduler {
    flags: Arc<RunFlags>,
    interval: Duration,
    count: Option<u64>,
    runtime: Handle,
    cancel: CancellationToken,
    timer: Option<JoinHandle<()>>,
    next_send: Option<Instant>,
}

impl Scheduler {
    /// `count` of None means unbounded
    pub fn new(interval: Duration, count: Option<u64>, flags: Arc<RunFlags>, runtime: Handle) -> Self {
        Self {
            flags,
            interval,
            count,
            runtime,
            cancel: CancellationToken::new(),
            timer: None,
            next_send: None,
        }
    }

    pub fn flags(&self) -> Arc<RunFlags> {
        Arc::clone(&self.flags)
    }

    /// Token cancelled when the scheduler is dropped; hand it to sibling tasks
    /// (e.g. the interrupt listener) that must not outlive the run
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.flags.is_running()
    }

    /// True (and the flag consumed) when a send is due and the count allows one
    pub fn take_send_due(&self, sent: u64) -> bool {
        if !self.flags.is_running() {
            return false;
        }
        if self.count.is_some_and(|count| sent >= count) {
            return false;
        }
        self.flags.take_send_due()
    }

    /// Arm the one-shot timer for the next send, replacing any pending one
    pub fn arm(&mut self, now: Instant) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let flags = Arc::clone(&self.flags);
        let cancel = self.cancel.clone();
        let interval = self.interval;
        self.timer = Some(self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(interval) => flags.mark_send_due(),
            }
        }));
        self.next_send = now.checked_add(interval);
    }

    /// Stop condition for a bounded run
    ///
    /// With a count configured, the run ends once every request is out and
    /// either all replies are in or one interval has passed since the last
    /// send. Unbounded runs only end on interruption.
    pub fn should_stop(&self, stats: &ProbeStats, now: Instant) -> bool {
        let Some(count) = self.count else {
            return false;
        };
        if stats.sent < count {
            return false;
        }
        if stats.ok >= count {
            return true;
        }
        stats
            .last_send
            .is_some_and(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// How long the next receive may wait without delaying a send
    pub fn poll_timeout(&self, now: Instant) -> Duration {
        let until_next = match self.next_send {
            Some(at) => at.saturating_duration_since(now),
            None => MAX_POLL_TIMEOUT,
        };
        until_next.clamp(MIN_POLL_TIMEOUT, MAX_POLL_TIMEOUT)
    }

    /// Enter the terminal state
    pub fn stop(&mut self, now: Instant) {
        self.flags.stop_at(now);
        self.cancel.cancel();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
