//! Bounded rendezvous between a backend worker thread and the caller.
//!
//! A worker calls [`Handshake::wait`] after publishing an attempt value and
//! blocks until the caller signals a verdict, the session is force-aborted,
//! the runtime interrupts it, or the deadline passes. The wait wakes at least
//! once per poll interval, so it never outlives `timeout + poll_interval`
//! even if nobody ever notifies it.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

/// Deadline and polling slice for one pause point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl HandshakeTiming {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval: poll_interval.min(timeout).max(Duration::from_millis(1)),
        }
    }
}

impl Default for HandshakeTiming {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000), Duration::from_millis(250))
    }
}

/// Why [`Handshake::wait`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<V> {
    /// The caller supplied a value to commit.
    Verdict(V),
    /// The caller or a disposal asked to abort the attempt.
    Aborted,
    /// No verdict arrived before the deadline.
    TimedOut,
    /// The runtime is shutting down.
    Interrupted,
}

/// Result of [`Handshake::signal_verdict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Accepted,
    /// A verdict was already recorded for this attempt; the new one was dropped.
    AlreadySignalled,
}

#[derive(Debug)]
struct HandshakeState<V> {
    verdict: Option<V>,
    signalled: bool,
    abort_requested: bool,
    timed_out: bool,
    interrupted: bool,
    deadline: Option<Instant>,
}

impl<V> Default for HandshakeState<V> {
    fn default() -> Self {
        Self {
            verdict: None,
            signalled: false,
            abort_requested: false,
            timed_out: false,
            interrupted: false,
            deadline: None,
        }
    }
}

/// Reusable single-slot rendezvous guarded by one mutex and condvar.
///
/// `abort_requested`, `timed_out` and `interrupted` are sticky: once set they
/// survive [`Handshake::reset`] so a later attempt of the same session cannot
/// block again.
#[derive(Debug)]
pub struct Handshake<V> {
    timing: HandshakeTiming,
    state: Mutex<HandshakeState<V>>,
    wake: Condvar,
}

impl<V> Handshake<V> {
    pub fn new(timing: HandshakeTiming) -> Self {
        Self {
            timing,
            state: Mutex::new(HandshakeState::default()),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandshakeState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the verdict slot before a new attempt.
    ///
    /// Only the worker calls this, and never while it is blocked in `wait`.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.verdict = None;
        state.signalled = false;
        state.deadline = None;
    }

    /// Block until a verdict, abort, interrupt or timeout.
    ///
    /// A verdict signalled between `reset` and `wait` is returned at once.
    pub fn wait(&self) -> WaitOutcome<V> {
        let mut state = self.lock();
        state.deadline = Some(Instant::now() + self.timing.timeout);

        loop {
            if state.interrupted {
                return WaitOutcome::Interrupted;
            }
            if state.abort_requested {
                return WaitOutcome::Aborted;
            }
            if state.signalled {
                return match state.verdict.take() {
                    Some(verdict) => WaitOutcome::Verdict(verdict),
                    None => WaitOutcome::Aborted,
                };
            }
            if state.timed_out {
                return WaitOutcome::TimedOut;
            }

            let (next, _) = self
                .wake
                .wait_timeout(state, self.timing.poll_interval)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;

            if let Some(deadline) = state.deadline
                && Instant::now() >= deadline
                && !state.signalled
                && !state.abort_requested
            {
                debug!("handshake deadline passed without a verdict");
                state.timed_out = true;
            }
        }
    }

    /// Record the caller's verdict and wake the worker.
    ///
    /// Only the first call per attempt is kept. `abort = true` records an
    /// abort instead of a value.
    pub fn signal_verdict(&self, value: V, abort: bool) -> SignalOutcome {
        let mut state = self.lock();
        if state.signalled {
            warn!("duplicate transaction verdict ignored");
            return SignalOutcome::AlreadySignalled;
        }

        state.signalled = true;
        if abort {
            state.abort_requested = true;
        } else {
            state.verdict = Some(value);
        }
        self.wake.notify_all();
        SignalOutcome::Accepted
    }

    /// Abort from any thread. A no-op for sessions that are not waiting.
    pub fn force_abort(&self) {
        let mut state = self.lock();
        state.abort_requested = true;
        self.wake.notify_all();
    }

    /// Wake the worker with [`WaitOutcome::Interrupted`].
    pub fn interrupt(&self) {
        let mut state = self.lock();
        state.interrupted = true;
        self.wake.notify_all();
    }

    /// Push the current deadline out by a full timeout.
    ///
    /// Used while the caller is doing legitimate work inside the pause, such
    /// as reading a document through the transaction.
    pub fn refresh_deadline(&self) {
        let mut state = self.lock();
        if state.deadline.is_some() && !state.timed_out {
            state.deadline = Some(Instant::now() + self.timing.timeout);
        }
    }

    /// True while a worker is inside `wait` with no verdict yet.
    pub fn is_waiting(&self) -> bool {
        let state = self.lock();
        state.deadline.is_some()
            && !state.signalled
            && !state.abort_requested
            && !state.timed_out
            && !state.interrupted
    }

    pub fn is_signalled(&self) -> bool {
        self.lock().signalled
    }

    pub fn is_abort_requested(&self) -> bool {
        self.lock().abort_requested
    }

    pub fn is_timed_out(&self) -> bool {
        self.lock().timed_out
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn fast_timing() -> HandshakeTiming {
        HandshakeTiming::new(Duration::from_millis(200), Duration::from_millis(10))
    }

    fn spawn_wait(
        handshake: &Arc<Handshake<i64>>,
    ) -> thread::JoinHandle<(WaitOutcome<i64>, Duration)> {
        let handshake = Arc::clone(handshake);
        thread::spawn(move || {
            let started = Instant::now();
            let outcome = handshake.wait();
            (outcome, started.elapsed())
        })
    }

    fn wait_until_blocked(handshake: &Handshake<i64>) {
        let started = Instant::now();
        while !handshake.is_waiting() {
            assert!(
                started.elapsed() < Duration::from_secs(2),
                "worker should reach wait"
            );
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn wait_without_signal_times_out_within_one_slice() {
        let handshake = Handshake::<i64>::new(fast_timing());
        let started = Instant::now();

        assert_eq!(handshake.wait(), WaitOutcome::TimedOut);

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(200 + 10 + 290));
        assert!(handshake.is_timed_out());
    }

    #[test]
    fn verdict_unblocks_worker() {
        let handshake = Arc::new(Handshake::new(fast_timing()));
        let worker = spawn_wait(&handshake);
        wait_until_blocked(&handshake);

        assert_eq!(handshake.signal_verdict(7, false), SignalOutcome::Accepted);

        let (outcome, _) = worker.join().expect("worker should not panic");
        assert_eq!(outcome, WaitOutcome::Verdict(7));
    }

    #[test]
    fn second_verdict_is_ignored() {
        let handshake = Handshake::new(fast_timing());

        assert_eq!(handshake.signal_verdict(1, false), SignalOutcome::Accepted);
        assert_eq!(
            handshake.signal_verdict(2, true),
            SignalOutcome::AlreadySignalled
        );

        assert_eq!(handshake.wait(), WaitOutcome::Verdict(1));
        assert!(!handshake.is_abort_requested());
    }

    #[test]
    fn abort_verdict_returns_aborted() {
        let handshake = Handshake::new(fast_timing());
        handshake.signal_verdict(0, true);
        assert_eq!(handshake.wait(), WaitOutcome::Aborted);
    }

    #[test]
    fn force_abort_unblocks_before_deadline() {
        let timing = HandshakeTiming::new(Duration::from_secs(10), Duration::from_millis(20));
        let handshake = Arc::new(Handshake::new(timing));
        let worker = spawn_wait(&handshake);
        wait_until_blocked(&handshake);

        handshake.force_abort();

        let (outcome, elapsed) = worker.join().expect("worker should not panic");
        assert_eq!(outcome, WaitOutcome::Aborted);
        assert!(elapsed < Duration::from_secs(1));
        assert!(handshake.is_abort_requested());
    }

    #[test]
    fn interrupt_unblocks_worker() {
        let timing = HandshakeTiming::new(Duration::from_secs(10), Duration::from_millis(20));
        let handshake = Arc::new(Handshake::new(timing));
        let worker = spawn_wait(&handshake);
        wait_until_blocked(&handshake);

        handshake.interrupt();

        let (outcome, _) = worker.join().expect("worker should not panic");
        assert_eq!(outcome, WaitOutcome::Interrupted);
    }

    #[test]
    fn reset_clears_verdict_but_keeps_abort() {
        let handshake = Handshake::new(fast_timing());
        handshake.signal_verdict(5, false);
        handshake.reset();
        assert!(!handshake.is_signalled());

        assert_eq!(handshake.signal_verdict(6, false), SignalOutcome::Accepted);
        assert_eq!(handshake.wait(), WaitOutcome::Verdict(6));

        handshake.force_abort();
        handshake.reset();
        assert_eq!(handshake.wait(), WaitOutcome::Aborted);
    }

    #[test]
    fn refresh_extends_deadline() {
        let timing = HandshakeTiming::new(Duration::from_millis(150), Duration::from_millis(10));
        let handshake = Arc::new(Handshake::new(timing));
        let worker = spawn_wait(&handshake);
        wait_until_blocked(&handshake);

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(60));
            handshake.refresh_deadline();
        }
        assert!(!handshake.is_timed_out());
        handshake.signal_verdict(9, false);

        let (outcome, elapsed) = worker.join().expect("worker should not panic");
        assert_eq!(outcome, WaitOutcome::Verdict(9));
        assert!(elapsed >= Duration::from_millis(200));
    }

    #[test]
    fn force_abort_without_waiter_is_harmless() {
        let handshake = Handshake::<i64>::new(fast_timing());
        handshake.force_abort();
        handshake.force_abort();
        assert!(!handshake.is_waiting());
        assert_eq!(handshake.wait(), WaitOutcome::Aborted);
    }
}
