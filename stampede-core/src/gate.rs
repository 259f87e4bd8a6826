use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Scenario deadline, anchored once the scenario's start offset elapses.
#[derive(Debug)]
pub struct IterationGate {
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
    cut_off: AtomicBool,
}

impl IterationGate {
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            duration,
            deadline: OnceLock::new(),
            cut_off: AtomicBool::new(false),
        }
    }

    /// A deadline past the clock's range leaves the gate open.
    pub fn start_at(&self, started: Instant) {
        if let Some(deadline) = self.duration.and_then(|d| started.checked_add(d)) {
            let _ = self.deadline.set(deadline);
        }
    }

    /// Whether another iteration may begin now.
    pub fn next(&self) -> bool {
        match self.deadline.get() {
            Some(deadline) => Instant::now() < *deadline,
            None => true,
        }
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .get()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Records that the deadline stopped work that was still owed.
    pub fn mark_cut_off(&self) {
        self.cut_off.store(true, Ordering::Relaxed);
    }

    pub fn was_cut_off(&self) -> bool {
        self.cut_off.load(Ordering::Relaxed)
    }
}

/// One-shot latch that wakes every waiter, used for both run start and run stop.
#[derive(Debug, Default)]
pub struct Signal {
    fired: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `dur` unless the signal fires first. Returns `true` only if
    /// the signal cut the sleep short.
    pub async fn sleep_or_fired(&self, dur: Duration) -> bool {
        if self.is_fired() {
            return true;
        }
        if dur.is_zero() {
            return false;
        }
        tokio::select! {
            biased;
            _ = tokio::time::sleep(dur) => false,
            _ = self.wait() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn gate_closes_at_deadline() {
        let gate = IterationGate::new(Some(Duration::from_secs(5)));
        gate.start_at(Instant::now());
        assert!(gate.next());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(gate.next());
        assert_eq!(gate.remaining(), Some(Duration::from_secs(1)));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!gate.next());
        assert!(!gate.was_cut_off());
        gate.mark_cut_off();
        assert!(gate.was_cut_off());
    }

    #[tokio::test]
    async fn gate_without_duration_never_closes() {
        let gate = IterationGate::new(None);
        gate.start_at(Instant::now());
        assert!(gate.next());
        assert_eq!(gate.remaining(), None);
    }

    #[tokio::test]
    async fn gate_with_unrepresentable_deadline_stays_open() {
        let gate = IterationGate::new(Some(Duration::from_secs(u64::MAX)));
        gate.start_at(Instant::now());
        assert!(gate.next());
        assert_eq!(gate.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_sleep_is_not_reported_as_fired() {
        let signal = Arc::new(Signal::new());
        let s = signal.clone();
        let sleeper = tokio::spawn(async move { s.sleep_or_fired(Duration::from_secs(2)).await });
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        signal.fire();
        match sleeper.await {
            Ok(fired) => assert!(!fired),
            Err(err) => panic!("sleeper panicked: {err}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn signal_interrupts_sleep() {
        let signal = Arc::new(Signal::new());
        let s = signal.clone();
        let sleeper = tokio::spawn(async move { s.sleep_or_fired(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        signal.fire();
        match sleeper.await {
            Ok(fired) => assert!(fired),
            Err(err) => panic!("sleeper panicked: {err}"),
        }
        assert!(!Signal::new().sleep_or_fired(Duration::from_millis(5)).await);
    }
}
