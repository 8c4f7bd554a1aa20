//! Cancellable timers that deliver their firings as events.
//!
//! A timer does not act on its own: when it fires it sends its event, tagged
//! with the timer id, into the session's event channel. The slot remembers
//! which id is current, so a firing that races with a cancel is recognised
//! as stale and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawn a one-shot timer.
pub(crate) fn after<E: Send + 'static>(
    delay: Duration,
    tx: mpsc::UnboundedSender<E>,
    event: E,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(event);
    })
}

/// Spawn a recurring timer. The first firing happens one full period after
/// the call.
pub(crate) fn every<E, F>(period: Duration, tx: mpsc::UnboundedSender<E>, make: F) -> JoinHandle<()>
where
    E: Send + 'static,
    F: Fn() -> E + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // Skip first immediate tick
        loop {
            ticker.tick().await;
            if tx.send(make()).is_err() {
                return;
            }
        }
    })
}

/// Holds at most one armed timer of a given kind.
#[derive(Default)]
pub(crate) struct TimerSlot {
    armed: Option<(u64, JoinHandle<()>)>,
}

impl TimerSlot {
    /// Arm a new timer, cancelling any previous one.
    pub(crate) fn arm(&mut self, id: u64, task: JoinHandle<()>) {
        self.cancel();
        self.armed = Some((id, task));
    }

    /// Cancel the armed timer. Cancelling an empty slot is a no-op.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((_, task)) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `id` is the currently armed timer.
    pub(crate) fn is_current(&self, id: u64) -> bool {
        self.armed.as_ref().is_some_and(|(current, _)| *current == id)
    }

    /// Accept a one-shot firing: returns `true` and disarms the slot if `id`
    /// is current, `false` for a stale firing.
    pub(crate) fn fire(&mut self, id: u64) -> bool {
        if self.is_current(id) {
            self.armed = None;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub(crate) const fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = after(Duration::from_secs(5), tx, 7u64);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_timer_skips_immediate_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = every(Duration::from_secs(30), tx, || "tick");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), "tick");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), "tick");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::default();
        slot.arm(1, after(Duration::from_secs(1), tx, 1u64));

        assert!(slot.cancel());
        assert!(!slot.cancel());
        assert!(!slot.is_armed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_firing_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel::<u64>();
        let mut slot = TimerSlot::default();
        slot.arm(1, after(Duration::from_secs(60), tx.clone(), 1));
        slot.arm(2, after(Duration::from_secs(60), tx, 2));

        assert!(!slot.fire(1));
        assert!(slot.fire(2));
        assert!(!slot.fire(2));
        assert!(!slot.is_armed());
    }
}
