use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

/// A periodic timer that fires a callback every `period` until cancelled or until the callback
///  returns `false`.
///
/// Each arming gets a new generation number that is passed to the callback. Owners that guard
///  their state with a lock cancel the timer under that lock, and the callback checks
///  [`RetransmitTimer::is_current`] under the same lock before acting. A tick that was already
///  in flight when the timer was cancelled is a no-op that way.
pub struct RetransmitTimer {
    period: Duration,
    next_generation: u64,
    armed: Option<(u64, JoinHandle<()>)>,
}

impl RetransmitTimer {
    pub fn new(period: Duration) -> RetransmitTimer {
        RetransmitTimer {
            period,
            next_generation: 0,
            armed: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// (Re-)arms the timer, cancelling a previous arming. The first tick is one full period
    ///  from now.
    pub fn arm<F, Fut>(&mut self, on_fire: F) -> u64
    where
        F: Fn(u64) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.cancel();

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);

        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                trace!("retransmission timer {} fired", generation);
                if !on_fire(generation).await {
                    break;
                }
            }
        });

        self.armed = Some((generation, handle));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some((generation, handle)) = self.armed.take() {
            trace!("cancelling retransmission timer {}", generation);
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        matches!(self.armed, Some((g, _)) if g == generation)
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(counter: &Arc<AtomicU32>, stop_after: u32) -> impl Fn(u64) -> std::future::Ready<bool> + Send + 'static {
        let counter = counter.clone();
        move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(n < stop_after)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_periodically() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut timer = RetransmitTimer::new(Duration::from_millis(100));
        timer.arm(counting(&counter, u32::MAX));

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_firing() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut timer = RetransmitTimer::new(Duration::from_millis(100));
        let generation = timer.arm(counting(&counter, u32::MAX));
        assert!(timer.is_current(generation));

        time::sleep(Duration::from_millis(150)).await;
        timer.cancel();
        assert!(!timer.is_armed());
        assert!(!timer.is_current(generation));

        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_returning_false_stops_timer() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut timer = RetransmitTimer::new(Duration::from_millis(10));
        timer.arm(counting(&counter, 3));

        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_generation() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut timer = RetransmitTimer::new(Duration::from_millis(100));
        let first = timer.arm(counting(&counter, u32::MAX));
        let second = timer.arm(counting(&counter, u32::MAX));

        assert_ne!(first, second);
        assert!(!timer.is_current(first));
        assert!(timer.is_current(second));

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let counter = Arc::new(AtomicU32::new(0));
        {
            let mut timer = RetransmitTimer::new(Duration::from_millis(100));
            timer.arm(counting(&counter, u32::MAX));
        }
        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
