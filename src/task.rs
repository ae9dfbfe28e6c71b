//! Cancelable periodic tasks and the liveness token that guards late results.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shared flag an owner revokes on teardown.
///
/// Requests that were already in flight when the owner went away still
/// resolve; they check this before touching state.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed-period timer that spawns one job per tick.
///
/// The first tick fires immediately. Jobs run in their own tasks, so a job
/// slower than the period overlaps with the next one. Cancelling (or
/// dropping) the task stops future ticks; jobs already spawned run to
/// completion and must check their owner's [`Liveness`].
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tokio::spawn(job());
            }
        });
        log::debug!("Started periodic task {} ({:?})", name, period);
        Self { name, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            log::debug!("Cancelling periodic task {}", self.name);
            self.handle.abort();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(period: Duration) -> (PeriodicTask, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = PeriodicTask::spawn("test", period, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_immediately_then_every_period() {
        let (task, ticks) = counting_task(Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_ticks() {
        let (task, ticks) = counting_task(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_task_cancels_it() {
        let (task, ticks) = counting_task(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(task);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn liveness_is_shared_between_clones() {
        let owner = Liveness::new();
        let job = owner.clone();
        assert!(job.is_alive());
        owner.revoke();
        assert!(!job.is_alive());
    }
}
