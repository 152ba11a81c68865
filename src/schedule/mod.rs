//! Background schedulers: the reminder poller and the daily task digest.
//!
//! Both loops are independent tasks. They share nothing in memory and
//! coordinate only through the [`Store`](crate::store::Store).

pub mod digest;
pub mod reminders;
pub mod time;

pub use digest::{next_fire, DigestReport, DigestScheduler, DigestSettings};
pub use reminders::{CycleReport, ReminderScheduler};

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Fires the process-wide shutdown signal.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

/// Observes the shutdown signal. Loops only check it while sleeping, so a
/// delivery in flight always completes.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`. Returns true if shutdown fired first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration).await
    }

    /// Sleep until `deadline`. Returns true if shutdown fired first.
    pub async fn sleep_until(&mut self, deadline: Instant) -> bool {
        let stopped = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => false,
            // A dropped trigger counts as shutdown
            _ = self.rx.wait_for(|stop| *stop) => true,
        };
        stopped || self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_trigger() {
        let (_trigger, mut shutdown) = shutdown_channel();
        assert!(!shutdown.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_trigger_interrupts_sleep() {
        let (trigger, mut shutdown) = shutdown_channel();
        let waiter = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(3600)).await });
        trigger.trigger();
        let interrupted = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(interrupted);
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = shutdown_channel();
        drop(trigger);
        assert!(shutdown.sleep(Duration::from_secs(3600)).await);
    }
}
