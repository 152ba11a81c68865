//! Reminder poller: fires due reminders once, then forgets them.

use std::sync::Arc;
use std::time::Duration;

use teloxide::utils::html;
use tracing::{debug, error, info, warn};

use super::{time, Shutdown};
use crate::gateway::Gateway;
use crate::store::{Reminder, Store, StoreError};

/// Outcome counts of one polling cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Deleted without an attempt because the channel is gone.
    pub dropped: usize,
}

pub fn format_reminder(reminder: &Reminder) -> String {
    format!(
        "⏰ Reminder: {} (scheduled for {} UTC)",
        html::escape(&reminder.message),
        reminder.when_utc
    )
}

pub struct ReminderScheduler {
    store: Arc<Store>,
    gateway: Arc<dyn Gateway>,
    interval: Duration,
}

impl ReminderScheduler {
    pub fn new(store: Arc<Store>, gateway: Arc<dyn Gateway>, interval: Duration) -> Self {
        Self { store, gateway, interval }
    }

    /// Deliver every reminder due at `now_utc` and delete it, whatever the
    /// delivery outcome. A crash between send and delete may repeat one
    /// delivery after restart.
    pub async fn run_cycle(&self, now_utc: &str) -> Result<CycleReport, StoreError> {
        let due = self.store.due_reminders(now_utc).await?;
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        info!("Firing {} due reminder(s) at {} UTC", due.len(), now_utc);

        for reminder in due {
            let reachable = match self.gateway.channel_exists(reminder.channel_id).await {
                Ok(exists) => exists,
                Err(e) => {
                    // Unknown is not gone; let the send decide
                    warn!("Could not check chat {} for reminder #{}: {}", reminder.channel_id, reminder.id, e);
                    true
                }
            };

            if reachable {
                match self
                    .gateway
                    .send_to_channel(reminder.channel_id, &format_reminder(&reminder))
                    .await
                {
                    Ok(()) => {
                        report.delivered += 1;
                        info!("Sent reminder #{} to chat {}", reminder.id, reminder.channel_id);
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!("Failed to send reminder #{}: {}", reminder.id, e);
                    }
                }
            } else {
                report.dropped += 1;
                debug!("Chat {} is gone, dropping reminder #{}", reminder.channel_id, reminder.id);
            }

            if let Err(e) = self.store.delete_reminder(reminder.id).await {
                error!("Failed to delete reminder #{} after attempt: {}", reminder.id, e);
            }
        }

        Ok(report)
    }

    /// Poll until shutdown. Each cycle runs in its own task so a panic is
    /// logged instead of ending the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        info!("⏰ Reminder scheduler started (every {}s)", self.interval.as_secs());

        while !shutdown.is_triggered() {
            let now = time::now_utc_minute();
            let this = Arc::clone(&self);
            match tokio::spawn(async move { this.run_cycle(&now).await }).await {
                Ok(Ok(report)) if report.due > 0 => info!("Reminder cycle: {:?}", report),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Reminder cycle failed: {}", e),
                Err(e) => error!("Reminder cycle panicked: {}", e),
            }

            if shutdown.sleep(self.interval).await {
                break;
            }
        }

        info!("Reminder scheduler stopped");
    }
}
