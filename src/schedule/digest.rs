//! Daily task digest anchored to a civil time in a fixed zone.
//!
//! The loop computes the next fire instant from the zone's calendar, sleeps
//! until that absolute instant, sends one digest per assignee and then waits
//! a buffer before recomputing, so one target minute never fires twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use chrono_tz::Tz;
use teloxide::utils::html;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::{time, Shutdown};
use crate::directory::resolve_identity;
use crate::gateway::{Gateway, Identity};
use crate::notify::{DeliveryResult, Notifier};
use crate::store::{group_by_assignee, Store, StoreError, TaskGroup};

/// Shown when an assigner cannot be resolved.
pub const UNKNOWN_ASSIGNER: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct DigestSettings {
    pub zone: Tz,
    /// Civil time of day the digest fires.
    pub at: NaiveTime,
    /// Pause after a run before the next target is computed.
    pub buffer: Duration,
    /// Pause between two recipients, for platform rate limits.
    pub send_delay: Duration,
    /// Task lines shown per digest before summarizing the rest.
    pub max_lines: usize,
}

/// Aggregate outcome of one digest run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DigestReport {
    /// Distinct assignees with open tasks.
    pub recipients: usize,
    /// Delivered directly or through a fallback chat.
    pub notified: usize,
    /// Subset of `notified` that went through a fallback chat.
    pub fallback: usize,
    pub failed: usize,
    /// Assignees whose identity could not be resolved.
    pub skipped: usize,
}

impl fmt::Display for DigestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} notified ({} via group chat), {} failed, {} skipped, {} recipient(s)",
            self.notified, self.fallback, self.failed, self.skipped, self.recipients
        )
    }
}

/// One rendered task line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestLine {
    pub task_id: i64,
    pub text: String,
    pub assigner: Option<String>,
}

/// Next instant at which the local clock in `now`'s zone reads `at`.
///
/// Before `at` today that is today; at or after it, tomorrow. The result is
/// built from the zone's calendar, so the gap to it is exact across DST
/// changes.
pub fn next_fire(now: DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let at = time::truncate_to_minute(at);
    let today = now.date_naive();
    let date = if now.time() < at {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    };
    time::resolve_local(now.timezone(), date.and_time(at))
}

/// Render the digest for one assignee. `total` counts all of their open
/// tasks; lines beyond `lines` are summarized.
pub fn compose_digest(recipient: &Identity, lines: &[DigestLine], total: usize) -> String {
    let mut out = format!(
        "📋 <b>Daily task reminder</b>\nHi {}, you have {} open task{}:\n",
        html::escape(&recipient.display_name),
        total,
        if total == 1 { "" } else { "s" }
    );
    for line in lines {
        out.push_str(&format!(
            "\n<b>#{}</b>: {} <i>(from {})</i>",
            line.task_id,
            html::escape(&line.text),
            html::escape(line.assigner.as_deref().unwrap_or(UNKNOWN_ASSIGNER))
        ));
    }
    let hidden = total.saturating_sub(lines.len());
    if hidden > 0 {
        out.push_str(&format!("\n... and {hidden} more tasks"));
    }
    out
}

pub struct DigestScheduler {
    store: Arc<Store>,
    gateway: Arc<dyn Gateway>,
    notifier: Notifier,
    settings: DigestSettings,
}

impl DigestScheduler {
    pub fn new(store: Arc<Store>, gateway: Arc<dyn Gateway>, settings: DigestSettings) -> Self {
        let notifier = Notifier::new(Arc::clone(&gateway));
        Self { store, gateway, notifier, settings }
    }

    /// Send one digest per assignee with open tasks. Delivery problems are
    /// counted, never returned; only a store failure aborts the run.
    pub async fn send_digests(&self) -> Result<DigestReport, StoreError> {
        let groups = group_by_assignee(self.store.all_tasks().await?);
        let mut report = DigestReport {
            recipients: groups.len(),
            ..DigestReport::default()
        };
        // Assigner names, resolved at most once per run
        let mut names: HashMap<i64, Option<String>> = HashMap::new();

        for (index, group) in groups.iter().enumerate() {
            let recipient =
                resolve_identity(&self.store, self.gateway.as_ref(), group.assignee_id).await;
            let Some(recipient) = recipient else {
                debug!("Skipping digest for unresolvable user {}", group.assignee_id);
                report.skipped += 1;
                continue;
            };

            let lines = self.render_lines(group, &mut names).await;
            let payload = compose_digest(&recipient, &lines, group.tasks.len());

            match self.notifier.deliver(&recipient, &payload, &group.channels()).await {
                DeliveryResult::Direct => report.notified += 1,
                DeliveryResult::Fallback { .. } => {
                    report.notified += 1;
                    report.fallback += 1;
                }
                DeliveryResult::Failed => report.failed += 1,
            }

            if index + 1 < groups.len() && !self.settings.send_delay.is_zero() {
                tokio::time::sleep(self.settings.send_delay).await;
            }
        }

        info!("📋 Digest run: {}", report);
        Ok(report)
    }

    async fn render_lines(
        &self,
        group: &TaskGroup,
        names: &mut HashMap<i64, Option<String>>,
    ) -> Vec<DigestLine> {
        let mut lines = Vec::new();
        for task in group.tasks.iter().take(self.settings.max_lines) {
            let assigner = match names.get(&task.assigner_id) {
                Some(name) => name.clone(),
                None => {
                    let name = resolve_identity(&self.store, self.gateway.as_ref(), task.assigner_id)
                        .await
                        .map(|identity| identity.display_name);
                    names.insert(task.assigner_id, name.clone());
                    name
                }
            };
            lines.push(DigestLine {
                task_id: task.id,
                text: task.task.clone(),
                assigner,
            });
        }
        lines
    }

    /// Fire once a day until shutdown. Each run happens in its own task so
    /// a panic is logged instead of ending the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        let DigestSettings { zone, at, buffer, .. } = self.settings.clone();
        info!("📋 Digest scheduler started ({} {})", at.format("%H:%M"), zone);

        loop {
            let fire = next_fire(Utc::now().with_timezone(&zone), at);
            let wait = (fire.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            info!("Next digest at {} (in {}s)", fire, wait.as_secs());

            if shutdown.sleep_until(Instant::now() + wait).await {
                break;
            }

            let this = Arc::clone(&self);
            match tokio::spawn(async move { this.send_digests().await }).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Digest run failed: {}", e),
                Err(e) => error!("Digest run panicked: {}", e),
            }

            if shutdown.sleep(buffer).await {
                break;
            }
        }

        info!("Digest scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::{Africa::Cairo, America::New_York};

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn local(zone: Tz, y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Tz> {
        zone.with_ymd_and_hms(y, m, d, h, min, s).single().unwrap()
    }

    fn identity() -> Identity {
        Identity {
            user_id: 7,
            username: None,
            display_name: "Mona".to_string(),
            is_bot: false,
        }
    }

    #[test]
    fn test_before_noon_fires_today() {
        let now = local(Cairo, 2024, 1, 15, 9, 0, 0);
        assert_eq!(next_fire(now, noon()), local(Cairo, 2024, 1, 15, 12, 0, 0));
    }

    #[test]
    fn test_just_before_noon_fires_today() {
        let now = local(Cairo, 2024, 1, 15, 11, 59, 59);
        assert_eq!(next_fire(now, noon()), local(Cairo, 2024, 1, 15, 12, 0, 0));
    }

    #[test]
    fn test_at_noon_fires_tomorrow() {
        let now = local(Cairo, 2024, 1, 15, 12, 0, 0);
        assert_eq!(next_fire(now, noon()), local(Cairo, 2024, 1, 16, 12, 0, 0));
    }

    #[test]
    fn test_after_noon_fires_tomorrow_across_month_end() {
        let now = local(Cairo, 2024, 1, 31, 18, 30, 0);
        assert_eq!(next_fire(now, noon()), local(Cairo, 2024, 2, 1, 12, 0, 0));
    }

    #[test]
    fn test_spring_forward_wait_is_23_hours() {
        // New York skips 02:00-03:00 on 2024-03-10
        let now = local(New_York, 2024, 3, 9, 13, 0, 0);
        let fire = next_fire(now, noon());
        assert_eq!(fire.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 3, 10, 16, 0, 0).unwrap());
        assert_eq!((fire - now).num_hours(), 22);
        let day_after_noon = local(New_York, 2024, 3, 9, 12, 0, 0);
        assert_eq!((fire - day_after_noon).num_hours(), 23);
    }

    #[test]
    fn test_fall_back_wait_is_25_hours() {
        // New York repeats 01:00-02:00 on 2024-11-03
        let now = local(New_York, 2024, 11, 2, 12, 0, 0);
        let fire = next_fire(now, noon());
        assert_eq!(fire.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 11, 3, 17, 0, 0).unwrap());
        assert_eq!((fire - now).num_hours(), 25);
    }

    #[test]
    fn test_target_inside_gap_moves_forward() {
        let now = local(New_York, 2024, 3, 9, 23, 0, 0);
        let fire = next_fire(now, NaiveTime::from_hms_opt(2, 30, 0).unwrap());
        assert_eq!(fire, local(New_York, 2024, 3, 10, 3, 0, 0));
    }

    #[test]
    fn test_compose_lists_all_when_under_limit() {
        let lines = vec![
            DigestLine { task_id: 1, text: "fix <login>".into(), assigner: Some("Omar".into()) },
            DigestLine { task_id: 4, text: "review".into(), assigner: None },
        ];
        let text = compose_digest(&identity(), &lines, 2);
        assert!(text.contains("Hi Mona, you have 2 open tasks"));
        assert!(text.contains("<b>#1</b>: fix &lt;login&gt; <i>(from Omar)</i>"));
        assert!(text.contains("<b>#4</b>: review <i>(from Unknown)</i>"));
        assert!(!text.contains("more tasks"));
    }

    #[test]
    fn test_compose_summarizes_overflow() {
        let lines: Vec<DigestLine> = (1..=10)
            .map(|id| DigestLine { task_id: id, text: format!("t{id}"), assigner: None })
            .collect();
        let text = compose_digest(&identity(), &lines, 13);
        assert_eq!(text.matches("<b>#").count(), 10);
        assert!(text.ends_with("... and 3 more tasks"));
    }

    #[test]
    fn test_compose_singular() {
        let lines = vec![DigestLine { task_id: 1, text: "one".into(), assigner: None }];
        assert!(compose_digest(&identity(), &lines, 1).contains("1 open task:"));
    }

    #[test]
    fn test_report_display() {
        let report = DigestReport { recipients: 4, notified: 2, fallback: 1, failed: 1, skipped: 1 };
        assert_eq!(
            report.to_string(),
            "2 notified (1 via group chat), 1 failed, 1 skipped, 4 recipient(s)"
        );
    }
}
