//! Response-time SLA for patient messages.
//!
//! A reply is owed once a patient writes in and stays owed until any
//! outbound message is created after that inbound one. The status is a pure
//! projection of the thread and the current time, so it is recomputed on
//! every thread change and on a fixed tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::clock::Clock;
use super::domain::{parse_timestamp, Direction, Message, MessageStatus, ThreadSnapshot};
use super::error::MessagingError;

pub const DEFAULT_WARN_AFTER: Duration = Duration::from_secs(7 * 60);
pub const DEFAULT_BREACH_AFTER: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_TICK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaStatus {
    Ok,
    Warning,
    Breached,
}

impl SlaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlaStatus::Ok => "ok",
            SlaStatus::Warning => "warning",
            SlaStatus::Breached => "breached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaThresholds {
    pub warn_after: Duration,
    pub breach_after: Duration,
}

impl Default for SlaThresholds {
    fn default() -> Self {
        Self {
            warn_after: DEFAULT_WARN_AFTER,
            breach_after: DEFAULT_BREACH_AFTER,
        }
    }
}

impl SlaThresholds {
    pub fn new(warn_after: Duration, breach_after: Duration) -> Result<Self, MessagingError> {
        if warn_after.is_zero() || breach_after.is_zero() {
            return Err(MessagingError::Validation(
                "SLA thresholds must be positive".to_string(),
            ));
        }
        if warn_after > breach_after {
            return Err(MessagingError::Validation(format!(
                "SLA warning ({}s) must not come after breach ({}s)",
                warn_after.as_secs(),
                breach_after.as_secs()
            )));
        }
        Ok(Self {
            warn_after,
            breach_after,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaReport {
    pub status: SlaStatus,
    pub elapsed_ms: i64,
    /// Time left until breach. Negative once overdue.
    pub remaining_ms: i64,
    /// Inbound message that is waiting for a reply.
    pub awaiting: Option<String>,
}

impl SlaReport {
    fn nothing_owed(breach_ms: i64) -> Self {
        Self {
            status: SlaStatus::Ok,
            elapsed_ms: 0,
            remaining_ms: breach_ms,
            awaiting: None,
        }
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Computes the SLA status of a thread at `now`.
///
/// Messages whose timestamp does not parse are ignored, so a thread with
/// unreadable data degrades to `Ok` instead of raising an alarm. Failed
/// outbound sends never reached the patient and do not count as a reply.
pub fn compute_sla(messages: &[Message], now: DateTime<Utc>, thresholds: &SlaThresholds) -> SlaReport {
    let breach_ms = duration_ms(thresholds.breach_after);
    let warn_ms = duration_ms(thresholds.warn_after);

    let latest_inbound = messages
        .iter()
        .filter(|m| m.direction == Direction::Inbound)
        .filter_map(|m| parse_timestamp(&m.created_on).map(|at| (at, m)))
        .max_by_key(|(at, _)| *at);

    let Some((inbound_at, inbound)) = latest_inbound else {
        return SlaReport::nothing_owed(breach_ms);
    };

    let answered = messages.iter().any(|m| {
        m.direction == Direction::Outbound
            && m.status != MessageStatus::Failed
            && parse_timestamp(&m.created_on).is_some_and(|at| at > inbound_at)
    });
    if answered {
        return SlaReport::nothing_owed(breach_ms);
    }

    // An inbound timestamp ahead of the local clock counts as just received.
    let elapsed_ms = (now - inbound_at).num_milliseconds().max(0);
    let status = if elapsed_ms >= breach_ms {
        SlaStatus::Breached
    } else if elapsed_ms >= warn_ms {
        SlaStatus::Warning
    } else {
        SlaStatus::Ok
    };

    SlaReport {
        status,
        elapsed_ms,
        remaining_ms: breach_ms.saturating_sub(elapsed_ms),
        awaiting: Some(inbound.id.clone()),
    }
}

/// Background task keeping an [`SlaReport`] current for one thread.
///
/// Recomputes whenever the thread snapshot changes and on every tick, since
/// elapsed time moves even when the thread does not. The task ends when the
/// snapshot sender goes away or the monitor is dropped.
pub struct SlaMonitor {
    reports: watch::Receiver<SlaReport>,
    task: JoinHandle<()>,
}

impl SlaMonitor {
    pub fn spawn(
        mut snapshots: watch::Receiver<Arc<ThreadSnapshot>>,
        thresholds: SlaThresholds,
        tick: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let initial = {
            let snapshot = snapshots.borrow_and_update();
            compute_sla(&snapshot.messages, clock.now(), &thresholds)
        };
        let (tx, reports) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            tracing::debug!(component = "sla.monitor", "thread closed, stopping");
                            break;
                        }
                    }
                }

                let snapshot = snapshots.borrow_and_update().clone();
                let report = compute_sla(&snapshot.messages, clock.now(), &thresholds);
                let previous = tx.borrow().status;
                if previous != report.status {
                    tracing::info!(
                        component = "sla.monitor",
                        conversation_id = snapshot.conversation_id.as_deref().unwrap_or_default(),
                        from = previous.as_str(),
                        to = report.status.as_str(),
                        elapsed_ms = report.elapsed_ms,
                        remaining_ms = report.remaining_ms,
                        "sla status changed"
                    );
                }
                tx.send_replace(report);
            }
        });

        Self { reports, task }
    }

    pub fn current(&self) -> SlaReport {
        self.reports.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SlaReport> {
        self.reports.clone()
    }
}

impl Drop for SlaMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::clock::ManualClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 12, 9, 0, 0).unwrap()
    }

    fn msg(id: &str, direction: Direction, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            direction,
            body: "body".to_string(),
            status: MessageStatus::Delivered,
            created_on: crate::messaging::domain::format_timestamp(at),
            error_code: None,
            error_message: None,
            client_id: None,
        }
    }

    fn minutes(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    #[test]
    fn unanswered_inbound_past_breach_is_breached() {
        let messages = vec![msg("m1", Direction::Inbound, t0())];
        let report = compute_sla(&messages, t0() + minutes(11), &SlaThresholds::default());

        assert_eq!(report.status, SlaStatus::Breached);
        assert_eq!(report.elapsed_ms, 660_000);
        assert_eq!(report.remaining_ms, -60_000);
        assert_eq!(report.awaiting.as_deref(), Some("m1"));
    }

    #[test]
    fn later_outbound_means_answered_regardless_of_age() {
        let messages = vec![
            msg("m1", Direction::Inbound, t0()),
            msg("m2", Direction::Outbound, t0() + minutes(5)),
        ];
        let report = compute_sla(&messages, t0() + minutes(20), &SlaThresholds::default());

        assert_eq!(report.status, SlaStatus::Ok);
        assert_eq!(report.awaiting, None);
    }

    #[test]
    fn warning_window_between_thresholds() {
        let messages = vec![
            msg("m0", Direction::Outbound, t0() - minutes(30)),
            msg("m1", Direction::Inbound, t0()),
        ];
        let thresholds = SlaThresholds::default();

        assert_eq!(compute_sla(&messages, t0() + minutes(6), &thresholds).status, SlaStatus::Ok);
        assert_eq!(compute_sla(&messages, t0() + minutes(7), &thresholds).status, SlaStatus::Warning);
        assert_eq!(compute_sla(&messages, t0() + minutes(10), &thresholds).status, SlaStatus::Breached);
    }

    #[test]
    fn no_inbound_is_ok() {
        let messages = vec![msg("m1", Direction::Outbound, t0())];
        let report = compute_sla(&messages, t0() + minutes(60), &SlaThresholds::default());
        assert_eq!(report.status, SlaStatus::Ok);
        assert_eq!(report.remaining_ms, 600_000);
        assert_eq!(compute_sla(&[], t0(), &SlaThresholds::default()).status, SlaStatus::Ok);
    }

    #[test]
    fn outbound_with_same_timestamp_does_not_answer() {
        let messages = vec![
            msg("m1", Direction::Inbound, t0()),
            msg("m2", Direction::Outbound, t0()),
        ];
        let report = compute_sla(&messages, t0() + minutes(12), &SlaThresholds::default());
        assert_eq!(report.status, SlaStatus::Breached);
    }

    #[test]
    fn failed_reply_does_not_count() {
        let mut reply = msg("m2", Direction::Outbound, t0() + minutes(1));
        reply.status = MessageStatus::Failed;
        let messages = vec![msg("m1", Direction::Inbound, t0()), reply];

        let report = compute_sla(&messages, t0() + minutes(8), &SlaThresholds::default());
        assert_eq!(report.status, SlaStatus::Warning);
    }

    #[test]
    fn malformed_timestamps_fail_safe_to_ok() {
        let mut inbound = msg("m1", Direction::Inbound, t0());
        inbound.created_on = "not-a-date".to_string();
        let report = compute_sla(&[inbound], t0() + minutes(30), &SlaThresholds::default());
        assert_eq!(report.status, SlaStatus::Ok);
        assert_eq!(report.awaiting, None);
    }

    #[test]
    fn custom_thresholds_are_honored() {
        let thresholds =
            SlaThresholds::new(Duration::from_secs(60), Duration::from_secs(120)).expect("valid");
        let messages = vec![msg("m1", Direction::Inbound, t0())];
        let report = compute_sla(&messages, t0() + minutes(2), &thresholds);
        assert_eq!(report.status, SlaStatus::Breached);
        assert_eq!(report.remaining_ms, 0);
    }

    #[test]
    fn thresholds_reject_inverted_order() {
        let err = SlaThresholds::new(Duration::from_secs(600), Duration::from_secs(60))
            .expect_err("warn after breach");
        assert!(matches!(err, MessagingError::Validation(_)));
        assert!(SlaThresholds::new(Duration::ZERO, Duration::from_secs(60)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_escalates_on_tick_without_thread_changes() {
        let clock = Arc::new(ManualClock::new(t0()));
        let snapshot = ThreadSnapshot {
            conversation_id: Some("conv-1".to_string()),
            messages: vec![msg("m1", Direction::Inbound, t0())],
            has_more: false,
            version: 1,
        };
        let (_snapshots_tx, snapshots_rx) = watch::channel(Arc::new(snapshot));

        let monitor = SlaMonitor::spawn(
            snapshots_rx,
            SlaThresholds::default(),
            DEFAULT_TICK,
            clock.clone(),
        );
        assert_eq!(monitor.current().status, SlaStatus::Ok);

        clock.advance(minutes(8));
        let mut reports = monitor.subscribe();
        let status = tokio::time::timeout(
            Duration::from_secs(120),
            reports.wait_for(|r| r.status == SlaStatus::Warning),
        )
        .await
        .expect("tick within timeout")
        .expect("monitor alive")
        .status;
        assert_eq!(status, SlaStatus::Warning);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_recomputes_on_thread_change() {
        let clock = Arc::new(ManualClock::new(t0() + minutes(15)));
        let (snapshots_tx, snapshots_rx) = watch::channel(Arc::new(ThreadSnapshot::default()));

        let monitor = SlaMonitor::spawn(
            snapshots_rx,
            SlaThresholds::default(),
            Duration::from_secs(3600),
            clock,
        );
        assert_eq!(monitor.current().status, SlaStatus::Ok);

        snapshots_tx.send_replace(Arc::new(ThreadSnapshot {
            conversation_id: Some("conv-1".to_string()),
            messages: vec![msg("m1", Direction::Inbound, t0())],
            has_more: false,
            version: 1,
        }));

        let mut reports = monitor.subscribe();
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            reports.wait_for(|r| r.status == SlaStatus::Breached),
        )
        .await
        .expect("recompute within timeout")
        .expect("monitor alive")
        .clone();
        assert_eq!(report.awaiting.as_deref(), Some("m1"));
    }
}
