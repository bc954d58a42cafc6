//! Session tracking: session boundaries, active days and peak hours.
//!
//! There is a single global session per student. A signal arriving more than
//! the idle timeout after the previous one closes the open session and starts
//! a new one; the closed session's duration and clicks are folded into the
//! running means on [`BehaviorAggregate`](crate::BehaviorAggregate), weighted
//! by the post-increment `session_count`. The last session stays open until a
//! later one starts.

use chrono::{DateTime, Timelike, Utc};

use crate::aggregator::AggregatorConfig;
use crate::metrics::round_ms_to_seconds;
use crate::snapshot::{HourCount, Snapshot, day_key};

/// How many hours `peak_activity_hours` reports.
const PEAK_HOURS: usize = 3;

/// What a signal did to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// The very first signal opened the first session.
    Started,
    /// The idle gap was exceeded: the previous session closed and a new one opened.
    Restarted {
        /// Duration of the closed session, in whole seconds.
        closed_duration_secs: i64,
        closed_clicks: u64,
    },
    /// The signal fell inside the open session.
    Continued,
}

/// Feeds one timestamped activity signal into the tracker.
pub fn record_activity(
    snapshot: &mut Snapshot,
    at: DateTime<Utc>,
    is_click: bool,
    config: &AggregatorConfig,
) -> SessionTransition {
    record_day_and_hour(snapshot, at, config);

    let meta = &mut snapshot.meta;
    let behavior = &mut snapshot.behavior;

    let transition = match meta.last_activity {
        None => SessionTransition::Started,
        Some(last) if at - last > config.session_timeout => {
            let start = meta.session_start.unwrap_or(last);
            SessionTransition::Restarted {
                closed_duration_secs: round_ms_to_seconds((last - start).num_milliseconds()),
                closed_clicks: meta.session_clicks,
            }
        }
        Some(_) => SessionTransition::Continued,
    };

    match transition {
        SessionTransition::Started | SessionTransition::Restarted { .. } => {
            behavior.session_count += 1;
            if let SessionTransition::Restarted {
                closed_duration_secs,
                closed_clicks,
            } = transition
            {
                let n = behavior.session_count as f64;
                behavior.average_session_duration = incremental_mean(
                    behavior.average_session_duration,
                    closed_duration_secs as f64,
                    n,
                );
                behavior.clicks_per_session =
                    incremental_mean(behavior.clicks_per_session, closed_clicks as f64, n);
                tracing::debug!(
                    closed_duration_secs,
                    closed_clicks,
                    session_count = behavior.session_count,
                    "session boundary"
                );
            }
            meta.session_start = Some(at);
            meta.session_clicks = 0;
            meta.last_activity = Some(at);
        }
        SessionTransition::Continued => {
            // Late deliveries never move the activity marker backwards.
            if meta.last_activity.is_none_or(|last| at > last) {
                meta.last_activity = Some(at);
            }
        }
    }

    if is_click {
        meta.session_clicks += 1;
    }
    transition
}

/// `new = (old * (n - 1) + sample) / n`.
fn incremental_mean(old: f64, sample: f64, n: f64) -> f64 {
    if n <= 0.0 {
        return sample;
    }
    old.mul_add(n - 1.0, sample) / n
}

fn record_day_and_hour(snapshot: &mut Snapshot, at: DateTime<Utc>, config: &AggregatorConfig) {
    let meta = &mut snapshot.meta;
    meta.active_days.insert(day_key(at));
    snapshot.behavior.active_days_count = meta.active_days.len() as u64;

    let hour = at.with_timezone(&config.local_offset).hour();
    match meta.hour_histogram.iter_mut().find(|b| b.hour == hour) {
        Some(bucket) => bucket.count += 1,
        None => meta.hour_histogram.push(HourCount { hour, count: 1 }),
    }
    snapshot.behavior.peak_activity_hours = peak_hours(&meta.hour_histogram);
}

/// Top hours by descending count; ties keep first-seen order.
pub fn peak_hours(histogram: &[HourCount]) -> Vec<u32> {
    let mut buckets = histogram.to_vec();
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets.into_iter().take(PEAK_HOURS).map(|b| b.hour).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset, TimeZone};

    use super::*;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn config() -> AggregatorConfig {
        AggregatorConfig {
            session_timeout: Duration::minutes(30),
            local_offset: FixedOffset::east_opt(0).expect("valid offset"),
        }
    }

    #[test]
    fn first_signal_starts_session() {
        let mut snapshot = Snapshot::default();
        let t = record_activity(&mut snapshot, ts(0), false, &config());
        assert_eq!(t, SessionTransition::Started);
        assert_eq!(snapshot.behavior.session_count, 1);
    }

    #[test]
    fn signals_within_timeout_continue_session() {
        let mut snapshot = Snapshot::default();
        record_activity(&mut snapshot, ts(0), false, &config());
        let t = record_activity(&mut snapshot, ts(5), true, &config());
        assert_eq!(t, SessionTransition::Continued);
        assert_eq!(snapshot.behavior.session_count, 1);
        assert_eq!(snapshot.meta.session_clicks, 1);
    }

    #[test]
    fn gap_over_timeout_starts_new_session() {
        let mut snapshot = Snapshot::default();
        record_activity(&mut snapshot, ts(0), true, &config());
        record_activity(&mut snapshot, ts(10), true, &config());
        let t = record_activity(&mut snapshot, ts(41), false, &config());

        assert_eq!(
            t,
            SessionTransition::Restarted {
                closed_duration_secs: 600,
                closed_clicks: 2
            }
        );
        assert_eq!(snapshot.behavior.session_count, 2);
        // (0 * 1 + 600) / 2 and (0 * 1 + 2) / 2.
        assert!((snapshot.behavior.average_session_duration - 300.0).abs() < f64::EPSILON);
        assert!((snapshot.behavior.clicks_per_session - 1.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.meta.session_start, Some(ts(41)));
        assert_eq!(snapshot.meta.session_clicks, 0);
    }

    #[test]
    fn gap_equal_to_timeout_continues() {
        let mut snapshot = Snapshot::default();
        record_activity(&mut snapshot, ts(0), false, &config());
        let t = record_activity(&mut snapshot, ts(30), false, &config());
        assert_eq!(t, SessionTransition::Continued);
    }

    #[test]
    fn averages_are_weighted_by_session_count() {
        let mut snapshot = Snapshot::default();
        // Session 1: 0..10 minutes. Session 2: 60..80 minutes. Session 3 opens at 200.
        record_activity(&mut snapshot, ts(0), false, &config());
        record_activity(&mut snapshot, ts(10), false, &config());
        record_activity(&mut snapshot, ts(60), false, &config());
        record_activity(&mut snapshot, ts(80), false, &config());
        record_activity(&mut snapshot, ts(200), false, &config());

        // After session 2 opens: (0 * 1 + 600) / 2 = 300.
        // After session 3 opens: (300 * 2 + 1200) / 3 = 600.
        assert_eq!(snapshot.behavior.session_count, 3);
        assert!((snapshot.behavior.average_session_duration - 600.0).abs() < 1e-9);
    }

    #[test]
    fn closed_duration_rounds_to_nearest_second() {
        let mut snapshot = Snapshot::default();
        record_activity(&mut snapshot, ts(0), false, &config());
        record_activity(&mut snapshot, ts(0) + Duration::milliseconds(1_900), false, &config());
        let t = record_activity(&mut snapshot, ts(40), false, &config());
        assert_eq!(
            t,
            SessionTransition::Restarted {
                closed_duration_secs: 2,
                closed_clicks: 0
            }
        );
    }

    #[test]
    fn late_signal_does_not_rewind_activity() {
        let mut snapshot = Snapshot::default();
        record_activity(&mut snapshot, ts(10), false, &config());
        record_activity(&mut snapshot, ts(5), false, &config());
        assert_eq!(snapshot.meta.last_activity, Some(ts(10)));
    }

    #[test]
    fn active_days_and_peak_hours() {
        let mut snapshot = Snapshot::default();
        // 09:00 x1, 10:00 x2, 11:00 x2, 12:00 x1, next day 09:00.
        for minutes in [0, 60, 70, 120, 130, 180, 24 * 60] {
            record_activity(&mut snapshot, ts(minutes), false, &config());
        }
        assert_eq!(snapshot.behavior.active_days_count, 2);
        // 9 has 2 hits (first seen), 10 and 11 have 2 hits each: ties keep first-seen order.
        assert_eq!(snapshot.behavior.peak_activity_hours, vec![9, 10, 11]);
    }

    #[test]
    fn peak_hours_use_local_offset() {
        let mut snapshot = Snapshot::default();
        let config = AggregatorConfig {
            local_offset: FixedOffset::east_opt(3 * 3600).expect("valid offset"),
            ..config()
        };
        record_activity(&mut snapshot, ts(0), false, &config);
        assert_eq!(snapshot.behavior.peak_activity_hours, vec![12]);
    }

    #[test]
    fn peak_hours_ties_keep_formation_order() {
        let histogram = [
            HourCount { hour: 22, count: 1 },
            HourCount { hour: 8, count: 3 },
            HourCount { hour: 14, count: 1 },
            HourCount { hour: 6, count: 1 },
        ];
        assert_eq!(peak_hours(&histogram), vec![8, 22, 14]);
    }
}
