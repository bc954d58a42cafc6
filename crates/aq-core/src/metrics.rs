//! Per-course metrics, student identity and the behavior aggregate.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::IdentityUpdate;
use crate::types::CourseId;

/// Who the student is, as scraped from the LMS profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub enrollment_year: Option<String>,
}

impl StudentIdentity {
    /// Overwrites fields for which the update carries a value.
    pub fn apply(&mut self, update: IdentityUpdate) {
        if update.student_id.is_some() {
            self.student_id = update.student_id;
        }
        if update.program.is_some() {
            self.program = update.program;
        }
        if update.enrollment_year.is_some() {
            self.enrollment_year = update.enrollment_year;
        }
    }
}

/// Aggregated metrics for one course.
///
/// Every counter is monotonic: the only operations on them are
/// [`increment_course_metric`], [`raise_course_metric`] and [`add_time_spent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseMetrics {
    pub course_id: CourseId,
    #[serde(default)]
    pub course_name: String,
    #[serde(default)]
    pub total_visits: u64,
    #[serde(default)]
    pub total_time_spent_seconds: u64,
    #[serde(default)]
    pub number_of_resources_clicked: u64,
    #[serde(default)]
    pub number_of_assignments_viewed: u64,
    #[serde(default)]
    pub number_of_quizzes_viewed: u64,
    #[serde(default)]
    pub quiz_attempts: u64,
    #[serde(default)]
    pub assignment_submissions: u64,
    #[serde(default)]
    pub click_count: u64,
    #[serde(default)]
    pub active_days_count: u64,
    #[serde(default)]
    pub last_access_time: Option<DateTime<Utc>>,
}

impl CourseMetrics {
    /// Creates a record with every counter zeroed.
    pub fn new(course_id: CourseId, course_name: impl Into<String>) -> Self {
        Self {
            course_id,
            course_name: course_name.into(),
            total_visits: 0,
            total_time_spent_seconds: 0,
            number_of_resources_clicked: 0,
            number_of_assignments_viewed: 0,
            number_of_quizzes_viewed: 0,
            quiz_attempts: 0,
            assignment_submissions: 0,
            click_count: 0,
            active_days_count: 0,
            last_access_time: None,
        }
    }

    fn counter_mut(&mut self, field: MetricField) -> &mut u64 {
        match field {
            MetricField::TotalVisits => &mut self.total_visits,
            MetricField::ResourcesClicked => &mut self.number_of_resources_clicked,
            MetricField::AssignmentsViewed => &mut self.number_of_assignments_viewed,
            MetricField::QuizzesViewed => &mut self.number_of_quizzes_viewed,
            MetricField::QuizAttempts => &mut self.quiz_attempts,
            MetricField::AssignmentSubmissions => &mut self.assignment_submissions,
            MetricField::ClickCount => &mut self.click_count,
        }
    }
}

/// Event-count fields of [`CourseMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    TotalVisits,
    ResourcesClicked,
    AssignmentsViewed,
    QuizzesViewed,
    QuizAttempts,
    AssignmentSubmissions,
    ClickCount,
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TotalVisits => "total_visits",
            Self::ResourcesClicked => "number_of_resources_clicked",
            Self::AssignmentsViewed => "number_of_assignments_viewed",
            Self::QuizzesViewed => "number_of_quizzes_viewed",
            Self::QuizAttempts => "quiz_attempts",
            Self::AssignmentSubmissions => "assignment_submissions",
            Self::ClickCount => "click_count",
        };
        f.write_str(s)
    }
}

/// Registers a course, or refreshes its name when a non-empty different one
/// arrives. Returns the (possibly new) record.
pub fn merge_course<'a>(
    store: &'a mut BTreeMap<CourseId, CourseMetrics>,
    course_id: &CourseId,
    course_name: Option<&str>,
) -> &'a mut CourseMetrics {
    let name = course_name.map(str::trim).filter(|n| !n.is_empty());
    let metrics = store
        .entry(course_id.clone())
        .or_insert_with(|| CourseMetrics::new(course_id.clone(), name.unwrap_or_default()));
    if let Some(name) = name {
        if metrics.course_name != name {
            metrics.course_name = name.to_string();
        }
    }
    metrics
}

/// Adds exactly one to `field`. Call once per qualifying signal.
pub fn increment_course_metric(metrics: &mut CourseMetrics, field: MetricField, reason: &str) {
    let counter = metrics.counter_mut(field);
    *counter = counter.saturating_add(1);
    tracing::trace!(course_id = %metrics.course_id, %field, reason, "incremented course metric");
}

/// Max-merge: raises `field` to `estimate` when an independent signal
/// estimates a higher count. Never lowers a counter.
pub fn raise_course_metric(metrics: &mut CourseMetrics, field: MetricField, estimate: u64) {
    let counter = metrics.counter_mut(field);
    if estimate > *counter {
        *counter = estimate;
    }
}

/// Accumulates whole seconds into the course total; non-positive durations are ignored.
pub fn add_time_spent(metrics: &mut CourseMetrics, seconds: i64) {
    if let Ok(seconds) = u64::try_from(seconds) {
        metrics.total_time_spent_seconds = metrics.total_time_spent_seconds.saturating_add(seconds);
    }
}

/// Converts a millisecond duration to whole seconds, rounding half up.
pub const fn round_ms_to_seconds(ms: i64) -> i64 {
    if ms <= 0 { 0 } else { (ms + 500) / 1000 }
}

/// Process-wide activity aggregate, derived from the session tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorAggregate {
    #[serde(default)]
    pub total_time_spent_on_moodle: u64,
    #[serde(default)]
    pub active_days_count: u64,
    #[serde(default)]
    pub session_count: u64,
    /// Mean duration of finished sessions, in seconds.
    #[serde(default)]
    pub average_session_duration: f64,
    #[serde(default)]
    pub clicks_per_session: f64,
    /// Up to three hours of day (0-23), most active first.
    #[serde(default)]
    pub peak_activity_hours: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(id: &str) -> CourseId {
        CourseId::new(id).unwrap()
    }

    #[test]
    fn merge_course_creates_zeroed_record() {
        let mut store = BTreeMap::new();
        let metrics = merge_course(&mut store, &course("101"), Some("Algorithms"));
        assert_eq!(metrics.course_name, "Algorithms");
        assert_eq!(metrics.total_visits, 0);
        assert_eq!(metrics.total_time_spent_seconds, 0);
        assert!(metrics.last_access_time.is_none());
    }

    #[test]
    fn merge_course_keeps_name_when_incoming_is_blank() {
        let mut store = BTreeMap::new();
        merge_course(&mut store, &course("101"), Some("Algorithms"));
        merge_course(&mut store, &course("101"), Some("   "));
        merge_course(&mut store, &course("101"), None);
        assert_eq!(store[&course("101")].course_name, "Algorithms");

        merge_course(&mut store, &course("101"), Some("Algorithms II"));
        assert_eq!(store[&course("101")].course_name, "Algorithms II");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn raise_never_lowers() {
        let mut metrics = CourseMetrics::new(course("1"), "");
        raise_course_metric(&mut metrics, MetricField::QuizAttempts, 3);
        raise_course_metric(&mut metrics, MetricField::QuizAttempts, 1);
        assert_eq!(metrics.quiz_attempts, 3);
        increment_course_metric(&mut metrics, MetricField::QuizAttempts, "grade row");
        assert_eq!(metrics.quiz_attempts, 4);
    }

    #[test]
    fn time_rounding() {
        assert_eq!(round_ms_to_seconds(10_000), 10);
        assert_eq!(round_ms_to_seconds(1_499), 1);
        assert_eq!(round_ms_to_seconds(1_500), 2);
        assert_eq!(round_ms_to_seconds(400), 0);
        assert_eq!(round_ms_to_seconds(-5_000), 0);
    }

    #[test]
    fn add_time_ignores_non_positive() {
        let mut metrics = CourseMetrics::new(course("1"), "");
        add_time_spent(&mut metrics, 12);
        add_time_spent(&mut metrics, 0);
        add_time_spent(&mut metrics, -4);
        assert_eq!(metrics.total_time_spent_seconds, 12);
    }

    #[test]
    fn identity_overwrites_only_present_fields() {
        let mut identity = StudentIdentity::default();
        identity.apply(IdentityUpdate {
            student_id: Some("s-1".into()),
            program: Some("CS".into()),
            enrollment_year: None,
        });
        identity.apply(IdentityUpdate {
            student_id: None,
            program: Some("SE".into()),
            enrollment_year: Some("2022".into()),
        });
        assert_eq!(identity.student_id.as_deref(), Some("s-1"));
        assert_eq!(identity.program.as_deref(), Some("SE"));
        assert_eq!(identity.enrollment_year.as_deref(), Some("2022"));
    }
}
