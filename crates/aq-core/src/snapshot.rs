//! The persisted aggregation state.
//!
//! A [`Snapshot`] is stored as one keyed record. Field names match the layout
//! that dashboard and popup consumers read (`metricsByCourse`, `_meta`, ...).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::{
    BehaviorAggregate, CourseMetrics, MetricField, StudentIdentity, merge_course,
    raise_course_metric,
};
use crate::records::{EventLog, GradeRecord, KnowledgeBase, MaterialRecord, MaterialRow};
use crate::types::CourseId;

/// Full aggregation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub student: StudentIdentity,
    #[serde(rename = "metricsByCourse", default)]
    pub metrics_by_course: BTreeMap<CourseId, CourseMetrics>,
    #[serde(rename = "materialsByCourse", default)]
    pub materials_by_course: BTreeMap<CourseId, Vec<MaterialRow>>,
    /// Array mirror of `metricsByCourse`, ordered by course id.
    #[serde(default)]
    pub courses: Vec<CourseMetrics>,
    #[serde(default)]
    pub behavior: BehaviorAggregate,
    #[serde(default)]
    pub events: EventLog,
    #[serde(default)]
    pub grades: Vec<GradeRecord>,
    #[serde(default)]
    pub learning_materials: Vec<MaterialRecord>,
    #[serde(default)]
    pub knowledge_base: KnowledgeBase,
    #[serde(rename = "_meta", default)]
    pub meta: Meta,
}

/// Internal bookkeeping that consumers should not rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// UTC day keys (`YYYY-MM-DD`) with any tracked activity.
    #[serde(default)]
    pub active_days: BTreeSet<String>,
    /// Per-course UTC day keys.
    #[serde(default)]
    pub course_days: BTreeMap<CourseId, BTreeSet<String>>,
    /// Local hour-of-day histogram, in the order hours were first seen.
    #[serde(default)]
    pub hour_histogram: Vec<HourCount>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_clicks: u64,
    /// Independent per-source estimates feeding max-merged counters.
    #[serde(default)]
    pub estimates: BTreeMap<CourseId, CourseEstimates>,
}

/// One histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: u64,
}

/// Which producer signal an estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateSource {
    /// New page visits of a matching page type.
    PageVisit,
    /// Interaction actions of a matching type.
    Interaction,
}

/// Per-course estimate tallies, one map per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEstimates {
    #[serde(default)]
    pub page_visit: BTreeMap<MetricField, u64>,
    #[serde(default)]
    pub interaction: BTreeMap<MetricField, u64>,
}

impl Snapshot {
    /// Registers activity on a course: refreshes name, day set and access time.
    pub fn touch_course(
        &mut self,
        course_id: &CourseId,
        course_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> &mut CourseMetrics {
        let days = self.meta.course_days.entry(course_id.clone()).or_default();
        days.insert(day_key(at));
        let day_count = days.len() as u64;

        let metrics = merge_course(&mut self.metrics_by_course, course_id, course_name);
        metrics.active_days_count = metrics.active_days_count.max(day_count);
        metrics.last_access_time = Some(at);
        metrics
    }

    /// Tallies one observation from `source` and max-merges it into `field`.
    pub fn record_estimate(&mut self, course_id: &CourseId, field: MetricField, source: EstimateSource) {
        let estimates = self.meta.estimates.entry(course_id.clone()).or_default();
        let tally = match source {
            EstimateSource::PageVisit => &mut estimates.page_visit,
            EstimateSource::Interaction => &mut estimates.interaction,
        };
        let count = tally.entry(field).or_insert(0);
        *count += 1;
        let estimate = *count;

        let metrics = merge_course(&mut self.metrics_by_course, course_id, None);
        raise_course_metric(metrics, field, estimate);
    }

    /// Rebuilds the `courses` array from `metricsByCourse`.
    pub fn refresh_courses(&mut self) {
        self.courses = self.metrics_by_course.values().cloned().collect();
    }

    /// Removes one course's metrics. Logs, materials and the behavior
    /// aggregate are left untouched.
    pub fn clear_course(&mut self, course_id: &CourseId) -> bool {
        let removed = self.metrics_by_course.remove(course_id).is_some();
        self.meta.course_days.remove(course_id);
        self.meta.estimates.remove(course_id);
        self.refresh_courses();
        removed
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.metrics_by_course.is_empty()
            && self.events.is_empty()
            && self.grades.is_empty()
            && self.learning_materials.is_empty()
            && self.student == StudentIdentity::default()
    }
}

/// Calendar-day key in UTC.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(id: &str) -> CourseId {
        CourseId::new(id).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn touch_course_counts_distinct_days() {
        let mut snapshot = Snapshot::default();
        let day = 86_400_000;
        snapshot.touch_course(&course("1"), Some("Intro"), at(0));
        snapshot.touch_course(&course("1"), None, at(1_000));
        snapshot.touch_course(&course("1"), None, at(day + 5));

        let metrics = &snapshot.metrics_by_course[&course("1")];
        assert_eq!(metrics.active_days_count, 2);
        assert_eq!(metrics.last_access_time, Some(at(day + 5)));
        assert_eq!(metrics.course_name, "Intro");
    }

    #[test]
    fn estimates_max_merge_across_sources() {
        let mut snapshot = Snapshot::default();
        let id = course("1");
        snapshot.record_estimate(&id, MetricField::QuizzesViewed, EstimateSource::PageVisit);
        snapshot.record_estimate(&id, MetricField::QuizzesViewed, EstimateSource::Interaction);
        snapshot.record_estimate(&id, MetricField::QuizzesViewed, EstimateSource::Interaction);
        snapshot.record_estimate(&id, MetricField::QuizzesViewed, EstimateSource::PageVisit);

        assert_eq!(snapshot.metrics_by_course[&id].number_of_quizzes_viewed, 2);
    }

    #[test]
    fn clear_course_leaves_other_courses() {
        let mut snapshot = Snapshot::default();
        snapshot.touch_course(&course("1"), None, at(0));
        snapshot.touch_course(&course("2"), None, at(0));
        snapshot.behavior.session_count = 3;
        snapshot.refresh_courses();

        assert!(snapshot.clear_course(&course("1")));
        assert!(!snapshot.clear_course(&course("1")));
        assert_eq!(snapshot.courses.len(), 1);
        assert!(snapshot.metrics_by_course.contains_key(&course("2")));
        assert_eq!(snapshot.behavior.session_count, 3);
    }

    #[test]
    fn snapshot_uses_consumer_field_names() {
        let snapshot = Snapshot::default();
        let json = serde_json::to_value(&snapshot).unwrap();
        for key in [
            "student",
            "metricsByCourse",
            "materialsByCourse",
            "courses",
            "behavior",
            "events",
            "grades",
            "learning_materials",
            "knowledge_base",
            "_meta",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn empty_object_deserializes_to_default() {
        let snapshot: Snapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot, Snapshot::default());
        assert!(snapshot.is_empty());
    }
}
