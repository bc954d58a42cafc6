//! Append-only logs: events, grades and learning materials.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::dedup::{
    GradeItemKind, classify_item_type, event_key, grade_key, is_submitted_status, material_key,
};
use crate::message::{ActionType, PageType};
use crate::metrics::{MetricField, increment_course_metric, merge_course};
use crate::snapshot::Snapshot;
use crate::types::{CourseId, lenient_bool, lenient_f64, lenient_string};

/// One entry of the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub course_id: Option<CourseId>,
    pub page_type: PageType,
    pub action_type: ActionType,
}

impl EventEntry {
    pub fn key(&self) -> String {
        event_key(
            self.timestamp,
            &self.page_type,
            &self.action_type,
            self.course_id.as_ref(),
        )
    }
}

/// A stored event with its dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub entry: EventEntry,
    #[serde(rename = "_id")]
    pub id: String,
}

/// The activity log, indexed by dedup key.
///
/// Serialized as a plain array; the key index is rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<EventRecord>", into = "Vec<EventRecord>")]
pub struct EventLog {
    records: Vec<EventRecord>,
    ids: HashSet<String>,
}

impl EventLog {
    /// Appends an event unless one with the same key is already logged.
    ///
    /// Returns `true` when the event was new.
    pub fn append(&mut self, entry: EventEntry) -> bool {
        let id = entry.key();
        if self.ids.contains(&id) {
            tracing::debug!(%id, "dropping duplicate event");
            return false;
        }
        self.ids.insert(id.clone());
        self.records.push(EventRecord { entry, id });
        true
    }
}

impl PartialEq for EventLog {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl Eq for EventLog {}

impl Deref for EventLog {
    type Target = [EventRecord];

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

impl From<Vec<EventRecord>> for EventLog {
    fn from(records: Vec<EventRecord>) -> Self {
        let ids = records.iter().map(|record| record.id.clone()).collect();
        Self { records, ids }
    }
}

impl From<EventLog> for Vec<EventRecord> {
    fn from(log: EventLog) -> Self {
        log.records
    }
}

impl FromIterator<EventRecord> for EventLog {
    fn from_iter<I: IntoIterator<Item = EventRecord>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

/// Appends `entry` to `events`; see [`EventLog::append`].
pub fn append_event(events: &mut EventLog, entry: EventEntry) -> bool {
    events.append(entry)
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer)?.ok_or_else(|| serde::de::Error::custom("value cannot be empty"))
}

/// A scraped grade-report row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRow {
    pub course_id: CourseId,
    #[serde(deserialize_with = "non_empty_string")]
    pub item_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub item_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub submission_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub grade: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_grade: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub percentage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub submission_time: Option<String>,
}

impl GradeRow {
    pub fn key(&self) -> String {
        grade_key(
            &self.course_id,
            &self.item_name,
            self.item_type.as_deref(),
            self.submission_time.as_deref(),
        )
    }

    pub(crate) fn counts_as_submission(&self) -> bool {
        classify_item_type(self.item_type.as_deref()) == GradeItemKind::Assignment
            && is_submitted_status(self.submission_status.as_deref())
    }

    /// Takes every value the newer scrape observed.
    fn refresh_from(&mut self, newer: Self) {
        if newer.submission_status.is_some() {
            self.submission_status = newer.submission_status;
        }
        if newer.grade.is_some() {
            self.grade = newer.grade;
        }
        if newer.max_grade.is_some() {
            self.max_grade = newer.max_grade;
        }
        if newer.percentage.is_some() {
            self.percentage = newer.percentage;
        }
    }
}

/// A stored grade row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    #[serde(flatten)]
    pub row: GradeRow,
    #[serde(rename = "_id")]
    pub id: String,
    /// Whether this row has already been credited to `assignment_submissions`.
    #[serde(rename = "_submission_counted", default)]
    pub submission_counted: bool,
}

/// Outcome of a grades merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GradeMergeStats {
    pub inserted: usize,
    pub updated: usize,
}

/// Merges scraped grade rows into the grade log and course counters.
///
/// Counters move exactly once per unique grade key: a new quiz row adds one
/// quiz attempt, and an assignment row adds one submission the first time its
/// status reads as handed in, whether that is on insert or on a later update.
pub fn merge_grades_into_metrics(snapshot: &mut Snapshot, rows: Vec<GradeRow>) -> GradeMergeStats {
    let mut stats = GradeMergeStats::default();
    let mut index: HashMap<String, usize> = snapshot
        .grades
        .iter()
        .enumerate()
        .map(|(i, record)| (record.id.clone(), i))
        .collect();

    for row in rows {
        let id = row.key();
        let metrics = merge_course(&mut snapshot.metrics_by_course, &row.course_id, None);

        if let Some(&existing) = index.get(&id) {
            let record = &mut snapshot.grades[existing];
            let before = record.row.clone();
            record.row.refresh_from(row);
            if record.row != before {
                stats.updated += 1;
            }
            if !record.submission_counted && record.row.counts_as_submission() {
                record.submission_counted = true;
                increment_course_metric(
                    metrics,
                    MetricField::AssignmentSubmissions,
                    "grade status changed to submitted",
                );
            }
            continue;
        }

        if classify_item_type(row.item_type.as_deref()) == GradeItemKind::Quiz {
            increment_course_metric(metrics, MetricField::QuizAttempts, "new quiz grade row");
        }
        let submission_counted = row.counts_as_submission();
        if submission_counted {
            increment_course_metric(
                metrics,
                MetricField::AssignmentSubmissions,
                "new submitted assignment row",
            );
        }
        index.insert(id.clone(), snapshot.grades.len());
        snapshot.grades.push(GradeRecord {
            row,
            id,
            submission_counted,
        });
        stats.inserted += 1;
    }
    stats
}

/// A scraped learning material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRow {
    pub course_id: CourseId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub course_name: Option<String>,
    #[serde(default, alias = "id", deserialize_with = "lenient_string")]
    pub material_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub material_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub file_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub downloadable: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub section_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub availability_status: Option<String>,
    #[serde(default)]
    pub semantic_tags: Vec<String>,
}

impl MaterialRow {
    /// Dedup key; `None` when the row has neither an id nor a URL to identify it.
    pub fn key(&self) -> Option<String> {
        if self.material_id.is_none() && self.url.is_none() {
            return None;
        }
        Some(material_key(
            &self.course_id,
            self.material_id.as_deref(),
            self.url.as_deref(),
        ))
    }
}

/// A stored learning material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRecord {
    #[serde(flatten)]
    pub row: MaterialRow,
    #[serde(rename = "_id")]
    pub id: String,
}

/// Knowledge-base reference to a material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    #[serde(default)]
    pub material_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// `course → tag → materials`.
pub type KnowledgeBase = BTreeMap<CourseId, BTreeMap<String, Vec<KnowledgeEntry>>>;

/// Merges scraped materials, refreshes the per-course index and rebuilds the
/// knowledge base. Returns the number of newly seen materials.
pub fn merge_materials(snapshot: &mut Snapshot, rows: Vec<MaterialRow>) -> usize {
    let mut inserted = 0;
    let mut index: HashMap<String, usize> = snapshot
        .learning_materials
        .iter()
        .enumerate()
        .map(|(i, record)| (record.id.clone(), i))
        .collect();

    for row in rows {
        let Some(id) = row.key() else {
            tracing::debug!(course_id = %row.course_id, "skipping material without id or url");
            continue;
        };
        merge_course(
            &mut snapshot.metrics_by_course,
            &row.course_id,
            row.course_name.as_deref(),
        );
        if let Some(&existing) = index.get(&id) {
            snapshot.learning_materials[existing].row = row;
        } else {
            index.insert(id.clone(), snapshot.learning_materials.len());
            snapshot.learning_materials.push(MaterialRecord { row, id });
            inserted += 1;
        }
    }

    rebuild_material_indexes(snapshot);
    inserted
}

/// Recomputes `materialsByCourse` and `knowledge_base` from the materials log.
pub fn rebuild_material_indexes(snapshot: &mut Snapshot) {
    let mut by_course: BTreeMap<CourseId, Vec<MaterialRow>> = BTreeMap::new();
    let mut knowledge: KnowledgeBase = BTreeMap::new();

    for record in &snapshot.learning_materials {
        let row = &record.row;
        by_course
            .entry(row.course_id.clone())
            .or_default()
            .push(row.clone());

        for tag in &row.semantic_tags {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() {
                continue;
            }
            let entries = knowledge
                .entry(row.course_id.clone())
                .or_default()
                .entry(tag)
                .or_default();
            if entries
                .iter()
                .any(|e| e.material_id == row.material_id && e.url == row.url)
            {
                continue;
            }
            entries.push(KnowledgeEntry {
                material_id: row.material_id.clone(),
                title: row.title.clone(),
                url: row.url.clone(),
            });
        }
    }

    snapshot.materials_by_course = by_course;
    snapshot.knowledge_base = knowledge;
}
