//! Sanitized export for the prediction backend.
//!
//! The export carries what the backend needs and none of the internal
//! bookkeeping: no dedup keys, no `_meta`, no credit flags.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::{GradeItemKind, classify_item_type};
use crate::metrics::{BehaviorAggregate, CourseMetrics, StudentIdentity};
use crate::records::{
    EventEntry, EventRecord, GradeRecord, GradeRow, KnowledgeBase, MaterialRecord, MaterialRow,
    rebuild_material_indexes,
};
use crate::snapshot::Snapshot;
use crate::types::CourseId;

/// Payload POSTed to the backend's `/ingest` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedExport {
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub student: StudentIdentity,
    #[serde(default)]
    pub courses: Vec<CourseMetrics>,
    #[serde(default)]
    pub behavior: BehaviorAggregate,
    #[serde(default)]
    pub events: Vec<EventEntry>,
    #[serde(default)]
    pub grades: Vec<GradeRow>,
    #[serde(default)]
    pub learning_materials: Vec<MaterialRow>,
    #[serde(default)]
    pub knowledge_base: KnowledgeBase,
}

impl Snapshot {
    /// Strips internal fields for the backend.
    pub fn export(&self, exported_at: DateTime<Utc>) -> SanitizedExport {
        SanitizedExport {
            exported_at,
            student: self.student.clone(),
            courses: self.metrics_by_course.values().cloned().collect(),
            behavior: self.behavior.clone(),
            events: self.events.iter().map(|e| e.entry.clone()).collect(),
            grades: self.grades.iter().map(|g| g.row.clone()).collect(),
            learning_materials: self
                .learning_materials
                .iter()
                .map(|m| m.row.clone())
                .collect(),
            knowledge_base: self.knowledge_base.clone(),
        }
    }

    /// Rebuilds a snapshot from an export, recomputing dedup keys.
    ///
    /// Session and day bookkeeping is not part of the export and starts empty.
    pub fn from_export(export: SanitizedExport) -> Self {
        let mut snapshot = Self {
            student: export.student,
            behavior: export.behavior,
            ..Self::default()
        };
        for metrics in export.courses {
            snapshot
                .metrics_by_course
                .insert(metrics.course_id.clone(), metrics);
        }
        snapshot.events = export
            .events
            .into_iter()
            .map(|entry| EventRecord {
                id: entry.key(),
                entry,
            })
            .collect();
        let credited = credited_rows(&export.grades, &snapshot.metrics_by_course);
        snapshot.grades = export
            .grades
            .into_iter()
            .zip(credited)
            .map(|(row, submission_counted)| GradeRecord {
                id: row.key(),
                submission_counted,
                row,
            })
            .collect();
        snapshot.learning_materials = export
            .learning_materials
            .into_iter()
            .filter_map(|row| row.key().map(|id| MaterialRecord { row, id }))
            .collect();
        rebuild_material_indexes(&mut snapshot);
        snapshot.refresh_courses();
        snapshot
    }
}

/// Reconstructs which grade rows were already credited to
/// `assignment_submissions`.
///
/// Each course's exported counter is spent as a budget: rows that count as
/// submitted take credit first, then assignment rows whose status has since
/// changed. Rows past the budget stay uncredited.
fn credited_rows(rows: &[GradeRow], metrics: &BTreeMap<CourseId, CourseMetrics>) -> Vec<bool> {
    let mut budget: HashMap<&CourseId, u64> = metrics
        .iter()
        .map(|(course_id, metrics)| (course_id, metrics.assignment_submissions))
        .collect();
    let mut take = |course_id: &CourseId| match budget.get_mut(course_id) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    };

    let mut credited: Vec<bool> = rows
        .iter()
        .map(|row| row.counts_as_submission() && take(&row.course_id))
        .collect();
    for (row, credited) in rows.iter().zip(credited.iter_mut()) {
        if !*credited && classify_item_type(row.item_type.as_deref()) == GradeItemKind::Assignment {
            *credited = take(&row.course_id);
        }
    }
    credited
}
