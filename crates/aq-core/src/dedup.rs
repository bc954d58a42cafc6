//! Deterministic identity keys for data that producers may deliver repeatedly.
//!
//! The scraper re-runs on every DOM mutation, so the same event, grade row or
//! material can arrive many times. Each gets a composite key; anything whose
//! key is already stored is a re-delivery.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::message::{ActionType, PageType};
use crate::types::CourseId;

/// Key for an event log entry: `timestamp|page_type|action_type|course_id`.
pub fn event_key(
    timestamp: DateTime<Utc>,
    page_type: &PageType,
    action_type: &ActionType,
    course_id: Option<&CourseId>,
) -> String {
    format!(
        "{}|{}|{}|{}",
        timestamp.timestamp_millis(),
        page_type,
        action_type,
        course_id.map_or("", CourseId::as_str)
    )
}

/// Key for a grade row: `course_id|item_name|item_type|submission_time`.
pub fn grade_key(
    course_id: &CourseId,
    item_name: &str,
    item_type: Option<&str>,
    submission_time: Option<&str>,
) -> String {
    format!(
        "{}|{}|{}|{}",
        course_id,
        item_name.trim(),
        item_type.unwrap_or("").trim().to_ascii_lowercase(),
        submission_time.unwrap_or("").trim()
    )
}

/// Key for a learning material: `course_id|material_id|url`.
pub fn material_key(course_id: &CourseId, material_id: Option<&str>, url: Option<&str>) -> String {
    format!(
        "{}|{}|{}",
        course_id,
        material_id.unwrap_or(""),
        url.map(strip_fragment).unwrap_or("")
    )
}

/// Key identifying "the same page" for visit suppression.
pub fn visit_key(course_id: &CourseId, url: Option<&str>) -> String {
    format!("{}|{}", course_id, url.map(strip_fragment).unwrap_or(""))
}

fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

/// Grade item classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeItemKind {
    Quiz,
    Assignment,
    Other,
}

/// Classifies a scraped `item_type` case-insensitively.
pub fn classify_item_type(item_type: Option<&str>) -> GradeItemKind {
    let Some(item_type) = item_type else {
        return GradeItemKind::Other;
    };
    let lower = item_type.to_ascii_lowercase();
    if lower.contains("quiz") {
        GradeItemKind::Quiz
    } else if lower.contains("assign") {
        GradeItemKind::Assignment
    } else {
        GradeItemKind::Other
    }
}

/// Pre-compiled pattern for handed-in statuses.
static SUBMITTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(submitted|graded|done)\b").unwrap());
/// Negations that flip a status ("not submitted", "ungraded").
static NEGATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(not|no|unsubmitted|ungraded)\b").unwrap());

/// Whether a scraped submission status means the work was handed in.
pub fn is_submitted_status(status: Option<&str>) -> bool {
    status.is_some_and(|s| SUBMITTED_RE.is_match(s) && !NEGATED_RE.is_match(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(id: &str) -> CourseId {
        CourseId::new(id).unwrap()
    }

    #[test]
    fn event_key_is_deterministic() {
        let ts = DateTime::from_timestamp_millis(1_736_931_600_123).unwrap();
        let key = event_key(ts, &PageType::Quiz, &ActionType::Click, Some(&course("7")));
        assert_eq!(key, "1736931600123|quiz|click|7");
        let key = event_key(ts, &PageType::Dashboard, &ActionType::PageView, None);
        assert_eq!(key, "1736931600123|dashboard|page_view|");
    }

    #[test]
    fn grade_key_normalizes_type_case() {
        let a = grade_key(&course("7"), "Quiz 1", Some("Quiz"), Some("2025-01-01"));
        let b = grade_key(&course("7"), "Quiz 1 ", Some("quiz"), Some("2025-01-01"));
        assert_eq!(a, b);
    }

    #[test]
    fn material_key_layout() {
        let key = material_key(
            &course("7"),
            Some("m-12"),
            Some("https://lms/mod/resource/view.php?id=12#top"),
        );
        insta::assert_snapshot!(key, @"7|m-12|https://lms/mod/resource/view.php?id=12");
        insta::assert_snapshot!(material_key(&course("7"), None, None), @"7||");
    }

    #[test]
    fn visit_key_ignores_fragment() {
        assert_eq!(
            visit_key(&course("7"), Some("https://lms/course/view.php?id=7#section-2")),
            visit_key(&course("7"), Some("https://lms/course/view.php?id=7"))
        );
    }

    #[test]
    fn classify_item_types() {
        assert_eq!(classify_item_type(Some("QUIZ")), GradeItemKind::Quiz);
        assert_eq!(classify_item_type(Some("Assignment")), GradeItemKind::Assignment);
        assert_eq!(classify_item_type(Some("forum")), GradeItemKind::Other);
        assert_eq!(classify_item_type(None), GradeItemKind::Other);
    }

    #[test]
    fn submission_status_patterns() {
        assert!(is_submitted_status(Some("Submitted for grading")));
        assert!(is_submitted_status(Some("GRADED")));
        assert!(is_submitted_status(Some("done")));
        assert!(!is_submitted_status(Some("Not submitted")));
        assert!(!is_submitted_status(Some("No submission")));
        assert!(!is_submitted_status(Some("pending")));
        assert!(!is_submitted_status(None));
    }
}
