//! Turning inbound messages into snapshot updates.
//!
//! Handling a message happens in two steps. [`plan`] runs when the message
//! arrives: it reconciles process-local tab state and resolves default
//! timestamps, producing a [`Plan`]. The resulting [`SnapshotUpdate`] is then
//! applied to the persisted snapshot by the single writer, in arrival order.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};

use crate::message::{
    ActionType, IdentityUpdate, Inbound, Interaction, Message, PageType, PageView, PageVisible,
};
use crate::metrics::{MetricField, add_time_spent, increment_course_metric, merge_course};
use crate::records::{
    EventEntry, GradeRow, MaterialRow, append_event, merge_grades_into_metrics, merge_materials,
};
use crate::session::record_activity;
use crate::snapshot::{EstimateSource, Snapshot};
use crate::tabs::{ActiveTabSession, TabTracker, TimeFlush};
use crate::types::{CourseId, TabId};

/// Default idle gap that ends a session.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 30;

/// Tunables for the aggregation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Gaps strictly longer than this start a new session.
    pub session_timeout: Duration,
    /// Offset used to bucket activity into local hours of day.
    pub local_offset: FixedOffset,
}

impl AggregatorConfig {
    /// Builds a config from minute values, falling back to defaults for
    /// out-of-range input.
    pub fn from_minutes(session_timeout_minutes: i64, utc_offset_minutes: i32) -> Self {
        let defaults = Self::default();
        let session_timeout = if session_timeout_minutes > 0 {
            Duration::minutes(session_timeout_minutes)
        } else {
            defaults.session_timeout
        };
        let local_offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or(defaults.local_offset);
        Self {
            session_timeout,
            local_offset,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::minutes(DEFAULT_SESSION_TIMEOUT_MINUTES),
            local_offset: Utc.fix(),
        }
    }
}

/// A mutation of the persisted snapshot, with every timestamp resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotUpdate {
    Identity(IdentityUpdate),
    PageView {
        view: PageView,
        at: DateTime<Utc>,
        /// Time owed to the course the tab showed before this navigation.
        flush: Option<TimeFlush>,
        new_visit: bool,
    },
    PageVisible {
        visible: PageVisible,
        at: DateTime<Utc>,
    },
    Interaction {
        interaction: Interaction,
        at: DateTime<Utc>,
    },
    Grades(Vec<GradeRow>),
    Materials(Vec<MaterialRow>),
    /// A tab session ended by hiding or closing the tab.
    Flush(TimeFlush),
    ClearCourse(CourseId),
    ClearAll,
}

/// What the writer should do for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Serve the current snapshot.
    Read,
    Update(SnapshotUpdate),
    /// Nothing to persist.
    Ignore,
}

/// Reconciles tab state for `inbound` and decides the snapshot work.
///
/// Messages without a sender tab share the [`TabId::NONE`] slot.
pub fn plan(tabs: &mut TabTracker, inbound: Inbound, now: DateTime<Utc>) -> Plan {
    let (tab_id, message) = match inbound {
        Inbound::TabRemoved { tab_id } => {
            return tabs
                .remove_tab(tab_id, now)
                .map_or(Plan::Ignore, |flush| Plan::Update(SnapshotUpdate::Flush(flush)));
        }
        Inbound::Message { tab_id, message } => (tab_id.unwrap_or(TabId::NONE), message),
    };

    let update = match message {
        Message::GetData => return Plan::Read,
        Message::ClearData => {
            tabs.clear();
            SnapshotUpdate::ClearAll
        }
        Message::ClearCourse { course_id } => {
            tabs.discard_course(&course_id);
            SnapshotUpdate::ClearCourse(course_id)
        }
        Message::Identity(identity) => SnapshotUpdate::Identity(identity),
        Message::PageView(view) => {
            let at = view.timestamp.unwrap_or(now);
            let flush = tabs.finalize(tab_id, at);
            let new_visit = match &view.course_id {
                Some(course_id) => {
                    let new_visit = tabs.record_visit(tab_id, course_id, view.url.as_deref());
                    tabs.open(
                        tab_id,
                        ActiveTabSession {
                            start: at,
                            course_id: course_id.clone(),
                            course_name: view.course_name.clone(),
                            page_type: view.page_type.clone(),
                        },
                    );
                    new_visit
                }
                None => {
                    tabs.forget_visit(tab_id);
                    false
                }
            };
            SnapshotUpdate::PageView {
                view,
                at,
                flush,
                new_visit,
            }
        }
        Message::PageHidden { timestamp } => {
            let Some(flush) = tabs.finalize(tab_id, timestamp.unwrap_or(now)) else {
                return Plan::Ignore;
            };
            SnapshotUpdate::Flush(flush)
        }
        Message::PageVisible(visible) => {
            let at = visible.timestamp.unwrap_or(now);
            if let Some(course_id) = &visible.course_id {
                if !tabs.is_active(tab_id) {
                    tabs.open(
                        tab_id,
                        ActiveTabSession {
                            start: at,
                            course_id: course_id.clone(),
                            course_name: visible.course_name.clone(),
                            page_type: visible.page_type.clone(),
                        },
                    );
                }
            }
            SnapshotUpdate::PageVisible { visible, at }
        }
        Message::Interaction(interaction) => {
            let at = interaction.timestamp.unwrap_or(now);
            SnapshotUpdate::Interaction { interaction, at }
        }
        Message::Grades(rows) => SnapshotUpdate::Grades(rows),
        Message::Materials(rows) => SnapshotUpdate::Materials(rows),
    };
    Plan::Update(update)
}

impl SnapshotUpdate {
    /// Applies the update in place.
    pub fn apply(self, snapshot: &mut Snapshot, config: &AggregatorConfig) {
        match self {
            Self::Identity(identity) => snapshot.student.apply(identity),
            Self::PageView {
                view,
                at,
                flush,
                new_visit,
            } => {
                if let Some(flush) = flush {
                    apply_flush(snapshot, flush);
                }
                record_activity(snapshot, at, false, config);
                if let Some(course_id) = &view.course_id {
                    let metrics = snapshot.touch_course(course_id, view.course_name.as_deref(), at);
                    if new_visit {
                        increment_course_metric(metrics, MetricField::TotalVisits, "page visit");
                        if let Some(field) = page_visit_estimate(&view.page_type) {
                            snapshot.record_estimate(course_id, field, EstimateSource::PageVisit);
                        }
                    }
                }
                append_event(
                    &mut snapshot.events,
                    EventEntry {
                        timestamp: at,
                        course_id: view.course_id,
                        page_type: view.page_type,
                        action_type: ActionType::PageView,
                    },
                );
            }
            Self::PageVisible { visible, at } => {
                record_activity(snapshot, at, false, config);
                if let Some(course_id) = &visible.course_id {
                    snapshot.touch_course(course_id, visible.course_name.as_deref(), at);
                }
            }
            Self::Interaction { interaction, at } => {
                let Interaction {
                    course_id,
                    page_type,
                    action_type,
                    ..
                } = interaction;
                let entry = EventEntry {
                    timestamp: at,
                    course_id: course_id.clone(),
                    page_type,
                    action_type: action_type.clone(),
                };
                // A re-delivered interaction carries the same key; count it once.
                if append_event(&mut snapshot.events, entry) {
                    let is_click = action_type.is_click();
                    record_activity(snapshot, at, is_click, config);
                    if let Some(course_id) = &course_id {
                        let metrics = snapshot.touch_course(course_id, None, at);
                        if is_click {
                            increment_course_metric(metrics, MetricField::ClickCount, "click");
                        }
                        if let Some(field) = interaction_estimate(&action_type) {
                            snapshot.record_estimate(course_id, field, EstimateSource::Interaction);
                        }
                    }
                }
            }
            Self::Grades(rows) => {
                let stats = merge_grades_into_metrics(snapshot, rows);
                tracing::debug!(inserted = stats.inserted, updated = stats.updated, "merged grades");
            }
            Self::Materials(rows) => {
                let inserted = merge_materials(snapshot, rows);
                tracing::debug!(inserted, "merged materials");
            }
            Self::Flush(flush) => apply_flush(snapshot, flush),
            Self::ClearCourse(course_id) => {
                if !snapshot.clear_course(&course_id) {
                    tracing::debug!(%course_id, "clear_course for unknown course");
                }
            }
            Self::ClearAll => *snapshot = Snapshot::default(),
        }
        snapshot.refresh_courses();
    }
}

fn apply_flush(snapshot: &mut Snapshot, flush: TimeFlush) {
    let metrics = merge_course(
        &mut snapshot.metrics_by_course,
        &flush.course_id,
        flush.course_name.as_deref(),
    );
    add_time_spent(metrics, flush.seconds);
    if let Ok(seconds) = u64::try_from(flush.seconds) {
        let total = &mut snapshot.behavior.total_time_spent_on_moodle;
        *total = total.saturating_add(seconds);
    }
    tracing::debug!(course_id = %flush.course_id, seconds = flush.seconds, "flushed tab time");
}

/// Counter that a new visit to a page of this type is evidence for.
const fn page_visit_estimate(page_type: &PageType) -> Option<MetricField> {
    match page_type {
        PageType::Resource => Some(MetricField::ResourcesClicked),
        PageType::Assignment => Some(MetricField::AssignmentsViewed),
        PageType::Quiz => Some(MetricField::QuizzesViewed),
        _ => None,
    }
}

/// Counter that an interaction of this type is evidence for.
const fn interaction_estimate(action_type: &ActionType) -> Option<MetricField> {
    match action_type {
        ActionType::ResourceClick | ActionType::Download => Some(MetricField::ResourcesClicked),
        ActionType::AssignmentView => Some(MetricField::AssignmentsViewed),
        ActionType::QuizView => Some(MetricField::QuizzesViewed),
        ActionType::QuizAttempt => Some(MetricField::QuizAttempts),
        ActionType::AssignmentSubmit => Some(MetricField::AssignmentSubmissions),
        _ => None,
    }
}
