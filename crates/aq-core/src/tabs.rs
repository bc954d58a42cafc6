//! Tab lifecycle reconciliation.
//!
//! Browser tabs get hidden, navigated and closed without clean signals. The
//! [`TabTracker`] keeps, per tab, the open viewing session and the last visit
//! key, and turns lifecycle signals into [`TimeFlush`]es that attribute elapsed
//! wall-clock time to the course that was on screen.
//!
//! This state is process-local. A restart loses only the sessions that were
//! open at the time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::dedup::visit_key;
use crate::message::PageType;
use crate::metrics::round_ms_to_seconds;
use crate::types::{CourseId, TabId};

/// A course page currently on screen in one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTabSession {
    pub start: DateTime<Utc>,
    pub course_id: CourseId,
    pub course_name: Option<String>,
    pub page_type: PageType,
}

/// Time to credit to a course after a tab session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeFlush {
    pub course_id: CourseId,
    pub course_name: Option<String>,
    /// Whole seconds, always positive.
    pub seconds: i64,
}

/// Per-tab open sessions and last-visit keys.
#[derive(Debug, Default)]
pub struct TabTracker {
    active: HashMap<TabId, ActiveTabSession>,
    last_visit: HashMap<TabId, String>,
}

impl TabTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends the tab's open session at `end`.
    ///
    /// Returns `None` when the tab has no open session, or when the elapsed
    /// time rounds to zero or less (clock skew). Either way the tab is left
    /// without an open session, so a second call never flushes twice.
    pub fn finalize(&mut self, tab: TabId, end: DateTime<Utc>) -> Option<TimeFlush> {
        let session = self.active.remove(&tab)?;
        let seconds = round_ms_to_seconds((end - session.start).num_milliseconds());
        if seconds <= 0 {
            tracing::debug!(%tab, course_id = %session.course_id, "skipping non-positive tab flush");
            return None;
        }
        Some(TimeFlush {
            course_id: session.course_id,
            course_name: session.course_name,
            seconds,
        })
    }

    /// Starts a session, replacing any open one without flushing it.
    pub fn open(&mut self, tab: TabId, session: ActiveTabSession) {
        self.active.insert(tab, session);
    }

    pub fn is_active(&self, tab: TabId) -> bool {
        self.active.contains_key(&tab)
    }

    /// Records a navigation and reports whether it counts as a new visit.
    ///
    /// A navigation repeating the tab's previous `(course_id, url)` is a
    /// reload or duplicate delivery and does not count.
    pub fn record_visit(&mut self, tab: TabId, course_id: &CourseId, url: Option<&str>) -> bool {
        let key = visit_key(course_id, url);
        if self.last_visit.get(&tab) == Some(&key) {
            tracing::debug!(%tab, %key, "suppressing repeated visit");
            return false;
        }
        self.last_visit.insert(tab, key);
        true
    }

    /// Clears the tab's last visit key, so the next course page counts again.
    pub fn forget_visit(&mut self, tab: TabId) {
        self.last_visit.remove(&tab);
    }

    /// Forgets the tab entirely, flushing its open session at `now`.
    pub fn remove_tab(&mut self, tab: TabId, now: DateTime<Utc>) -> Option<TimeFlush> {
        self.last_visit.remove(&tab);
        self.finalize(tab, now)
    }

    /// Drops open sessions on `course_id` without crediting them.
    pub fn discard_course(&mut self, course_id: &CourseId) {
        self.active.retain(|_, session| &session.course_id != course_id);
    }

    /// Drops all tab state.
    pub fn clear(&mut self) {
        self.active.clear();
        self.last_visit.clear();
    }

    pub fn open_sessions(&self) -> usize {
        self.active.len()
    }
}
