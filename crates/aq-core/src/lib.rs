//! Core domain logic for the academIQ aggregator.
//!
//! This crate contains the fundamental types and logic for:
//! - Messages: validating producer payloads at the boundary
//! - Course metrics: merge policy, dedup keys, grade and material logs
//! - Sessions: idle-gap sessions, active days and peak hours
//! - Tabs: attributing on-screen time to courses
//! - Export: the sanitized payload sent to the prediction backend
//!
//! Nothing here performs I/O; persistence and scheduling live in other crates.

pub mod aggregator;
pub mod clock;
pub mod dedup;
mod export;
pub mod message;
pub mod metrics;
pub mod records;
pub mod session;
pub mod snapshot;
pub mod tabs;
pub mod types;

pub use aggregator::{AggregatorConfig, Plan, SnapshotUpdate, plan};
pub use clock::{Clock, ManualClock, SystemClock};
pub use export::SanitizedExport;
pub use message::{
    ActionType, Inbound, Interaction, Message, MessageError, MessageKind, PageType, PageView,
    PageVisible, UnknownMessageKind,
};
pub use metrics::{BehaviorAggregate, CourseMetrics, MetricField, StudentIdentity};
pub use records::{EventEntry, GradeRow, MaterialRow};
pub use snapshot::Snapshot;
pub use tabs::{TabTracker, TimeFlush};
pub use types::{CourseId, TabId, ValidationError};
