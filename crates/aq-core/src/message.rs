//! Messages sent by content-script producers to the background aggregator.
//!
//! The wire shape is `{"type": "<kind>", "payload": {...}}`, optionally with the
//! sender's `tab_id`. Payloads are validated here, at the boundary, so the rest
//! of the crate only ever sees well-typed values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::records::{GradeRow, MaterialRow};
use crate::types::{CourseId, TabId, lenient_string};

/// Boundary validation errors.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The envelope itself was not a JSON object with a string `type`.
    #[error("invalid message envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// A known message kind carried a payload of the wrong shape.
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// The ten message kinds the aggregator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GetData,
    ClearData,
    ClearCourse,
    PageView,
    PageHidden,
    PageVisible,
    Interaction,
    Identity,
    Grades,
    Materials,
}

impl MessageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetData => "get_data",
            Self::ClearData => "clear_data",
            Self::ClearCourse => "clear_course",
            Self::PageView => "page_view",
            Self::PageHidden => "page_hidden",
            Self::PageVisible => "page_visible",
            Self::Interaction => "interaction",
            Self::Identity => "identity",
            Self::Grades => "grades",
            Self::Materials => "materials",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = UnknownMessageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_data" => Ok(Self::GetData),
            "clear_data" => Ok(Self::ClearData),
            "clear_course" => Ok(Self::ClearCourse),
            "page_view" => Ok(Self::PageView),
            "page_hidden" => Ok(Self::PageHidden),
            "page_visible" => Ok(Self::PageVisible),
            "interaction" => Ok(Self::Interaction),
            "identity" => Ok(Self::Identity),
            "grades" => Ok(Self::Grades),
            "materials" => Ok(Self::Materials),
            _ => Err(UnknownMessageKind(s.to_string())),
        }
    }
}

/// Error type for unknown message type strings.
#[derive(Debug, Clone)]
pub struct UnknownMessageKind(String);

impl fmt::Display for UnknownMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type: {}", self.0)
    }
}

impl std::error::Error for UnknownMessageKind {}

/// Generates a string-backed enum with an `Other` fallback so that
/// producers can introduce new values without breaking the aggregator.
macro_rules! open_string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Other(s) => s,
                }
            }

            /// Parses case-insensitively; unrecognized values become `Other`.
            pub fn parse(s: &str) -> Self {
                let normalized = s.trim().to_ascii_lowercase();
                match normalized.as_str() {
                    $($text => Self::$variant,)+
                    _ => Self::Other(normalized),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Ok(Self::parse(&s))
            }
        }
    };
}

open_string_enum!(
    /// LMS page classification as detected by the scraper.
    PageType {
        Dashboard => "dashboard",
        Course => "course",
        Resource => "resource",
        Assignment => "assignment",
        Quiz => "quiz",
        Grades => "grades",
        Forum => "forum",
    }
);

open_string_enum!(
    /// What the user did on the page.
    ActionType {
        PageView => "page_view",
        Click => "click",
        ResourceClick => "resource_click",
        Download => "download",
        AssignmentView => "assignment_view",
        AssignmentSubmit => "assignment_submit",
        QuizView => "quiz_view",
        QuizAttempt => "quiz_attempt",
        Scroll => "scroll",
    }
);

impl ActionType {
    /// Whether the action is a pointer click (counted in `click_count` and
    /// the open session's click tally).
    pub const fn is_click(&self) -> bool {
        !matches!(self, Self::Scroll | Self::PageView | Self::Other(_))
    }
}

impl Default for PageType {
    fn default() -> Self {
        Self::Other("unknown".to_string())
    }
}

/// Wire envelope before validation.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    tab_id: Option<TabId>,
    #[serde(default)]
    payload: Value,
}

/// Anything the aggregator can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A producer/consumer message, tagged with the sending tab when known.
    Message {
        tab_id: Option<TabId>,
        message: Message,
    },
    /// The browser reported that a tab was closed.
    TabRemoved { tab_id: TabId },
}

impl Inbound {
    /// Parses one wire line.
    ///
    /// Returns `Ok(None)` for unrecognized message types, which are ignored
    /// by contract rather than treated as errors.
    pub fn from_json(input: &str) -> Result<Option<Self>, MessageError> {
        let raw: RawEnvelope = serde_json::from_str(input).map_err(MessageError::Envelope)?;
        if raw.kind == "tab_removed" {
            let Some(tab_id) = raw.tab_id else {
                return Ok(None);
            };
            return Ok(Some(Self::TabRemoved { tab_id }));
        }
        let Ok(kind) = raw.kind.parse::<MessageKind>() else {
            tracing::debug!(kind = %raw.kind, "ignoring unknown message type");
            return Ok(None);
        };
        let message = Message::from_payload(kind, raw.payload)?;
        Ok(Some(Self::Message {
            tab_id: raw.tab_id,
            message,
        }))
    }
}

/// A validated message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetData,
    ClearData,
    ClearCourse { course_id: CourseId },
    PageView(PageView),
    PageHidden { timestamp: Option<DateTime<Utc>> },
    PageVisible(PageVisible),
    Interaction(Interaction),
    Identity(IdentityUpdate),
    Grades(Vec<GradeRow>),
    Materials(Vec<MaterialRow>),
}

impl Message {
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::GetData => MessageKind::GetData,
            Self::ClearData => MessageKind::ClearData,
            Self::ClearCourse { .. } => MessageKind::ClearCourse,
            Self::PageView(_) => MessageKind::PageView,
            Self::PageHidden { .. } => MessageKind::PageHidden,
            Self::PageVisible(_) => MessageKind::PageVisible,
            Self::Interaction(_) => MessageKind::Interaction,
            Self::Identity(_) => MessageKind::Identity,
            Self::Grades(_) => MessageKind::Grades,
            Self::Materials(_) => MessageKind::Materials,
        }
    }

    /// Validates `payload` against the shape fixed for `kind`.
    pub fn from_payload(kind: MessageKind, payload: Value) -> Result<Self, MessageError> {
        let malformed = |source: serde_json::Error| MessageError::Payload { kind, source };
        let message = match kind {
            MessageKind::GetData => Self::GetData,
            MessageKind::ClearData => Self::ClearData,
            MessageKind::ClearCourse => {
                let body: ClearCoursePayload = serde_json::from_value(payload).map_err(malformed)?;
                Self::ClearCourse {
                    course_id: body.course_id,
                }
            }
            MessageKind::PageView => {
                let body: PageViewPayload = serde_json::from_value(payload).map_err(malformed)?;
                Self::PageView(body.into())
            }
            MessageKind::PageHidden => {
                let body: TimestampOnly = if payload.is_null() {
                    TimestampOnly::default()
                } else {
                    serde_json::from_value(payload).map_err(malformed)?
                };
                Self::PageHidden {
                    timestamp: body.timestamp.and_then(DateTime::from_timestamp_millis),
                }
            }
            MessageKind::PageVisible => {
                let body: PageVisiblePayload =
                    serde_json::from_value(payload).map_err(malformed)?;
                Self::PageVisible(body.into())
            }
            MessageKind::Interaction => {
                let body: InteractionPayload =
                    serde_json::from_value(payload).map_err(malformed)?;
                Self::Interaction(body.into())
            }
            MessageKind::Identity => {
                let body: IdentityUpdate = serde_json::from_value(payload).map_err(malformed)?;
                Self::Identity(body)
            }
            MessageKind::Grades => Self::Grades(parse_rows(kind, payload)?),
            MessageKind::Materials => Self::Materials(parse_rows(kind, payload)?),
        };
        Ok(message)
    }
}

/// Parses an array payload row by row, dropping rows that fail validation.
///
/// Accepts either a bare array or an object wrapping it under `items`.
fn parse_rows<T: serde::de::DeserializeOwned>(
    kind: MessageKind,
    payload: Value,
) -> Result<Vec<T>, MessageError> {
    let rows = match payload {
        Value::Array(rows) => rows,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        Value::Null => Vec::new(),
        other => {
            return Err(MessageError::Payload {
                kind,
                source: serde::de::Error::custom(format!("expected array, got {other}")),
            });
        }
    };
    let mut parsed = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        match serde_json::from_value(row) {
            Ok(row) => parsed.push(row),
            Err(err) => tracing::debug!(%kind, index, error = %err, "dropping malformed row"),
        }
    }
    Ok(parsed)
}

#[derive(Debug, Default, Deserialize)]
struct TimestampOnly {
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ClearCoursePayload {
    course_id: CourseId,
}

/// Deserializes an optional course id, treating blank or invalid values as absent.
fn optional_course_id<'de, D>(deserializer: D) -> Result<Option<CourseId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.and_then(|s| CourseId::new(s).ok()))
}

#[derive(Debug, Deserialize)]
struct PageViewPayload {
    #[serde(default, deserialize_with = "optional_course_id")]
    course_id: Option<CourseId>,
    #[serde(default, deserialize_with = "lenient_string")]
    course_name: Option<String>,
    #[serde(default)]
    page_type: Option<PageType>,
    #[serde(default, deserialize_with = "lenient_string")]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    navigation_type: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// A navigation to an LMS page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub course_id: Option<CourseId>,
    pub course_name: Option<String>,
    pub page_type: PageType,
    pub url: Option<String>,
    pub navigation_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<PageViewPayload> for PageView {
    fn from(p: PageViewPayload) -> Self {
        Self {
            course_id: p.course_id,
            course_name: p.course_name,
            page_type: p.page_type.unwrap_or_default(),
            url: p.url,
            navigation_type: p.navigation_type,
            timestamp: p.timestamp.and_then(DateTime::from_timestamp_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageVisiblePayload {
    #[serde(default, deserialize_with = "optional_course_id")]
    course_id: Option<CourseId>,
    #[serde(default, deserialize_with = "lenient_string")]
    course_name: Option<String>,
    #[serde(default)]
    page_type: Option<PageType>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// A previously hidden tab became visible again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVisible {
    pub course_id: Option<CourseId>,
    pub course_name: Option<String>,
    pub page_type: PageType,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<PageVisiblePayload> for PageVisible {
    fn from(p: PageVisiblePayload) -> Self {
        Self {
            course_id: p.course_id,
            course_name: p.course_name,
            page_type: p.page_type.unwrap_or_default(),
            timestamp: p.timestamp.and_then(DateTime::from_timestamp_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    #[serde(default, deserialize_with = "optional_course_id")]
    course_id: Option<CourseId>,
    #[serde(default)]
    page_type: Option<PageType>,
    #[serde(default)]
    action_type: Option<ActionType>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// A user interaction on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub course_id: Option<CourseId>,
    pub page_type: PageType,
    pub action_type: ActionType,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<InteractionPayload> for Interaction {
    fn from(p: InteractionPayload) -> Self {
        Self {
            course_id: p.course_id,
            page_type: p.page_type.unwrap_or_default(),
            action_type: p.action_type.unwrap_or(ActionType::Click),
            timestamp: p.timestamp.and_then(DateTime::from_timestamp_millis),
        }
    }
}

/// Student identity fields; `None` means "not observed on this page".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUpdate {
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub program: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub enrollment_year: Option<String>,
}
