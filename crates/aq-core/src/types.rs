//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            ///
            /// Surrounding whitespace is trimmed; a blank value is rejected.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                let trimmed = id.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                if trimmed.len() == id.len() {
                    Ok(Self(id))
                } else {
                    Ok(Self(trimmed.to_string()))
                }
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated course identifier.
    ///
    /// The course id is the identity of a [`CourseMetrics`](crate::CourseMetrics)
    /// record; it is whatever the LMS uses in `course/view.php?id=...`.
    CourseId, "course ID"
);

/// Browser tab identifier as reported by the extension runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl TabId {
    /// Stand-in for messages that arrive without a sender tab.
    pub const NONE: Self = Self(-1);
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deserializes an optional string that producers sometimes send as a number.
///
/// Blank strings become `None`.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Deserializes an optional score that may arrive as a number, a numeric
/// string ("17.50", "85 %"), or a placeholder such as "-".
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite()),
        _ => None,
    })
}

/// Deserializes a boolean that may arrive as `"true"`, `"yes"`, `1`, etc.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(serde_json::Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_id_rejects_empty() {
        assert!(CourseId::new("").is_err());
        assert!(CourseId::new("   ").is_err());
        assert!(CourseId::new("42").is_ok());
    }

    #[test]
    fn course_id_trims_whitespace() {
        let id = CourseId::new("  42 ").unwrap();
        assert_eq!(id.as_str(), "42");
    }

    #[test]
    fn course_id_serde_rejects_empty() {
        let result: Result<CourseId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn tab_id_is_transparent() {
        let json = serde_json::to_string(&TabId(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[derive(Deserialize)]
    struct Lenient {
        #[serde(default, deserialize_with = "lenient_string")]
        year: Option<String>,
        #[serde(default, deserialize_with = "lenient_f64")]
        grade: Option<f64>,
        #[serde(default, deserialize_with = "lenient_bool")]
        flag: bool,
    }

    #[test]
    fn lenient_fields_accept_mixed_shapes() {
        let parsed: Lenient =
            serde_json::from_str(r#"{"year": 2022, "grade": "17,5", "flag": "yes"}"#).unwrap();
        assert_eq!(parsed.year.as_deref(), Some("2022"));
        assert_eq!(parsed.grade, Some(17.5));
        assert!(parsed.flag);

        let parsed: Lenient =
            serde_json::from_str(r#"{"year": "  ", "grade": "-", "flag": null}"#).unwrap();
        assert!(parsed.year.is_none());
        assert!(parsed.grade.is_none());
        assert!(!parsed.flag);
    }
}
