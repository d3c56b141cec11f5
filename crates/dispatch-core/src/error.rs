#![forbid(unsafe_code)]

//! Error types surfaced by dispatch operations.
//!
//! Every error is returned synchronously from the call that triggered it;
//! there is no background error channel and nothing is retried.
//!
//! # Failure Modes
//!
//! | Error | Cause | State afterwards |
//! |-------|-------|------------------|
//! | [`DispatchError::NotFound`] | Unknown event/property name | Unchanged |
//! | [`DispatchError::EventExists`] | Name already registered as an event | Unchanged |
//! | [`DispatchError::PropertyExists`] | Name already declared as a property | Unchanged |
//! | [`DispatchError::Validation`] | Property assignment rejected | Previous value kept |
//! | [`DispatchError::Callback`] | A subscriber returned `Err` | Remaining subscribers skipped |

use std::fmt;

use crate::value::Value;

/// Rejection raised by a property validator.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `None` assigned to a property that does not allow it.
    NoneNotAllowed { property: String },
    /// The value's type does not match the property kind.
    InvalidType {
        property: String,
        value: Value,
        expected: &'static str,
    },
    /// A numeric value fell outside the effective bounds.
    OutOfRange {
        property: String,
        value: Value,
        min: Option<Value>,
        max: Option<Value>,
    },
}

impl ValidationError {
    /// Name of the property that rejected the value.
    #[must_use]
    pub fn property(&self) -> &str {
        match self {
            Self::NoneNotAllowed { property }
            | Self::InvalidType { property, .. }
            | Self::OutOfRange { property, .. } => property,
        }
    }

    /// The rejected value.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::NoneNotAllowed { .. } => Value::None,
            Self::InvalidType { value, .. } | Self::OutOfRange { value, .. } => value.clone(),
        }
    }

    /// Short stable label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::NoneNotAllowed { .. } => "none_not_allowed",
            Self::InvalidType { .. } => "invalid_type",
            Self::OutOfRange { .. } => "out_of_range",
        }
    }
}

/// Render the `"-10 <= value <= 10"` range expression used in messages.
pub(crate) fn range_expr(min: Option<&Value>, max: Option<&Value>) -> String {
    match (min, max) {
        (Some(lo), Some(hi)) => format!("{lo} <= value <= {hi}"),
        (Some(lo), None) => format!("{lo} <= value"),
        (None, Some(hi)) => format!("value <= {hi}"),
        (None, None) => "value".to_string(),
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoneNotAllowed { property } => {
                write!(f, "\"None\" not allowed for property '{property}'")
            }
            Self::InvalidType {
                property,
                value,
                expected,
            } => write!(
                f,
                "Type \"{}\" not valid for property '{property}' (expected {expected})",
                value.type_name()
            ),
            Self::OutOfRange {
                property,
                value,
                min,
                max,
            } => write!(
                f,
                "Value {value} must be in range \"{}\" for property '{property}'",
                range_expr(min.as_ref(), max.as_ref())
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Error returned by a subscriber callback.
///
/// Any `std::error::Error` converts into it with `?`; it does not implement
/// the trait itself.
pub struct CallbackError(Box<dyn std::error::Error + 'static>);

impl CallbackError {
    /// Build a callback error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }

    /// Borrow the underlying error.
    #[must_use]
    pub fn inner(&self) -> &(dyn std::error::Error + 'static) {
        self.0.as_ref()
    }
}

impl<E: std::error::Error + 'static> From<E> for CallbackError {
    fn from(err: E) -> Self {
        Self(Box::new(err))
    }
}

impl fmt::Debug for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallbackError").field(&self.0).finish()
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors from registry, binding, emission and property operations.
#[derive(Debug)]
pub enum DispatchError {
    /// No event or property with this name exists on the dispatcher.
    NotFound { name: String },
    /// The name is already registered as an event.
    EventExists { name: String },
    /// The name is already declared as a property.
    PropertyExists { name: String },
    /// A property assignment failed validation.
    Validation(ValidationError),
    /// A subscriber failed; delivery to later subscribers was aborted.
    Callback {
        channel: String,
        source: CallbackError,
    },
}

impl DispatchError {
    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    /// Short stable label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::EventExists { .. } => "event_exists",
            Self::PropertyExists { .. } => "property_exists",
            Self::Validation(err) => err.as_label(),
            Self::Callback { .. } => "callback_failed",
        }
    }

    /// True for either already-exists kind.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::EventExists { .. } | Self::PropertyExists { .. })
    }

    /// The validation error, if this is one.
    #[must_use]
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "no event or property named '{name}'"),
            Self::EventExists { name } => write!(f, "event '{name}' already exists"),
            Self::PropertyExists { name } => write!(f, "property '{name}' already exists"),
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::Callback { channel, source } => {
                write!(f, "callback on '{channel}' failed: {source}")
            }
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Callback { source, .. } => Some(source.inner()),
            _ => None,
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}
