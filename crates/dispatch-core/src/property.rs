#![forbid(unsafe_code)]

//! Observable property slots: declaration, validation and per-instance cells.
//!
//! A [`Property`] is the type-level declaration (kind, default, bounds). Each
//! [`Dispatcher`](crate::Dispatcher) instance owns one `PropertyCell` per
//! declared property, holding the current value and the property's channel.
//!
//! # State Machine
//!
//! ```text
//!   unset ──get──► default ──set(v ≠ current)──► assigned ──set(v ≠ current)──► …
//!     └────────────set(v ≠ default)─────────────────┘
//! ```
//!
//! A failed validation leaves the cell untouched. Setting an equal value
//! is a no-op and dispatches nothing.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::callback::Flow;
use crate::channel::{Channel, ChannelKind};
use crate::container::{self, ChangeSink, ObservableList, ObservableMap};
use crate::dispatcher::WeakDispatcher;
use crate::emission::{Emission, Kwargs};
use crate::error::{DispatchError, ValidationError};
use crate::table::PropertyDescriptor;
use crate::value::Value;

/// What a property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Anything, including `None`.
    Any,
    Str,
    Bool,
    /// Integers only (`Bool` and `Float` are rejected).
    Int,
    /// Floats; integers are accepted and stored as floats.
    Float,
    List,
    Map,
}

impl PropertyKind {
    /// Type name used in validation messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Str => "str",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::List => "list",
            Self::Map => "dict",
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Any | Self::Int | Self::Float)
    }
}

/// Numeric bounds, inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bounds {
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl Bounds {
    #[must_use]
    pub fn new(min: Option<Value>, max: Option<Value>) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Declaration of an observable property.
///
/// # Example
///
/// ```
/// use dispatch_core::Property;
///
/// let volume = Property::int().with_default(5).with_range(0, 11);
/// assert_eq!(volume.bounds().max, Some(11.into()));
/// ```
#[derive(Debug, Clone)]
pub struct Property {
    kind: PropertyKind,
    default: Value,
    allow_none: bool,
    min: Option<Value>,
    max: Option<Value>,
    copy_on_change: bool,
}

impl Property {
    fn of_kind(kind: PropertyKind, default: Value, allow_none: bool) -> Self {
        Self {
            kind,
            default,
            allow_none,
            min: None,
            max: None,
            copy_on_change: false,
        }
    }

    /// Untyped property with the given default.
    pub fn any(default: impl Into<Value>) -> Self {
        Self::of_kind(PropertyKind::Any, default.into(), true)
    }

    /// String property. Defaults to `None`, which it allows.
    #[must_use]
    pub fn string() -> Self {
        Self::of_kind(PropertyKind::Str, Value::None, true)
    }

    /// Boolean property, default `false`.
    #[must_use]
    pub fn boolean() -> Self {
        Self::of_kind(PropertyKind::Bool, Value::Bool(false), false)
    }

    /// Integer property, default `0`.
    #[must_use]
    pub fn int() -> Self {
        Self::of_kind(PropertyKind::Int, Value::Int(0), false)
    }

    /// Float property, default `0.0`.
    #[must_use]
    pub fn float() -> Self {
        Self::of_kind(PropertyKind::Float, Value::Float(0.0), false)
    }

    /// List property, default empty.
    #[must_use]
    pub fn list() -> Self {
        Self::of_kind(PropertyKind::List, Value::List(ObservableList::new()), false)
    }

    /// Map property, default empty.
    #[must_use]
    pub fn map() -> Self {
        Self::of_kind(PropertyKind::Map, Value::Map(ObservableMap::new()), false)
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    #[must_use]
    pub fn with_allow_none(mut self, allow_none: bool) -> Self {
        self.allow_none = allow_none;
        self
    }

    #[must_use]
    pub fn with_min(mut self, min: impl Into<Value>) -> Self {
        self.min = Some(min.into());
        self
    }

    #[must_use]
    pub fn with_max(mut self, max: impl Into<Value>) -> Self {
        self.max = Some(max.into());
        self
    }

    #[must_use]
    pub fn with_range(self, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.with_min(min).with_max(max)
    }

    /// Report a deep snapshot of a container value as `old` on in-place
    /// mutation. Costs one deep copy per mutation.
    #[must_use]
    pub fn with_copy_on_change(mut self, enabled: bool) -> Self {
        self.copy_on_change = enabled;
        self
    }

    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    #[must_use]
    pub fn allow_none(&self) -> bool {
        self.allow_none
    }

    /// Class-level bounds.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.min.clone(), self.max.clone())
    }

    #[must_use]
    pub fn copy_on_change(&self) -> bool {
        self.copy_on_change
    }

    /// Check `value` for property `name` against this declaration and the
    /// effective `bounds`. Returns the value as it will be stored.
    pub fn validate(
        &self,
        name: &str,
        value: Value,
        bounds: &Bounds,
    ) -> Result<Value, ValidationError> {
        if value.is_none() {
            return if self.allow_none {
                Ok(Value::None)
            } else {
                Err(ValidationError::NoneNotAllowed {
                    property: name.to_string(),
                })
            };
        }

        let value = match (self.kind, value) {
            (PropertyKind::Any, v)
            | (PropertyKind::Str, v @ Value::Str(_))
            | (PropertyKind::Bool, v @ Value::Bool(_))
            | (PropertyKind::Int, v @ Value::Int(_))
            | (PropertyKind::Float, v @ Value::Float(_))
            | (PropertyKind::List, v @ Value::List(_))
            | (PropertyKind::Map, v @ Value::Map(_)) => v,
            (PropertyKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (kind, v) => {
                return Err(ValidationError::InvalidType {
                    property: name.to_string(),
                    value: v,
                    expected: kind.as_str(),
                });
            }
        };

        if self.kind.is_numeric() {
            let below = bounds
                .min
                .as_ref()
                .and_then(|min| value.numeric_cmp(min))
                .is_some_and(Ordering::is_lt);
            let above = bounds
                .max
                .as_ref()
                .and_then(|max| value.numeric_cmp(max))
                .is_some_and(Ordering::is_gt);
            if below || above {
                return Err(ValidationError::OutOfRange {
                    property: name.to_string(),
                    value,
                    min: bounds.min.clone(),
                    max: bounds.max.clone(),
                });
            }
        }
        Ok(value)
    }
}

/// Per-instance storage and channel of one property.
pub(crate) struct PropertyCell {
    descriptor: Rc<PropertyDescriptor>,
    channel: Channel,
    value: RefCell<Option<Value>>,
    bounds: RefCell<Option<Bounds>>,
    owner: WeakDispatcher,
    this: Weak<PropertyCell>,
}

impl PropertyCell {
    pub(crate) fn new(descriptor: Rc<PropertyDescriptor>, owner: WeakDispatcher) -> Rc<Self> {
        let channel = Channel::new(descriptor.shared_name(), ChannelKind::Property);
        Rc::new_cyclic(|this| Self {
            descriptor,
            channel,
            value: RefCell::new(None),
            bounds: RefCell::new(None),
            owner,
            this: this.clone(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    fn property(&self) -> &Property {
        self.descriptor.property()
    }

    /// Container values become the root of a tree reporting to this cell.
    fn wrap(&self, value: Value) -> Value {
        if !value.is_container() {
            return value;
        }
        let sink: Weak<dyn ChangeSink> = self.this.clone();
        container::adopt_root(value, sink, self.property().copy_on_change())
    }

    /// Current value, materialising the default on first access.
    pub(crate) fn get(&self) -> Value {
        if let Some(value) = self.value.borrow().as_ref() {
            return value.clone();
        }
        let initial = self.wrap(self.property().default_value().clone());
        *self.value.borrow_mut() = Some(initial.clone());
        initial
    }

    pub(crate) fn bounds(&self) -> Bounds {
        self.bounds
            .borrow()
            .clone()
            .unwrap_or_else(|| self.property().bounds())
    }

    /// Override the bounds for this instance only.
    pub(crate) fn set_bounds(&self, bounds: Bounds) {
        debug!(property = self.name(), ?bounds, "instance bounds overridden");
        *self.bounds.borrow_mut() = Some(bounds);
    }

    pub(crate) fn set(&self, value: Value, extra: Kwargs) -> Result<Flow, DispatchError> {
        let value = self.property().validate(self.name(), value, &self.bounds())?;
        let current = self.get();
        if current == value {
            trace!(property = self.name(), "unchanged, no dispatch");
            return Ok(Flow::Continue);
        }
        let value = self.wrap(value);
        let old = self
            .value
            .borrow_mut()
            .replace(value.clone())
            .unwrap_or_default();
        container::detach(&old);
        debug!(property = self.name(), "property changed");
        self.channel.dispatch(Emission::property_change(
            self.owner.clone(),
            self.descriptor.shared_name(),
            value,
            old,
            extra,
        ))
    }
}

impl ChangeSink for PropertyCell {
    fn container_changed(&self, old: Value) -> Result<Flow, DispatchError> {
        let current = self.get();
        self.channel.dispatch(Emission::property_change(
            self.owner.clone(),
            self.descriptor.shared_name(),
            current,
            old,
            Kwargs::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(p: &Property, v: impl Into<Value>) -> Result<Value, ValidationError> {
        p.validate("p", v.into(), &p.bounds())
    }

    #[test]
    fn typed_defaults() {
        assert_eq!(Property::string().default_value(), &Value::None);
        assert!(Property::string().allow_none());
        assert_eq!(Property::boolean().default_value(), &Value::Bool(false));
        assert_eq!(Property::int().default_value(), &Value::Int(0));
        assert_eq!(Property::float().default_value(), &Value::Float(0.0));
        assert_eq!(Property::list().default_value(), &Value::list(Vec::<i32>::new()));
    }

    #[test]
    fn int_rejects_bool_and_float() {
        let p = Property::int();
        assert!(check(&p, 3).is_ok());
        let err = check(&p, true).unwrap_err();
        assert_eq!(err.as_label(), "invalid_type");
        assert!(check(&p, 1.5).is_err());
        assert!(check(&p, "1").is_err());
    }

    #[test]
    fn float_widens_int() {
        let p = Property::float();
        assert_eq!(check(&p, 2).unwrap(), Value::Float(2.0));
        assert!(matches!(check(&p, 2).unwrap(), Value::Float(_)));
        assert!(check(&p, false).is_err());
    }

    #[test]
    fn none_handling() {
        assert_eq!(check(&Property::string(), ()).unwrap(), Value::None);
        let err = check(&Property::string().with_allow_none(false), ()).unwrap_err();
        assert!(err.to_string().contains("\"None\" not allowed"));
        assert!(check(&Property::int(), ()).is_err());
        assert!(check(&Property::int().with_allow_none(true), ()).is_ok());
    }

    #[test]
    fn range_is_inclusive() {
        let p = Property::int().with_range(-10, 10);
        assert!(check(&p, -10).is_ok());
        assert!(check(&p, 10).is_ok());
        let err = check(&p, -11).unwrap_err();
        assert!(
            err.to_string()
                .contains("Value -11 must be in range \"-10 <= value <= 10\"")
        );
    }

    #[test]
    fn int_bounds_are_exact_near_i64_max() {
        let p = Property::int().with_max(i64::MAX - 1);
        assert!(check(&p, i64::MAX - 1).is_ok());
        let err = check(&p, i64::MAX).unwrap_err();
        assert_eq!(err.as_label(), "out_of_range");

        let p = Property::float().with_min(0.5);
        assert!(check(&p, 0).is_err());
        assert!(check(&p, 1).is_ok());
    }

    #[test]
    fn instance_bounds_override_class_bounds() {
        let p = Property::float().with_max(1.0);
        let wide = Bounds::new(None, Some(Value::Int(100)));
        assert!(check(&p, 50).is_err());
        assert!(p.validate("p", Value::Int(50), &wide).is_ok());
    }
}
