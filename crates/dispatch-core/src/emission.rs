#![forbid(unsafe_code)]

//! Emission payloads: positional and keyword arguments plus origin metadata.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::dispatcher::{Dispatcher, WeakDispatcher};
use crate::value::Value;

/// Keyword arguments of an emission.
pub type Kwargs = BTreeMap<String, Value>;

/// Where a property change came from. Holds the instance weakly so a pending
/// emission parked in an emission lock never keeps its dispatcher alive.
#[derive(Clone)]
struct Origin {
    instance: WeakDispatcher,
    property: Rc<str>,
}

/// The payload handed to every subscriber of a dispatch.
///
/// Property changes carry `args = [new_value]` and `kwargs["old"]`, plus the
/// emitting instance and property name (see [`instance`](Self::instance) and
/// [`property`](Self::property)).
#[derive(Clone, Default)]
pub struct Emission {
    args: Vec<Value>,
    kwargs: Kwargs,
    origin: Option<Origin>,
}

impl Emission {
    /// An empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A payload with the given positional arguments.
    pub fn with_args<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub(crate) fn property_change(
        instance: WeakDispatcher,
        property: Rc<str>,
        value: Value,
        old: Value,
        extra: Kwargs,
    ) -> Self {
        let mut kwargs = extra;
        kwargs.insert("old".to_string(), old);
        Self {
            args: vec![value],
            kwargs,
            origin: Some(Origin { instance, property }),
        }
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    #[must_use]
    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    #[must_use]
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// New value of a property change (the first positional argument).
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.args.first()
    }

    /// Previous value of a property change.
    #[must_use]
    pub fn old(&self) -> Option<&Value> {
        self.kwargs.get("old")
    }

    /// Name of the property that changed, for property dispatches.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        self.origin.as_ref().map(|o| &*o.property)
    }

    /// The dispatcher whose property changed, if it is still alive.
    #[must_use]
    pub fn instance(&self) -> Option<Dispatcher> {
        self.origin.as_ref().and_then(|o| o.instance.upgrade())
    }
}

impl std::fmt::Debug for Emission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emission")
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("property", &self.property())
            .finish()
    }
}

impl<V: Into<Value>> From<Vec<V>> for Emission {
    fn from(args: Vec<V>) -> Self {
        Self::with_args(args)
    }
}
