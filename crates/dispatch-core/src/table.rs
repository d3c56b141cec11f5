#![forbid(unsafe_code)]

//! Per-type declaration tables.
//!
//! A type opts in by implementing [`Declare`]. The first time a
//! [`Dispatcher`](crate::Dispatcher) is built for that type, its declaration
//! runs once and the merged result is memoised per thread; every later
//! instance reuses the same [`TypeTable`].
//!
//! # Merge Rules
//!
//! | Declared | Already present as | Result |
//! |----------|--------------------|--------|
//! | event | event | Union (kept once, first declarer wins) |
//! | event | property | `PropertyExists` |
//! | property | property | Overridden in place (default/validator) |
//! | property | event | `EventExists` |
//!
//! Errors are not memoised: a failing declaration fails every time.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::debug;

use crate::error::DispatchError;
use crate::property::{Property, PropertyKind};
use crate::value::Value;

/// Implemented by types whose instances carry a dispatcher.
///
/// ```
/// use dispatch_core::{Declaration, Declare, Property};
///
/// struct Player;
///
/// impl Declare for Player {
///     fn declare(decl: &mut Declaration) {
///         decl.event("on_stop")
///             .property("volume", Property::int().with_range(0, 11));
///     }
/// }
/// ```
pub trait Declare: 'static {
    fn declare(decl: &mut Declaration);
}

/// A declared event.
#[derive(Debug)]
pub struct EventDescriptor {
    name: Rc<str>,
    declared_by: &'static str,
}

impl EventDescriptor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short name of the type that first declared the event.
    #[must_use]
    pub fn declared_by(&self) -> &'static str {
        self.declared_by
    }

    pub(crate) fn shared_name(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }
}

/// A declared property.
#[derive(Debug)]
pub struct PropertyDescriptor {
    name: Rc<str>,
    property: Property,
    declared_by: &'static str,
}

impl PropertyDescriptor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn property(&self) -> &Property {
        &self.property
    }

    /// Short name of the type whose declaration is in effect.
    #[must_use]
    pub fn declared_by(&self) -> &'static str {
        self.declared_by
    }

    pub(crate) fn shared_name(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }
}

/// Collects the events and properties of one type.
pub struct Declaration {
    type_name: &'static str,
    events: BTreeMap<String, Rc<EventDescriptor>>,
    properties: BTreeMap<String, Rc<PropertyDescriptor>>,
    error: Option<DispatchError>,
}

impl Declaration {
    fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            events: BTreeMap::new(),
            properties: BTreeMap::new(),
            error: None,
        }
    }

    fn fail(&mut self, err: DispatchError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn add_event(&mut self, event: Rc<EventDescriptor>) {
        if self.properties.contains_key(event.name()) {
            self.fail(DispatchError::PropertyExists {
                name: event.name().to_string(),
            });
            return;
        }
        self.events.entry(event.name().to_string()).or_insert(event);
    }

    fn add_property(&mut self, property: Rc<PropertyDescriptor>) {
        if self.events.contains_key(property.name()) {
            self.fail(DispatchError::EventExists {
                name: property.name().to_string(),
            });
            return;
        }
        self.properties
            .insert(property.name().to_string(), property);
    }

    /// Merge everything `P` declares.
    pub fn inherit<P: Declare>(&mut self) -> &mut Self {
        match TypeTable::for_type::<P>() {
            Ok(parent) => {
                for event in parent.events.values() {
                    self.add_event(Rc::clone(event));
                }
                for property in parent.properties.values() {
                    self.add_property(Rc::clone(property));
                }
            }
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn event(&mut self, name: &str) -> &mut Self {
        self.add_event(Rc::new(EventDescriptor {
            name: Rc::from(name),
            declared_by: self.type_name,
        }));
        self
    }

    pub fn events<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for name in names {
            self.event(name);
        }
        self
    }

    pub fn property(&mut self, name: &str, property: Property) -> &mut Self {
        self.add_property(Rc::new(PropertyDescriptor {
            name: Rc::from(name),
            property,
            declared_by: self.type_name,
        }));
        self
    }

    fn finish(self) -> Result<TypeTable, DispatchError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(TypeTable {
            type_name: self.type_name,
            events: self.events,
            properties: self.properties,
        })
    }
}

thread_local! {
    static TABLES: RefCell<HashMap<TypeId, Rc<TypeTable>>> = RefCell::new(HashMap::new());
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Merged events and properties of one type.
#[derive(Debug)]
pub struct TypeTable {
    type_name: &'static str,
    events: BTreeMap<String, Rc<EventDescriptor>>,
    properties: BTreeMap<String, Rc<PropertyDescriptor>>,
}

impl TypeTable {
    /// The memoised table for `T`, built on first request.
    pub fn for_type<T: Declare>() -> Result<Rc<TypeTable>, DispatchError> {
        let id = TypeId::of::<T>();
        if let Some(table) = TABLES.with(|tables| tables.borrow().get(&id).cloned()) {
            return Ok(table);
        }

        // Built without holding the cache: `declare` may `inherit` and recurse.
        let mut decl = Declaration::new(short_type_name::<T>());
        T::declare(&mut decl);
        let table = Rc::new(decl.finish()?);
        debug!(
            type_name = table.type_name,
            events = table.events.len(),
            properties = table.properties.len(),
            "type table built"
        );
        TABLES.with(|tables| {
            tables.borrow_mut().insert(id, Rc::clone(&table));
        });
        Ok(table)
    }

    /// A table with no declarations, for bare dispatchers.
    #[must_use]
    pub fn empty() -> Rc<TypeTable> {
        Rc::new(Self {
            type_name: "Dispatcher",
            events: BTreeMap::new(),
            properties: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Declared events in name order.
    pub fn events(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.events.values().map(|d| &**d)
    }

    /// Declared properties in name order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values().map(|d| &**d)
    }

    pub(crate) fn property_descriptors(&self) -> impl Iterator<Item = &Rc<PropertyDescriptor>> {
        self.properties.values()
    }

    #[must_use]
    pub fn event(&self, name: &str) -> Option<&EventDescriptor> {
        self.events.get(name).map(|d| &**d)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name).map(|d| &**d)
    }

    #[must_use]
    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Plain description for documentation tools. Reads nothing from any
    /// instance and dispatches nothing.
    #[must_use]
    pub fn describe(&self) -> TypeDescription {
        TypeDescription {
            type_name: self.type_name.to_string(),
            events: self
                .events()
                .map(|e| EventDescription {
                    name: e.name().to_string(),
                    declared_by: e.declared_by().to_string(),
                })
                .collect(),
            properties: self
                .properties()
                .map(|p| {
                    let property = p.property();
                    let bounds = property.bounds();
                    PropertyDescription {
                        name: p.name().to_string(),
                        kind: property.kind(),
                        default: property.default_value().snapshot(),
                        allow_none: property.allow_none(),
                        min: bounds.min,
                        max: bounds.max,
                        copy_on_change: property.copy_on_change(),
                        declared_by: p.declared_by().to_string(),
                    }
                })
                .collect(),
        }
    }
}

/// Read-only summary of a [`TypeTable`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TypeDescription {
    pub type_name: String,
    pub events: Vec<EventDescription>,
    pub properties: Vec<PropertyDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EventDescription {
    pub name: String,
    pub declared_by: String,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PropertyDescription {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_kind"))]
    pub kind: PropertyKind,
    pub default: Value,
    pub allow_none: bool,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub copy_on_change: bool,
    pub declared_by: String,
}

#[cfg(feature = "serde")]
fn serialize_kind<S: serde::Serializer>(kind: &PropertyKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.as_str())
}

#[cfg(feature = "serde")]
impl TypeDescription {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
