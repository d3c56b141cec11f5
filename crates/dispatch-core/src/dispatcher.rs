#![forbid(unsafe_code)]

//! The per-instance registry of event and property channels.
//!
//! # Design
//!
//! [`Dispatcher`] is a cheap handle over shared state, like the channels it
//! owns. A host object embeds one (usually built with
//! [`Dispatcher::new::<Self>()`](Dispatcher::new)) and exposes it to
//! listeners. Listeners never keep the host alive and the host never keeps
//! method-bound listeners alive.
//!
//! # Invariants
//!
//! 1. A name is either an event or a property, never both.
//! 2. Multi-name operations (`register_event`, `bind_all`) check every name
//!    before touching any channel: they succeed completely or change nothing.
//! 3. `unbind` reaches every channel (events, properties, async
//!    registrations).
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use dispatch_core::{Callback, Declaration, Declare, Dispatcher, Emission, Property};
//!
//! struct Counter;
//! impl Declare for Counter {
//!     fn declare(decl: &mut Declaration) {
//!         decl.event("on_done").property("count", Property::int());
//!     }
//! }
//!
//! struct Listener { calls: Cell<u32> }
//! impl Listener {
//!     fn on_any(&self, _e: &Emission) { self.calls.set(self.calls.get() + 1); }
//! }
//!
//! let counter = Dispatcher::new::<Counter>().unwrap();
//! let listener = Rc::new(Listener { calls: Cell::new(0) });
//! counter.bind("count", Callback::method(&listener, Listener::on_any)).unwrap();
//! counter.set("count", 5).unwrap();
//! counter.set("count", 5).unwrap(); // unchanged: no dispatch
//! assert_eq!(listener.calls.get(), 1);
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::aio::ExecutionContext;
use crate::callback::{Callback, CallbackKey, Flow, OwnerId};
use crate::channel::{Channel, ChannelKind, EmissionGuard};
use crate::emission::{Emission, Kwargs};
use crate::error::DispatchError;
use crate::lock::ContextId;
use crate::property::{Bounds, PropertyCell};
use crate::table::{Declare, TypeTable};
use crate::value::Value;

/// What [`Dispatcher::unbind`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unbind {
    /// One callback, from every channel.
    Callback(CallbackKey),
    /// Every callback bound to this owner, from every channel.
    Owner(OwnerId),
}

impl From<&Callback> for Unbind {
    fn from(callback: &Callback) -> Self {
        Self::Callback(callback.key())
    }
}

impl From<CallbackKey> for Unbind {
    fn from(key: CallbackKey) -> Self {
        Self::Callback(key)
    }
}

impl From<OwnerId> for Unbind {
    fn from(owner: OwnerId) -> Self {
        Self::Owner(owner)
    }
}

struct DispatcherInner {
    table: Rc<TypeTable>,
    events: RefCell<HashMap<Rc<str>, Channel>>,
    properties: HashMap<Rc<str>, Rc<PropertyCell>>,
}

/// Registry of named channels for one instance.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<DispatcherInner>,
}

/// Non-owning handle to a [`Dispatcher`].
#[derive(Clone, Default)]
pub struct WeakDispatcher {
    inner: Weak<DispatcherInner>,
}

impl WeakDispatcher {
    #[must_use]
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.inner.upgrade().map(|inner| Dispatcher { inner })
    }
}

impl fmt::Debug for WeakDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDispatcher")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Dispatcher {
    /// Build a dispatcher with the events and properties `T` declares.
    ///
    /// The declaration runs once per type; later instances reuse the table.
    pub fn new<T: Declare>() -> Result<Self, DispatchError> {
        Ok(Self::from_table(TypeTable::for_type::<T>()?))
    }

    /// A dispatcher with no declarations; events are added at runtime.
    #[must_use]
    pub fn bare() -> Self {
        Self::from_table(TypeTable::empty())
    }

    fn from_table(table: Rc<TypeTable>) -> Self {
        let inner = Rc::new_cyclic(|weak| {
            let owner = WeakDispatcher {
                inner: weak.clone(),
            };
            let events = table
                .events()
                .map(|e| {
                    let name = e.shared_name();
                    (Rc::clone(&name), Channel::new(name, ChannelKind::Event))
                })
                .collect();
            let properties = table
                .property_descriptors()
                .map(|p| {
                    (
                        p.shared_name(),
                        PropertyCell::new(Rc::clone(p), owner.clone()),
                    )
                })
                .collect();
            DispatcherInner {
                table: Rc::clone(&table),
                events: RefCell::new(events),
                properties,
            }
        });
        Self { inner }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The declaration table this instance was built from.
    #[must_use]
    pub fn table(&self) -> &Rc<TypeTable> {
        &self.inner.table
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Add event channels at runtime.
    ///
    /// Fails without registering anything if any name is already an event
    /// or a property (or repeats within `names`).
    pub fn register_event(&self, names: &[&str]) -> Result<(), DispatchError> {
        let mut seen = HashSet::new();
        for name in names {
            if self.has_property(name) {
                return Err(DispatchError::PropertyExists {
                    name: (*name).to_string(),
                });
            }
            if self.has_event(name) || !seen.insert(*name) {
                return Err(DispatchError::EventExists {
                    name: (*name).to_string(),
                });
            }
        }
        let mut events = self.inner.events.borrow_mut();
        for name in names {
            let name: Rc<str> = Rc::from(*name);
            events.insert(
                Rc::clone(&name),
                Channel::new(name, ChannelKind::Event),
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn has_event(&self, name: &str) -> bool {
        self.inner.events.borrow().contains_key(name)
    }

    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.inner.properties.contains_key(name)
    }

    /// Whether `name` is an event or a property.
    #[must_use]
    pub fn has_channel(&self, name: &str) -> bool {
        self.has_property(name) || self.has_event(name)
    }

    /// The channel for an event or property, if any.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<Channel> {
        if let Some(cell) = self.inner.properties.get(name) {
            return Some(cell.channel().clone());
        }
        self.inner.events.borrow().get(name).cloned()
    }

    pub fn get_channel(&self, name: &str) -> Result<Channel, DispatchError> {
        self.channel(name)
            .ok_or_else(|| DispatchError::not_found(name))
    }

    /// Event names, sorted.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .events
            .borrow()
            .keys()
            .map(|n| n.to_string())
            .collect();
        names.sort();
        names
    }

    /// Property names, sorted.
    #[must_use]
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .properties
            .keys()
            .map(|n| n.to_string())
            .collect();
        names.sort();
        names
    }

    fn all_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.inner.events.borrow().values().cloned().collect();
        channels.extend(self.inner.properties.values().map(|c| c.channel().clone()));
        channels
    }

    /// Drop every runtime-registered and declared event channel.
    pub(crate) fn clear_events(&self) {
        self.inner.events.borrow_mut().clear();
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Subscribe `callback` to the event or property `name`.
    pub fn bind(&self, name: &str, callback: Callback) -> Result<(), DispatchError> {
        self.bind_all([(name, callback)])
    }

    /// Subscribe several callbacks. Every name is resolved before anything
    /// is bound; one unknown name rejects the whole call.
    pub fn bind_all<'a, I>(&self, bindings: I) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = (&'a str, Callback)>,
    {
        let resolved = bindings
            .into_iter()
            .map(|(name, callback)| self.get_channel(name).map(|channel| (channel, callback)))
            .collect::<Result<Vec<_>, DispatchError>>()?;
        for (channel, callback) in resolved {
            let added = channel.subscribe(callback);
            debug!(channel = channel.name(), added, "bound");
        }
        Ok(())
    }

    /// Subscribe `callback` to run on `context` when `name` dispatches.
    pub fn bind_async(
        &self,
        context: &Rc<dyn ExecutionContext>,
        name: &str,
        callback: Callback,
    ) -> Result<(), DispatchError> {
        self.bind_all_async(context, [(name, callback)])
    }

    /// Async counterpart of [`bind_all`](Self::bind_all), with the same
    /// all-or-nothing name check.
    pub fn bind_all_async<'a, I>(
        &self,
        context: &Rc<dyn ExecutionContext>,
        bindings: I,
    ) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = (&'a str, Callback)>,
    {
        let resolved = bindings
            .into_iter()
            .map(|(name, callback)| self.get_channel(name).map(|channel| (channel, callback)))
            .collect::<Result<Vec<_>, DispatchError>>()?;
        for (channel, callback) in resolved {
            let added = channel.subscribe_async(context, callback);
            debug!(
                channel = channel.name(),
                context = context.id().as_u64(),
                added,
                "bound async"
            );
        }
        Ok(())
    }

    /// Remove a callback or every callback of an owner from all channels.
    /// Returns how many registrations were removed.
    pub fn unbind(&self, target: impl Into<Unbind>) -> usize {
        let target = target.into();
        let removed: usize = self
            .all_channels()
            .iter()
            .map(|channel| match target {
                Unbind::Callback(key) => usize::from(channel.unsubscribe_callback(&key)),
                Unbind::Owner(owner) => channel.unsubscribe_owner(owner),
            })
            .sum();
        debug!(?target, removed, "unbound");
        removed
    }

    pub fn unbind_all<I, T>(&self, targets: I) -> usize
    where
        I: IntoIterator<Item = T>,
        T: Into<Unbind>,
    {
        targets.into_iter().map(|t| self.unbind(t)).sum()
    }

    /// Remove every callback bound to `owner`.
    pub fn unbind_owner<T: ?Sized>(&self, owner: &Rc<T>) -> usize {
        self.unbind(OwnerId::of(owner))
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Dispatch on the event (or property) channel `name`.
    pub fn emit(&self, name: &str, emission: impl Into<Emission>) -> Result<Flow, DispatchError> {
        self.get_channel(name)?.dispatch(emission.into())
    }

    /// Hold the emission lock of `name` for the main context.
    pub fn emission_lock(&self, name: &str) -> Result<EmissionGuard, DispatchError> {
        self.emission_lock_in(name, ContextId::MAIN)
    }

    pub fn emission_lock_in(
        &self,
        name: &str,
        context: ContextId,
    ) -> Result<EmissionGuard, DispatchError> {
        Ok(self.get_channel(name)?.emission_lock_in(context))
    }

    // ========================================================================
    // Properties
    // ========================================================================

    fn cell(&self, name: &str) -> Result<&Rc<PropertyCell>, DispatchError> {
        self.inner
            .properties
            .get(name)
            .ok_or_else(|| DispatchError::not_found(name))
    }

    /// Current value of property `name`.
    pub fn get(&self, name: &str) -> Result<Value, DispatchError> {
        Ok(self.cell(name)?.get())
    }

    /// Assign property `name`. Dispatches only if the value changed.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<Flow, DispatchError> {
        self.set_with(name, value, Kwargs::new())
    }

    /// Assign with extra keyword arguments carried on the dispatch.
    pub fn set_with(
        &self,
        name: &str,
        value: impl Into<Value>,
        extra: Kwargs,
    ) -> Result<Flow, DispatchError> {
        self.cell(name)?.set(value.into(), extra)
    }

    /// Effective bounds of property `name` on this instance.
    pub fn bounds(&self, name: &str) -> Result<Bounds, DispatchError> {
        Ok(self.cell(name)?.bounds())
    }

    /// Override the bounds of property `name` on this instance only.
    pub fn set_bounds(&self, name: &str, bounds: Bounds) -> Result<(), DispatchError> {
        self.cell(name)?.set_bounds(bounds);
        Ok(())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("type", &self.inner.table.type_name())
            .field("events", &self.event_names())
            .field("properties", &self.property_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Property;
    use crate::table::Declaration;
    use std::cell::Cell;

    struct Widget;
    impl Declare for Widget {
        fn declare(decl: &mut Declaration) {
            decl.events(["on_click", "on_hover"])
                .property("label", Property::string())
                .property("size", Property::int().with_range(0, 100));
        }
    }

    struct Listener {
        calls: Cell<u32>,
    }

    impl Listener {
        fn new() -> Rc<Self> {
            Rc::new(Self { calls: Cell::new(0) })
        }

        fn hit(&self, _e: &Emission) {
            self.calls.set(self.calls.get() + 1);
        }
    }

    #[test]
    fn register_event_checks_every_name_first() {
        let d = Dispatcher::new::<Widget>().unwrap();
        let err = d.register_event(&["on_new", "label"]).unwrap_err();
        assert_eq!(err.as_label(), "property_exists");
        assert!(!d.has_event("on_new"));

        let err = d.register_event(&["on_click"]).unwrap_err();
        assert_eq!(err.as_label(), "event_exists");
        assert!(d.register_event(&["on_x", "on_x"]).is_err());

        d.register_event(&["on_new"]).unwrap();
        assert!(d.has_channel("on_new"));
    }

    #[test]
    fn bind_all_is_all_or_nothing() {
        let d = Dispatcher::new::<Widget>().unwrap();
        let l = Listener::new();
        let err = d
            .bind_all([
                ("on_click", Callback::method(&l, Listener::hit)),
                ("missing", Callback::method(&l, Listener::hit)),
            ])
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
        d.emit("on_click", Emission::new()).unwrap();
        assert_eq!(l.calls.get(), 0);
    }

    #[test]
    fn unknown_names_are_errors() {
        let d = Dispatcher::bare();
        assert!(d.emit("nope", Emission::new()).is_err());
        assert!(d.get("nope").is_err());
        assert!(d.emission_lock("nope").is_err());
        assert!(d.get_channel("nope").is_err());
    }

    #[test]
    fn unbind_owner_reaches_events_and_properties() {
        let d = Dispatcher::new::<Widget>().unwrap();
        let l = Listener::new();
        d.bind("on_click", Callback::method(&l, Listener::hit)).unwrap();
        d.bind("size", Callback::method(&l, Listener::hit)).unwrap();
        assert_eq!(d.unbind_owner(&l), 2);
        d.emit("on_click", Emission::new()).unwrap();
        d.set("size", 3).unwrap();
        assert_eq!(l.calls.get(), 0);
    }

    #[test]
    fn instances_hold_independent_values() {
        let a = Dispatcher::new::<Widget>().unwrap();
        let b = Dispatcher::new::<Widget>().unwrap();
        a.set("size", 10).unwrap();
        assert_eq!(a.get("size").unwrap(), Value::Int(10));
        assert_eq!(b.get("size").unwrap(), Value::Int(0));
        assert!(Rc::ptr_eq(a.table(), b.table()));
    }

    #[test]
    fn instance_bounds() {
        let d = Dispatcher::new::<Widget>().unwrap();
        assert!(d.set("size", 150).is_err());
        d.set_bounds("size", Bounds::new(None, Some(Value::Int(200))))
            .unwrap();
        d.set("size", 150).unwrap();
        assert_eq!(d.get("size").unwrap(), Value::Int(150));
        let other = Dispatcher::new::<Widget>().unwrap();
        assert!(other.set("size", 150).is_err());
    }

    #[test]
    fn emission_carries_instance() {
        let d = Dispatcher::new::<Widget>().unwrap();
        let seen = Rc::new(Cell::new(false));
        let seen2 = Rc::clone(&seen);
        let me = d.downgrade();
        let _sub = d.get_channel("label").unwrap().subscribe_guarded(move |e: &Emission| {
            let same = e
                .instance()
                .zip(me.upgrade())
                .is_some_and(|(a, b)| a.ptr_eq(&b));
            seen2.set(same && e.property() == Some("label"));
        });
        d.set("label", "hi").unwrap();
        assert!(seen.get());
    }
}
