#![forbid(unsafe_code)]

//! The default dispatcher and the `receiver` convenience.
//!
//! Each thread has one bare [`Dispatcher`], created on first use and living
//! for the rest of the thread. Events are added with [`register_event`].
//! [`reset`] drops every event and cached callback; it exists for test
//! harnesses and nothing else should call it.
//!
//! # Receiver cache
//!
//! [`receiver`] with [`ReceiverConfig::cache`] parks callbacks for events
//! that do not exist yet. They are bound when the event is registered. The
//! cache holds callbacks weakly, like a channel would.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::callback::{Callback, Flow};
use crate::channel::{Channel, EmissionGuard};
use crate::dispatcher::{Dispatcher, Unbind};
use crate::emission::Emission;
use crate::error::DispatchError;
use crate::weak_set::WeakCallbackSet;

thread_local! {
    static GLOBAL: Dispatcher = Dispatcher::bare();
    static CACHE: RefCell<HashMap<String, WeakCallbackSet>> = RefCell::new(HashMap::new());
}

/// Handle to this thread's default dispatcher.
#[must_use]
pub fn global() -> Dispatcher {
    GLOBAL.with(Dispatcher::clone)
}

/// Register events on the default dispatcher and bind any callbacks cached
/// for them.
pub fn register_event(names: &[&str]) -> Result<(), DispatchError> {
    let dispatcher = global();
    dispatcher.register_event(names)?;
    for name in names {
        let Some(cached) = CACHE.with(|cache| cache.borrow_mut().remove(*name)) else {
            continue;
        };
        let callbacks = cached.into_callbacks();
        debug!(event = *name, count = callbacks.len(), "binding cached receivers");
        dispatcher.bind_all(callbacks.into_iter().map(|cb| (*name, cb)))?;
    }
    Ok(())
}

pub fn bind(name: &str, callback: Callback) -> Result<(), DispatchError> {
    global().bind(name, callback)
}

/// Unbind from the default dispatcher and drop matching cached receivers.
pub fn unbind(target: impl Into<Unbind>) -> usize {
    let target = target.into();
    let cached: usize = CACHE.with(|cache| {
        cache
            .borrow_mut()
            .values_mut()
            .map(|set| match target {
                Unbind::Callback(key) => usize::from(set.remove(&key)),
                Unbind::Owner(owner) => set.remove_owner(owner),
            })
            .sum()
    });
    global().unbind(target) + cached
}

pub fn emit(name: &str, emission: impl Into<Emission>) -> Result<Flow, DispatchError> {
    global().emit(name, emission)
}

pub fn get_channel(name: &str) -> Result<Channel, DispatchError> {
    global().get_channel(name)
}

pub fn emission_lock(name: &str) -> Result<EmissionGuard, DispatchError> {
    global().emission_lock(name)
}

/// Forget every event and cached receiver of the default dispatcher.
pub fn reset() {
    global().clear_events();
    CACHE.with(|cache| cache.borrow_mut().clear());
    debug!("default dispatcher reset");
}

/// How [`receiver`] treats events that are not registered yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Park the callback and bind it once the event is registered.
    pub cache: bool,
    /// Register missing events on the spot.
    pub auto_register: bool,
}

impl ReceiverConfig {
    #[must_use]
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_auto_register(mut self, auto_register: bool) -> Self {
        self.auto_register = auto_register;
        self
    }
}

/// Bind `callback` to one or more events of the default dispatcher.
///
/// Missing events are registered (`auto_register`), cached (`cache`) or
/// rejected with [`DispatchError::NotFound`] before anything is bound.
/// Returns the callback so the caller can unbind it later.
pub fn receiver(
    names: &[&str],
    config: ReceiverConfig,
    callback: Callback,
) -> Result<Callback, DispatchError> {
    let dispatcher = global();
    let (present, mut missing): (Vec<&str>, Vec<&str>) =
        names.iter().copied().partition(|name| dispatcher.has_channel(name));
    let mut seen = HashSet::new();
    missing.retain(|name| seen.insert(*name));

    if !missing.is_empty() {
        if config.auto_register {
            register_event(&missing)?;
            return bind_each(&dispatcher, names, &callback);
        }
        if !config.cache {
            return Err(DispatchError::not_found(missing[0]));
        }
        CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            for name in &missing {
                cache
                    .entry((*name).to_string())
                    .or_default()
                    .add(callback.clone());
            }
        });
        debug!(events = ?missing, "receiver cached");
    }
    bind_each(&dispatcher, &present, &callback)
}

fn bind_each(
    dispatcher: &Dispatcher,
    names: &[&str],
    callback: &Callback,
) -> Result<Callback, DispatchError> {
    dispatcher.bind_all(names.iter().map(|name| (*name, callback.clone())))?;
    Ok(callback.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Listener {
        calls: Cell<u32>,
    }

    impl Listener {
        fn on_event(&self, _e: &Emission) {
            self.calls.set(self.calls.get() + 1);
        }
    }

    #[test]
    fn free_functions_share_one_dispatcher() {
        reset();
        register_event(&["on_global"]).unwrap();
        let l = Rc::new(Listener { calls: Cell::new(0) });
        bind("on_global", Callback::method(&l, Listener::on_event)).unwrap();
        emit("on_global", Emission::new()).unwrap();
        assert_eq!(l.calls.get(), 1);
        assert!(global().has_event("on_global"));
        assert_eq!(unbind(crate::OwnerId::of(&l)), 1);
        reset();
        assert!(get_channel("on_global").is_err());
    }

    #[test]
    fn receiver_without_options_rejects_missing() {
        reset();
        let l = Rc::new(Listener { calls: Cell::new(0) });
        let err = receiver(
            &["on_missing"],
            ReceiverConfig::default(),
            Callback::method(&l, Listener::on_event),
        )
        .unwrap_err();
        assert_eq!(err.as_label(), "not_found");
    }

    #[test]
    fn receiver_cache_binds_on_registration() {
        reset();
        let l = Rc::new(Listener { calls: Cell::new(0) });
        receiver(
            &["on_later"],
            ReceiverConfig::default().with_cache(true),
            Callback::method(&l, Listener::on_event),
        )
        .unwrap();
        register_event(&["on_later"]).unwrap();
        emit("on_later", Emission::new()).unwrap();
        assert_eq!(l.calls.get(), 1);
        reset();
    }

    #[test]
    fn receiver_auto_register_tolerates_repeated_names() {
        reset();
        let l = Rc::new(Listener { calls: Cell::new(0) });
        receiver(
            &["on_twice", "on_twice"],
            ReceiverConfig::default().with_auto_register(true),
            Callback::method(&l, Listener::on_event),
        )
        .unwrap();
        emit("on_twice", Emission::new()).unwrap();
        assert_eq!(l.calls.get(), 1);
        reset();
    }

    #[test]
    fn receiver_auto_register() {
        reset();
        let l = Rc::new(Listener { calls: Cell::new(0) });
        receiver(
            &["on_auto_a", "on_auto_b"],
            ReceiverConfig::default().with_auto_register(true),
            Callback::method(&l, Listener::on_event),
        )
        .unwrap();
        emit("on_auto_a", Emission::new()).unwrap();
        emit("on_auto_b", Emission::new()).unwrap();
        assert_eq!(l.calls.get(), 2);
        reset();
    }
}
