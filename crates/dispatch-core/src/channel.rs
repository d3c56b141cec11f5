#![forbid(unsafe_code)]

//! Named event/property slot: subscribers, emission lock and waiters.
//!
//! # Design
//!
//! A [`Channel`] is a cheap handle (`Rc`) to shared state; cloning it gives
//! another handle to the **same** channel. All state sits behind `RefCell`s
//! that are never borrowed while a subscriber runs, so a subscriber may
//! emit, bind or unbind (on this or any other channel) during dispatch.
//!
//! # Dispatch
//!
//! ```text
//! dispatch(e)
//!   ├─ lock held by any context? ── yes ──► record e as pending, return Continue
//!   └─ no
//!       ├─ take waiters                    (later waiters wait for the next one)
//!       ├─ snapshot live subscribers
//!       ├─ for each still-subscribed entry:
//!       │     Continue → next │ Stop → return Stop │ Err → return Err
//!       ├─ resolve taken waiters with e
//!       └─ hand e off to async subscribers (only if not stopped or failed)
//! ```
//!
//! # Failure Modes
//!
//! - **Failing subscriber**: the error is returned as
//!   [`DispatchError::Callback`]; later subscribers of that dispatch are
//!   skipped. Panics unwind through untouched.
//! - **Failing replay in `Drop`**: an [`EmissionGuard`] dropped without
//!   [`EmissionGuard::release`] cannot return the error; it is logged.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use futures::future::FutureExt;
use tracing::{debug, trace, warn};

use crate::aio::{AsyncListeners, Completion, ExecutionContext, NextEmission};
use crate::callback::{Callback, CallbackKey, Flow, OwnerId, Subscription};
use crate::emission::Emission;
use crate::error::DispatchError;
use crate::lock::{ContextId, EmissionLock};
use crate::weak_set::WeakCallbackSet;

/// Which registry partition a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Event,
    Property,
}

impl ChannelKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Property => "property",
        }
    }
}

struct ChannelInner {
    name: Rc<str>,
    kind: ChannelKind,
    listeners: RefCell<WeakCallbackSet>,
    lock: RefCell<EmissionLock>,
    waiters: RefCell<Vec<oneshot::Sender<Emission>>>,
    async_listeners: RefCell<AsyncListeners>,
}

/// A named dispatch slot.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<ChannelInner>,
}

impl Channel {
    pub fn new(name: impl Into<Rc<str>>, kind: ChannelKind) -> Self {
        let name = name.into();
        debug!(channel = &*name, kind = kind.as_str(), "channel created");
        Self {
            inner: Rc::new(ChannelInner {
                name,
                kind,
                listeners: RefCell::new(WeakCallbackSet::new()),
                lock: RefCell::new(EmissionLock::new()),
                waiters: RefCell::new(Vec::new()),
                async_listeners: RefCell::new(AsyncListeners::default()),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    /// Whether both handles refer to the same channel.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    /// Subscribe a callback. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, callback: Callback) -> bool {
        self.inner.listeners.borrow_mut().add(callback)
    }

    /// Subscribe a closure owned by the returned guard.
    pub fn subscribe_guarded<F, R>(&self, f: F) -> Subscription
    where
        F: Fn(&Emission) -> R + 'static,
        R: crate::callback::IntoOutcome + 'static,
    {
        let (callback, guard) = Callback::guarded(f);
        self.subscribe(callback);
        guard
    }

    /// Subscribe a callback to run on `context` instead of inline.
    pub fn subscribe_async(&self, context: &Rc<dyn ExecutionContext>, callback: Callback) -> bool {
        self.inner
            .async_listeners
            .borrow_mut()
            .add(context, callback)
    }

    /// Remove one callback (sync and async registrations).
    pub fn unsubscribe_callback(&self, key: &CallbackKey) -> bool {
        let sync = self.inner.listeners.borrow_mut().remove(key);
        let aio = self.inner.async_listeners.borrow_mut().remove(key);
        sync || aio
    }

    /// Remove every callback owned by `owner`. Returns how many were removed.
    pub fn unsubscribe_owner(&self, owner: OwnerId) -> usize {
        let sync = self.inner.listeners.borrow_mut().remove_owner(owner);
        let aio = self.inner.async_listeners.borrow_mut().remove_owner(owner);
        sync + aio
    }

    /// Live synchronous subscribers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Live async subscribers across all contexts.
    #[must_use]
    pub fn async_listener_count(&self) -> usize {
        self.inner.async_listeners.borrow().len()
    }

    /// Contexts with at least one async subscriber.
    #[must_use]
    pub fn async_context_count(&self) -> usize {
        self.inner.async_listeners.borrow().context_count()
    }

    /// Whether `key` is currently subscribed (synchronously).
    #[must_use]
    pub fn is_subscribed(&self, key: &CallbackKey) -> bool {
        self.inner.listeners.borrow().contains(key)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Deliver `emission` to every live subscriber, or park it as pending
    /// while the emission lock is held.
    ///
    /// Returns [`Flow::Stop`] if a subscriber returned `false`/`Stop`.
    pub fn dispatch(&self, emission: Emission) -> Result<Flow, DispatchError> {
        if self.park_if_locked(&emission) {
            return Ok(Flow::Continue);
        }
        self.deliver(emission, None)
    }

    /// Like [`dispatch`](Self::dispatch), also returning a [`Completion`]
    /// that resolves when every async hand-off of this dispatch finished.
    pub fn dispatch_tracked(
        &self,
        emission: Emission,
    ) -> Result<(Flow, Completion), DispatchError> {
        if self.park_if_locked(&emission) {
            return Ok((Flow::Continue, Completion::ready()));
        }
        let mut pending = Vec::new();
        let flow = self.deliver(emission, Some(&mut pending))?;
        Ok((flow, Completion::new(pending)))
    }

    /// Wait for the next delivered emission (not one parked by a lock).
    #[must_use]
    pub fn next_emission(&self) -> NextEmission {
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.borrow_mut().push(tx);
        NextEmission::new(rx)
    }

    fn park_if_locked(&self, emission: &Emission) -> bool {
        let mut lock = self.inner.lock.borrow_mut();
        if !lock.is_held() {
            return false;
        }
        trace!(channel = self.name(), "emission parked while locked");
        lock.record(emission.clone());
        true
    }

    fn deliver(
        &self,
        emission: Emission,
        tracker: Option<&mut Vec<oneshot::Receiver<()>>>,
    ) -> Result<Flow, DispatchError> {
        let waiters = mem::take(&mut *self.inner.waiters.borrow_mut());
        let callbacks = self.inner.listeners.borrow_mut().live_callbacks();
        trace!(
            channel = self.name(),
            listeners = callbacks.len(),
            waiters = waiters.len(),
            "dispatch"
        );

        let mut result = Ok(Flow::Continue);
        for callback in callbacks {
            // Unsubscribed by an earlier callback of this same dispatch.
            if !self.inner.listeners.borrow().contains(&callback.key()) {
                continue;
            }
            match callback.invoke(&emission) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    result = Ok(Flow::Stop);
                    break;
                }
                Err(source) => {
                    result = Err(DispatchError::Callback {
                        channel: self.name().to_string(),
                        source,
                    });
                    break;
                }
            }
        }

        for waiter in waiters {
            // A dropped receiver just means nobody is waiting anymore.
            let _ = waiter.send(emission.clone());
        }

        if matches!(result, Ok(Flow::Continue)) {
            self.hand_off(&emission, tracker);
        }
        result
    }

    fn hand_off(&self, emission: &Emission, mut tracker: Option<&mut Vec<oneshot::Receiver<()>>>) {
        let handoffs = self.inner.async_listeners.borrow_mut().live();
        for (context, callback) in handoffs {
            let done = tracker.as_deref_mut().map(|pending| {
                let (tx, rx) = oneshot::channel::<()>();
                pending.push(rx);
                tx
            });
            let channel: Weak<ChannelInner> = Rc::downgrade(&self.inner);
            let context_id = context.id();
            let emission = emission.clone();
            let task = async move {
                let still_bound = channel.upgrade().is_some_and(|c| {
                    c.async_listeners
                        .borrow()
                        .contains(context_id, &callback.key())
                });
                if still_bound {
                    if let Err(err) = callback.invoke(&emission) {
                        warn!(error = %err, "async callback failed");
                    }
                }
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            .boxed_local();
            if let Err(err) = context.spawn(task) {
                warn!(channel = self.name(), error = %err, "async hand-off rejected");
            }
        }
    }

    // ========================================================================
    // Emission lock
    // ========================================================================

    /// Hold the emission lock for the main context until the guard drops.
    #[must_use]
    pub fn emission_lock(&self) -> EmissionGuard {
        self.emission_lock_in(ContextId::MAIN)
    }

    /// Hold the emission lock for `context` until the guard drops.
    #[must_use]
    pub fn emission_lock_in(&self, context: ContextId) -> EmissionGuard {
        let first = self.inner.lock.borrow_mut().acquire(context);
        debug!(
            channel = self.name(),
            context = context.as_u64(),
            nested = !first,
            "emission lock acquired"
        );
        EmissionGuard {
            channel: self.clone(),
            context,
            released: false,
        }
    }

    /// Held by any context.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.lock.borrow().is_held()
    }

    fn release_lock(&self, context: ContextId) -> Result<Flow, DispatchError> {
        let replay = self.inner.lock.borrow_mut().release(context);
        match replay {
            Some(emission) => {
                debug!(channel = self.name(), "emission lock released, replaying");
                self.deliver(emission, None)
            }
            None => Ok(Flow::Continue),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("listeners", &self.listener_count())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Scoped emission lock. Releases on every exit path.
///
/// Prefer [`release`](Self::release) when the replayed dispatch's result
/// matters; dropping the guard replays too but can only log a failure, and
/// skips the replay entirely while unwinding from a panic.
#[must_use = "the emission lock is released as soon as the guard is dropped"]
pub struct EmissionGuard {
    channel: Channel,
    context: ContextId,
    released: bool,
}

impl EmissionGuard {
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Release now and return the replayed dispatch's result.
    pub fn release(mut self) -> Result<Flow, DispatchError> {
        self.released = true;
        self.channel.release_lock(self.context)
    }
}

impl Drop for EmissionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if std::thread::panicking() {
            self.channel.inner.lock.borrow_mut().abandon(self.context);
            return;
        }
        if let Err(err) = self.channel.release_lock(self.context) {
            warn!(
                channel = self.channel.name(),
                error = %err,
                "replay after emission lock failed"
            );
        }
    }
}

impl fmt::Debug for EmissionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmissionGuard")
            .field("channel", &self.channel.name())
            .field("context", &self.context)
            .finish()
    }
}
