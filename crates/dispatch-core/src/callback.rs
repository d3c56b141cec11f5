#![forbid(unsafe_code)]

//! Callback references that do not keep their owners alive.
//!
//! # Variants
//!
//! | Constructor | Identity | Lifetime |
//! |-------------|----------|----------|
//! | [`Callback::method`] | (fn item type, owner address) | Weak on the owner `Rc` |
//! | [`Callback::function`] | closure allocation | Strong (the `Callback` owns it) |
//! | [`Callback::from_fn`] | fn item type | Static |
//! | [`Callback::guarded`] | closure allocation | Weak; the [`Subscription`] owns it |
//!
//! Two callbacks with the same [`CallbackKey`] are the same subscriber:
//! subscribing both to one channel stores a single entry.
//!
//! Functions are identified by the `TypeId` of the fn item, never by code
//! address: optimised builds may merge identical function bodies into one
//! address. Pass fn items (`Type::method`) or closure expressions, not
//! `fn` pointers; all pointers of one signature share a type.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::emission::Emission;
use crate::error::CallbackError;

/// Whether a dispatch continues past a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    /// Skip the remaining subscribers of this dispatch.
    Stop,
}

impl Flow {
    #[must_use]
    pub fn is_stop(self) -> bool {
        self == Self::Stop
    }
}

/// Result of invoking one subscriber.
pub type Outcome = Result<Flow, CallbackError>;

/// Return types a subscriber may use.
///
/// `()` continues, `false` stops (as does [`Flow::Stop`]), and `Err` aborts
/// the dispatch with [`DispatchError::Callback`](crate::DispatchError::Callback).
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome {
        Ok(Flow::Continue)
    }
}

impl IntoOutcome for bool {
    fn into_outcome(self) -> Outcome {
        Ok(if self { Flow::Continue } else { Flow::Stop })
    }
}

impl IntoOutcome for Flow {
    fn into_outcome(self) -> Outcome {
        Ok(self)
    }
}

impl<T: IntoOutcome, E: Into<CallbackError>> IntoOutcome for Result<T, E> {
    fn into_outcome(self) -> Outcome {
        self.map_err(Into::into).and_then(IntoOutcome::into_outcome)
    }
}

type Invoke = dyn Fn(&Emission) -> Outcome;
type MethodThunk = dyn Fn(&dyn Any, &Emission) -> Outcome;

/// Identity of a subscribing object: the address of its `Rc` allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(usize);

impl OwnerId {
    pub fn of<T: ?Sized>(owner: &Rc<T>) -> Self {
        Self(Rc::as_ptr(owner).cast::<()>() as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FuncId {
    Item(TypeId),
    Alloc(usize),
}

/// Stable identity of a callback: function plus optional owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackKey {
    func: FuncId,
    owner: Option<OwnerId>,
}

impl CallbackKey {
    #[must_use]
    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }
}

#[derive(Clone)]
enum Target {
    Method {
        owner: Weak<dyn Any>,
        thunk: Rc<MethodThunk>,
    },
    Function(Rc<Invoke>),
    Guarded(Weak<Invoke>),
}

/// A subscriber reference.
#[derive(Clone)]
pub struct Callback {
    key: CallbackKey,
    target: Target,
}

impl Callback {
    /// Bind `method` to `owner` without keeping `owner` alive.
    ///
    /// Once the last strong `Rc` to `owner` is dropped the callback is dead:
    /// it is never invoked again and is pruned on the next lookup.
    pub fn method<T, M, R>(owner: &Rc<T>, method: M) -> Self
    where
        T: 'static,
        M: Fn(&T, &Emission) -> R + 'static,
        R: IntoOutcome + 'static,
    {
        let weak: Weak<T> = Rc::downgrade(owner);
        let owner_weak: Weak<dyn Any> = weak;
        let thunk: Rc<MethodThunk> = Rc::new(move |any: &dyn Any, emission: &Emission| {
            match any.downcast_ref::<T>() {
                Some(target) => method(target, emission).into_outcome(),
                None => Ok(Flow::Continue),
            }
        });
        Self {
            key: CallbackKey {
                func: FuncId::Item(TypeId::of::<M>()),
                owner: Some(OwnerId::of(owner)),
            },
            target: Target::Method {
                owner: owner_weak,
                thunk,
            },
        }
    }

    /// A free closure, held strongly. Clone the returned `Callback` to
    /// unbind it later; each call to `function` is a distinct subscriber.
    pub fn function<F, R>(f: F) -> Self
    where
        F: Fn(&Emission) -> R + 'static,
        R: IntoOutcome + 'static,
    {
        let invoke: Rc<Invoke> = Rc::new(move |emission: &Emission| f(emission).into_outcome());
        Self {
            key: CallbackKey {
                func: FuncId::Alloc(Rc::as_ptr(&invoke).cast::<()>() as usize),
                owner: None,
            },
            target: Target::Function(invoke),
        }
    }

    /// A plain function. Identity is the function itself, so building two
    /// callbacks from the same fn item yields the same subscriber.
    pub fn from_fn<F, R>(f: F) -> Self
    where
        F: Fn(&Emission) -> R + 'static,
        R: IntoOutcome + 'static,
    {
        let invoke: Rc<Invoke> = Rc::new(move |emission: &Emission| f(emission).into_outcome());
        Self {
            key: CallbackKey {
                func: FuncId::Item(TypeId::of::<F>()),
                owner: None,
            },
            target: Target::Function(invoke),
        }
    }

    /// A closure owned by the returned [`Subscription`]. Dropping the guard
    /// kills the callback everywhere it was subscribed.
    pub fn guarded<F, R>(f: F) -> (Self, Subscription)
    where
        F: Fn(&Emission) -> R + 'static,
        R: IntoOutcome + 'static,
    {
        let strong: Rc<Invoke> = Rc::new(move |emission: &Emission| f(emission).into_outcome());
        let callback = Self {
            key: CallbackKey {
                func: FuncId::Alloc(Rc::as_ptr(&strong).cast::<()>() as usize),
                owner: None,
            },
            target: Target::Guarded(Rc::downgrade(&strong)),
        };
        (callback, Subscription { _guard: strong })
    }

    #[must_use]
    pub fn key(&self) -> CallbackKey {
        self.key
    }

    #[must_use]
    pub fn owner(&self) -> Option<OwnerId> {
        self.key.owner
    }

    /// Whether the callback can still be resolved.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        match &self.target {
            Target::Method { owner, .. } => owner.strong_count() > 0,
            Target::Function(_) => true,
            Target::Guarded(weak) => weak.strong_count() > 0,
        }
    }

    /// Upgrade to a strong, invocable handle.
    #[must_use]
    pub fn resolve(&self) -> Option<LiveCallback> {
        let target = match &self.target {
            Target::Method { owner, thunk } => {
                LiveTarget::Method(owner.upgrade()?, Rc::clone(thunk))
            }
            Target::Function(invoke) => LiveTarget::Function(Rc::clone(invoke)),
            Target::Guarded(weak) => LiveTarget::Function(weak.upgrade()?),
        };
        Some(LiveCallback {
            key: self.key,
            target,
        })
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .finish()
    }
}

enum LiveTarget {
    Method(Rc<dyn Any>, Rc<MethodThunk>),
    Function(Rc<Invoke>),
}

/// A callback resolved for one dispatch. Holding it keeps the owner alive
/// until the invocation returns.
pub struct LiveCallback {
    key: CallbackKey,
    target: LiveTarget,
}

impl LiveCallback {
    #[must_use]
    pub fn key(&self) -> CallbackKey {
        self.key
    }

    pub fn invoke(&self, emission: &Emission) -> Outcome {
        match &self.target {
            LiveTarget::Method(owner, thunk) => thunk(owner.as_ref(), emission),
            LiveTarget::Function(invoke) => invoke(emission),
        }
    }
}

impl fmt::Debug for LiveCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCallback").field("key", &self.key).finish()
    }
}

/// RAII guard for a [`Callback::guarded`] closure.
///
/// Dropping the `Subscription` drops the only strong reference to the
/// closure, so every channel it was subscribed to sees a dead entry and
/// prunes it on the next dispatch.
pub struct Subscription {
    _guard: Rc<Invoke>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
