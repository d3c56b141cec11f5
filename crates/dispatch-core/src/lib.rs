#![forbid(unsafe_code)]

//! In-process publish/subscribe with weakly held subscribers.
//!
//! Types declare named events and observable properties ([`Declare`]); each
//! instance carries a [`Dispatcher`] with one [`Channel`] per name.
//! Subscribers are [`Callback`]s that never keep their owner alive. Setting a
//! property to a new value, mutating a property's list or map in place, or
//! emitting an event synchronously calls every live subscriber.
//!
//! - [`Channel::emission_lock`] coalesces a burst of dispatches into one.
//! - [`ObservableList`] / [`ObservableMap`] report nested mutations to the
//!   owning property.
//! - [`aio`] hands dispatches off to foreign execution contexts.
//! - [`global`] is a per-thread default dispatcher with a `receiver` cache.
//!
//! Nothing here is `Send`; share a dispatcher across threads only behind
//! your own synchronisation.

pub mod aio;
pub mod callback;
pub mod channel;
pub mod container;
pub mod dispatcher;
pub mod emission;
pub mod error;
pub mod global;
pub mod lock;
pub mod property;
pub mod table;
pub mod value;
pub mod weak_set;

pub use aio::{Completion, ExecutionContext, LocalContext, NextEmission};
pub use callback::{Callback, CallbackKey, Flow, IntoOutcome, LiveCallback, OwnerId, Subscription};
pub use channel::{Channel, ChannelKind, EmissionGuard};
pub use container::{ObservableList, ObservableMap};
pub use dispatcher::{Dispatcher, Unbind, WeakDispatcher};
pub use emission::{Emission, Kwargs};
pub use error::{CallbackError, DispatchError, ValidationError};
pub use global::ReceiverConfig;
pub use lock::{ContextId, EmissionLock};
pub use property::{Bounds, Property, PropertyKind};
pub use table::{
    Declaration, Declare, EventDescription, EventDescriptor, PropertyDescription,
    PropertyDescriptor, TypeDescription, TypeTable,
};
pub use value::Value;
pub use weak_set::WeakCallbackSet;
