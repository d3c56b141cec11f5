#![forbid(unsafe_code)]

//! Hand-off of dispatches to foreign execution contexts.
//!
//! A channel can hold callbacks tagged with an [`ExecutionContext`]. When
//! the channel dispatches, each such callback is wrapped in a task and
//! spawned onto its context; the dispatcher never waits for it. A task
//! re-checks its registration when it starts, so unbinding before the task
//! runs supersedes it.
//!
//! Completion tracking is opt-in via [`Completion`], and
//! [`NextEmission`] resolves with the next delivered payload.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture, join_all};
use futures::task::{LocalSpawn, LocalSpawnExt, SpawnError};

use crate::callback::{Callback, CallbackKey, LiveCallback, OwnerId};
use crate::emission::Emission;
use crate::lock::ContextId;
use crate::weak_set::WeakCallbackSet;

/// Something that can run `'static` local futures, e.g. an event loop.
pub trait ExecutionContext {
    /// Identity used for per-context bookkeeping and emission locks.
    fn id(&self) -> ContextId;

    /// Queue `task`. Must not run it inline.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) -> Result<(), SpawnError>;
}

/// [`ExecutionContext`] over any `futures` local spawner
/// (e.g. [`futures::executor::LocalSpawner`]).
pub struct LocalContext<S> {
    id: ContextId,
    spawner: S,
}

impl<S: LocalSpawn> LocalContext<S> {
    pub fn new(spawner: S) -> Self {
        Self {
            id: ContextId::next(),
            spawner,
        }
    }

    /// Wrap as a shared context handle for `bind_async`.
    pub fn shared(spawner: S) -> Rc<dyn ExecutionContext>
    where
        S: 'static,
    {
        Rc::new(Self::new(spawner))
    }
}

impl<S: LocalSpawn> ExecutionContext for LocalContext<S> {
    fn id(&self) -> ContextId {
        self.id
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) -> Result<(), SpawnError> {
        self.spawner.spawn_local(task)
    }
}

impl<S> fmt::Debug for LocalContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalContext").field("id", &self.id).finish()
    }
}

struct ContextListeners {
    context: Rc<dyn ExecutionContext>,
    callbacks: WeakCallbackSet,
}

/// Async callbacks of one channel, grouped by context.
#[derive(Default)]
pub(crate) struct AsyncListeners {
    by_context: Vec<ContextListeners>,
}

impl AsyncListeners {
    pub(crate) fn add(&mut self, context: &Rc<dyn ExecutionContext>, callback: Callback) -> bool {
        let id = context.id();
        if let Some(group) = self.by_context.iter_mut().find(|g| g.context.id() == id) {
            return group.callbacks.add(callback);
        }
        let mut callbacks = WeakCallbackSet::new();
        callbacks.add(callback);
        self.by_context.push(ContextListeners {
            context: Rc::clone(context),
            callbacks,
        });
        true
    }

    pub(crate) fn remove(&mut self, key: &CallbackKey) -> bool {
        let removed = self
            .by_context
            .iter_mut()
            .fold(false, |acc, g| g.callbacks.remove(key) | acc);
        self.drop_empty();
        removed
    }

    pub(crate) fn remove_owner(&mut self, owner: OwnerId) -> usize {
        let removed = self
            .by_context
            .iter_mut()
            .map(|g| g.callbacks.remove_owner(owner))
            .sum();
        self.drop_empty();
        removed
    }

    pub(crate) fn contains(&self, context: ContextId, key: &CallbackKey) -> bool {
        self.by_context
            .iter()
            .any(|g| g.context.id() == context && g.callbacks.contains(key))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_context.iter().map(|g| g.callbacks.len()).sum()
    }

    /// Number of contexts with at least one registration.
    pub(crate) fn context_count(&self) -> usize {
        self.by_context.len()
    }

    /// Snapshot of (context, live callback) pairs; prunes dead entries.
    pub(crate) fn live(&mut self) -> Vec<(Rc<dyn ExecutionContext>, LiveCallback)> {
        let out: Vec<_> = self
            .by_context
            .iter_mut()
            .flat_map(|g| {
                let ctx = Rc::clone(&g.context);
                g.callbacks
                    .live_callbacks()
                    .into_iter()
                    .map(move |cb| (Rc::clone(&ctx), cb))
            })
            .collect();
        self.drop_empty();
        out
    }

    fn drop_empty(&mut self) {
        self.by_context.retain(|g| !g.callbacks.is_empty());
    }
}

/// Resolves once every hand-off of a tracked dispatch has finished.
///
/// Output is the number of hand-offs that ran to completion; tasks that were
/// dropped by their context without running are not counted.
pub struct Completion {
    inner: LocalBoxFuture<'static, usize>,
}

impl Completion {
    pub(crate) fn new(pending: Vec<oneshot::Receiver<()>>) -> Self {
        let inner = join_all(pending)
            .map(|results| results.into_iter().filter(Result::is_ok).count())
            .boxed_local();
        Self { inner }
    }

    pub(crate) fn ready() -> Self {
        Self::new(Vec::new())
    }
}

impl Future for Completion {
    type Output = usize;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// One-shot wait for the next delivered emission of a channel.
///
/// Resolves to `None` if the channel is dropped first.
pub struct NextEmission {
    rx: oneshot::Receiver<Emission>,
}

impl NextEmission {
    pub(crate) fn new(rx: oneshot::Receiver<Emission>) -> Self {
        Self { rx }
    }
}

impl Future for NextEmission {
    type Output = Option<Emission>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Emission>> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

impl fmt::Debug for NextEmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextEmission").finish_non_exhaustive()
    }
}
