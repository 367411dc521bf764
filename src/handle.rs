//! Shared async handles.
//!
//! A [`Handle`] holds a value (or an [`Error`]) that
//! becomes available at most once. Handles are reference
//! counted: every clone observes the same shared state,
//! and reading a settled handle never consumes it.
//!
//! The combinators in this crate only rely on the small,
//! object-safe [`SharedState`] contract, so any other
//! handle implementation can take part in a join by
//! implementing it.
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};

/// A continuation registered on a shared state.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// The capabilities a join needs from an async handle.
pub trait SharedState: Send + Sync {
    /// Whether the state has settled (value or error).
    fn is_ready(&self) -> bool;

    /// Start lazily-deferred work on the calling thread.
    /// A no-op if the work is not deferred, or has already
    /// been started.
    fn execute_deferred(&self);

    /// Register a continuation. It runs exactly once: right
    /// away on the calling thread if the state is already
    /// settled, otherwise on the thread that settles it.
    fn set_on_completed(&self, f: Callback);

    /// Block the calling thread until the state settles.
    fn wait(&self);
}

type Deferred<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;

struct State<T> {
    result: Option<Result<T>>,
    deferred: Option<Deferred<T>>,
    callbacks: Vec<Callback>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T> Inner<T> {
    fn new(deferred: Option<Deferred<T>>) -> Self {
        Inner {
            state: Mutex::new(State {
                result: None,
                deferred,
                callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    fn settled(result: Result<T>) -> Self {
        let inner = Inner::new(None);
        inner.lock().result = Some(result);
        inner
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Callbacks never run under the lock, so a poisoned
        // lock still guards a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the result unless one is already stored.
    /// Returns whether this call settled the state.
    fn settle(&self, result: Result<T>) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result);
            state.deferred = None;
            self.settled.notify_all();
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };
        for f in callbacks {
            f();
        }
        for w in wakers {
            w.wake();
        }
        true
    }

    fn poll_ready(&self, cx: &mut Context) -> Poll<()> {
        let mut state = self.lock();
        if state.result.is_some() {
            return Poll::Ready(());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T: Send + 'static> SharedState for Inner<T> {
    fn is_ready(&self) -> bool {
        self.lock().result.is_some()
    }

    fn execute_deferred(&self) {
        let deferred = self.lock().deferred.take();
        if let Some(f) = deferred {
            let result = panic::catch_unwind(AssertUnwindSafe(f))
                .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload))));
            self.settle(result);
        }
    }

    fn set_on_completed(&self, f: Callback) {
        {
            let mut state = self.lock();
            if state.result.is_none() {
                state.callbacks.push(f);
                return;
            }
        }
        f();
    }

    fn wait(&self) {
        self.execute_deferred();
        // Blocks on the condvar rather than an executor, so
        // waiting from inside a polled future is allowed.
        let mut state = self.lock();
        while state.result.is_none() {
            state = self.settled.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A shared handle to a value that becomes available at
/// most once.
pub struct Handle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Handle {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        let status = match &state.result {
            None if state.deferred.is_some() => "deferred",
            None => "pending",
            Some(Ok(_)) => "value",
            Some(Err(_)) => "error",
        };
        f.debug_struct("Handle").field("status", &status).finish()
    }
}

impl<T: Send + 'static> Handle<T> {
    /// An already settled handle holding `value`.
    pub fn ready(value: T) -> Self {
        Handle {
            inner: Arc::new(Inner::settled(Ok(value))),
        }
    }

    /// An already settled handle holding `error`.
    pub fn failed(error: Error) -> Self {
        Handle {
            inner: Arc::new(Inner::settled(Err(error))),
        }
    }

    /// A lazily-deferred handle: `f` runs on the first
    /// thread that forces it (`execute_deferred`, `wait`,
    /// `get`, or polling the handle).
    pub fn deferred<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Handle {
            inner: Arc::new(Inner::new(Some(Box::new(f)))),
        }
    }

    /// The type-erased shared state behind this handle.
    pub fn shared_state(&self) -> Arc<dyn SharedState> {
        self.inner.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Whether deferred work is attached and not yet started.
    pub fn is_deferred(&self) -> bool {
        self.inner.lock().deferred.is_some()
    }

    pub fn execute_deferred(&self) {
        self.inner.execute_deferred()
    }

    pub fn set_on_completed<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.inner.set_on_completed(Box::new(f))
    }

    pub fn wait(&self) {
        self.inner.wait()
    }

    pub fn has_value(&self) -> bool {
        matches!(self.inner.lock().result, Some(Ok(_)))
    }

    pub fn has_error(&self) -> bool {
        matches!(self.inner.lock().result, Some(Err(_)))
    }

    /// The stored error, if the handle settled with one.
    pub fn error(&self) -> Option<Error> {
        match &self.inner.lock().result {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }
}

impl<T: Clone + Send + 'static> Handle<T> {
    /// The settled result, without blocking.
    pub fn try_get(&self) -> Option<Result<T>> {
        self.inner.lock().result.clone()
    }

    /// Block until settled, then return the value or raise
    /// the stored error.
    pub fn get(&self) -> Result<T> {
        self.wait();
        self.try_get()
            .unwrap_or(Err(Error::Inconsistent("wait returned on an unsettled handle")))
    }

    /// Attach a continuation producing a new handle.
    ///
    /// `f` runs once, on the settled result. If this handle
    /// is still deferred, the returned handle is deferred
    /// too and forcing it forces this one.
    pub fn then<U, F>(&self, f: F) -> Handle<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        if self.is_deferred() {
            let source = self.clone();
            return Handle::deferred(move || f(source.get()));
        }

        let promise = Promise::new();
        let handle = promise.handle();
        let source = self.clone();
        self.set_on_completed(move || {
            let result = source
                .try_get()
                .unwrap_or(Err(Error::Inconsistent("continuation ran before settlement")));
            promise.set(f(result));
        });
        handle
    }
}

impl<T: Clone + Send + 'static> Handle<Handle<T>> {
    /// Collapse a handle of a handle into a handle that
    /// settles with the inner result.
    pub fn unwrap_nested(&self) -> Handle<T> {
        let promise = Promise::new();
        let handle = promise.handle();
        let outer = self.clone();
        self.set_on_completed(move || match outer.try_get() {
            Some(Ok(inner)) => {
                let source = inner.clone();
                inner.set_on_completed(move || {
                    promise.set(source.get());
                });
                inner.execute_deferred();
            }
            Some(Err(e)) => promise.set(Err(e)),
            None => promise.set(Err(Error::Inconsistent("continuation ran before settlement"))),
        });
        self.execute_deferred();
        handle
    }
}

impl<T: Clone + Send + 'static> Future for Handle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        self.inner.execute_deferred();
        match self.inner.poll_ready(cx) {
            Poll::Ready(()) => Poll::Ready(
                self.try_get()
                    .unwrap_or(Err(Error::Inconsistent("polled ready without a result"))),
            ),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The producing side of a [`Handle`].
///
/// Dropping a promise without settling it settles its
/// handles with [`Error::BrokenPromise`].
pub struct Promise<T: Send + 'static> {
    inner: Option<Arc<Inner<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    pub fn new() -> Self {
        Promise {
            inner: Some(Arc::new(Inner::new(None))),
        }
    }

    /// A handle observing this promise.
    pub fn handle(&self) -> Handle<T> {
        match &self.inner {
            Some(inner) => Handle {
                inner: inner.clone(),
            },
            None => Handle::failed(Error::BrokenPromise),
        }
    }

    pub fn set(mut self, result: Result<T>) {
        if let Some(inner) = self.inner.take() {
            inner.settle(result);
        }
    }

    pub fn set_value(self, value: T) {
        self.set(Ok(value))
    }

    pub fn set_error(self, error: Error) {
        self.set(Err(error))
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if inner.settle(Err(Error::BrokenPromise)) {
                log::warn!("promise dropped before it was settled");
            }
        }
    }
}
