//! Invoking algorithms where their data lives.
//!
//! A [`Dispatcher`] resolves the locality hosting a
//! distributed object through a [`Colocation`] policy, and
//! posts one invocation of an [`Algorithm`] there through a
//! [`Transport`]. The invocation's outcome comes back as a
//! [`Handle`]; a remote invocation may itself be the
//! aggregate of several sub-invocations, in which case its
//! error is an [`Error::List`].
//!
//! [`Dispatcher::dispatch`] is the blocking form: it waits
//! for the outcome and collapses every nested failure into
//! one composite error.
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::adapt::{Adapt, Localize};
use crate::error::{Error, ExceptionList, Result};
use crate::handle::{panic_message, Handle, Promise};
use crate::join::wait_all;
use crate::spawner::FuncSpawner;

/// Global identifier of a distributed object (a partition,
/// a component).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:016x}}}", self.0)
    }
}

/// A physical execution location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalityId(pub u32);

impl fmt::Display for LocalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "locality#{}", self.0)
    }
}

/// Maps a distributed object to the locality it is
/// colocated with.
pub trait Colocation: Send + Sync {
    fn locate(&self, id: ObjectId) -> Result<LocalityId>;
}

/// A fixed placement table.
#[derive(Debug, Clone, Default)]
pub struct ColocationMap {
    placements: HashMap<ObjectId, LocalityId>,
}

impl ColocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, id: ObjectId, locality: LocalityId) -> Self {
        self.place(id, locality);
        self
    }

    /// Place `id` on `locality`, returning its previous
    /// locality.
    pub fn place(&mut self, id: ObjectId, locality: LocalityId) -> Option<LocalityId> {
        self.placements.insert(id, locality)
    }
}

impl Colocation for ColocationMap {
    fn locate(&self, id: ObjectId) -> Result<LocalityId> {
        self.placements.get(&id).copied().ok_or(Error::UnknownObject(id))
    }
}

/// A unit of work shipped to a locality.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Delivers tasks to localities. A task that is accepted
/// must eventually run; a task that is dropped instead
/// breaks the handle waiting on it.
pub trait Transport: Send + Sync {
    fn post(&self, target: LocalityId, task: Task) -> Result<()>;
}

/// Runs every task immediately on the posting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineTransport;

impl Transport for InlineTransport {
    fn post(&self, target: LocalityId, task: Task) -> Result<()> {
        log::trace!("running task for {} inline", target);
        task();
        Ok(())
    }
}

/// Runs tasks on a blocking-capable spawner. Every
/// locality shares the spawner's pool.
#[derive(Debug, Clone, Default)]
pub struct SpawnerTransport<S> {
    spawner: S,
}

impl<S> SpawnerTransport<S> {
    pub fn new(spawner: S) -> Self {
        SpawnerTransport { spawner }
    }
}

impl<S: FuncSpawner<()> + Send + Sync> Transport for SpawnerTransport<S> {
    fn post(&self, target: LocalityId, task: Task) -> Result<()> {
        log::trace!("spawning task for {}", target);
        // Detached: the task settles its own promise.
        drop(self.spawner.spawn_func(task));
        Ok(())
    }
}

/// How an algorithm should run on its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Sequenced,
    Parallel,
    SequencedTask,
    ParallelTask,
}

/// An algorithm that can run against one partition.
///
/// `call` receives the localized arguments and returns a
/// partition-local result, which the dispatcher adapts
/// back to the distributed view.
pub trait Algorithm: Send + Sync + 'static {
    type Args: Localize;
    type Output: Adapt;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn call(
        &self,
        policy: Policy,
        sequential: bool,
        args: <Self::Args as Localize>::Local,
    ) -> Result<Self::Output>;
}

/// The distributed result type of an algorithm.
pub type Remote<A> = <<A as Algorithm>::Output as Adapt>::Output;

/// Sends algorithm invocations to the locality that hosts
/// their data.
#[derive(Clone)]
pub struct Dispatcher {
    colocation: Arc<dyn Colocation>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(colocation: Arc<dyn Colocation>, transport: Arc<dyn Transport>) -> Self {
        Dispatcher {
            colocation,
            transport,
        }
    }

    /// Invoke `algo` where `id` lives. Never blocks and never
    /// fails synchronously: every failure settles the
    /// returned handle.
    pub fn dispatch_async<A: Algorithm>(
        &self,
        id: ObjectId,
        algo: A,
        policy: Policy,
        sequential: bool,
        args: A::Args,
    ) -> Handle<Remote<A>> {
        let target = match self.colocation.locate(id) {
            Ok(target) => target,
            Err(e) => {
                log::debug!("cannot place {} for {}: {}", algo.name(), id, e);
                return Handle::failed(e);
            }
        };
        log::debug!("dispatching {} ({:?}) on {} to {}", algo.name(), policy, id, target);

        let promise = Promise::new();
        let handle = promise.handle();
        let task: Task = Box::new(move || {
            let local = args.localize();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                algo.call(policy, sequential, local)
            }))
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload))));
            promise.set(result.map(Adapt::adapt));
        });

        match self.transport.post(target, task) {
            Ok(()) => handle,
            Err(e) => {
                log::debug!("posting to {} failed: {}", target, e);
                Handle::failed(e)
            }
        }
    }

    /// Invoke `algo` where `id` lives and block for the
    /// outcome. Any failure, however deeply nested, is
    /// raised as a single [`Error::List`] holding every
    /// underlying error in order.
    pub fn dispatch<A: Algorithm>(
        &self,
        id: ObjectId,
        algo: A,
        policy: Policy,
        sequential: bool,
        args: A::Args,
    ) -> Result<Remote<A>>
    where
        Remote<A>: Clone,
    {
        let handle = self.dispatch_async(id, algo, policy, sequential, args);
        handle.wait();

        if let Some(error) = handle.error() {
            return Err(remote_failure(error));
        }
        handle.get()
    }

    /// Invoke `algo` once per segment, each where its object
    /// lives. Returns the per-segment handles in order.
    pub fn dispatch_segments<A, I>(
        &self,
        segments: I,
        algo: A,
        policy: Policy,
        sequential: bool,
    ) -> Vec<Handle<Remote<A>>>
    where
        A: Algorithm + Clone,
        I: IntoIterator<Item = (ObjectId, A::Args)>,
    {
        segments
            .into_iter()
            .map(|(id, args)| self.dispatch_async(id, algo.clone(), policy, sequential, args))
            .collect()
    }
}

/// Collapse the error of a failed invocation into one
/// composite error.
fn remote_failure(error: Error) -> Error {
    let mut errors = ExceptionList::new();
    errors.push(error);
    composite(errors)
}

/// A failure whose flattened list came out empty is a
/// consistency fault, never a success.
fn composite(errors: ExceptionList) -> Error {
    if errors.is_empty() {
        log::error!("failed invocation carried an empty exception list");
        return Error::Inconsistent("failed invocation carried an empty exception list");
    }
    Error::List(errors)
}

/// Wait for every handle, then return all values in order,
/// or one composite error holding every failure in order.
pub fn gather<T: Clone + Send + 'static>(handles: &[Handle<T>]) -> Result<Vec<T>> {
    wait_all(handles);

    let mut values = Vec::with_capacity(handles.len());
    let mut errors = ExceptionList::new();
    let mut failed = 0;
    for handle in handles {
        match handle.get() {
            Ok(v) => values.push(v),
            Err(e) => {
                failed += 1;
                errors.push(e);
            }
        }
    }

    if failed == 0 {
        Ok(values)
    } else {
        Err(composite(errors))
    }
}
