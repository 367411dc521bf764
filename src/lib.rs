//! AND-join combinators over shared async handles, and a
//! dispatcher that runs algorithms where their data lives.
//!
//! ## Handles
//!
//! A [`Handle<T>`][Handle] is a reference-counted slot
//! holding a value or an [`Error`] that becomes available
//! at most once. It can be queried ([`is_ready`]), forced
//! if its work was deferred ([`execute_deferred`]),
//! observed through a one-shot continuation
//! ([`set_on_completed`]), blocked on ([`wait`]), awaited,
//! and read any number of times ([`get`]).
//!
//! ## Joining
//!
//! [`when_all`] and [`wait_all`] AND-compose a fixed list
//! of operands, each either a single handle or a sequence
//! of handles, possibly of different value types:
//!
//! ```
//! use async_join::{wait_all, Handle, Promise};
//! use std::thread;
//!
//! let first = Handle::ready(1u32);
//! let rest: Vec<_> = (0..4).map(|_| Promise::new()).collect();
//! let handles: Vec<Handle<String>> = rest.iter().map(Promise::handle).collect();
//!
//! let setter = thread::spawn(move || {
//!     for (i, p) in rest.into_iter().enumerate() {
//!         p.set_value(format!("#{}", i));
//!     }
//! });
//!
//! wait_all((&first, &handles));
//! assert_eq!(handles[3].get().unwrap(), "#3");
//! setter.join().unwrap();
//! ```
//!
//! The join never blocks while traversing. It visits the
//! operands in order and registers a continuation only on
//! the first operand that is not yet settled; when that one
//! settles, traversal resumes on the settling thread.
//! Blocking happens only in [`wait_all`] itself, after the
//! synchronous part of the traversal has returned. The
//! returned handle of [`when_all`] is a `Handle<()>`, so
//! joins nest.
//!
//! The join looks at readiness only: an operand that
//! settled with an error is as settled as one holding a
//! value, and all inputs stay readable afterwards.
//!
//! ## Dispatching
//!
//! A [`Dispatcher`] places an [`Algorithm`] invocation on
//! the locality hosting a distributed object, through an
//! injected [`Colocation`] policy and [`Transport`].
//! [`dispatch_async`] returns a handle;
//! [`dispatch`] blocks and raises every underlying
//! failure as one composite [`Error::List`].
//!
//! ## Features
//!
//! `use-async-std` (default) and `use-tokio` provide
//! [`Spawner`] backends for the [`Executor`] and the
//! [`SpawnerTransport`].
//!
//! [is_ready]: Handle::is_ready
//! [execute_deferred]: Handle::execute_deferred
//! [set_on_completed]: Handle::set_on_completed
//! [wait]: Handle::wait
//! [get]: Handle::get
//! [dispatch_async]: Dispatcher::dispatch_async
//! [dispatch]: Dispatcher::dispatch

#[macro_use]
mod utils;

pub mod adapt;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod handle;
pub mod join;
pub mod spawner;

pub use adapt::{Adapt, LocalPosition, Localize, Position, Value};
pub use dispatch::{
    gather, Algorithm, Colocation, ColocationMap, Dispatcher, InlineTransport, LocalityId,
    ObjectId, Policy, SpawnerTransport, Transport,
};
pub use error::{Error, ExceptionList, Result};
pub use executor::Executor;
pub use handle::{Handle, Promise, SharedState};
pub use join::{wait_all, wait_all_iter, wait_all_n, when_all, IntoOperand, IntoOperands, Operand};
pub use spawner::{Blocker, FuncSpawner, Spawner};

cfg_async_std! {
    pub use spawner::use_async_std::AsyncStdSpawner;
}

cfg_tokio! {
    pub use spawner::use_tokio::TokioSpawner;
}

#[cfg(test)]
mod tests;
