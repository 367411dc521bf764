//! Running work on a spawner and observing it through
//! handles.
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::CatchUnwind;
use futures::FutureExt;
use pin_project::pin_project;

use crate::dispatch::gather;
use crate::error::{Error, Result};
use crate::handle::{panic_message, Handle, Promise};
use crate::spawner::{Blocker, FuncSpawner, Spawner};

/// Drives a future and settles a promise with its output.
/// A panic in the future settles the promise with
/// [`Error::Panicked`].
#[pin_project]
struct Settle<F: Future<Output = Result<T>>, T: Send + 'static> {
    #[pin]
    fut: CatchUnwind<AssertUnwindSafe<F>>,
    promise: Option<Promise<T>>,
}

impl<F: Future<Output = Result<T>>, T: Send + 'static> Future for Settle<F, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
        let this = self.project();
        let result = match this.fut.poll(cx) {
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(payload)) => Err(Error::Panicked(panic_message(payload))),
            Poll::Pending => return Poll::Pending,
        };
        if let Some(promise) = this.promise.take() {
            promise.set(result);
        }
        Poll::Ready(())
    }
}

/// Executes closures and futures on a spawner; each piece
/// of work is observed through the [`Handle`] it settles.
#[derive(Debug, Clone, Default)]
pub struct Executor<S> {
    spawner: S,
}

impl<S> Executor<S> {
    pub fn new(spawner: S) -> Self {
        Executor { spawner }
    }

    /// Run `fut` on the spawner.
    pub fn spawn<T, F>(&self, fut: F) -> Handle<T>
    where
        S: Spawner<()>,
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let promise = Promise::new();
        let handle = promise.handle();
        drop(self.spawner.spawn(Settle {
            fut: AssertUnwindSafe(fut).catch_unwind(),
            promise: Some(promise),
        }));
        handle
    }

    /// Run `f` on the spawner's blocking pool.
    pub fn async_execute<T, F>(&self, f: F) -> Handle<T>
    where
        S: FuncSpawner<()>,
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let promise = Promise::new();
        let handle = promise.handle();
        drop(self.spawner.spawn_func(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| Error::Panicked(panic_message(payload)));
            promise.set(result);
        }));
        handle
    }

    /// Run `f` on the spawner and block the current thread
    /// for its result.
    pub fn sync_execute<T, F>(&self, f: F) -> Result<T>
    where
        S: FuncSpawner<()> + Blocker,
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let handle = self.async_execute(f);
        self.spawner.block_on(handle)
    }

    /// Run `f` once per element of `shape`; one handle per
    /// element, in order.
    pub fn bulk_async_execute<T, F, I>(&self, f: F, shape: I) -> Vec<Handle<T>>
    where
        S: FuncSpawner<()>,
        T: Send + 'static,
        F: Fn(I::Item) -> T + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Send + 'static,
    {
        let f = Arc::new(f);
        shape
            .into_iter()
            .map(|elem| {
                let f = f.clone();
                self.async_execute(move || f(elem))
            })
            .collect()
    }

    /// Run `f` once per element of `shape` and wait for all
    /// of them. Returns the results in order, or one error
    /// listing every failure.
    pub fn bulk_execute<T, F, I>(&self, f: F, shape: I) -> Result<Vec<T>>
    where
        S: FuncSpawner<()>,
        T: Clone + Send + 'static,
        F: Fn(I::Item) -> T + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Send + 'static,
    {
        gather(&self.bulk_async_execute(f, shape))
    }
}

cfg_async_std! {
    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::spawner::use_async_std::AsyncStdSpawner;
        use std::thread;

        fn split(v: &[i32], parts: usize) -> Vec<Vec<i32>> {
            let size = (v.len() + parts - 1) / parts;
            v.chunks(size).map(|c| c.to_vec()).collect()
        }

        #[test]
        fn bulk_execution_sums_in_parallel() {
            let data: Vec<i32> = (0..10007).map(|i| (i % 50) - 25).collect();
            let expected: i32 = data.iter().sum();

            let exec = Executor::new(AsyncStdSpawner);
            let partial = exec
                .bulk_execute(|part: Vec<i32>| part.iter().sum::<i32>(), split(&data, 5))
                .unwrap();
            assert_eq!(partial.len(), 5);
            assert_eq!(partial.iter().sum::<i32>(), expected);
        }

        #[test]
        fn work_runs_off_the_calling_thread() {
            let caller = thread::current().id();
            let exec = Executor::new(AsyncStdSpawner);
            let handles = exec.bulk_async_execute(move |_| thread::current().id() != caller, 0..8);
            for h in &handles {
                assert!(h.get().unwrap());
            }
        }

        #[test]
        fn panics_become_errors() {
            let exec = Executor::new(AsyncStdSpawner);
            let handles = exec.bulk_async_execute(
                |i: u32| if i == 1 { panic!("bad element") } else { i },
                0..3,
            );
            match gather(&handles) {
                Err(Error::List(list)) => {
                    assert_eq!(list.len(), 1);
                    assert!(matches!(list.iter().next(), Some(Error::Panicked(_))));
                }
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(handles[2].get().unwrap(), 2);
        }

        #[test]
        fn sync_execute_blocks_for_the_value() {
            let exec = Executor::new(AsyncStdSpawner);
            assert_eq!(exec.sync_execute(|| 6 * 7).unwrap(), 42);
        }

        #[async_std::test]
        async fn spawned_futures_settle_handles() {
            let exec = Executor::new(AsyncStdSpawner);
            let handle = exec.spawn(async {
                async_std::task::yield_now().await;
                Ok::<_, Error>("spawned")
            });
            assert_eq!(handle.await.unwrap(), "spawned");

            let failed: Handle<()> = exec.spawn(async { Err(Error::msg("no")) });
            assert_eq!(failed.await.unwrap_err().to_string(), "no");
        }
    }
}
