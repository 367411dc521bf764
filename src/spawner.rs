//! Traits abstracting over the executor that runs
//! asynchronous work, with async-std and tokio backends.
//! Spawned work is detached: its outcome is reported
//! through the [`Handle`](crate::Handle) it settles, not
//! through the spawn handle.
use futures::Future;

pub trait Spawner<T> {
    type FutureOutput;
    type SpawnHandle: Future<Output = Self::FutureOutput> + Send;
    fn spawn<F: Future<Output = T> + Send + 'static>(&self, f: F) -> Self::SpawnHandle;
}

pub trait FuncSpawner<T> {
    type FutureOutput;
    type SpawnHandle: Future<Output = Self::FutureOutput> + Send;
    fn spawn_func<F: FnOnce() -> T + Send + 'static>(&self, f: F) -> Self::SpawnHandle;
}

pub trait Blocker {
    fn block_on<T, F: Future<Output = T>>(&self, f: F) -> T;
}

cfg_async_std! {
    pub mod use_async_std {
        use super::*;
        use async_std::task::{block_on, spawn, spawn_blocking, JoinHandle};

        #[derive(Debug, Default, Clone, Copy)]
        pub struct AsyncStdSpawner;

        impl<T: Send + 'static> Spawner<T> for AsyncStdSpawner {
            type FutureOutput = T;
            type SpawnHandle = JoinHandle<T>;

            fn spawn<F: Future<Output = T> + Send + 'static>(&self, f: F) -> Self::SpawnHandle {
                spawn(f)
            }
        }

        impl<T: Send + 'static> FuncSpawner<T> for AsyncStdSpawner {
            type FutureOutput = T;
            type SpawnHandle = JoinHandle<T>;

            fn spawn_func<F: FnOnce() -> T + Send + 'static>(&self, f: F) -> Self::SpawnHandle {
                spawn_blocking(f)
            }
        }

        impl Blocker for AsyncStdSpawner {
            fn block_on<T, F: Future<Output = T>>(&self, f: F) -> T {
                block_on(f)
            }
        }
    }
}

cfg_tokio! {
    pub mod use_tokio {
        use super::*;
        use tokio::{
            runtime::{Handle, Runtime},
            task::{self as tokio_task, block_in_place},
        };

        pub struct TokioSpawner(Option<TokioRuntime>);

        impl Clone for TokioSpawner {
            fn clone(&self) -> Self {
                Self(self.0.as_ref().map(|rt| match rt {
                    TokioRuntime::ByHandle(handle) => TokioRuntime::ByHandle(handle.clone()),
                    TokioRuntime::Owned(runtime) => {
                        TokioRuntime::ByHandle(runtime.handle().clone())
                    }
                }))
            }
        }

        const RUNTIME_INVARIANT_ERR: &str =
            "invariant: runtime must be available during the spawner's lifetime";

        impl Drop for TokioSpawner {
            /// Shut down an owned runtime without waiting for
            /// detached work.
            fn drop(&mut self) {
                if let Some(TokioRuntime::Owned(rt)) = self.0.take() {
                    rt.shutdown_background()
                }
            }
        }

        impl TokioSpawner {
            pub fn new(rt_handle: Handle) -> Self {
                Self(Some(TokioRuntime::ByHandle(rt_handle)))
            }

            fn handle(&self) -> &Handle {
                match &self.0.as_ref().expect(RUNTIME_INVARIANT_ERR) {
                    TokioRuntime::ByHandle(handle) => handle,
                    TokioRuntime::Owned(runtime) => runtime.handle(),
                }
            }
        }

        enum TokioRuntime {
            ByHandle(Handle),
            Owned(Runtime),
        }

        // Use the ambient runtime when there is one; otherwise
        // own a multi-threaded runtime for the spawner's
        // lifetime, since detached work must make progress
        // without anyone blocking on it.
        impl Default for TokioSpawner {
            fn default() -> Self {
                if let Ok(handle) = Handle::try_current() {
                    return Self(Some(TokioRuntime::ByHandle(handle)));
                }
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build a tokio runtime");
                Self(Some(TokioRuntime::Owned(runtime)))
            }
        }

        impl<T: Send + 'static> Spawner<T> for TokioSpawner {
            type FutureOutput = Result<T, tokio_task::JoinError>;
            type SpawnHandle = tokio_task::JoinHandle<T>;

            fn spawn<F: Future<Output = T> + Send + 'static>(&self, f: F) -> Self::SpawnHandle {
                self.handle().spawn(f)
            }
        }

        impl<T: Send + 'static> FuncSpawner<T> for TokioSpawner {
            type FutureOutput = Result<T, tokio_task::JoinError>;
            type SpawnHandle = tokio_task::JoinHandle<T>;

            fn spawn_func<F: FnOnce() -> T + Send + 'static>(&self, f: F) -> Self::SpawnHandle {
                self.handle().spawn_blocking(f)
            }
        }

        impl Blocker for TokioSpawner {
            fn block_on<T, F: Future<Output = T>>(&self, f: F) -> T {
                match self.0.as_ref().expect(RUNTIME_INVARIANT_ERR) {
                    TokioRuntime::ByHandle(handle) => block_in_place(|| handle.block_on(f)),
                    // An owned runtime must be driven directly, not
                    // through its handle, for IO to make progress.
                    TokioRuntime::Owned(runtime) => runtime.block_on(f),
                }
            }
        }
    }
}
