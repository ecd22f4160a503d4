// Copyright 2025 vista Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{runtime::Handle, task::JoinHandle};

use crate::error::{Error, ErrorKind, Result};

/// A wrapper for [`JoinHandle`] that turns join failures into [`ErrorKind::Join`] errors.
#[derive(Debug)]
pub struct SpawnHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> SpawnHandle<T> {
    /// Abort the spawned task.
    pub fn abort(&self) {
        self.inner.abort()
    }
}

impl<T> Future for SpawnHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|res| res.map_err(|e| Error::new(ErrorKind::Join, "tokio join error").with_source(e)))
    }
}

/// A runtime handle captured once, used to spawn tasks from any thread.
///
/// Callers of the cache may live on threads without a tokio context (e.g. a UI thread),
/// so every task is spawned through the handle captured when the cache was built.
#[derive(Debug, Clone)]
pub struct Spawner {
    handle: Handle,
}

impl From<Handle> for Spawner {
    fn from(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Spawner {
    /// Get the spawner of the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    /// Wrapper for [`Handle::spawn`].
    pub fn spawn<F>(&self, future: F) -> SpawnHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        SpawnHandle {
            inner: self.handle.spawn(future),
        }
    }

    /// Wrapper for [`Handle::spawn_blocking`].
    pub fn spawn_blocking<F, R>(&self, func: F) -> SpawnHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        SpawnHandle {
            inner: self.handle.spawn_blocking(func),
        }
    }

    /// Run a blocking closure off the async workers and flatten its result.
    pub async fn asyncify<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_blocking(func).await?
    }
}
