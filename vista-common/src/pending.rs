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

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct PendingInner {
    count: AtomicUsize,
    notify: Notify,
}

/// Counts background work so it can be awaited to settle.
#[derive(Debug, Default, Clone)]
pub struct Pending {
    inner: Arc<PendingInner>,
}

impl Pending {
    /// Register one piece of background work. The work settles when the guard drops.
    pub fn guard(&self) -> PendingGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        PendingGuard {
            inner: self.inner.clone(),
        }
    }

    /// Count of the unsettled work.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Wait until no work is pending.
    ///
    /// Work registered while waiting is waited for as well.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Guard of a piece of background work, see [`Pending::guard`].
#[derive(Debug)]
pub struct PendingGuard {
    inner: Arc<PendingInner>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}
