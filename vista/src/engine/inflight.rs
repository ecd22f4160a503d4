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

use std::sync::Arc;

use hashbrown::{hash_map::Entry, HashMap};
use tokio::sync::oneshot;
use vista_common::error::Result;

use crate::{artifact::Image, fetcher::Fetcher, key::CacheKey};

pub type Notifier = oneshot::Sender<Result<Image>>;
pub type Waiter = oneshot::Receiver<Result<Image>>;

/// Identifies one waiter of one generation of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub waiter: u64,
}

pub enum Enqueue {
    /// The caller created the request and is responsible for driving it.
    Launch {
        ticket: Ticket,
        waiter: Waiter,
        cancelled: oneshot::Receiver<()>,
    },
    /// The caller joined a request that is already in flight.
    Wait { ticket: Ticket, waiter: Waiter },
}

struct InflightTask {
    /// Generation of the request. A completion carrying another generation is stale.
    id: u64,
    fetcher: Arc<dyn Fetcher>,
    notifiers: Vec<(u64, Notifier)>,
    cancel: oneshot::Sender<()>,
}

/// In-flight requests, at most one per key and format.
#[derive(Default)]
pub struct InflightMap {
    tasks: HashMap<CacheKey, InflightTask>,
    id: u64,
    waiter: u64,
}

impl InflightMap {
    /// Join the in-flight request of `key`, or create one owning `fetcher`.
    pub fn enqueue(&mut self, key: &CacheKey, fetcher: Arc<dyn Fetcher>) -> Enqueue {
        let (tx, rx) = oneshot::channel();
        self.waiter += 1;
        let waiter = self.waiter;
        match self.tasks.entry(key.clone()) {
            Entry::Occupied(mut o) => {
                let task = o.get_mut();
                task.notifiers.push((waiter, tx));
                Enqueue::Wait {
                    ticket: Ticket { id: task.id, waiter },
                    waiter: rx,
                }
            }
            Entry::Vacant(v) => {
                self.id += 1;
                let id = self.id;
                let (cancel, cancelled) = oneshot::channel();
                v.insert(InflightTask {
                    id,
                    fetcher,
                    notifiers: vec![(waiter, tx)],
                    cancel,
                });
                Enqueue::Launch {
                    ticket: Ticket { id, waiter },
                    waiter: rx,
                    cancelled,
                }
            }
        }
    }

    /// Complete the request of generation `id`, returning its notifiers in arrival order.
    ///
    /// Returns `None` if the request was canceled or replaced by a newer generation.
    pub fn take(&mut self, key: &CacheKey, id: u64) -> Option<Vec<Notifier>> {
        if self.tasks.get(key)?.id != id {
            return None;
        }
        let task = self.tasks.remove(key)?;
        Some(task.notifiers.into_iter().map(|(_, notifier)| notifier).collect())
    }

    /// Detach a waiter from its request.
    ///
    /// If it was the last waiter, the request is removed and its fetcher is returned so the
    /// caller can cancel it.
    pub fn detach(&mut self, key: &CacheKey, ticket: Ticket) -> Option<Arc<dyn Fetcher>> {
        let task = self.tasks.get_mut(key)?;
        if task.id != ticket.id {
            return None;
        }
        task.notifiers.retain(|(waiter, _)| *waiter != ticket.waiter);
        if !task.notifiers.is_empty() {
            return None;
        }
        let task = self.tasks.remove(key)?;
        let _ = task.cancel.send(());
        Some(task.fetcher)
    }

    /// Remove a request whatever its waiters, returning its fetcher and notifiers.
    pub fn abort(&mut self, key: &CacheKey) -> Option<(Arc<dyn Fetcher>, Vec<Notifier>)> {
        let task = self.tasks.remove(key)?;
        let _ = task.cancel.send(());
        let notifiers = task.notifiers.into_iter().map(|(_, notifier)| notifier).collect();
        Some((task.fetcher, notifiers))
    }

    #[cfg(test)]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.tasks.contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}
