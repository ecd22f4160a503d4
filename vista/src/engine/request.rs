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
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use futures::FutureExt;
use parking_lot::Mutex;
use pin_project::pin_project;
use vista_common::error::{Error, ErrorKind, Result};

use super::inflight::{InflightMap, Ticket, Waiter};
use crate::{artifact::Image, key::CacheKey};

/// Where a request was served from when it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Served by the memory tier, ready without waiting.
    Hit,
    /// Joined a request that was already in flight.
    Wait,
    /// Started a new request that looks up the disk tier, then fetches.
    Miss,
}

/// Future of an image requested with [`ImageCache::get`](crate::ImageCache::get).
///
/// Dropping the request, or calling [`ImageRequest::cancel`], detaches the caller. Other
/// callers waiting for the same image are still served. When the last one leaves, the fetch is
/// canceled.
#[must_use]
#[pin_project]
pub struct ImageRequest {
    state: RequestState,
    #[pin]
    inner: Inner,
}

#[pin_project(project = InnerProj)]
enum Inner {
    Ready(Option<Result<Image>>),
    Wait(#[pin] Waiting),
}

impl Debug for ImageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRequest").field("state", &self.state).finish()
    }
}

impl ImageRequest {
    pub(crate) fn hit(image: Image) -> Self {
        Self {
            state: RequestState::Hit,
            inner: Inner::Ready(Some(Ok(image))),
        }
    }

    pub(crate) fn failed(e: Error) -> Self {
        Self {
            state: RequestState::Miss,
            inner: Inner::Ready(Some(Err(e))),
        }
    }

    pub(crate) fn wait(state: RequestState, waiting: Waiting) -> Self {
        Self {
            state,
            inner: Inner::Wait(waiting),
        }
    }

    /// Where the request was served from.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Whether the result is available without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Inner::Ready(_))
    }

    /// Stop waiting for the image.
    pub fn cancel(self) {
        drop(self)
    }
}

impl Future for ImageRequest {
    type Output = Result<Image>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().inner.project() {
            InnerProj::Ready(res) => Poll::Ready(
                res.take()
                    .unwrap_or_else(|| Err(Error::new(ErrorKind::Cancelled, "request polled after completion"))),
            ),
            InnerProj::Wait(waiting) => waiting.poll(cx),
        }
    }
}

/// A caller attached to an in-flight request.
pub(crate) struct Waiting {
    waiter: Waiter,
    attachment: Option<Attachment>,
}

struct Attachment {
    inflights: Arc<Mutex<InflightMap>>,
    key: CacheKey,
    ticket: Ticket,
}

impl Waiting {
    pub(crate) fn new(waiter: Waiter, inflights: Arc<Mutex<InflightMap>>, key: CacheKey, ticket: Ticket) -> Self {
        Self {
            waiter,
            attachment: Some(Attachment {
                inflights,
                key,
                ticket,
            }),
        }
    }
}

impl Future for Waiting {
    type Output = Result<Image>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let res = ready!(self.waiter.poll_unpin(cx));
        self.attachment = None;
        // The request was aborted without a result.
        Poll::Ready(res.unwrap_or_else(|_| Err(Error::cancelled())))
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        let fetcher = attachment.inflights.lock().detach(&attachment.key, attachment.ticket);
        if let Some(fetcher) = fetcher {
            tracing::debug!("[vista]: Last waiter of {} left, cancel the fetch.", attachment.key);
            fetcher.cancel();
        }
    }
}
