//! Submissions awaiting an answer from the upstream node.
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;
use tracing::debug;

use crate::utils::Mutex;

/// Upper bound on unanswered submissions kept around. The oldest one is dropped first.
pub const MAX_PENDING_REQUESTS: usize = 1024;

/// Resolves to the node's verdict on a submitted block.
///
/// Yields `Some(true)` on `MINING_SUBMIT_SUCCESS`, `Some(false)` on `MINING_SUBMIT_FAILURE` and
/// `None` if the request was dropped without an answer.
#[derive(Debug)]
pub struct SubmitHandle {
    rx: oneshot::Receiver<bool>,
}

impl SubmitHandle {
    /// A handle plus the sender that resolves it.
    pub fn channel() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for SubmitHandle {
    type Output = Option<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

#[derive(Debug, Default)]
struct PendingInner {
    senders: HashMap<u64, oneshot::Sender<bool>>,
    order: VecDeque<u64>,
}

/// Request id to result sender table.
#[derive(Debug)]
pub struct PendingRequests {
    inner: Mutex<PendingInner>,
    capacity: usize,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::with_capacity(MAX_PENDING_REQUESTS)
    }
}

impl PendingRequests {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PendingInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Tracks `request_id` and returns the handle its answer resolves.
    pub fn insert(&self, request_id: u64) -> SubmitHandle {
        let (tx, handle) = SubmitHandle::channel();
        self.inner.super_safe_lock(|inner| {
            while inner.senders.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        if inner.senders.remove(&oldest).is_some() {
                            debug!("Evicted unanswered submit request {oldest}");
                        }
                    }
                    None => break,
                }
            }
            inner.senders.insert(request_id, tx);
            inner.order.push_back(request_id);
        });
        handle
    }

    /// Resolves `request_id`. Returns `false` when nothing was waiting for it.
    pub fn resolve(&self, request_id: u64, accepted: bool) -> bool {
        let sender = self.inner.super_safe_lock(|inner| {
            let sender = inner.senders.remove(&request_id);
            if sender.is_some() {
                inner.order.retain(|id| *id != request_id);
            }
            sender
        });
        match sender {
            Some(tx) => {
                // The submitter may have stopped waiting.
                let _ = tx.send(accepted);
                true
            }
            None => false,
        }
    }

    /// Stops tracking `request_id` without an answer; its handle resolves to `None`.
    pub fn forget(&self, request_id: u64) -> bool {
        self.inner.super_safe_lock(|inner| {
            inner.order.retain(|id| *id != request_id);
            inner.senders.remove(&request_id).is_some()
        })
    }

    /// Drops every pending request; their handles resolve to `None`.
    pub fn clear(&self) -> usize {
        self.inner.super_safe_lock(|inner| {
            inner.order.clear();
            let dropped = inner.senders.len();
            inner.senders.clear();
            dropped
        })
    }

    pub fn len(&self) -> usize {
        self.inner.super_safe_lock(|inner| inner.senders.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
