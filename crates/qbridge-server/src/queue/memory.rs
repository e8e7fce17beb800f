//! In-memory queue for driving the consumer pool without a broker
//!
//! Mirrors the broker behaviors the pool depends on: every worker pulls from
//! one shared queue, a requeue puts the message back flagged as redelivered,
//! and closing the connection ends every worker's stream.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Acknowledger, MessageSource, QueueConnection, QueueError, QueueResult, RawMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settlement {
    Ack(Vec<u8>),
    Reject(Vec<u8>),
    Requeue(Vec<u8>),
}

struct Envelope {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Clone)]
pub(crate) struct MemoryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    settlements: Mutex<Vec<Settlement>>,
    next_tag: AtomicU64,
    closed: CancellationToken,
    fail_open: AtomicBool,
    receive_errors: AtomicUsize,
}

impl MemoryQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                settlements: Mutex::new(Vec::new()),
                next_tag: AtomicU64::new(1),
                closed: CancellationToken::new(),
                fail_open: AtomicBool::new(false),
                receive_errors: AtomicUsize::new(0),
            }),
        }
    }

    /// A queue whose `open_source` always fails.
    pub(crate) fn failing_open() -> Self {
        let queue = Self::new();
        queue.inner.fail_open.store(true, Ordering::SeqCst);
        queue
    }

    /// Make the next `count` receives fail before any delivery is handed out.
    pub(crate) fn fail_next_receives(&self, count: usize) {
        self.inner.receive_errors.store(count, Ordering::SeqCst);
    }

    pub(crate) fn publish(&self, body: impl Into<Vec<u8>>) {
        let _ = self.inner.sender.send(Envelope {
            body: body.into(),
            redelivered: false,
        });
    }

    pub(crate) fn settlements(&self) -> Vec<Settlement> {
        self.inner
            .settlements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Wait until at least `count` settlements were recorded.
    pub(crate) async fn wait_for_settlements(&self, count: usize) -> Vec<Settlement> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let settlements = self.settlements();
            if settlements.len() >= count {
                return settlements;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} settlements, have {:?}",
                count,
                settlements
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, settlement: Settlement) {
        if let Ok(mut settlements) = self.inner.settlements.lock() {
            settlements.push(settlement);
        }
    }
}

#[async_trait]
impl QueueConnection for MemoryQueue {
    async fn open_source(&self, _worker_id: usize) -> QueueResult<Box<dyn MessageSource>> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(Box::new(MemorySource {
            queue: self.clone(),
        }))
    }

    async fn close(&self) -> QueueResult<()> {
        self.inner.closed.cancel();
        Ok(())
    }
}

struct MemorySource {
    queue: MemoryQueue,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn next_message(&mut self) -> Option<QueueResult<RawMessage>> {
        let inner = &self.queue.inner;
        let failing = inner
            .receive_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Some(Err(QueueError::QueueUnavailable {
                queue: "memory".to_string(),
                reason: "channel error".to_string(),
            }));
        }

        let envelope = tokio::select! {
            _ = inner.closed.cancelled() => return None,
            envelope = async { inner.receiver.lock().await.recv().await } => envelope?,
        };

        let tag = inner.next_tag.fetch_add(1, Ordering::SeqCst);
        let acker = MemoryAcker {
            queue: self.queue.clone(),
            body: envelope.body.clone(),
        };

        Some(Ok(RawMessage::new(
            envelope.body,
            tag,
            envelope.redelivered,
            Box::new(acker),
        )))
    }
}

struct MemoryAcker {
    queue: MemoryQueue,
    body: Vec<u8>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> QueueResult<()> {
        self.queue.record(Settlement::Ack(self.body.clone()));
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> QueueResult<()> {
        if requeue {
            self.queue.record(Settlement::Requeue(self.body.clone()));
            let _ = self.queue.inner.sender.send(Envelope {
                body: self.body.clone(),
                redelivered: true,
            });
        } else {
            self.queue.record(Settlement::Reject(self.body.clone()));
        }
        Ok(())
    }
}
