//! Subscription hub: fans inbound events out to every live subscriber.

use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::warn;

use crate::message::AmiMessage;

/// Back-pressure contract between the reader and slow subscribers.
///
/// Chosen at construction; this is the chief delivery decision of the
/// library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum DeliveryPolicy {
    /// A slow subscriber skips its oldest undelivered events and is told how
    /// many it missed; the reader never blocks. The default.
    #[default]
    DropOldest,
    /// The reader waits for every subscriber's queue to drain. No events are
    /// lost, but one stalled subscriber stalls the whole inbound side.
    BlockReader,
}

enum HubInner {
    DropOldest {
        // None once the hub has completed
        sender: Option<broadcast::Sender<AmiMessage>>,
    },
    BlockReader {
        senders: Vec<mpsc::Sender<AmiMessage>>,
        capacity: usize,
        open: bool,
    },
}

/// The current set of event subscribers.
///
/// The set mutex guards only mutation; delivery works on a snapshot taken
/// under the lock, so no subscriber callback or queue wait ever runs with
/// the lock held.
pub(crate) struct SubscriptionHub {
    inner: Mutex<HubInner>,
}

impl SubscriptionHub {
    pub fn new(policy: DeliveryPolicy, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let inner = match policy {
            DeliveryPolicy::DropOldest => {
                let (sender, _) = broadcast::channel(capacity);
                HubInner::DropOldest {
                    sender: Some(sender),
                }
            }
            DeliveryPolicy::BlockReader => HubInner::BlockReader {
                senders: Vec::new(),
                capacity,
                open: true,
            },
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Add a subscriber. After completion this returns an exhausted source.
    pub fn subscribe(&self) -> EventSource {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        match &mut *inner {
            HubInner::DropOldest { sender } => match sender {
                Some(tx) => EventSource::DropOldest(BroadcastStream::new(tx.subscribe())),
                None => EventSource::Closed,
            },
            HubInner::BlockReader {
                senders,
                capacity,
                open,
            } => {
                if !*open {
                    return EventSource::Closed;
                }
                let (tx, rx) = mpsc::channel(*capacity);
                senders.push(tx);
                EventSource::BlockReader(ReceiverStream::new(rx))
            }
        }
    }

    /// Deliver `message` to every subscriber under the configured policy.
    pub async fn publish(&self, message: AmiMessage) {
        enum Mode {
            DropOldest(Option<broadcast::Sender<AmiMessage>>),
            BlockReader(Vec<mpsc::Sender<AmiMessage>>),
        }

        let mode = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            match &*inner {
                HubInner::DropOldest { sender } => Mode::DropOldest(sender.clone()),
                HubInner::BlockReader { senders, .. } => Mode::BlockReader(senders.clone()),
            }
        };

        match mode {
            Mode::DropOldest(Some(tx)) => {
                // Err means no live receivers; events without subscribers
                // are simply not observed.
                let _ = tx.send(message);
            }
            Mode::DropOldest(None) => {}
            Mode::BlockReader(senders) => {
                let mut any_closed = false;
                for tx in &senders {
                    if tx.send(message.clone()).await.is_err() {
                        any_closed = true;
                    }
                }
                if any_closed {
                    self.prune_closed();
                }
            }
        }
    }

    /// Close every subscriber channel and empty the set. Idempotent.
    pub fn complete(&self) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        match &mut *inner {
            HubInner::DropOldest { sender } => {
                sender.take();
            }
            HubInner::BlockReader { senders, open, .. } => {
                senders.clear();
                *open = false;
            }
        }
    }

    fn prune_closed(&self) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let HubInner::BlockReader { senders, .. } = &mut *inner {
            let before = senders.len();
            senders.retain(|tx| !tx.is_closed());
            if senders.len() < before {
                warn!(
                    "Removed {} dropped event subscriber(s)",
                    before - senders.len()
                );
            }
        }
    }
}

/// One subscriber's view of the event flow.
pub(crate) enum EventSource {
    DropOldest(BroadcastStream<AmiMessage>),
    BlockReader(ReceiverStream<AmiMessage>),
    Closed,
}

/// Outcome of one receive attempt on an [`EventSource`].
pub(crate) enum SourceItem {
    Message(AmiMessage),
    /// The subscriber fell behind and `count` events were skipped.
    Lagged(u64),
    Closed,
}

impl EventSource {
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<SourceItem> {
        match self {
            EventSource::DropOldest(stream) => match Pin::new(stream).poll_next(cx) {
                Poll::Ready(Some(Ok(message))) => Poll::Ready(SourceItem::Message(message)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                    Poll::Ready(SourceItem::Lagged(count))
                }
                Poll::Ready(None) => Poll::Ready(SourceItem::Closed),
                Poll::Pending => Poll::Pending,
            },
            EventSource::BlockReader(stream) => match Pin::new(stream).poll_next(cx) {
                Poll::Ready(Some(message)) => Poll::Ready(SourceItem::Message(message)),
                Poll::Ready(None) => Poll::Ready(SourceItem::Closed),
                Poll::Pending => Poll::Pending,
            },
            EventSource::Closed => Poll::Ready(SourceItem::Closed),
        }
    }

    #[cfg(test)]
    pub async fn recv(&mut self) -> SourceItem {
        futures_util::future::poll_fn(|cx| self.poll_recv(cx)).await
    }
}
