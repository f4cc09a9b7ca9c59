use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::time::timeout;

use super::event::OperationEvent;

/// Broadcast fan-out point for subscribers.
///
/// Sinks are served separately by the bus dispatch loop; the hub exists so
/// any number of views can `subscribe()` and observe progress without
/// registering a sink. Lagging subscribers lose the oldest events and the
/// loss is counted, never silently swallowed.
#[derive(Debug)]
pub struct EventHub {
    sender: Sender<OperationEvent>,
    dropped_events: AtomicUsize,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            sender,
            dropped_events: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Publish to all current subscribers. Succeeds trivially when nobody is
    /// subscribed; progress events are not load-bearing.
    pub fn publish(&self, event: OperationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(self: &Arc<Self>) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            hub: Arc::clone(self),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped across all subscribers due to lag.
    pub fn dropped(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// Subscription handle yielding events as the pipeline emits them.
#[derive(Debug)]
pub struct EventStream {
    receiver: Receiver<OperationEvent>,
    hub: Arc<EventHub>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Result<OperationEvent, broadcast::error::RecvError> {
        match self.receiver.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.hub
                    .dropped_events
                    .fetch_add(missed as usize, Ordering::Relaxed);
                Err(broadcast::error::RecvError::Lagged(missed))
            }
            other => other,
        }
    }

    pub fn try_recv(&mut self) -> Result<OperationEvent, broadcast::error::TryRecvError> {
        match self.receiver.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                self.hub
                    .dropped_events
                    .fetch_add(missed as usize, Ordering::Relaxed);
                Err(broadcast::error::TryRecvError::Lagged(missed))
            }
            other => other,
        }
    }

    /// Next event within `duration`, skipping over lag gaps. `None` on
    /// timeout or when the bus has shut down.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<OperationEvent> {
        loop {
            match timeout(duration, self.recv()).await {
                Ok(Ok(event)) => return Some(event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }

    /// Adapt into a `futures_util` stream for combinator-style consumers.
    pub fn into_async_stream(self) -> impl futures_util::stream::Stream<Item = OperationEvent> {
        stream::unfold(self, |mut stream| async move {
            loop {
                match stream.recv().await {
                    Ok(event) => return Some((event, stream)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}
