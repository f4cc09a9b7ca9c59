use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::oneshot, task};

use super::emitter::{EmitterError, EventEmitter};
use super::event::OperationEvent;
use super::hub::{EventHub, EventStream};
use super::sink::{EventSink, MemorySink, StdOutSink};
use crate::config::{EventBusConfig, SinkConfig};

/// Receives events from pollers and fans them out twice: to registered sinks
/// via a background dispatch task, and to subscribers via the broadcast hub.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    channel: (
        flume::Sender<OperationEvent>,
        flume::Receiver<OperationEvent>,
    ),
    hub: Arc<EventHub>,
    listener: Mutex<Option<ListenerState>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// Bus with a single sink and default hub capacity.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity_and_sinks(EventBusConfig::DEFAULT_BUFFER_CAPACITY, sinks)
    }

    pub fn with_capacity_and_sinks(capacity: usize, sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            channel: flume::unbounded(),
            hub: EventHub::new(capacity),
            listener: Mutex::new(None),
        }
    }

    pub(crate) fn from_config(config: &EventBusConfig) -> Self {
        let sinks = config
            .sinks
            .iter()
            .map(|sink| match sink {
                SinkConfig::StdOut => Box::new(StdOutSink::default()) as Box<dyn EventSink>,
                SinkConfig::Memory => Box::new(MemorySink::new()) as Box<dyn EventSink>,
            })
            .collect();
        Self::with_capacity_and_sinks(config.buffer_capacity, sinks)
    }

    /// Dynamically add a sink (useful for per-request streaming).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.sinks.lock().push(Box::new(sink));
    }

    /// Cloneable emitter for producers (pollers, settlement hooks).
    pub fn get_emitter(&self) -> BusEmitter {
        BusEmitter {
            sender: self.channel.0.clone(),
            hub: Arc::clone(&self.hub),
        }
    }

    /// Subscribe to the broadcast side of the bus.
    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    /// Spawn the background task that drains the dispatch channel into the
    /// sinks. Idempotent: calling multiple times has no effect.
    pub fn listen_for_events(&self) {
        let mut guard = self.listener.lock();
        if guard.is_some() {
            return;
        }

        let receiver = self.channel.1.clone();
        let sinks = Arc::clone(&self.sinks);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(event) => {
                            let mut sinks_guard = sinks.lock();
                            for sink in sinks_guard.iter_mut() {
                                if let Err(e) = sink.handle(&event) {
                                    tracing::warn!(error = %e, "event sink write failed");
                                }
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background listener task, draining nothing further.
    pub async fn stop_listener(&self) {
        let state = self.listener.lock().take();
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(state) = self.listener.lock().take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

/// Emitter bound to one bus: pushes onto the sink dispatch channel and
/// publishes to the hub. Missing subscribers are fine; a closed dispatch
/// channel is not.
#[derive(Clone, Debug)]
pub struct BusEmitter {
    sender: flume::Sender<OperationEvent>,
    hub: Arc<EventHub>,
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: OperationEvent) -> Result<(), EmitterError> {
        self.hub.publish(event.clone());
        self.sender.send(event).map_err(|_| EmitterError::Closed)
    }
}
