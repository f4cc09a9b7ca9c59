//! Event fan-out for operation tracking.
//!
//! The module is organised around a broadcast-based [`EventHub`] for
//! subscribers plus an [`EventBus`] that dispatches the same events to
//! configured sinks. This is the "any view can read current status" surface:
//! views subscribe instead of reaching into shared mutable state.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod sink;

pub use bus::{BusEmitter, EventBus};
pub use emitter::{EmitterError, EventEmitter, NullEmitter};
pub use event::{DiagnosticEvent, OperationEvent, ProgressEvent, TransitionEvent};
pub use hub::{EventHub, EventStream};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
