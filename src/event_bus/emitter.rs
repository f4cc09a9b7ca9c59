use std::fmt;

use thiserror::Error;

use super::event::OperationEvent;

/// Abstract emitter handed to pollers and settlement hooks; cloneable and
/// synchronous so emission never blocks a poll tick.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: OperationEvent) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event bus closed")]
    Closed,
    #[error("event emission failed: {0}")]
    Other(String),
}

impl EmitterError {
    pub fn other(error: impl Into<String>) -> Self {
        Self::Other(error.into())
    }
}

/// Emitter that drops every event; useful for standalone pollers in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: OperationEvent) -> Result<(), EmitterError> {
        Ok(())
    }
}
