//! Polling and tracker configuration.

use std::time::Duration;

use crate::event_bus::EventBus;
use crate::session::OperationKind;

/// Cadence and hardening knobs for one polling run.
///
/// Defaults per kind mirror the intervals observed in production: payment
/// verification polls immediately and then every 3 s, compression jobs every
/// 2 s, verification jobs every 3 s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Fixed interval between status queries.
    pub interval: Duration,
    /// Issue the first status query without waiting for the interval.
    pub poll_immediately: bool,
    /// Overall ceiling measured from the start of polling; exceeding it
    /// transitions the session to `TimedOut` and stops all further polls.
    pub timeout: Duration,
    /// How many consecutive poll-cycle failures (transport or malformed
    /// response) are retried before the session fails.
    pub max_transport_retries: u32,
    /// First retry delay; doubled per consecutive failure.
    pub backoff_base: Duration,
    /// Upper bound for the retry delay.
    pub backoff_cap: Duration,
}

impl PollConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_MAX_TRANSPORT_RETRIES: u32 = 3;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
    pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

    /// Default configuration for the given operation kind.
    pub fn for_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::PaymentCheckout => Self {
                interval: Duration::from_millis(3000),
                poll_immediately: true,
                ..Self::default()
            },
            OperationKind::ModelCompression => Self {
                interval: Duration::from_millis(2000),
                ..Self::default()
            },
            OperationKind::ModelVerification => Self {
                interval: Duration::from_millis(3000),
                ..Self::default()
            },
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_poll_immediately(mut self, poll_immediately: bool) -> Self {
        self.poll_immediately = poll_immediately;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Deterministic retry delay for the given consecutive-failure count
    /// (1-based): `base * 2^(attempt-1)`, capped. Jitter is layered on by the
    /// poller so this stays testable.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |d| d.min(self.backoff_cap))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            poll_immediately: false,
            timeout: Self::DEFAULT_TIMEOUT,
            max_transport_retries: Self::DEFAULT_MAX_TRANSPORT_RETRIES,
            backoff_base: Self::DEFAULT_BACKOFF_BASE,
            backoff_cap: Self::DEFAULT_BACKOFF_CAP,
        }
    }
}

/// Sink selection for the event bus built by the tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

/// Configuration for the tracker-owned [`EventBus`].
#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub buffer_capacity: usize,
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        Self {
            buffer_capacity: if buffer_capacity == 0 {
                Self::DEFAULT_BUFFER_CAPACITY
            } else {
                buffer_capacity
            },
            sinks,
        }
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self::new(
            Self::DEFAULT_BUFFER_CAPACITY,
            vec![SinkConfig::StdOut, SinkConfig::Memory],
        )
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    pub(crate) fn build_event_bus(&self) -> EventBus {
        EventBus::from_config(self)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}

/// Top-level tracker configuration: per-kind poll overrides plus event bus
/// wiring.
#[derive(Clone, Debug, Default)]
pub struct TrackerConfig {
    pub checkout: Option<PollConfig>,
    pub compression: Option<PollConfig>,
    pub verification: Option<PollConfig>,
    pub event_bus: EventBusConfig,
}

impl TrackerConfig {
    /// Load `.env` (if present) and apply environment overrides:
    /// `OPWATCH_TIMEOUT_SECS` caps every kind's polling ceiling.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(timeout) = std::env::var("OPWATCH_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            let timeout = Duration::from_secs(timeout);
            for kind in [
                OperationKind::PaymentCheckout,
                OperationKind::ModelCompression,
                OperationKind::ModelVerification,
            ] {
                let poll = config.poll_config(kind).with_timeout(timeout);
                config = config.with_poll_config(kind, poll);
            }
        }
        config
    }

    /// Effective poll configuration for a kind (override or per-kind default).
    pub fn poll_config(&self, kind: OperationKind) -> PollConfig {
        let override_for = match kind {
            OperationKind::PaymentCheckout => &self.checkout,
            OperationKind::ModelCompression => &self.compression,
            OperationKind::ModelVerification => &self.verification,
        };
        override_for
            .clone()
            .unwrap_or_else(|| PollConfig::for_kind(kind))
    }

    #[must_use]
    pub fn with_poll_config(mut self, kind: OperationKind, poll: PollConfig) -> Self {
        match kind {
            OperationKind::PaymentCheckout => self.checkout = Some(poll),
            OperationKind::ModelCompression => self.compression = Some(poll),
            OperationKind::ModelVerification => self.verification = Some(poll),
        }
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }

    #[must_use]
    pub fn with_memory_event_bus(self) -> Self {
        self.with_event_bus(EventBusConfig::with_memory_sink())
    }
}
