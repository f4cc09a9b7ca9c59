//! Idempotent application of success side effects.
//!
//! Reaching `Succeeded` must credit the wallet (or unlock the feature)
//! exactly once per session id, even if the terminal state is observed more
//! than once — a remounted view or a restarted poller must never double
//! credit. The ledger keeps the dedup keys for the lifetime of the process;
//! the authoritative guard is expected to also exist server-side, since the
//! client cannot be trusted.
//!
//! The wallet itself is remote-owned: the local balance is a cache refreshed
//! from backend return values, never written optimistically.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::session::{OperationKind, OperationSession, SessionStatus};

/// Tokens credited for the founder tier checkout package.
pub const FOUNDER_PACKAGE_TOKENS: u64 = 1000;

#[derive(Debug, Error, Diagnostic)]
pub enum SettlementError {
    /// Only succeeded sessions settle; anything else is a driver bug.
    #[error("cannot settle session {session_id} in status {status}")]
    #[diagnostic(code(opwatch::settlement::not_succeeded))]
    NotSucceeded {
        session_id: String,
        status: SessionStatus,
    },

    #[error("wallet backend failure: {message}")]
    #[diagnostic(code(opwatch::settlement::wallet))]
    Wallet { message: String },
}

/// Remote-owned token balance. `credit` and `balance` both return the
/// authoritative server-side balance.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn credit(&self, session_id: &str, tokens: u64) -> Result<u64, SettlementError>;
    async fn balance(&self) -> Result<u64, SettlementError>;
}

/// Reference wallet holding the balance in memory; stands in for the remote
/// service in tests and demos.
#[derive(Default)]
pub struct InMemoryWallet {
    balance: Mutex<u64>,
}

impl InMemoryWallet {
    pub fn new(initial: u64) -> Self {
        Self {
            balance: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    async fn credit(&self, _session_id: &str, tokens: u64) -> Result<u64, SettlementError> {
        let mut balance = self.balance.lock();
        *balance += tokens;
        Ok(*balance)
    }

    async fn balance(&self) -> Result<u64, SettlementError> {
        Ok(*self.balance.lock())
    }
}

/// Result of one settlement attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The side effect ran; `balance` is the refreshed authoritative value.
    Applied { settlement_id: Uuid, balance: u64 },
    /// This session id settled before; nothing was applied.
    AlreadyApplied { settlement_id: Uuid },
}

/// Caller-side idempotency guard over the wallet.
pub struct SettlementLedger {
    wallet: Arc<dyn Wallet>,
    applied: Mutex<FxHashMap<String, Uuid>>,
    cached_balance: Mutex<Option<u64>>,
}

impl SettlementLedger {
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        Self {
            wallet,
            applied: Mutex::new(FxHashMap::default()),
            cached_balance: Mutex::new(None),
        }
    }

    /// Tokens a successful operation of this kind is worth. Job completions
    /// unlock their result payload but credit nothing.
    fn credit_for(kind: OperationKind) -> u64 {
        match kind {
            OperationKind::PaymentCheckout => FOUNDER_PACKAGE_TOKENS,
            OperationKind::ModelCompression | OperationKind::ModelVerification => 0,
        }
    }

    /// Apply the success side effect for a succeeded session, exactly once
    /// per session id.
    #[instrument(skip(self, session), fields(session_id = %session.id()), err)]
    pub async fn settle(
        &self,
        session: &OperationSession,
    ) -> Result<SettlementOutcome, SettlementError> {
        if session.status() != SessionStatus::Succeeded {
            return Err(SettlementError::NotSucceeded {
                session_id: session.id().to_string(),
                status: session.status(),
            });
        }

        let settlement_id = Uuid::new_v4();
        {
            // Reserve before awaiting the wallet so a concurrent duplicate
            // observation cannot slip in between check and apply.
            let mut applied = self.applied.lock();
            if let Some(existing) = applied.get(session.id()) {
                return Ok(SettlementOutcome::AlreadyApplied {
                    settlement_id: *existing,
                });
            }
            applied.insert(session.id().to_string(), settlement_id);
        }

        let tokens = Self::credit_for(session.kind());
        let balance = if tokens > 0 {
            match self.wallet.credit(session.id(), tokens).await {
                Ok(balance) => balance,
                Err(e) => {
                    // Release the reservation so a retry can settle.
                    self.applied.lock().remove(session.id());
                    return Err(e);
                }
            }
        } else {
            match self.wallet.balance().await {
                Ok(balance) => balance,
                Err(e) => {
                    self.applied.lock().remove(session.id());
                    return Err(e);
                }
            }
        };

        *self.cached_balance.lock() = Some(balance);
        tracing::info!(
            session = %session.id(),
            tokens,
            balance,
            "settlement applied"
        );
        Ok(SettlementOutcome::Applied {
            settlement_id,
            balance,
        })
    }

    /// Whether this session id has already settled.
    pub fn is_applied(&self, session_id: &str) -> bool {
        self.applied.lock().contains_key(session_id)
    }

    /// Last balance observed from the wallet. A cache, never authoritative.
    pub fn cached_balance(&self) -> Option<u64> {
        *self.cached_balance.lock()
    }

    /// Re-pull the authoritative balance and update the cache.
    pub async fn refresh_balance(&self) -> Result<u64, SettlementError> {
        let balance = self.wallet.balance().await?;
        *self.cached_balance.lock() = Some(balance);
        Ok(balance)
    }
}
