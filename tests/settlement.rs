use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::json;

use opwatch::session::{OperationKind, OperationSession, SessionStatus};
use opwatch::settlement::{
    FOUNDER_PACKAGE_TOKENS, InMemoryWallet, SettlementError, SettlementLedger, SettlementOutcome,
    Wallet,
};

fn succeeded(id: &str, kind: OperationKind) -> OperationSession {
    let mut session = OperationSession::new(id, kind);
    session.begin_polling().unwrap();
    session.succeed(json!({"ok": true})).unwrap();
    session
}

/// Wallet whose next credit call fails, then recovers.
struct FlakyWallet {
    inner: InMemoryWallet,
    fail_next: AtomicBool,
}

impl FlakyWallet {
    fn new() -> Self {
        Self {
            inner: InMemoryWallet::new(0),
            fail_next: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Wallet for FlakyWallet {
    async fn credit(&self, session_id: &str, tokens: u64) -> Result<u64, SettlementError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SettlementError::Wallet {
                message: "wallet unavailable".into(),
            });
        }
        self.inner.credit(session_id, tokens).await
    }

    async fn balance(&self) -> Result<u64, SettlementError> {
        self.inner.balance().await
    }
}

#[tokio::test]
async fn only_succeeded_sessions_settle() {
    let ledger = SettlementLedger::new(Arc::new(InMemoryWallet::new(0)));
    let session = OperationSession::new("sess_1", OperationKind::PaymentCheckout);

    let err = ledger.settle(&session).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::NotSucceeded { status: SessionStatus::Created, .. }
    ));
    assert!(!ledger.is_applied("sess_1"));
}

#[tokio::test]
async fn payment_success_credits_founder_tokens_once() {
    let wallet = Arc::new(InMemoryWallet::new(0));
    let ledger = SettlementLedger::new(Arc::clone(&wallet) as Arc<dyn Wallet>);
    let session = succeeded("sess_1", OperationKind::PaymentCheckout);

    let first = ledger.settle(&session).await.unwrap();
    let applied_id = match first {
        SettlementOutcome::Applied {
            settlement_id,
            balance,
        } => {
            assert_eq!(balance, FOUNDER_PACKAGE_TOKENS);
            settlement_id
        }
        other => panic!("expected applied, got {other:?}"),
    };
    assert!(ledger.is_applied("sess_1"));
    assert_eq!(ledger.cached_balance(), Some(FOUNDER_PACKAGE_TOKENS));

    // Duplicate observation of the same terminal session.
    let second = ledger.settle(&session).await.unwrap();
    assert_eq!(
        second,
        SettlementOutcome::AlreadyApplied {
            settlement_id: applied_id
        }
    );
    assert_eq!(wallet.balance().await.unwrap(), FOUNDER_PACKAGE_TOKENS);
}

#[tokio::test]
async fn job_success_refreshes_balance_without_credit() {
    let wallet = Arc::new(InMemoryWallet::new(250));
    let ledger = SettlementLedger::new(Arc::clone(&wallet) as Arc<dyn Wallet>);
    let session = succeeded("job_1", OperationKind::ModelCompression);

    let outcome = ledger.settle(&session).await.unwrap();
    assert!(matches!(
        outcome,
        SettlementOutcome::Applied { balance: 250, .. }
    ));
    assert_eq!(wallet.balance().await.unwrap(), 250);
    assert_eq!(ledger.cached_balance(), Some(250));
}

#[tokio::test]
async fn wallet_failure_releases_the_reservation() {
    let ledger = SettlementLedger::new(Arc::new(FlakyWallet::new()));
    let session = succeeded("sess_1", OperationKind::PaymentCheckout);

    let err = ledger.settle(&session).await.unwrap_err();
    assert!(matches!(err, SettlementError::Wallet { .. }));
    assert!(!ledger.is_applied("sess_1"));

    // A retry after the transient wallet failure settles normally.
    let outcome = ledger.settle(&session).await.unwrap();
    assert!(matches!(
        outcome,
        SettlementOutcome::Applied {
            balance: FOUNDER_PACKAGE_TOKENS,
            ..
        }
    ));
    assert!(ledger.is_applied("sess_1"));
}

#[tokio::test]
async fn refresh_balance_updates_the_cache() {
    let wallet = Arc::new(InMemoryWallet::new(500));
    let ledger = SettlementLedger::new(Arc::clone(&wallet) as Arc<dyn Wallet>);

    assert_eq!(ledger.cached_balance(), None);
    assert_eq!(ledger.refresh_balance().await.unwrap(), 500);
    assert_eq!(ledger.cached_balance(), Some(500));

    wallet.credit("sess_x", 100).await.unwrap();
    assert_eq!(ledger.refresh_balance().await.unwrap(), 600);
    assert_eq!(ledger.cached_balance(), Some(600));
}
