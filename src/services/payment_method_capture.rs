use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{PaymentMethodKind, StoredPaymentMethod, Transaction, TransactionStatus};
use crate::ports::{
    CaptureOutcome, PaymentMethodRepository, RepositoryResult, TransactionRepository,
};

const QUEUE_CAPACITY: usize = 1024;
const SWEEP_BATCH: i64 = 500;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A tokenizing transaction that was approved and whose returned token must
/// become a stored payment method.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub tenant_id: String,
    pub customer_id: String,
    pub source_transaction_id: String,
    /// Token returned by the tokenizing step.
    pub token: String,
    pub kind: PaymentMethodKind,
    pub card_brand: Option<String>,
    pub masked_account: Option<String>,
}

impl CaptureRequest {
    /// Request for an approved tokenizing row, or `None` if the row is not
    /// one or lacks the token or customer a stored method needs.
    pub fn from_transaction(tx: &Transaction, masked_account: Option<String>) -> Option<Self> {
        if !tx.kind.is_tokenizing() || tx.status() != TransactionStatus::Approved {
            return None;
        }
        Some(Self {
            tenant_id: tx.tenant_id.clone(),
            customer_id: tx.customer_id.clone()?,
            source_transaction_id: tx.id.clone(),
            token: tx.result_token.clone()?,
            kind: tx.payment_method,
            card_brand: tx.card_brand.clone(),
            masked_account,
        })
    }

    fn into_stored(self) -> StoredPaymentMethod {
        StoredPaymentMethod {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            customer_id: self.customer_id,
            source_transaction_id: self.source_transaction_id,
            token: self.token,
            kind: self.kind,
            card_brand: self.card_brand,
            masked_account: self.masked_account,
            active: true,
            verified: false,
            created_at: Utc::now(),
        }
    }
}

/// Sending half of the capture outbox. Cloned into the callback processor.
#[derive(Clone)]
pub struct PaymentMethodCapture {
    sender: mpsc::Sender<CaptureRequest>,
}

impl PaymentMethodCapture {
    /// Creates the outbox and the receiver the worker drains.
    pub fn channel() -> (Self, mpsc::Receiver<CaptureRequest>) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        (Self { sender }, receiver)
    }

    /// Creates the outbox and spawns its worker on the current runtime.
    pub fn spawn(
        repository: Arc<dyn PaymentMethodRepository>,
        max_attempts: u32,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (capture, receiver) = Self::channel();
        let handle = tokio::spawn(run_capture_worker(receiver, repository, max_attempts));
        (capture, handle)
    }

    /// Enqueues without waiting. Returns `false` when the request was dropped.
    pub fn notify(&self, request: CaptureRequest) -> bool {
        match self.sender.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                error!(
                    source_transaction_id = %request.source_transaction_id,
                    "Payment-method capture queue full; left for the next sweep"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                error!(
                    source_transaction_id = %request.source_transaction_id,
                    "Payment-method capture worker stopped; left for the next sweep"
                );
                false
            }
        }
    }
}

/// Drains the capture queue until every sender is dropped.
pub async fn run_capture_worker(
    mut receiver: mpsc::Receiver<CaptureRequest>,
    repository: Arc<dyn PaymentMethodRepository>,
    max_attempts: u32,
) {
    info!("Payment-method capture worker started");

    while let Some(request) = receiver.recv().await {
        let source = request.source_transaction_id.clone();
        match capture_with_retry(repository.as_ref(), request, max_attempts).await {
            Ok(CaptureOutcome::Created(method)) => {
                info!(
                    source_transaction_id = %source,
                    payment_method_id = %method.id,
                    "Stored payment method captured"
                );
            }
            Ok(CaptureOutcome::AlreadyCaptured(method)) => {
                debug!(
                    source_transaction_id = %source,
                    payment_method_id = %method.id,
                    "Payment method already captured"
                );
            }
            Err(e) => {
                error!(
                    source_transaction_id = %source,
                    error = %e,
                    "Giving up on payment-method capture; the next sweep will retry"
                );
            }
        }
    }

    info!("Payment-method capture worker stopped");
}

/// Re-enqueues approved tokenizations that have no stored payment method,
/// e.g. because the process stopped before the worker drained its queue.
/// Returns how many captures were queued.
pub async fn sweep_uncaptured(
    ledger: &dyn TransactionRepository,
    repository: &dyn PaymentMethodRepository,
    capture: &PaymentMethodCapture,
) -> RepositoryResult<usize> {
    let mut queued = 0;

    for tx in ledger.uncaptured_tokenizations(SWEEP_BATCH).await? {
        if repository.get_by_source_transaction(&tx.id).await?.is_some() {
            continue;
        }
        match CaptureRequest::from_transaction(&tx, None) {
            Some(request) => {
                if capture.notify(request) {
                    queued += 1;
                }
            }
            None => warn!(
                transaction_id = %tx.id,
                "Approved tokenization has no customer; payment method cannot be stored"
            ),
        }
    }

    Ok(queued)
}

/// Runs `sweep_uncaptured` once at startup and then on every interval tick.
pub fn spawn_capture_sweeper(
    ledger: Arc<dyn TransactionRepository>,
    repository: Arc<dyn PaymentMethodRepository>,
    capture: PaymentMethodCapture,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match sweep_uncaptured(ledger.as_ref(), repository.as_ref(), &capture).await {
                Ok(0) => debug!("Capture sweep found nothing to replay"),
                Ok(queued) => info!(queued, "Re-enqueued uncaptured payment methods"),
                Err(e) => error!(error = %e, "Capture sweep failed"),
            }
        }
    })
}

/// Inserts the stored payment method, retrying with exponential backoff.
pub async fn capture_with_retry(
    repository: &dyn PaymentMethodRepository,
    request: CaptureRequest,
    max_attempts: u32,
) -> RepositoryResult<CaptureOutcome> {
    let method = request.into_stored();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;

    loop {
        match repository.insert(&method).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt < max_attempts.max(1) => {
                warn!(
                    source_transaction_id = %method.source_transaction_id,
                    attempt,
                    error = %e,
                    "Payment-method capture failed, retrying"
                );
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
