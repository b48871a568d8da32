//! Server-to-server follow-up steps (CAPTURE, REFUND, VOID).
//!
//! Each step presents its parent's returned token and records the new token
//! the gateway hands back, so the next step in the chain can use it.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info};

use super::{ServiceError, TransactionView};
use crate::domain::{
    check_parent, GatewayOutcome, NewTransaction, ResolvedCredentials, Transaction,
    TransactionKind, TransactionStatus,
};
use crate::gateway::{ChainStepRequest, GatewayClient};
use crate::ports::{InsertOutcome, RepositoryError, RepositoryResult, TransactionRepository};
use crate::services::credentials::CredentialResolver;
use crate::validation::{
    parse_amount_minor_units, required_field, validate_identifier, ValidationError,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainStepCommand {
    pub transaction_id: Option<String>,
    pub tenant_id: Option<String>,
    pub parent_id: Option<String>,
    pub kind: Option<String>,
    /// Defaults to the parent's amount.
    pub amount: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ChainStepResult {
    pub transaction: TransactionView,
    /// `false` when an earlier request with the same id is being replayed.
    pub created: bool,
}

#[derive(Debug)]
struct ValidatedStep {
    id: String,
    tenant_id: String,
    parent_id: String,
    kind: TransactionKind,
    amount_minor: Option<i64>,
    metadata: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct ChainStepService {
    resolver: CredentialResolver,
    gateway: GatewayClient,
    ledger: Arc<dyn TransactionRepository>,
}

impl ChainStepService {
    pub fn new(
        resolver: CredentialResolver,
        gateway: GatewayClient,
        ledger: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            resolver,
            gateway,
            ledger,
        }
    }

    pub async fn execute(&self, command: ChainStepCommand) -> Result<ChainStepResult, ServiceError> {
        let step = validate(command)?;

        if let Some(existing) = self.ledger.get_by_id(&step.id).await? {
            return replay(existing, &step);
        }

        let credentials = self.resolver.resolve(&step.tenant_id).await?;

        let parent = self
            .ledger
            .get_by_id(&step.parent_id)
            .await?
            .filter(|p| p.tenant_id == step.tenant_id && p.deleted_at.is_none())
            .ok_or_else(|| ServiceError::NotFound(format!("parent transaction {}", step.parent_id)))?;

        let amount_minor = step.amount_minor.unwrap_or(parent.amount_minor);
        let input_token = check_chain(&parent, step.kind, amount_minor)?;

        let pending = Transaction::new_pending(NewTransaction {
            id: step.id.clone(),
            parent_id: Some(parent.id.clone()),
            tenant_id: step.tenant_id.clone(),
            customer_id: parent.customer_id.clone(),
            amount_minor,
            currency: parent.currency.clone(),
            kind: step.kind,
            payment_method: parent.payment_method,
            payment_method_id: parent.payment_method_id,
            input_token: Some(input_token),
            return_url: None,
            metadata: step.metadata.clone(),
        })?
        .join_chain(&parent);

        // Sibling limits are enforced by the ledger under the parent's lock.
        let row = match self.ledger.insert_chain_step(&pending).await? {
            InsertOutcome::Created(row) => row,
            InsertOutcome::Existing(existing) => return replay(existing, &step),
        };

        info!(
            transaction_id = %row.id,
            parent_id = %parent.id,
            kind = %row.kind,
            reference = %row.gateway_reference,
            "Submitting chain step to gateway"
        );

        // Runs detached so a dropped caller cannot leave the row pending.
        let handle = tokio::spawn(submit_and_finalize(
            self.gateway.clone(),
            self.ledger.clone(),
            credentials,
            row,
        ));
        let finalized = handle
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))??;

        Ok(ChainStepResult {
            transaction: TransactionView::from(&finalized),
            created: true,
        })
    }
}

async fn submit_and_finalize(
    gateway: GatewayClient,
    ledger: Arc<dyn TransactionRepository>,
    credentials: ResolvedCredentials,
    row: Transaction,
) -> RepositoryResult<Transaction> {
    let request = ChainStepRequest {
        kind: row.kind,
        amount_minor: row.amount_minor,
        currency: row.currency.clone(),
        reference: row.gateway_reference,
        input_token: row.input_token.clone().unwrap_or_default(),
    };

    let outcome = match gateway.submit_chain_step(&credentials, &request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Contact attempted, no outcome: the row derives `failed`.
            error!(
                transaction_id = %row.id,
                reference = %row.gateway_reference,
                error = %e,
                "Chain step did not reach a gateway decision"
            );
            GatewayOutcome::default()
        }
    };

    match ledger.finalize_pending(row.gateway_reference, &outcome).await? {
        Some(finalized) => {
            info!(
                transaction_id = %finalized.id,
                status = %finalized.status(),
                "Chain step finalized"
            );
            Ok(finalized)
        }
        None => ledger
            .get_by_id(&row.id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(row.id.clone())),
    }
}

fn validate(command: ChainStepCommand) -> Result<ValidatedStep, ServiceError> {
    let id = required_field("transaction_id", command.transaction_id)?;
    validate_identifier("transaction_id", &id)?;

    let tenant_id = required_field("tenant_id", command.tenant_id)?;
    validate_identifier("tenant_id", &tenant_id)?;

    let kind = required_field("kind", command.kind)?
        .parse::<TransactionKind>()
        .map_err(|_| ValidationError::new("kind", "must be one of: CAPTURE, REFUND, VOID"))?;
    if !kind.requires_parent() {
        return Err(ValidationError::new("kind", "must be one of: CAPTURE, REFUND, VOID").into());
    }

    let parent_id = command
        .parent_id
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    check_parent(kind, parent_id.as_deref())?;
    let parent_id = parent_id.ok_or(ValidationError::new("parent_id", "must not be empty"))?;
    validate_identifier("parent_id", &parent_id)?;
    if parent_id == id {
        return Err(ValidationError::new("parent_id", "must differ from transaction_id").into());
    }

    let amount_minor = match command.amount.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_amount_minor_units(raw)?),
    };

    Ok(ValidatedStep {
        id,
        tenant_id,
        parent_id,
        kind,
        amount_minor,
        metadata: command.metadata,
    })
}

/// Parent must be an approved, token-bearing transaction of a kind this step
/// may follow. Returns the token the step must present.
fn check_chain(
    parent: &Transaction,
    kind: TransactionKind,
    amount_minor: i64,
) -> Result<String, ServiceError> {
    if !kind.allowed_parents().contains(&parent.kind) {
        return Err(ValidationError::new(
            "parent_id",
            format!("{} cannot follow a {} transaction", kind, parent.kind),
        )
        .into());
    }
    if parent.status() != TransactionStatus::Approved {
        return Err(ServiceError::Conflict(format!(
            "parent transaction {} is {}",
            parent.id,
            parent.status()
        )));
    }
    if amount_minor > parent.amount_minor {
        return Err(ValidationError::new("amount", "must not exceed the parent amount").into());
    }
    parent.result_token.clone().ok_or_else(|| {
        ServiceError::Conflict(format!("parent transaction {} has no gateway token", parent.id))
    })
}

fn replay(existing: Transaction, step: &ValidatedStep) -> Result<ChainStepResult, ServiceError> {
    let same = existing.tenant_id == step.tenant_id
        && existing.parent_id.as_deref() == Some(step.parent_id.as_str())
        && existing.kind == step.kind
        && step.amount_minor.map_or(true, |a| a == existing.amount_minor);

    if !same {
        return Err(ServiceError::Conflict(format!(
            "transaction id {} is already in use",
            step.id
        )));
    }

    Ok(ChainStepResult {
        transaction: TransactionView::from(&existing),
        created: false,
    })
}
