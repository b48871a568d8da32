//! Application use cases. Each orchestrates the domain, the storage ports
//! and the gateway client for one inbound operation.

use std::time::Duration;

use thiserror::Error;

use crate::domain::DomainError;
use crate::gateway::GatewayError;
use crate::ports::RepositoryError;
use crate::services::credentials::CredentialError;
use crate::validation::ValidationError;

pub mod generate_form;
pub mod process_callback;
pub mod submit_chain_step;
pub mod transaction_view;

pub use generate_form::{FormGenerationService, FormRequest, RedirectForm};
pub use process_callback::{CallbackError, CallbackOutcome, CallbackPayload, CallbackProcessor};
pub use submit_chain_step::{ChainStepCommand, ChainStepResult, ChainStepService};
pub use transaction_view::TransactionView;

/// Failures of the caller-facing (JSON) use cases.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("transaction {0} has already been processed")]
    AlreadyProcessed(String),

    #[error("gateway exchange did not complete within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("background task failed: {0}")]
    Task(String),
}
