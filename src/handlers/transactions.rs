use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::use_cases::TransactionView;
use crate::validation::{required_field, validate_identifier};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TenantScope {
    pub tenant_id: Option<String>,
}

/// `GET /transactions/:id?tenant_id=`. Rows of other tenants are reported
/// as missing.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(scope): Query<TenantScope>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = required_field("tenant_id", scope.tenant_id)?;
    validate_identifier("tenant_id", &tenant_id)?;
    validate_identifier("id", &id)?;

    let tx = state
        .ledger
        .get_by_id(&id)
        .await?
        .filter(|tx| tx.tenant_id == tenant_id && tx.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))?;

    Ok(Json(TransactionView::from(&tx)))
}
