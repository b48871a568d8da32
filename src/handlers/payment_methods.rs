use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::domain::PaymentMethodSummary;
use crate::error::AppError;
use crate::validation::validate_identifier;
use crate::AppState;

/// `GET /tenants/:tenant_id/customers/:customer_id/payment-methods`
pub async fn list_payment_methods(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    validate_identifier("tenant_id", &tenant_id)?;
    validate_identifier("customer_id", &customer_id)?;

    let methods = state
        .payment_methods
        .list_for_customer(&tenant_id, &customer_id)
        .await?;

    let summaries: Vec<PaymentMethodSummary> = methods
        .iter()
        .filter(|m| m.active)
        .map(PaymentMethodSummary::from)
        .collect();

    Ok(Json(summaries))
}
