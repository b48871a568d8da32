use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::use_cases::ChainStepCommand;
use crate::AppState;

/// `POST /chain-steps`: CAPTURE, REFUND or VOID an earlier transaction.
///
/// 201 when a new step was submitted, 200 when an identical earlier request
/// is replayed.
pub async fn submit_chain_step(
    State(state): State<AppState>,
    payload: Result<Json<ChainStepCommand>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(command) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let result = state.chain.execute(command).await?;
    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(result.transaction)))
}
