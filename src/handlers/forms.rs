use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::use_cases::FormRequest;
use crate::AppState;

/// `POST /forms`: builds the browser-redirect payload for one transaction.
pub async fn create_form(
    State(state): State<AppState>,
    payload: Result<Json<FormRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let form = state.forms.generate(request).await?;

    Ok(Json(form))
}
