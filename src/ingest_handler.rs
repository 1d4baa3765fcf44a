use crate::db_storage::IngestStorage;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::ingest_models::{normalize_batch, raw_records};
use crate::models::IngestResponse;
use crate::whatsapp_sync::validate_ingestion_key;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde_json::Value;
use std::sync::Arc;

/// POST /ingest
///
/// Bulk-loads metric/lead records pushed by the automation flows. The body
/// may be one record, an array, or `{records: [...]}`; the whole batch is
/// validated before anything is written and persisted atomically after.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    validate_ingestion_key(&state, &headers)?;

    let Json(body) = payload
        .map_err(|_| AppError::BadRequest("Invalid JSON body.".to_string()))?;

    let raw = raw_records(&body);
    if raw.is_empty() {
        return Err(AppError::BadRequest("No records found.".to_string()));
    }

    let records = normalize_batch(&raw).map_err(|e| AppError::BadRequest(e.0))?;

    tracing::info!(
        "Ingesting {} record(s) from source '{}'",
        records.len(),
        records.first().map(|r| r.source.as_str()).unwrap_or("unknown")
    );

    let storage = IngestStorage::new(state.db.clone());
    let outcome = storage.ingest_batch(&records, &body).await?;

    tracing::info!(
        "Ingestion job {} complete: {} snapshot(s), {} utm row(s), {} lead(s)",
        outcome.job_id,
        outcome.metrics_upserted,
        outcome.utm_upserted,
        outcome.leads_upserted
    );

    Ok(Json(IngestResponse {
        ok: true,
        metrics_upserted: outcome.metrics_upserted,
        utm_upserted: outcome.utm_upserted,
        job_id: outcome.job_id,
    }))
}
