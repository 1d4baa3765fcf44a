use crate::errors::{AppError, ResultExt};
use crate::handlers::AppState;
use crate::localtime;
use crate::models::SyncNowQuery;
use crate::whatsapp_sync;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Minimum spacing between full-sync triggers.
const MIN_SYNC_INTERVAL_SECS: i32 = 60;

const SYNC_DISABLED_MESSAGE: &str =
    "Meta sync is disabled. Ad spend rows are loaded externally into rastreio_whats.facebook_ads.";

/// Claims the sync slot with a conditional upsert on `sync_state`. A fresh
/// row claims immediately; an existing row only when the previous claim is
/// at least the minimum interval old. The condition is evaluated by the
/// store, so the guard holds across processes.
async fn try_claim_sync_slot(state: &AppState) -> Result<bool, AppError> {
    let claimed: Option<i16> = sqlx::query_scalar(
        r#"
        INSERT INTO rastreio_whats.sync_state (id, last_sync_at)
        VALUES (1, now())
        ON CONFLICT (id) DO UPDATE SET last_sync_at = now()
        WHERE sync_state.last_sync_at <= now() - make_interval(secs => $1)
        RETURNING id
        "#,
    )
    .bind(f64::from(MIN_SYNC_INTERVAL_SECS))
    .fetch_optional(&state.db)
    .await
    .context("Failed to claim sync slot")?;

    Ok(claimed.is_some())
}

/// POST /sync-now
///
/// Combined ads+messaging sync trigger, spaced at most once a minute. The
/// ads leg reports disabled (spend arrives through the external loader);
/// the messaging leg runs the WhatsApp sync for today and its result is
/// embedded verbatim.
pub async fn sync_now(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SyncNowQuery>,
) -> Result<Json<Value>, AppError> {
    if !try_claim_sync_slot(&state).await? {
        return Err(AppError::RateLimited(
            "Sync recently triggered. Please wait a minute and try again.".to_string(),
        ));
    }

    tracing::info!(
        "Sync-now triggered (levels={:?}, days={:?}, campaign_range={:?})",
        query.levels,
        query.days,
        query.campaign_range
    );

    let date = localtime::today();
    let whatsapp = match whatsapp_sync::sync_date(&state, &date).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("WhatsApp leg of sync-now failed: {}", e);
            json!({ "error": e.to_string() })
        }
    };

    Ok(Json(json!({
        "meta": { "error": SYNC_DISABLED_MESSAGE },
        "whatsapp": whatsapp,
    })))
}

/// POST /sync
///
/// The standalone ads sync stays switched off; insight storage moved out of
/// this service together with the old warehouse.
pub async fn sync_disabled() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({ "error": SYNC_DISABLED_MESSAGE })),
    )
}
