use crate::db_storage::IngestStorage;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::localtime;
use crate::meta_client::MetaClient;
use crate::models::WhatsappSyncQuery;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// One lead row produced by the sync job, before hashing/persistence.
#[derive(Debug, Clone)]
pub struct WhatsappLead {
    pub platform: String,
    pub lead_name: String,
    /// RFC 3339 message instant (UTC).
    pub message_at: String,
    /// Ad id from the decoded referral token; persisted as source_id.
    pub ad_creative: Option<String>,
    pub campaign_name: Option<String>,
    pub audience: Option<String>,
    pub source: String,
}

/// Message shape returned by the WhatsApp Business edge.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsappMessage {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub referral: Option<WhatsappReferral>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsappReferral {
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub ctwa_clid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsappContact {
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub profile: Option<WhatsappProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsappProfile {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PhoneMessagesResponse {
    #[serde(default)]
    messages: Vec<WhatsappMessage>,
    #[serde(default)]
    contacts: Vec<WhatsappContact>,
}

/// Ad identifiers recovered from a referral token.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReferralIds {
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

/// Decodes the opaque click id attached to click-to-WhatsApp messages: a
/// base64 JSON blob carrying ad/adset/campaign ids. Anything undecodable
/// yields no ids; a bad token must not drop the lead.
pub fn decode_referral(ctwa_clid: &str) -> Option<ReferralIds> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(ctwa_clid)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(ctwa_clid))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Builds the lead rows for one phone id's messages: keeps only messages
/// inside the local day window, resolves names from the contact map and
/// decodes referral tokens.
pub fn leads_from_messages(
    messages: &[WhatsappMessage],
    contacts: &[WhatsappContact],
    start_unix: i64,
    end_unix: i64,
) -> Vec<WhatsappLead> {
    let contact_names: HashMap<&str, &str> = contacts
        .iter()
        .filter_map(|c| {
            let wa_id = c.wa_id.as_deref()?;
            let name = c.profile.as_ref().and_then(|p| p.name.as_deref())?;
            Some((wa_id, name))
        })
        .collect();

    messages
        .iter()
        .filter_map(|msg| {
            let msg_time: i64 = msg.timestamp.as_deref()?.parse().ok()?;
            if msg_time < start_unix || msg_time > end_unix {
                return None;
            }

            let from = msg.from.as_deref().unwrap_or("");
            let lead_name = contact_names
                .get(from)
                .copied()
                .unwrap_or("Desconhecido")
                .to_string();
            let message_at = DateTime::<Utc>::from_timestamp(msg_time, 0)?.to_rfc3339();

            let ids = msg
                .referral
                .as_ref()
                .and_then(|r| r.ctwa_clid.as_deref())
                .and_then(decode_referral)
                .unwrap_or_default();

            Some(WhatsappLead {
                platform: "meta".to_string(),
                lead_name,
                message_at,
                ad_creative: ids.ad_id,
                campaign_name: ids.campaign_id,
                audience: ids.adset_id,
                source: "whatsapp_api".to_string(),
            })
        })
        .collect()
}

/// Runs the sync for one calendar date: fetches each configured phone id's
/// recent messages and upserts the resulting lead rows. The first failing
/// phone id aborts the whole run.
pub async fn sync_date(state: &AppState, date: &str) -> Result<Value, AppError> {
    let token = state
        .config
        .meta_access_token
        .as_deref()
        .ok_or_else(|| AppError::ConfigError("META_ACCESS_TOKEN not set".to_string()))?;
    if state.config.whatsapp_business_account_id.is_none() {
        return Err(AppError::ConfigError(
            "WHATSAPP_BUSINESS_ACCOUNT_ID not set".to_string(),
        ));
    }
    if state.config.whatsapp_phone_number_ids.is_empty() {
        return Err(AppError::ConfigError(
            "WHATSAPP_PHONE_NUMBER_ID_1 not set".to_string(),
        ));
    }

    let (start_unix, end_unix) = localtime::day_unix_window(date)
        .ok_or_else(|| AppError::BadRequest("date must be in YYYY-MM-DD format.".to_string()))?;

    let client = MetaClient::new(state.config.graph_base.clone(), token.to_string())?;
    let mut all_leads = Vec::new();

    for phone_id in &state.config.whatsapp_phone_number_ids {
        let body = client
            .graph_get(
                &format!("/{}", phone_id),
                &[(
                    "fields",
                    "messages{id,from,timestamp,type,text,context,referral},contacts{wa_id,profile}",
                )],
            )
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("{} (phone_id {})", e, phone_id))
            })?;

        let parsed: PhoneMessagesResponse = serde_json::from_value(body).map_err(|e| {
            AppError::ExternalApiError(format!(
                "Failed to parse messages for phone_id {}: {}",
                phone_id, e
            ))
        })?;

        let mut leads =
            leads_from_messages(&parsed.messages, &parsed.contacts, start_unix, end_unix);
        tracing::info!(
            "WhatsApp sync: phone_id {} produced {} lead(s) for {}",
            phone_id,
            leads.len(),
            date
        );
        all_leads.append(&mut leads);
    }

    if all_leads.is_empty() {
        return Ok(json!({ "ok": true, "inserted": 0, "date": date }));
    }

    let storage = IngestStorage::new(state.db.clone());
    let inserted = storage.upsert_whatsapp_leads(&all_leads).await?;

    Ok(json!({ "ok": true, "inserted": inserted, "date": date }))
}

/// POST /whatsapp/sync?date=YYYY-MM-DD
///
/// Pulls the day's messages (default: today, São Paulo time) and upserts
/// lead rows. Shares the ingestion secret when one is configured.
pub async fn whatsapp_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WhatsappSyncQuery>,
) -> Result<Json<Value>, AppError> {
    validate_ingestion_key(&state, &headers)?;

    let date = query
        .date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(localtime::today);

    tracing::info!("WhatsApp sync triggered for {}", date);
    let result = sync_date(&state, &date).await?;
    Ok(Json(result))
}

/// Validates the x-ingestion-key header when a secret is configured.
pub fn validate_ingestion_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(ref expected) = state.config.ingestion_api_key else {
        return Ok(());
    };
    let provided = headers
        .get("x-ingestion-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !constant_time_compare(provided, expected) {
        return Err(AppError::Unauthorized("Unauthorized.".to_string()));
    }
    Ok(())
}

/// Constant-time string comparison (basic implementation)
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// GET /whatsapp/test
///
/// Diagnostic: walks ad account -> business -> WhatsApp business accounts ->
/// phone numbers so the operator can copy the phone ids into the env.
pub async fn whatsapp_test(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let token = state
        .config
        .meta_access_token
        .as_deref()
        .ok_or_else(|| AppError::ConfigError("META_ACCESS_TOKEN not set".to_string()))?;
    let account_id = state
        .config
        .meta_ad_account_id
        .as_deref()
        .ok_or_else(|| AppError::ConfigError("META_AD_ACCOUNT_ID not set".to_string()))?;

    let client = MetaClient::new(state.config.graph_base.clone(), token.to_string())?;
    let act_id = crate::meta_models::ensure_act_prefix(account_id);

    let ad_account = client
        .graph_get(&format!("/{}", act_id), &[("fields", "id,name,business")])
        .await?;

    let Some(business_id) = ad_account
        .get("business")
        .and_then(|b| b.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return Ok(Json(json!({
            "ok": false,
            "error": "No business ID found in ad account",
            "ad_account": ad_account,
        })));
    };

    let mut attempts: Vec<Value> = Vec::new();
    for edge in [
        "client_whatsapp_business_accounts",
        "owned_whatsapp_business_accounts",
    ] {
        match client
            .graph_get(&format!("/{}/{}", business_id, edge), &[])
            .await
        {
            Ok(wabas) => {
                let waba_id = wabas
                    .get("data")
                    .and_then(Value::as_array)
                    .and_then(|d| d.first())
                    .and_then(|w| w.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let Some(waba_id) = waba_id else {
                    attempts.push(json!({ "method": edge, "error": "no WABA entries" }));
                    continue;
                };
                attempts.push(json!({ "method": edge, "waba_id": waba_id }));

                let phones = client
                    .graph_get(&format!("/{}/phone_numbers", waba_id), &[])
                    .await?;
                let phone_numbers: Vec<Value> = phones
                    .get("data")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|p| {
                                json!({
                                    "phone_number_id": p.get("id"),
                                    "display_phone_number": p.get("display_phone_number"),
                                    "verified_name": p.get("verified_name"),
                                    "quality_rating": p.get("quality_rating"),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                return Ok(Json(json!({
                    "ok": true,
                    "waba_id": waba_id,
                    "business_id": business_id,
                    "phone_numbers": phone_numbers,
                    "instructions": "Copy the phone_number_id values above and add to .env as WHATSAPP_PHONE_NUMBER_ID_1 and WHATSAPP_PHONE_NUMBER_ID_2",
                })));
            }
            Err(e) => {
                attempts.push(json!({ "method": edge, "error": e.to_string() }));
            }
        }
    }

    Ok(Json(json!({
        "ok": false,
        "business_id": business_id,
        "attempts": attempts,
        "message": "Could not auto-detect WhatsApp phone numbers. Set WHATSAPP_BUSINESS_ACCOUNT_ID, WHATSAPP_PHONE_NUMBER_ID_1 and WHATSAPP_PHONE_NUMBER_ID_2 manually.",
    })))
}
