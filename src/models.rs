use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// One row of `rastreio_whats.whatsapp_anuncio` joined with the matching
/// `facebook_ads` names.
///
/// The join is a best-effort name+date match on `(source_id, data_criacao)`;
/// there is no foreign key, so the ad columns are nullable.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LeadRow {
    /// Lead first name as captured from the message profile.
    pub nome: Option<String>,
    pub sobrenome: Option<String>,
    /// Message timestamp; drives the daily grouping.
    pub data_criacao: DateTime<Utc>,
    /// Ad id that produced the lead, when attribution succeeded.
    pub source_id: Option<String>,
    pub ctwaclid: Option<String>,
    pub plataforma: Option<String>,
    pub mensagem: Option<String>,
    pub cta: Option<String>,
    pub source_url: Option<String>,
    /// Campaign name from the matched ad-spend row.
    pub campanha: Option<String>,
    pub conjunto_anuncio: Option<String>,
    pub anuncio: Option<String>,
}

// ============ Response Models ============

/// Lead listing entry returned by GET /leads. The ad-set and ad columns are
/// renamed to the dashboard's vocabulary (conjunto / criativo).
#[derive(Debug, Clone, Serialize)]
pub struct LeadListItem {
    pub nome: Option<String>,
    pub sobrenome: Option<String>,
    pub data_criacao: DateTime<Utc>,
    pub source_id: Option<String>,
    pub ctwaclid: Option<String>,
    pub plataforma: Option<String>,
    pub mensagem: Option<String>,
    pub cta: Option<String>,
    pub source_url: Option<String>,
    pub campanha: Option<String>,
    pub conjunto: Option<String>,
    pub criativo: Option<String>,
}

impl From<LeadRow> for LeadListItem {
    fn from(row: LeadRow) -> Self {
        Self {
            nome: row.nome,
            sobrenome: row.sobrenome,
            data_criacao: row.data_criacao,
            source_id: row.source_id,
            ctwaclid: row.ctwaclid,
            plataforma: row.plataforma,
            mensagem: row.mensagem,
            cta: row.cta,
            source_url: row.source_url,
            campanha: row.campanha,
            conjunto: row.conjunto_anuncio,
            criativo: row.anuncio,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadsResponse {
    pub date: String,
    pub platform: String,
    pub total_conversations: usize,
    pub items: Vec<LeadListItem>,
}

/// Aggregated measures for one period (today or the requested range).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PeriodTotals {
    pub spend: f64,
    pub leads: i64,
    pub opportunities: i64,
    pub sales_count: i64,
    pub revenue: f64,
    /// spend / actions when actions > 0, else 0.
    pub cost_per_result: f64,
    pub impressions: i64,
    pub inline_link_clicks: i64,
    /// Messaging conversations started.
    pub actions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub today: PeriodTotals,
    pub total: PeriodTotals,
    pub platform: String,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub objective: String,
    pub status: String,
}

/// One point of the daily spend/lead series.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyPoint {
    pub date: String,
    pub spend: f64,
    pub leads: i64,
    /// Cost per lead; null when the day has no leads.
    pub cpl: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyResponse {
    pub daily: Vec<DailyPoint>,
}

/// One grouped breakdown row of GET /insights (campaign, ad set or ad).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InsightItem {
    pub id: String,
    pub name: String,
    /// Distinct attributed leads for the group (name+date soft join).
    pub quantidade: i64,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
}

/// Best-performing group by lowest cost per lead.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Champion {
    pub name: String,
    pub cpl: f64,
    pub quantidade: i64,
    pub spend: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightsResponse {
    pub level: String,
    pub items: Vec<InsightItem>,
    /// Absent when no group has at least one attributed lead.
    pub champion: Option<Champion>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub objective: String,
    pub status: String,
}

/// GET /budget payload; all values already divided from cents.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetResponse {
    pub amount_spent: f64,
    pub balance: Option<f64>,
    pub spend_cap: Option<f64>,
    pub currency: String,
    pub available: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub metrics_upserted: usize,
    pub utm_upserted: usize,
    pub job_id: Uuid,
}

// ============ Query Params ============

#[derive(Debug, Clone, Deserialize)]
pub struct LeadsQuery {
    pub platform: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsQuery {
    pub platform: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub objective: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyQuery {
    pub days: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightsQuery {
    pub level: Option<String>,
    pub id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub objective: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncNowQuery {
    pub levels: Option<String>,
    pub days: Option<String>,
    pub campaign_range: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsappSyncQuery {
    pub date: Option<String>,
}
