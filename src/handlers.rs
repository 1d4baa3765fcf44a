use crate::aggregates;
use crate::config::Config;
use crate::errors::AppError;
use crate::localtime;
use crate::meta_client::MetaClient;
use crate::models::*;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use sqlx::{PgPool, QueryBuilder};
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rastreio-metrics-api",
            "version": "0.1.0"
        })),
    )
}

/// GET /connection-test
///
/// Probes the store with `SELECT 1`. Always 200; failures are reported in
/// the body so the dashboard's status widget can show them.
pub async fn connection_test(State(state): State<Arc<AppState>>) -> Json<Value> {
    let probe: Result<i32, sqlx::Error> = sqlx::query_scalar("SELECT 1 as ping")
        .fetch_one(&state.db)
        .await;

    let postgres = match probe {
        Ok(1) => json!({ "ok": true, "configured": true }),
        Ok(_) => json!({ "ok": false, "configured": true, "error": "Unexpected result from SELECT 1" }),
        Err(e) => {
            tracing::error!("Connection test failed: {}", e);
            json!({ "ok": false, "configured": true, "error": e.to_string() })
        }
    };

    Json(json!({ "postgres": postgres }))
}

/// GET /leads?platform=meta|all&date=YYYY-MM-DD|all
///
/// Lists lead rows with a source id, joined to the matching ad-spend row by
/// (source_id, date). `date=all` lifts the day filter; `platform=all` (or
/// absent) lifts the platform filter.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeadsQuery>,
) -> Result<Json<LeadsResponse>, AppError> {
    let platform = params
        .platform
        .as_deref()
        .map(str::trim)
        .map(str::to_lowercase)
        .filter(|p| !p.is_empty() && p != "all");
    let date_param = params
        .date
        .as_deref()
        .map(str::trim)
        .map(str::to_lowercase)
        .filter(|d| !d.is_empty());
    let all_dates = date_param.as_deref() == Some("all");
    let date = if all_dates {
        localtime::today()
    } else {
        date_param.unwrap_or_else(localtime::today)
    };

    let mut qb = QueryBuilder::new(
        r#"SELECT wa.nome, wa.sobrenome, wa.data_criacao, wa.source_id, wa.ctwaclid,
                  wa.plataforma, wa.mensagem, wa.cta, wa.source_url,
                  fa.campanha, fa.conjunto_anuncio, fa.anuncio
           FROM rastreio_whats.whatsapp_anuncio AS wa
           LEFT JOIN rastreio_whats.facebook_ads AS fa
             ON fa.source_id = wa.source_id
            AND fa.data = (wa.data_criacao)::date
           WHERE wa.source_id IS NOT NULL"#,
    );
    if !all_dates {
        let (start, end) = localtime::day_bounds(&date)
            .ok_or_else(|| AppError::BadRequest("date must be in YYYY-MM-DD format.".to_string()))?;
        qb.push(" AND wa.data_criacao >= ");
        qb.push_bind(start);
        qb.push(" AND wa.data_criacao < ");
        qb.push_bind(end);
    }
    if let Some(ref p) = platform {
        qb.push(" AND wa.plataforma = ");
        qb.push_bind(p.clone());
    }
    qb.push(" ORDER BY wa.data_criacao DESC");

    let rows: Vec<LeadRow> = qb.build_query_as().fetch_all(&state.db).await?;
    let items: Vec<LeadListItem> = rows.into_iter().map(LeadListItem::from).collect();

    Ok(Json(LeadsResponse {
        date: if all_dates { "all".to_string() } else { date },
        platform: platform.unwrap_or_else(|| "all".to_string()),
        total_conversations: items.len(),
        items,
    }))
}

/// GET /metrics/daily?days=90
///
/// Daily spend/lead/CPL series for the trailing N days (clamped 1-365).
/// Feeds the best-day / worst-day / biggest-spend cards; a query failure
/// degrades to an empty series rather than an error.
pub async fn metrics_daily(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DailyQuery>,
) -> Json<DailyResponse> {
    let days = aggregates::clamp_days(params.days.as_deref());

    let spend_rows: Vec<(String, f64)> = match sqlx::query_as(
        r#"
        SELECT data::text AS metric_date, COALESCE(SUM(investimento), 0)::double precision AS spend
        FROM rastreio_whats.facebook_ads
        WHERE data >= CURRENT_DATE - $1::integer
        GROUP BY data
        ORDER BY data
        "#,
    )
    .bind(days)
    .fetch_all(&state.db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("metrics/daily spend query failed: {}", e);
            return Json(DailyResponse { daily: Vec::new() });
        }
    };

    let lead_rows: Vec<(String, i64)> = match sqlx::query_as(
        r#"
        SELECT ((data_criacao)::date)::text AS metric_date, COUNT(*)::bigint AS leads
        FROM rastreio_whats.whatsapp_anuncio
        WHERE source_id IS NOT NULL
          AND (data_criacao)::date >= CURRENT_DATE - $1::integer
        GROUP BY (data_criacao)::date
        ORDER BY metric_date
        "#,
    )
    .bind(days)
    .fetch_all(&state.db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("metrics/daily leads query failed: {}", e);
            return Json(DailyResponse { daily: Vec::new() });
        }
    };

    Json(DailyResponse {
        daily: aggregates::merge_daily(&spend_rows, &lead_rows),
    })
}

/// Per-column sums from facebook_ads for today and for the whole table.
/// A failing column contributes zero instead of aborting the response; the
/// external loader occasionally lags behind on schema changes.
async fn sum_fb_column(db: &PgPool, column: &'static str, today: &str) -> (f64, f64) {
    let today_sql = format!(
        "SELECT COALESCE(SUM({col}), 0)::double precision AS v FROM rastreio_whats.facebook_ads WHERE data = $1::date",
        col = column
    );
    let total_sql = format!(
        "SELECT COALESCE(SUM({col}), 0)::double precision AS v FROM rastreio_whats.facebook_ads",
        col = column
    );

    let today_value: f64 = match sqlx::query_scalar(&today_sql).bind(today).fetch_one(db).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("facebook_ads column {}: {}", column, e);
            0.0
        }
    };
    let total_value: f64 = match sqlx::query_scalar(&total_sql).fetch_one(db).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("facebook_ads column {}: {}", column, e);
            0.0
        }
    };
    (today_value, total_value)
}

/// Lead counts (rows with a source id) for today and all-time. The total
/// deliberately ignores the date range so it stays consistent with the
/// all-time facebook_ads sums. Failures degrade to zero, matching the
/// column sums.
async fn count_leads(db: &PgPool, today: &str) -> (i64, i64) {
    let today_count = match localtime::day_bounds(today) {
        Some((start, end)) => sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)::bigint FROM rastreio_whats.whatsapp_anuncio
            WHERE data_criacao >= $1 AND data_criacao < $2 AND source_id IS NOT NULL
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(db)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("today lead count failed: {}", e);
            0
        }),
        None => 0,
    };

    let total_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)::bigint FROM rastreio_whats.whatsapp_anuncio WHERE source_id IS NOT NULL",
    )
    .fetch_one(db)
    .await
    .unwrap_or_else(|e| {
        tracing::warn!("total lead count failed: {}", e);
        0
    });

    (today_count, total_count)
}

#[derive(Debug, Default, Clone, Copy)]
struct FbSums {
    spend: f64,
    impressions: f64,
    clicks: f64,
    actions: f64,
}

/// Snapshot sums for the metric_snapshots fallback path.
#[derive(Debug, Default, sqlx::FromRow)]
struct SnapshotSums {
    spend: f64,
    leads: i64,
    opportunities: i64,
    sales_count: i64,
    revenue: f64,
}

/// GET /metrics?platform=meta&date_from=...&date_to=...
///
/// Today/total aggregate for the dashboard cards. Leads come from the lead
/// table, spend/impressions/clicks/conversations from facebook_ads; with
/// objective=ALL&status=ALL the metric_snapshots sums are folded in for the
/// opportunity/sales/revenue columns.
pub async fn metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, AppError> {
    let platform = params
        .platform
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("meta")
        .to_string();
    let date_from = params
        .date_from
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let date_to = params
        .date_to
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let objective = params
        .objective
        .as_deref()
        .unwrap_or("ENGAGEMENT")
        .to_uppercase();
    let status = params.status.as_deref().unwrap_or("ACTIVE").to_uppercase();

    if platform != "meta" {
        return Err(AppError::BadRequest(
            "Only platform=meta is supported for now.".to_string(),
        ));
    }

    let today_str = localtime::today();

    // Lead counts deliberately ignore the platform column so the cards
    // agree with the platform=all listing.
    let (leads_today, leads_total) = count_leads(&state.db, &today_str).await;

    let mut fb_today = FbSums::default();
    let mut fb_total = FbSums::default();
    for (column, today_slot, total_slot) in [
        ("investimento", &mut fb_today.spend, &mut fb_total.spend),
        ("impressoes", &mut fb_today.impressions, &mut fb_total.impressions),
        ("cliques_no_link", &mut fb_today.clicks, &mut fb_total.clicks),
        ("mensagens_iniciadas", &mut fb_today.actions, &mut fb_total.actions),
    ] {
        let (t, total) = sum_fb_column(&state.db, column, &today_str).await;
        *today_slot = t;
        *total_slot = total;
    }

    let use_snapshots = objective == "ALL" && status == "ALL";
    let (snap_today, snap_total) = if use_snapshots {
        snapshot_sums(&state.db, &platform, &today_str, date_from.as_deref(), date_to.as_deref())
            .await
    } else {
        (SnapshotSums::default(), SnapshotSums::default())
    };

    let build = |fb: FbSums, snap: &SnapshotSums, leads: i64| PeriodTotals {
        // Ads-table spend wins when present; the snapshot value is the
        // ingestion flow's copy of the same number.
        spend: if fb.spend != 0.0 { fb.spend } else { snap.spend },
        leads,
        opportunities: snap.opportunities,
        sales_count: snap.sales_count,
        revenue: snap.revenue,
        cost_per_result: aggregates::cost_per_result(fb.spend, fb.actions as i64),
        impressions: fb.impressions as i64,
        inline_link_clicks: fb.clicks as i64,
        actions: fb.actions as i64,
    };

    Ok(Json(MetricsResponse {
        today: build(fb_today, &snap_today, leads_today),
        total: build(fb_total, &snap_total, leads_total),
        platform,
        date_from,
        date_to,
        objective,
        status,
    }))
}

async fn snapshot_sums(
    db: &PgPool,
    platform: &str,
    today: &str,
    date_from: Option<&str>,
    date_to: Option<&str>,
) -> (SnapshotSums, SnapshotSums) {
    let today_sums: SnapshotSums = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(spend), 0)::double precision AS spend,
               COALESCE(SUM(leads), 0)::bigint AS leads,
               COALESCE(SUM(opportunities), 0)::bigint AS opportunities,
               COALESCE(SUM(sales_count), 0)::bigint AS sales_count,
               COALESCE(SUM(revenue), 0)::double precision AS revenue
        FROM rastreio_whats.metric_snapshots
        WHERE platform = $1 AND metric_date = $2::date
        "#,
    )
    .bind(platform)
    .bind(today)
    .fetch_one(db)
    .await
    .unwrap_or_else(|e| {
        tracing::warn!("metric_snapshots today query failed: {}", e);
        SnapshotSums::default()
    });

    let mut qb = QueryBuilder::new(
        r#"SELECT COALESCE(SUM(spend), 0)::double precision AS spend,
                  COALESCE(SUM(leads), 0)::bigint AS leads,
                  COALESCE(SUM(opportunities), 0)::bigint AS opportunities,
                  COALESCE(SUM(sales_count), 0)::bigint AS sales_count,
                  COALESCE(SUM(revenue), 0)::double precision AS revenue
           FROM rastreio_whats.metric_snapshots WHERE platform = "#,
    );
    qb.push_bind(platform.to_string());
    if let Some(from) = date_from {
        qb.push(" AND metric_date >= ");
        qb.push_bind(from.to_string());
        qb.push("::date");
    }
    if let Some(to) = date_to {
        qb.push(" AND metric_date <= ");
        qb.push_bind(to.to_string());
        qb.push("::date");
    }
    let range_sums: SnapshotSums = qb
        .build_query_as()
        .fetch_one(db)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("metric_snapshots range query failed: {}", e);
            SnapshotSums::default()
        });

    (today_sums, range_sums)
}

/// GET /insights?level=campaign|adset|ad&date_from=...&date_to=...
///
/// Spend/lead breakdown grouped by the level's name column. Lead counts use
/// the name+date soft join against the lead table; there is no foreign key,
/// so an unmatched group simply counts zero. The champion is the qualifying
/// group with the lowest cost per lead.
pub async fn insights(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InsightsQuery>,
) -> Result<Json<InsightsResponse>, AppError> {
    let level = params
        .level
        .as_deref()
        .unwrap_or("campaign")
        .trim()
        .to_lowercase();
    let date_from = params
        .date_from
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let date_to = params
        .date_to
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let objective = params
        .objective
        .as_deref()
        .unwrap_or("ENGAGEMENT")
        .to_uppercase();
    let status = params.status.as_deref().unwrap_or("ACTIVE").to_uppercase();

    let name_column = match level.as_str() {
        "campaign" => "campanha",
        "adset" => "conjunto_anuncio",
        "ad" => "anuncio",
        _ => {
            return Ok(Json(InsightsResponse {
                level,
                items: Vec::new(),
                champion: None,
                date_from,
                date_to,
                objective,
                status,
            }))
        }
    };

    let items = insight_items(&state.db, name_column, date_from.as_deref(), date_to.as_deref())
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("insights query failed: {}", e);
            Vec::new()
        });

    let champion = aggregates::champion(&items);

    Ok(Json(InsightsResponse {
        level,
        items,
        champion,
        date_from,
        date_to,
        objective,
        status,
    }))
}

async fn insight_items(
    db: &PgPool,
    name_column: &'static str,
    date_from: Option<&str>,
    date_to: Option<&str>,
) -> Result<Vec<InsightItem>, sqlx::Error> {
    // name_column is one of three static identifiers; user input never
    // reaches the SQL text.
    let mut qb = QueryBuilder::new(format!(
        r#"SELECT COALESCE(TRIM(fa.{col}), '') AS id,
                  COALESCE(TRIM(fa.{col}), '—') AS name,
                  (SELECT COUNT(*)::bigint FROM (
                       SELECT DISTINCT wa.source_id, (wa.data_criacao)::date
                       FROM rastreio_whats.whatsapp_anuncio AS wa
                       INNER JOIN rastreio_whats.facebook_ads AS fa2
                         ON fa2.source_id = wa.source_id
                        AND fa2.data = (wa.data_criacao)::date
                        AND fa2.{col} = fa.{col}
                  ) lead_keys) AS quantidade,
                  COALESCE(SUM(fa.investimento), 0)::double precision AS spend,
                  COALESCE(SUM(fa.impressoes), 0)::bigint AS impressions,
                  COALESCE(SUM(fa.cliques_no_link), 0)::bigint AS clicks
           FROM rastreio_whats.facebook_ads AS fa
           WHERE (fa.{col} IS NOT NULL AND TRIM(fa.{col}) <> '')"#,
        col = name_column
    ));
    if let Some(from) = date_from {
        qb.push(" AND fa.data >= ");
        qb.push_bind(from.to_string());
        qb.push("::date");
    }
    if let Some(to) = date_to {
        qb.push(" AND fa.data <= ");
        qb.push_bind(to.to_string());
        qb.push("::date");
    }
    qb.push(format!(
        " GROUP BY fa.{col} ORDER BY spend DESC NULLS LAST, name",
        col = name_column
    ));

    qb.build_query_as().fetch_all(db).await
}

/// GET /insights/detail?level=...&id=...
///
/// Single-item aggregate for the modal. The per-item insight table left
/// this service together with the old warehouse, so the shape is served
/// with zeroed measures.
pub async fn insights_detail(
    Query(params): Query<InsightsQuery>,
) -> Result<Json<Value>, AppError> {
    let level = params
        .level
        .as_deref()
        .unwrap_or("campaign")
        .trim()
        .to_lowercase();
    let id = params
        .id
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing id.".to_string()))?;

    Ok(Json(json!({
        "level": level,
        "id": id,
        "spend": 0,
        "impressions": 0,
        "clicks": 0,
        "leads": 0,
        "conversions": 0,
        "date_from": params.date_from,
        "date_to": params.date_to,
    })))
}

/// GET /budget
///
/// Ad-account budget from the Marketing API, converted from cents. The
/// "available" figure follows the derivation chain: manual override, spend
/// cap remainder, prepay wallet, raw balance.
pub async fn budget(State(state): State<Arc<AppState>>) -> Result<Json<BudgetResponse>, AppError> {
    let (token, account_id) = match (
        state.config.meta_access_token.as_deref(),
        state.config.meta_ad_account_id.as_deref(),
    ) {
        (Some(token), Some(account)) => (token, account),
        _ => {
            return Err(AppError::ConfigError(
                "Meta Ads credentials not configured (META_ACCESS_TOKEN, META_AD_ACCOUNT_ID)."
                    .to_string(),
            ))
        }
    };

    let client = MetaClient::new(state.config.graph_base.clone(), token.to_string())?;
    let raw = client.get_ad_account_budget(account_id).await?;

    let amount_spent = raw.amount_spent / 100.0;
    let balance = raw.balance.map(|v| v / 100.0);
    let spend_cap = raw.spend_cap.map(|v| v / 100.0);
    let funding = raw.funding_source_amount.map(|v| v / 100.0);
    let available = aggregates::available_balance(
        state.config.meta_available_balance_override,
        amount_spent,
        spend_cap,
        funding,
        balance,
    );

    Ok(Json(BudgetResponse {
        amount_spent,
        balance,
        spend_cap,
        currency: raw.currency,
        available,
    }))
}
