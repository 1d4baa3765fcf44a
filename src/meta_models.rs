use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a Graph API `actions` array.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetaAction {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// One day-granular insight row at campaign, ad-set or ad level.
///
/// Every numeric field arrives as a string; the `actions` array mixes
/// counters and monetary values keyed by `action_type`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetaInsightRow {
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub campaign_name: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub adset_name: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub ad_name: Option<String>,
    #[serde(default)]
    pub publisher_platform: Option<String>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_stop: Option<String>,
    #[serde(default)]
    pub spend: Option<String>,
    #[serde(default)]
    pub impressions: Option<String>,
    #[serde(default)]
    pub clicks: Option<String>,
    #[serde(default)]
    pub actions: Option<Vec<MetaAction>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaCampaign {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub status: String,
    pub objective: Option<String>,
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaAdSet {
    pub id: String,
    pub campaign_id: String,
    pub account_id: String,
    pub name: String,
    pub status: String,
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaAd {
    pub id: String,
    pub ad_set_id: String,
    pub campaign_id: String,
    pub account_id: String,
    pub name: String,
    pub status: String,
    pub created_time: Option<String>,
}

/// Generic Graph API listing page.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub paging: Option<GraphPaging>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphPaging {
    #[serde(default)]
    pub next: Option<String>,
}

/// Error envelope the Graph API attaches to non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphErrorBody {
    #[serde(default)]
    pub error: Option<GraphApiError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphApiError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub fbtrace_id: Option<String>,
}

/// Raw ad-account fields; monetary values in minor currency units (cents).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaAdAccountRaw {
    #[serde(default)]
    pub amount_spent: Option<String>,
    #[serde(default)]
    pub balance: Option<String>,
    #[serde(default)]
    pub spend_cap: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub is_prepay_account: Option<bool>,
    #[serde(default)]
    pub funding_source_details: Option<Value>,
}

/// Parsed ad-account budget, still in cents; the budget endpoint divides by
/// 100 for display.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaAdAccountBudget {
    pub amount_spent: f64,
    pub balance: Option<f64>,
    pub spend_cap: Option<f64>,
    pub currency: String,
    pub is_prepay_account: bool,
    pub funding_source_amount: Option<f64>,
}

impl From<MetaAdAccountRaw> for MetaAdAccountBudget {
    fn from(raw: MetaAdAccountRaw) -> Self {
        let to_num = |v: &Option<String>| -> f64 {
            v.as_deref()
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        let to_num_or_null = |v: &Option<String>| -> Option<f64> {
            v.as_deref()
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse::<f64>().ok())
        };
        let funding_source_amount = raw
            .funding_source_details
            .as_ref()
            .and_then(parse_funding_source_amount);
        Self {
            amount_spent: to_num(&raw.amount_spent),
            balance: to_num_or_null(&raw.balance),
            spend_cap: to_num_or_null(&raw.spend_cap),
            currency: raw.currency.unwrap_or_else(|| "BRL".to_string()),
            is_prepay_account: raw.is_prepay_account == Some(true),
            funding_source_amount,
        }
    }
}

/// Extracts the wallet amount (cents) from `funding_source_details`, which
/// the API returns as an object or an array of objects. TYPE 2 is
/// FACEBOOK_WALLET and TYPE 20 is STORED_BALANCE; other funding types carry
/// no usable balance.
pub fn parse_funding_source_amount(details: &Value) -> Option<f64> {
    let items: Vec<&Value> = match details {
        Value::Array(arr) => arr.iter().collect(),
        Value::Object(_) => vec![details],
        _ => return None,
    };

    for item in items {
        let type_value = item
            .get("TYPE")
            .or_else(|| item.get("type"))
            .and_then(value_as_f64);
        if type_value != Some(2.0) && type_value != Some(20.0) {
            continue;
        }

        if let Some(amount) = item
            .get("AMOUNT")
            .or_else(|| item.get("amount"))
            .and_then(value_as_f64)
        {
            return Some(amount);
        }

        let display = item
            .get("DISPLAY_AMOUNT")
            .or_else(|| item.get("display_amount"))
            .and_then(Value::as_str);
        if let Some(reais) = display.and_then(parse_display_amount) {
            return Some((reais * 100.0).round());
        }
    }
    None
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Parses a localized display amount ("R$ 1.234,56" or "$1,234.56") into
/// currency units. A trailing comma-decimal marks the pt-BR form.
fn parse_display_amount(display: &str) -> Option<f64> {
    let compact: String = display
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();
    if compact.is_empty() {
        return None;
    }
    let ptbr = regex::Regex::new(r",\d{1,2}$").expect("static regex");
    let normalized = if ptbr.is_match(&compact) {
        compact.replace('.', "").replace(',', ".")
    } else {
        compact.replace(',', "")
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Lead count: the action tagged exactly `lead`, zero when absent.
pub fn lead_count(actions: Option<&[MetaAction]>) -> i64 {
    let Some(actions) = actions else { return 0 };
    actions
        .iter()
        .find(|a| action_type_lower(a) == "lead")
        .and_then(|a| a.value.as_deref())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
}

/// Conversion value: the first action whose tag mentions purchase.
pub fn conversion_value(actions: Option<&[MetaAction]>) -> f64 {
    let Some(actions) = actions else { return 0.0 };
    actions
        .iter()
        .find(|a| {
            let t = action_type_lower(a);
            t.contains("purchase") || t.contains("omni_purchase")
        })
        .and_then(|a| a.value.as_deref())
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// "Conversation started" tags the platform has used over time; summed so a
/// taxonomy rename upstream does not zero the counter.
const CONVERSATION_ACTION_TYPES: [&str; 4] = [
    "onsite_conversion.messaging_conversation_started_7d",
    "messaging_conversation_started_7d",
    "onsite_conversion.messaging_conversation_started",
    "messaging_conversation_started",
];

pub fn messaging_conversations(actions: Option<&[MetaAction]>) -> i64 {
    let Some(actions) = actions else { return 0 };
    actions
        .iter()
        .filter(|a| CONVERSATION_ACTION_TYPES.contains(&action_type_lower(a).as_str()))
        .filter_map(|a| a.value.as_deref())
        .filter_map(|v| v.parse::<i64>().ok())
        .sum()
}

fn action_type_lower(action: &MetaAction) -> String {
    action
        .action_type
        .as_deref()
        .unwrap_or_default()
        .to_lowercase()
}

/// DB-ready shape of one insight row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NormalizedInsight {
    pub campaign_id: String,
    pub ad_set_id: String,
    pub ad_id: String,
    pub metric_date: String,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub leads: i64,
    pub whatsapp_conversations: i64,
    pub conversions: f64,
}

/// Per-date totals across all normalized rows.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyTotal {
    pub metric_date: String,
    pub spend: f64,
    pub leads: i64,
    pub impressions: i64,
    pub clicks: i64,
}

/// Coerces raw insight rows and accumulates daily totals. Rows without a
/// campaign id or date are skipped.
pub fn normalize_insights(rows: &[MetaInsightRow]) -> (Vec<NormalizedInsight>, Vec<DailyTotal>) {
    let mut insights = Vec::new();
    let mut by_date: std::collections::BTreeMap<String, (f64, i64, i64, i64)> =
        std::collections::BTreeMap::new();

    for row in rows {
        let campaign_id = row
            .campaign_id
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        let metric_date: String = row
            .date_start
            .as_deref()
            .or(row.date_stop.as_deref())
            .unwrap_or_default()
            .chars()
            .take(10)
            .collect();
        if campaign_id.is_empty() || metric_date.is_empty() {
            continue;
        }

        let spend = row
            .spend
            .as_deref()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        let impressions = row
            .impressions
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let clicks = row
            .clicks
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let leads = lead_count(row.actions.as_deref());

        insights.push(NormalizedInsight {
            campaign_id: campaign_id.to_string(),
            ad_set_id: row.adset_id.as_deref().map(str::trim).unwrap_or_default().to_string(),
            ad_id: row.ad_id.as_deref().map(str::trim).unwrap_or_default().to_string(),
            metric_date: metric_date.clone(),
            spend,
            impressions,
            clicks,
            leads,
            whatsapp_conversations: messaging_conversations(row.actions.as_deref()),
            conversions: conversion_value(row.actions.as_deref()),
        });

        let totals = by_date.entry(metric_date).or_insert((0.0, 0, 0, 0));
        totals.0 += spend;
        totals.1 += leads;
        totals.2 += impressions;
        totals.3 += clicks;
    }

    let daily_totals = by_date
        .into_iter()
        .map(|(metric_date, (spend, leads, impressions, clicks))| DailyTotal {
            metric_date,
            spend,
            leads,
            impressions,
            clicks,
        })
        .collect();

    (insights, daily_totals)
}

/// Graph account paths want the `act_` prefix exactly once.
pub fn ensure_act_prefix(account_id: &str) -> String {
    let trimmed = account_id.trim();
    if trimmed.starts_with("act_") {
        trimmed.to_string()
    } else {
        format!("act_{}", trimmed)
    }
}
