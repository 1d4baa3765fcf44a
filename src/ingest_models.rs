use serde::Serialize;
use serde_json::Value;

/// One canonical ingestion record, produced by [`normalize_record`].
///
/// Field coercion mirrors what the n8n flows already rely on: numbers may
/// arrive as JSON numbers or numeric strings, and missing measures mean zero.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalRecord {
    pub source: String,
    pub metric_date: String,
    pub platform: String,
    pub spend: f64,
    pub leads: f64,
    pub opportunities: f64,
    pub sales_count: f64,
    pub revenue: f64,
    pub utm_breakdown: Vec<UtmEntry>,
    pub lead_messages: Vec<LeadMessage>,
}

/// Per-campaign lead count attached to a record.
#[derive(Debug, Clone, Serialize)]
pub struct UtmEntry {
    pub utm_campaign: String,
    pub leads: f64,
}

/// One inbound lead/message event attached to a record.
#[derive(Debug, Clone, Serialize)]
pub struct LeadMessage {
    pub lead_name: String,
    pub message_at: String,
    pub ad_creative: Option<String>,
    pub campaign_name: Option<String>,
    pub audience: Option<String>,
}

/// Labeled normalization failure. The whole batch is rejected on the first
/// one; nothing reaches the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeError(pub String);

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NormalizeError {}

/// Splits the request body into raw records: a bare array, an object
/// wrapping an array under `records`, or a single record object.
pub fn raw_records(body: &Value) -> Vec<Value> {
    if let Value::Array(items) = body {
        return items.clone();
    }
    if let Some(Value::Array(items)) = body.get("records") {
        return items.clone();
    }
    vec![body.clone()]
}

/// Coerces a measure field to a finite number. Absent and null mean zero;
/// numeric strings are parsed; anything else is a labeled hard failure.
pub fn normalize_number(value: Option<&Value>, field: &str) -> Result<f64, NormalizeError> {
    let invalid = || NormalizeError(format!("Invalid number for {}.", field));
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()).ok_or_else(invalid),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(invalid)
        }
        Some(_) => Err(invalid()),
    }
}

fn trimmed_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

fn is_metric_date(raw: &str) -> bool {
    // YYYY-MM-DD shape plus calendar validity, so 2024-13-40 never reaches
    // the date column.
    let re = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex");
    re.is_match(raw) && chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

/// Validates and coerces one raw record into its canonical shape.
pub fn normalize_record(record: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let Value::Object(_) = record else {
        return Err(NormalizeError("Record must be an object.".to_string()));
    };

    let metric_date = record
        .get("metric_date")
        .and_then(Value::as_str)
        .filter(|d| is_metric_date(d))
        .ok_or_else(|| NormalizeError("metric_date must be in YYYY-MM-DD format.".to_string()))?
        .to_string();

    let platform = trimmed_string(record.get("platform"))
        .ok_or_else(|| NormalizeError("platform is required.".to_string()))?;

    let source = trimmed_string(record.get("source")).unwrap_or_else(|| "unknown".to_string());

    let utm_breakdown = match record.get("utm_breakdown") {
        Some(Value::Array(items)) => normalize_utm_entries(items)?,
        _ => Vec::new(),
    };

    let lead_messages = match record.get("lead_messages") {
        Some(Value::Array(items)) => normalize_lead_messages(items),
        _ => Vec::new(),
    };

    Ok(CanonicalRecord {
        source,
        metric_date,
        platform,
        spend: normalize_number(record.get("spend"), "spend")?,
        leads: normalize_number(record.get("leads"), "leads")?,
        opportunities: normalize_number(record.get("opportunities"), "opportunities")?,
        sales_count: normalize_number(record.get("sales_count"), "sales_count")?,
        revenue: normalize_number(record.get("revenue"), "revenue")?,
        utm_breakdown,
        lead_messages,
    })
}

/// Entries without a non-blank campaign name are dropped silently; a bad
/// leads value is a hard failure for the whole batch.
fn normalize_utm_entries(items: &[Value]) -> Result<Vec<UtmEntry>, NormalizeError> {
    let mut entries = Vec::new();
    for item in items {
        let Some(utm_campaign) = trimmed_string(item.get("utm_campaign")) else {
            continue;
        };
        entries.push(UtmEntry {
            utm_campaign,
            leads: normalize_number(item.get("leads"), "utm_breakdown.leads")?,
        });
    }
    Ok(entries)
}

/// Entries missing a non-blank lead_name or message_at are dropped silently.
fn normalize_lead_messages(items: &[Value]) -> Vec<LeadMessage> {
    items
        .iter()
        .filter_map(|item| {
            let lead_name = trimmed_string(item.get("lead_name"))?;
            let message_at = trimmed_string(item.get("message_at"))?;
            Some(LeadMessage {
                lead_name,
                message_at,
                ad_creative: trimmed_string(item.get("ad_creative")),
                campaign_name: trimmed_string(item.get("campaign_name")),
                audience: trimmed_string(item.get("audience")),
            })
        })
        .collect()
}

/// Normalizes the whole batch atomically: the first failing record rejects
/// every record.
pub fn normalize_batch(raw: &[Value]) -> Result<Vec<CanonicalRecord>, NormalizeError> {
    raw.iter().map(normalize_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_a_full_record() {
        let record = json!({
            "metric_date": "2024-05-01",
            "platform": "  meta ",
            "source": "n8n",
            "spend": "150.5",
            "leads": 3,
            "utm_breakdown": [
                {"utm_campaign": " promo ", "leads": "2"},
                {"utm_campaign": "   ", "leads": 99},
                {"leads": 1}
            ],
            "lead_messages": [
                {"lead_name": "Maria", "message_at": "2024-05-01T10:00:00Z", "campaign_name": " camp "},
                {"lead_name": "", "message_at": "2024-05-01T10:00:00Z"},
                {"lead_name": "Jo"}
            ]
        });

        let canonical = normalize_record(&record).unwrap();
        assert_eq!(canonical.platform, "meta");
        assert_eq!(canonical.source, "n8n");
        assert_eq!(canonical.spend, 150.5);
        assert_eq!(canonical.leads, 3.0);
        assert_eq!(canonical.opportunities, 0.0);
        assert_eq!(canonical.utm_breakdown.len(), 1);
        assert_eq!(canonical.utm_breakdown[0].utm_campaign, "promo");
        assert_eq!(canonical.utm_breakdown[0].leads, 2.0);
        assert_eq!(canonical.lead_messages.len(), 1);
        assert_eq!(canonical.lead_messages[0].campaign_name.as_deref(), Some("camp"));
        assert_eq!(canonical.lead_messages[0].ad_creative, None);
    }

    #[test]
    fn rejects_bad_metric_dates() {
        for bad in ["2024-5-1", "abc", "2024/05/01", "2024-13-40", ""] {
            let record = json!({"metric_date": bad, "platform": "meta"});
            let err = normalize_record(&record).unwrap_err();
            assert_eq!(err.0, "metric_date must be in YYYY-MM-DD format.");
        }
        let missing = json!({"platform": "meta"});
        assert!(normalize_record(&missing).is_err());
    }

    #[test]
    fn rejects_blank_platform() {
        let record = json!({"metric_date": "2024-05-01", "platform": "   "});
        let err = normalize_record(&record).unwrap_err();
        assert_eq!(err.0, "platform is required.");
    }

    #[test]
    fn blank_source_defaults_to_unknown() {
        let record = json!({"metric_date": "2024-05-01", "platform": "meta", "source": " "});
        assert_eq!(normalize_record(&record).unwrap().source, "unknown");
    }

    #[test]
    fn labels_the_failing_numeric_field() {
        let record = json!({"metric_date": "2024-05-01", "platform": "meta", "revenue": "abc"});
        let err = normalize_record(&record).unwrap_err();
        assert_eq!(err.0, "Invalid number for revenue.");

        let record = json!({
            "metric_date": "2024-05-01",
            "platform": "meta",
            "utm_breakdown": [{"utm_campaign": "promo", "leads": {"nested": true}}]
        });
        let err = normalize_record(&record).unwrap_err();
        assert_eq!(err.0, "Invalid number for utm_breakdown.leads.");
    }

    #[test]
    fn batch_fails_atomically() {
        let batch = vec![
            json!({"metric_date": "2024-05-01", "platform": "meta"}),
            json!({"metric_date": "bad", "platform": "meta"}),
        ];
        assert!(normalize_batch(&batch).is_err());
    }

    #[test]
    fn raw_records_handles_all_wrappers() {
        let single = json!({"metric_date": "2024-05-01"});
        assert_eq!(raw_records(&single).len(), 1);

        let array = json!([{"a": 1}, {"b": 2}]);
        assert_eq!(raw_records(&array).len(), 2);

        let wrapped = json!({"records": [{"a": 1}, {"b": 2}, {"c": 3}]});
        assert_eq!(raw_records(&wrapped).len(), 3);
    }

    #[test]
    fn normalization_is_deterministic() {
        let record = json!({"metric_date": "2024-05-01", "platform": "meta", "spend": "1.5"});
        let a = serde_json::to_string(&normalize_record(&record).unwrap()).unwrap();
        let b = serde_json::to_string(&normalize_record(&record).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
