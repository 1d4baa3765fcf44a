//! Reconciliation math shared by the aggregation endpoints.
//!
//! Everything here is a pure function of already-fetched rows, so the
//! ranking and merge rules stay testable without a database.

use crate::models::{Champion, DailyPoint, InsightItem};
use std::collections::BTreeMap;

/// Merges the per-day spend series (from ad-spend rows) with the per-day
/// lead counts (from the lead table) into one ascending series.
///
/// A date present in only one input keeps zero for the other measure; a day
/// without leads has no cost per lead.
pub fn merge_daily(spend_rows: &[(String, f64)], lead_rows: &[(String, i64)]) -> Vec<DailyPoint> {
    let mut by_date: BTreeMap<String, (f64, i64)> = BTreeMap::new();
    for (date, spend) in spend_rows {
        let entry = by_date.entry(date.clone()).or_insert((0.0, 0));
        entry.0 = *spend;
    }
    for (date, leads) in lead_rows {
        let entry = by_date.entry(date.clone()).or_insert((0.0, 0));
        entry.1 = *leads;
    }

    by_date
        .into_iter()
        .map(|(date, (spend, leads))| DailyPoint {
            date,
            spend,
            leads,
            cpl: cost_per_lead(spend, leads),
        })
        .collect()
}

/// spend / leads when the day produced leads, else nothing.
pub fn cost_per_lead(spend: f64, leads: i64) -> Option<f64> {
    (leads > 0).then(|| spend / leads as f64)
}

/// spend / actions when there were actions, else zero (the dashboard card
/// shows R$ 0,00 rather than a blank).
pub fn cost_per_result(spend: f64, actions: i64) -> f64 {
    if actions > 0 {
        spend / actions as f64
    } else {
        0.0
    }
}

/// Picks the champion group: lowest cost per lead among groups with at
/// least one attributed lead; ties go to the higher lead count. Returns
/// nothing when no group qualifies.
pub fn champion(items: &[InsightItem]) -> Option<Champion> {
    items
        .iter()
        .filter(|item| item.quantidade > 0)
        .map(|item| (item, item.spend / item.quantidade as f64))
        .min_by(|(a, cpl_a), (b, cpl_b)| {
            cpl_a
                .partial_cmp(cpl_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.quantidade.cmp(&a.quantidade))
        })
        .map(|(item, cpl)| Champion {
            name: item.name.clone(),
            cpl,
            quantidade: item.quantidade,
            spend: item.spend,
        })
}

/// Lookback clamp for GET /metrics/daily: 1..=365, default 90, garbage
/// falls back to the default.
pub fn clamp_days(raw: Option<&str>) -> i32 {
    let parsed = raw.and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(90);
    parsed.clamp(1, 365) as i32
}

/// Derives the "available balance" shown by the dashboard, in currency
/// units. Priority: manual override, then what remains under the spend cap,
/// then the prepay wallet amount, then the raw balance. The raw `balance`
/// field is "amount due", not available credit; it is only the last resort.
pub fn available_balance(
    override_value: Option<f64>,
    amount_spent: f64,
    spend_cap: Option<f64>,
    funding_source_amount: Option<f64>,
    balance: Option<f64>,
) -> Option<f64> {
    if let Some(v) = override_value {
        return Some(v);
    }
    let remaining_from_cap = spend_cap
        .filter(|cap| *cap > 0.0)
        .map(|cap| (cap - amount_spent).max(0.0));
    remaining_from_cap.or(funding_source_amount).or(balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, spend: f64, quantidade: i64) -> InsightItem {
        InsightItem {
            id: name.to_string(),
            name: name.to_string(),
            quantidade,
            spend,
            impressions: 0,
            clicks: 0,
        }
    }

    #[test]
    fn merge_combines_spend_only_and_leads_only_days() {
        let spend = vec![
            ("2024-05-01".to_string(), 100.0),
            ("2024-05-02".to_string(), 50.0),
        ];
        let leads = vec![
            ("2024-05-02".to_string(), 5),
            ("2024-05-03".to_string(), 2),
        ];

        let daily = merge_daily(&spend, &leads);
        assert_eq!(daily.len(), 3);
        assert_eq!(daily[0].date, "2024-05-01");
        assert_eq!(daily[0].spend, 100.0);
        assert_eq!(daily[0].leads, 0);
        assert_eq!(daily[0].cpl, None);
        assert_eq!(daily[1].spend, 50.0);
        assert_eq!(daily[1].leads, 5);
        assert_eq!(daily[1].cpl, Some(10.0));
        assert_eq!(daily[2].spend, 0.0);
        assert_eq!(daily[2].leads, 2);
        assert_eq!(daily[2].cpl, None);
    }

    #[test]
    fn merge_output_is_sorted_ascending() {
        let spend = vec![
            ("2024-05-03".to_string(), 1.0),
            ("2024-05-01".to_string(), 2.0),
        ];
        let daily = merge_daily(&spend, &[]);
        assert_eq!(daily[0].date, "2024-05-01");
        assert_eq!(daily[1].date, "2024-05-03");
    }

    #[test]
    fn champion_picks_lowest_cpl() {
        let items = vec![item("A", 100.0, 10), item("B", 40.0, 8)];
        let champ = champion(&items).unwrap();
        assert_eq!(champ.name, "B");
        assert_eq!(champ.cpl, 5.0);
    }

    #[test]
    fn champion_tie_goes_to_higher_quantity() {
        let items = vec![item("A", 50.0, 5), item("B", 100.0, 10)];
        // Both CPL = 10; B has more leads.
        let champ = champion(&items).unwrap();
        assert_eq!(champ.name, "B");
    }

    #[test]
    fn champion_requires_at_least_one_lead() {
        let items = vec![item("A", 100.0, 0), item("B", 50.0, 0)];
        assert!(champion(&items).is_none());
        assert!(champion(&[]).is_none());
    }

    #[test]
    fn days_are_clamped() {
        assert_eq!(clamp_days(Some("400")), 365);
        assert_eq!(clamp_days(Some("0")), 1);
        assert_eq!(clamp_days(Some("-5")), 1);
        assert_eq!(clamp_days(Some("abc")), 90);
        assert_eq!(clamp_days(None), 90);
        assert_eq!(clamp_days(Some("30")), 30);
    }

    #[test]
    fn cost_per_result_is_zero_without_actions() {
        assert_eq!(cost_per_result(100.0, 0), 0.0);
        assert_eq!(cost_per_result(100.0, 4), 25.0);
    }

    #[test]
    fn available_balance_fallback_chain() {
        // Override wins over everything.
        assert_eq!(
            available_balance(Some(3025.0), 320.0, Some(500.0), Some(90.0), Some(12.0)),
            Some(3025.0)
        );
        // Spend cap remainder.
        assert_eq!(
            available_balance(None, 320.0, Some(500.0), Some(90.0), Some(12.0)),
            Some(180.0)
        );
        // Overspent caps clamp at zero rather than going negative.
        assert_eq!(
            available_balance(None, 600.0, Some(500.0), None, None),
            Some(0.0)
        );
        // Zero cap means "no cap": fall through to the wallet.
        assert_eq!(
            available_balance(None, 320.0, Some(0.0), Some(90.0), Some(12.0)),
            Some(90.0)
        );
        // Then the raw balance, then nothing.
        assert_eq!(available_balance(None, 320.0, None, None, Some(12.0)), Some(12.0));
        assert_eq!(available_balance(None, 320.0, None, None, None), None);
    }
}
