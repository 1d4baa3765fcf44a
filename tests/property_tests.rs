/// Property-based tests using proptest
/// Invariants of the identity hash, the record normalizer and the
/// aggregation helpers, for all inputs.
use proptest::prelude::*;
use rastreio_metrics_api::aggregates::{clamp_days, merge_daily};
use rastreio_metrics_api::identity::lead_key;
use rastreio_metrics_api::ingest_models::{normalize_number, normalize_record};
use serde_json::json;

// Property: the lead key is pure, fixed-width lowercase hex
proptest! {
    #[test]
    fn lead_key_never_panics(platform in "\\PC*", name in "\\PC*", at in "\\PC*") {
        let _ = lead_key(&platform, &name, &at);
    }

    #[test]
    fn lead_key_is_deterministic_hex(platform in "\\PC*", name in "\\PC*", at in "\\PC*") {
        let a = lead_key(&platform, &name, &at);
        let b = lead_key(&platform, &name, &at);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), 15);
        prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn lead_key_distinguishes_names(
        platform in "[a-z]{2,8}",
        name_a in "[A-Za-z ]{1,20}",
        name_b in "[A-Za-z ]{1,20}",
        at in "[0-9T:\\-Z]{10,25}"
    ) {
        prop_assume!(name_a != name_b);
        prop_assert_ne!(
            lead_key(&platform, &name_a, &at),
            lead_key(&platform, &name_b, &at)
        );
    }
}

// Property: numeric coercion accepts what it should and labels what it rejects
proptest! {
    #[test]
    fn normalize_number_roundtrips_finite_floats(v in -1.0e12f64..1.0e12f64) {
        let from_number = normalize_number(Some(&json!(v)), "spend").unwrap();
        prop_assert!((from_number - v).abs() < 1e-6_f64.max(v.abs() * 1e-12));

        let from_string = normalize_number(Some(&json!(v.to_string())), "spend").unwrap();
        prop_assert!((from_string - v).abs() < 1e-6_f64.max(v.abs() * 1e-12));
    }

    #[test]
    fn normalize_number_errors_carry_the_field_label(field in "[a-z_.]{1,20}") {
        let err = normalize_number(Some(&json!({"not": "a number"})), &field).unwrap_err();
        prop_assert_eq!(err.0, format!("Invalid number for {}.", field));
    }
}

// Property: normalization is deterministic and trims what it keeps
proptest! {
    #[test]
    fn normalize_record_is_deterministic(
        platform in "[a-zA-Z]{1,10}",
        source in "[a-z0-9_]{0,10}",
        spend in 0.0f64..100000.0,
        leads in 0u32..10000u32
    ) {
        let record = json!({
            "metric_date": "2024-05-01",
            "platform": platform,
            "source": source,
            "spend": spend,
            "leads": leads
        });
        let a = serde_json::to_string(&normalize_record(&record).unwrap()).unwrap();
        let b = serde_json::to_string(&normalize_record(&record).unwrap()).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn platform_is_always_trimmed(platform in "[a-zA-Z]{1,10}", pad_left in 0usize..4, pad_right in 0usize..4) {
        let padded = format!("{}{}{}", " ".repeat(pad_left), platform, " ".repeat(pad_right));
        let record = json!({"metric_date": "2024-05-01", "platform": padded});
        let canonical = normalize_record(&record).unwrap();
        prop_assert_eq!(canonical.platform, platform);
    }

    #[test]
    fn malformed_dates_always_fail(date in "[0-9/a-z]{0,12}") {
        prop_assume!(!regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap().is_match(&date));
        let record = json!({"metric_date": date, "platform": "meta"});
        prop_assert!(normalize_record(&record).is_err());
    }
}

// Property: the daily clamp always lands in 1..=365
proptest! {
    #[test]
    fn clamp_days_stays_in_bounds(raw in "\\PC*") {
        let days = clamp_days(Some(&raw));
        prop_assert!((1..=365).contains(&days));
    }

    #[test]
    fn clamp_days_is_identity_in_range(days in 1i32..=365) {
        prop_assert_eq!(clamp_days(Some(&days.to_string())), days);
    }
}

// Property: the daily merge covers the union of dates, sorted, with CPL
// only on days that have leads
proptest! {
    #[test]
    fn merge_daily_covers_union_sorted(
        spend_days in proptest::collection::btree_map(1u8..28, 0.0f64..1000.0, 0..10),
        lead_days in proptest::collection::btree_map(1u8..28, 1i64..100, 0..10)
    ) {
        let spend_rows: Vec<(String, f64)> = spend_days
            .iter()
            .map(|(d, s)| (format!("2024-05-{:02}", d), *s))
            .collect();
        let lead_rows: Vec<(String, i64)> = lead_days
            .iter()
            .map(|(d, l)| (format!("2024-05-{:02}", d), *l))
            .collect();

        let daily = merge_daily(&spend_rows, &lead_rows);

        let mut expected: std::collections::BTreeSet<String> = Default::default();
        expected.extend(spend_rows.iter().map(|(d, _)| d.clone()));
        expected.extend(lead_rows.iter().map(|(d, _)| d.clone()));
        prop_assert_eq!(daily.len(), expected.len());

        for window in daily.windows(2) {
            prop_assert!(window[0].date < window[1].date);
        }
        for point in &daily {
            if point.leads > 0 {
                prop_assert_eq!(point.cpl, Some(point.spend / point.leads as f64));
            } else {
                prop_assert_eq!(point.cpl, None);
            }
        }
    }
}
