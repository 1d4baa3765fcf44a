/// Integration tests with a mocked Graph API.
/// Exercise the Meta client end-to-end (URL building, pagination, error
/// mapping, budget fallback) without hitting the real platform.
use rastreio_metrics_api::meta_client::MetaClient;
use rastreio_metrics_api::meta_models::normalize_insights;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FIELDS_BASE: &str = "amount_spent,balance,spend_cap,currency,is_prepay_account";
const FIELDS_WITH_FUNDING: &str =
    "amount_spent,balance,spend_cap,currency,is_prepay_account,funding_source_details{AMOUNT,TYPE,DISPLAY_AMOUNT}";

fn client_for(mock_server: &MockServer) -> MetaClient {
    MetaClient::new(mock_server.uri(), "test_token".to_string()).unwrap()
}

#[tokio::test]
async fn budget_fetch_parses_cents() {
    let mock_server = MockServer::start().await;

    let body = serde_json::json!({
        "amount_spent": "32000",
        "balance": "1200",
        "spend_cap": "50000",
        "currency": "BRL",
        "is_prepay_account": false
    });

    Mock::given(method("GET"))
        .and(path("/act_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&mock_server)
        .await;

    let budget = client_for(&mock_server)
        .get_ad_account_budget("123")
        .await
        .unwrap();

    assert_eq!(budget.amount_spent, 32000.0);
    assert_eq!(budget.balance, Some(1200.0));
    assert_eq!(budget.spend_cap, Some(50000.0));
    assert_eq!(budget.currency, "BRL");
    assert_eq!(budget.funding_source_amount, None);
}

#[tokio::test]
async fn budget_retries_without_funding_field_on_permission_error() {
    let mock_server = MockServer::start().await;

    // Tokens without MANAGE get an OAuthException for funding_source_details.
    Mock::given(method("GET"))
        .and(path("/act_123"))
        .and(query_param("fields", FIELDS_WITH_FUNDING))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "message": "(#100) funding_source_details requires MANAGE permission",
                "type": "OAuthException",
                "code": 100
            }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/act_123"))
        .and(query_param("fields", FIELDS_BASE))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "amount_spent": "32000",
            "spend_cap": "50000",
            "currency": "BRL"
        })))
        .mount(&mock_server)
        .await;

    let budget = client_for(&mock_server)
        .get_ad_account_budget("123")
        .await
        .unwrap();

    assert_eq!(budget.amount_spent, 32000.0);
    assert_eq!(budget.spend_cap, Some(50000.0));
    assert_eq!(budget.funding_source_amount, None);
}

#[tokio::test]
async fn budget_reads_funding_source_wallet() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "amount_spent": "32000",
            "currency": "BRL",
            "is_prepay_account": true,
            "funding_source_details": { "TYPE": 2, "AMOUNT": "484200" }
        })))
        .mount(&mock_server)
        .await;

    let budget = client_for(&mock_server)
        .get_ad_account_budget("123")
        .await
        .unwrap();

    assert!(budget.is_prepay_account);
    assert_eq!(budget.funding_source_amount, Some(484200.0));
}

#[tokio::test]
async fn campaign_listing_follows_pagination() {
    let mock_server = MockServer::start().await;

    let next_url = format!(
        "{}/act_123/campaigns?after=cursor2&access_token=test_token",
        mock_server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/act_123/campaigns"))
        .and(query_param("after", "cursor2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "id": "c2", "name": "Campanha 2", "status": "PAUSED" }]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/act_123/campaigns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "id": "c1", "name": "Campanha 1", "status": "ACTIVE", "objective": "ENGAGEMENT" }],
            "paging": { "next": next_url }
        })))
        .mount(&mock_server)
        .await;

    let campaigns = client_for(&mock_server).get_campaigns("123").await.unwrap();

    assert_eq!(campaigns.len(), 2);
    assert_eq!(campaigns[0].id, "c1");
    assert_eq!(campaigns[0].account_id, "act_123");
    assert_eq!(campaigns[0].objective.as_deref(), Some("ENGAGEMENT"));
    assert_eq!(campaigns[1].id, "c2");
    assert_eq!(campaigns[1].status, "PAUSED");
}

#[tokio::test]
async fn ad_set_listing_follows_pagination() {
    let mock_server = MockServer::start().await;

    let next_url = format!(
        "{}/act_123/adsets?after=cursor2&access_token=test_token",
        mock_server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/act_123/adsets"))
        .and(query_param("after", "cursor2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "id": "as2", "name": "Conjunto 2", "status": "PAUSED", "campaign_id": "c1" }]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/act_123/adsets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "id": "as1", "name": "Conjunto 1", "status": "ACTIVE", "campaign_id": "c1" }],
            "paging": { "next": next_url }
        })))
        .mount(&mock_server)
        .await;

    let ad_sets = client_for(&mock_server).get_ad_sets("123").await.unwrap();

    assert_eq!(ad_sets.len(), 2);
    assert_eq!(ad_sets[0].id, "as1");
    assert_eq!(ad_sets[0].campaign_id, "c1");
    assert_eq!(ad_sets[0].account_id, "act_123");
    assert_eq!(ad_sets[1].id, "as2");
    assert_eq!(ad_sets[1].status, "PAUSED");
}

#[tokio::test]
async fn ad_listing_maps_missing_fields() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/ads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "id": "ad1",
                    "name": "Criativo 1",
                    "status": "ACTIVE",
                    "adset_id": "as1",
                    "campaign_id": "c1",
                    "created_time": "2024-04-01T00:00:00+0000"
                },
                { "id": "ad2" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let ads = client_for(&mock_server).get_ads("123").await.unwrap();

    assert_eq!(ads.len(), 2);
    assert_eq!(ads[0].ad_set_id, "as1");
    assert_eq!(ads[0].campaign_id, "c1");
    assert_eq!(ads[0].created_time.as_deref(), Some("2024-04-01T00:00:00+0000"));
    // Absent fields fall back rather than failing the page.
    assert_eq!(ads[1].ad_set_id, "");
    assert_eq!(ads[1].name, "");
    assert_eq!(ads[1].status, "UNKNOWN");
}

#[tokio::test]
async fn insight_rows_without_key_or_date_are_dropped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param("level", "campaign"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "campaign_id": "c1",
                    "campaign_name": "Campanha 1",
                    "date_start": "2024-05-01",
                    "date_stop": "2024-05-01",
                    "spend": "150.50",
                    "impressions": "1000",
                    "clicks": "40",
                    "actions": [
                        { "action_type": "lead", "value": "3" },
                        { "action_type": "onsite_conversion.messaging_conversation_started_7d", "value": "2" }
                    ]
                },
                { "campaign_name": "sem id", "date_start": "2024-05-01" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let rows = client_for(&mock_server)
        .get_campaign_insights("123", "2024-05-01", "2024-05-01")
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);

    let (insights, totals) = normalize_insights(&rows);
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].spend, 150.5);
    assert_eq!(insights[0].leads, 3);
    assert_eq!(insights[0].whatsapp_conversations, 2);
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].metric_date, "2024-05-01");
}

#[tokio::test]
async fn ad_set_insights_follow_pagination_and_normalize() {
    let mock_server = MockServer::start().await;

    let next_url = format!(
        "{}/act_123/insights?after=cursor2&access_token=test_token",
        mock_server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param("after", "cursor2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "campaign_id": "c1",
                    "adset_id": "as2",
                    "adset_name": "Conjunto 2",
                    "date_start": "2024-05-02",
                    "date_stop": "2024-05-02",
                    "spend": "20.00",
                    "actions": [{ "action_type": "lead", "value": "1" }]
                }
            ]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param("level", "adset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "campaign_id": "c1",
                    "adset_id": "as1",
                    "adset_name": "Conjunto 1",
                    "date_start": "2024-05-01",
                    "date_stop": "2024-05-01",
                    "spend": "30.00",
                    "impressions": "500",
                    "clicks": "12",
                    "actions": [{ "action_type": "lead", "value": "2" }]
                },
                { "campaign_id": "c1", "date_start": "2024-05-01" }
            ],
            "paging": { "next": next_url }
        })))
        .mount(&mock_server)
        .await;

    let rows = client_for(&mock_server)
        .get_ad_set_insights("123", "2024-05-01", "2024-05-02")
        .await
        .unwrap();

    // The row without an adset_id is dropped; both pages accumulate.
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].adset_id.as_deref(), Some("as1"));
    assert_eq!(rows[1].adset_id.as_deref(), Some("as2"));

    let (insights, totals) = normalize_insights(&rows);
    assert_eq!(insights.len(), 2);
    assert_eq!(insights[0].ad_set_id, "as1");
    assert_eq!(insights[0].leads, 2);
    assert_eq!(totals.len(), 2);
    assert_eq!(totals[0].spend, 30.0);
    assert_eq!(totals[1].spend, 20.0);
}

#[tokio::test]
async fn ad_insights_drop_rows_without_ad_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param("level", "ad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "campaign_id": "c1",
                    "adset_id": "as1",
                    "ad_id": "ad1",
                    "ad_name": "Criativo 1",
                    "date_start": "2024-05-01",
                    "date_stop": "2024-05-01",
                    "spend": "12.50",
                    "impressions": "300",
                    "clicks": "9",
                    "actions": [
                        { "action_type": "lead", "value": "1" },
                        { "action_type": "omni_purchase", "value": "99.90" }
                    ]
                },
                { "campaign_id": "c1", "adset_id": "as1", "date_start": "2024-05-01" },
                { "campaign_id": "c1", "adset_id": "as1", "ad_id": "ad2" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let rows = client_for(&mock_server)
        .get_ad_insights("123", "2024-05-01", "2024-05-01")
        .await
        .unwrap();

    // Rows missing ad_id or date_start are dropped.
    assert_eq!(rows.len(), 1);

    let (insights, _) = normalize_insights(&rows);
    assert_eq!(insights[0].ad_id, "ad1");
    assert_eq!(insights[0].ad_set_id, "as1");
    assert_eq!(insights[0].conversions, 99.90);
}

#[tokio::test]
async fn platform_insights_request_the_breakdown() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123/insights"))
        .and(query_param("level", "campaign"))
        .and(query_param("breakdowns", "publisher_platform"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "campaign_id": "c1",
                    "publisher_platform": "instagram",
                    "date_start": "2024-05-01",
                    "date_stop": "2024-05-01",
                    "spend": "40.00",
                    "actions": [
                        { "action_type": "messaging_conversation_started_7d", "value": "4" }
                    ]
                },
                { "campaign_id": "c1", "date_start": "2024-05-01", "spend": "1.00" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let rows = client_for(&mock_server)
        .get_platform_insights("123", "2024-05-01", "2024-05-01")
        .await
        .unwrap();

    // Rows without a publisher_platform are dropped.
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].publisher_platform.as_deref(), Some("instagram"));

    let (insights, _) = normalize_insights(&rows);
    assert_eq!(insights[0].spend, 40.0);
    assert_eq!(insights[0].whatsapp_conversations, 4);
}

#[tokio::test]
async fn upstream_error_message_is_passed_through() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/act_123"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {
                "message": "Invalid OAuth access token.",
                "type": "OAuthException",
                "code": 190
            }
        })))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server)
        .get_ad_account_budget("123")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Invalid OAuth access token."));
}

#[tokio::test]
async fn rate_limit_error_surfaces_without_retry() {
    let mock_server = MockServer::start().await;

    // expect(..=2): the budget fetch falls back once, never retries beyond.
    Mock::given(method("GET"))
        .and(path("/act_123"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {
                "message": "Application request limit reached",
                "code": 613
            }
        })))
        .expect(1..=2)
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server)
        .get_ad_account_budget("123")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Application request limit reached"));
}

#[tokio::test]
async fn concurrent_budget_requests() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "amount_spent": "100",
            "currency": "BRL"
        })))
        .mount(&mock_server)
        .await;

    let mut handles = vec![];
    for _ in 0..10 {
        let client = client_for(&mock_server);
        handles.push(tokio::spawn(async move {
            client.get_ad_account_budget("123").await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
}
