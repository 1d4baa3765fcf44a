use crate::errors::AppError;
use crate::meta_models::*;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Upstream error code the Graph API uses for application-level throttling.
const RATE_LIMIT_CODE: i64 = 613;

/// Client for the Meta Marketing / Graph API.
///
/// Holds no state besides the access token; every read paginates to
/// exhaustion and returns the accumulated rows. Failures map to a single
/// [`AppError::ExternalApiError`] carrying the upstream message; 401/403 and
/// rate limits are only distinguished in the logs, never retried.
#[derive(Clone)]
pub struct MetaClient {
    client: Client,
    graph_base: String,
    access_token: String,
}

impl MetaClient {
    /// # Arguments
    ///
    /// * `graph_base` - Graph API base URL (overridable for tests).
    /// * `access_token` - The Marketing API access token.
    pub fn new(graph_base: String, access_token: String) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Meta client: {}", e))
            })?;

        Ok(Self {
            client,
            graph_base: graph_base.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    /// Single GET against the Graph API. `params` are appended to the query
    /// string next to the access token.
    pub async fn graph_get(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, AppError> {
        let mut query: Vec<(&str, &str)> = vec![("access_token", self.access_token.as_str())];
        query.extend(params.iter().filter(|(_, v)| !v.is_empty()));
        let url = Url::parse_with_params(&format!("{}{}", self.graph_base, path), &query)
            .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;
        self.fetch_json(url).await
    }

    /// Fetches a URL and maps the Graph error envelope. The access token is
    /// never logged.
    async fn fetch_json(&self, url: Url) -> Result<Value, AppError> {
        let path = url.path().to_string();
        tracing::debug!("Graph API GET {} (token redacted)", path);

        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::ExternalApiError(format!("Graph API request failed: {}", e))
        })?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Graph API response: {}", e))
        })?;

        let api_error = serde_json::from_value::<GraphErrorBody>(body.clone())
            .unwrap_or_default()
            .error;

        if !status.is_success() {
            let message = api_error
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                tracing::error!("Graph API token or permission error on {}: {}", path, message);
            }
            if status == StatusCode::TOO_MANY_REQUESTS
                || api_error.as_ref().and_then(|e| e.code) == Some(RATE_LIMIT_CODE)
            {
                tracing::error!("Graph API rate limit exceeded on {}: {}", path, message);
            }
            return Err(AppError::ExternalApiError(message));
        }

        // Some deployments tunnel errors inside a 200 body.
        if let Some(err) = api_error {
            return Err(AppError::ExternalApiError(
                err.message.unwrap_or_else(|| "Graph API error".to_string()),
            ));
        }

        Ok(body)
    }

    /// Follows `paging.next` until exhausted, accumulating every page's
    /// `data` into one vector. No streaming; callers get the full edge.
    async fn graph_get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, AppError> {
        let first = self.graph_get(path, params).await?;
        let mut page: GraphPage<T> = serde_json::from_value(first).map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Graph API page: {}", e))
        })?;

        let mut acc = Vec::new();
        acc.append(&mut page.data);
        let mut next = page.paging.and_then(|p| p.next);

        while let Some(next_url) = next {
            let url = Url::parse(&next_url)
                .map_err(|e| AppError::ExternalApiError(format!("Bad paging URL: {}", e)))?;
            let body = self.fetch_json(url).await?;
            let mut page: GraphPage<T> = serde_json::from_value(body).map_err(|e| {
                AppError::ExternalApiError(format!("Failed to parse Graph API page: {}", e))
            })?;
            acc.append(&mut page.data);
            next = page.paging.and_then(|p| p.next);
        }

        Ok(acc)
    }

    /// Ad account budget fields, in cents.
    ///
    /// `funding_source_details` needs the MANAGE permission; when the first
    /// call is rejected the request is retried once without that field so a
    /// read-only token still gets spend/cap/balance.
    pub async fn get_ad_account_budget(
        &self,
        ad_account_id: &str,
    ) -> Result<MetaAdAccountBudget, AppError> {
        let act_id = ensure_act_prefix(ad_account_id);
        let path = format!("/{}", act_id);
        let fields_base = "amount_spent,balance,spend_cap,currency,is_prepay_account";
        let fields_with_funding = format!(
            "{},funding_source_details{{AMOUNT,TYPE,DISPLAY_AMOUNT}}",
            fields_base
        );

        let raw = match self
            .graph_get(&path, &[("fields", fields_with_funding.as_str())])
            .await
        {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    "Budget fetch with funding_source_details failed ({}), retrying without",
                    e
                );
                self.graph_get(&path, &[("fields", fields_base)]).await?
            }
        };

        let raw: MetaAdAccountRaw = serde_json::from_value(raw).map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse ad account response: {}", e))
        })?;
        Ok(MetaAdAccountBudget::from(raw))
    }

    /// Lists campaigns for an ad account.
    pub async fn get_campaigns(&self, ad_account_id: &str) -> Result<Vec<MetaCampaign>, AppError> {
        let act_id = ensure_act_prefix(ad_account_id);
        let raw: Vec<CampaignItem> = self
            .graph_get_all(
                &format!("/{}/campaigns", act_id),
                &[("fields", "id,name,status,objective,created_time")],
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|c| MetaCampaign {
                id: c.id,
                account_id: act_id.clone(),
                name: c.name.unwrap_or_default(),
                status: c.status.unwrap_or_else(|| "UNKNOWN".to_string()),
                objective: c.objective,
                created_time: c.created_time,
            })
            .collect())
    }

    /// Lists ad sets for an ad account.
    pub async fn get_ad_sets(&self, ad_account_id: &str) -> Result<Vec<MetaAdSet>, AppError> {
        let act_id = ensure_act_prefix(ad_account_id);
        let raw: Vec<AdSetItem> = self
            .graph_get_all(
                &format!("/{}/adsets", act_id),
                &[("fields", "id,name,status,campaign_id,created_time")],
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|a| MetaAdSet {
                id: a.id,
                campaign_id: a.campaign_id.unwrap_or_default(),
                account_id: act_id.clone(),
                name: a.name.unwrap_or_default(),
                status: a.status.unwrap_or_else(|| "UNKNOWN".to_string()),
                created_time: a.created_time,
            })
            .collect())
    }

    /// Lists ads for an ad account.
    pub async fn get_ads(&self, ad_account_id: &str) -> Result<Vec<MetaAd>, AppError> {
        let act_id = ensure_act_prefix(ad_account_id);
        let raw: Vec<AdItem> = self
            .graph_get_all(
                &format!("/{}/ads", act_id),
                &[("fields", "id,name,status,adset_id,campaign_id,created_time")],
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|a| MetaAd {
                id: a.id,
                ad_set_id: a.adset_id.unwrap_or_default(),
                campaign_id: a.campaign_id.unwrap_or_default(),
                account_id: act_id.clone(),
                name: a.name.unwrap_or_default(),
                status: a.status.unwrap_or_else(|| "UNKNOWN".to_string()),
                created_time: a.created_time,
            })
            .collect())
    }

    /// Campaign-level insights, one row per campaign per day.
    pub async fn get_campaign_insights(
        &self,
        ad_account_id: &str,
        since: &str,
        until: &str,
    ) -> Result<Vec<MetaInsightRow>, AppError> {
        let rows = self
            .insights(
                ad_account_id,
                "campaign",
                "campaign_id,campaign_name,date_start,date_stop,spend,impressions,clicks,actions",
                None,
                since,
                until,
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.campaign_id.is_some() && r.date_start.is_some())
            .collect())
    }

    /// Ad-set-level insights, one row per ad set per day.
    pub async fn get_ad_set_insights(
        &self,
        ad_account_id: &str,
        since: &str,
        until: &str,
    ) -> Result<Vec<MetaInsightRow>, AppError> {
        let rows = self
            .insights(
                ad_account_id,
                "adset",
                "campaign_id,adset_id,adset_name,date_start,date_stop,spend,impressions,clicks,actions",
                None,
                since,
                until,
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.adset_id.is_some() && r.date_start.is_some())
            .collect())
    }

    /// Ad-level insights, one row per ad per day.
    pub async fn get_ad_insights(
        &self,
        ad_account_id: &str,
        since: &str,
        until: &str,
    ) -> Result<Vec<MetaInsightRow>, AppError> {
        let rows = self
            .insights(
                ad_account_id,
                "ad",
                "campaign_id,adset_id,ad_id,ad_name,date_start,date_stop,spend,impressions,clicks,actions",
                None,
                since,
                until,
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.ad_id.is_some() && r.date_start.is_some())
            .collect())
    }

    /// Campaign insights broken down by publisher platform.
    pub async fn get_platform_insights(
        &self,
        ad_account_id: &str,
        since: &str,
        until: &str,
    ) -> Result<Vec<MetaInsightRow>, AppError> {
        let rows = self
            .insights(
                ad_account_id,
                "campaign",
                "campaign_id,date_start,date_stop,spend,impressions,clicks,actions",
                Some("publisher_platform"),
                since,
                until,
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.publisher_platform.is_some() && r.date_start.is_some())
            .collect())
    }

    async fn insights(
        &self,
        ad_account_id: &str,
        level: &str,
        fields: &str,
        breakdowns: Option<&str>,
        since: &str,
        until: &str,
    ) -> Result<Vec<MetaInsightRow>, AppError> {
        let act_id = ensure_act_prefix(ad_account_id);
        let time_range = serde_json::json!({"since": since, "until": until}).to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("level", level),
            ("time_increment", "1"),
            ("time_range", time_range.as_str()),
            ("fields", fields),
        ];
        if let Some(b) = breakdowns {
            params.push(("breakdowns", b));
        }
        self.graph_get_all(&format!("/{}/insights", act_id), &params)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct CampaignItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    objective: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdSetItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    adset_id: Option<String>,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
}
