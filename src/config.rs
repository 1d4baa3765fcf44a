use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Shared secret for POST /ingest and POST /whatsapp/sync. Optional;
    /// when unset those endpoints accept unauthenticated calls.
    pub ingestion_api_key: Option<String>,
    pub meta_access_token: Option<String>,
    pub meta_ad_account_id: Option<String>,
    /// Manual override for the "available balance" card when the Ads API
    /// does not reflect the real wallet amount. Currency units, not cents.
    pub meta_available_balance_override: Option<f64>,
    pub whatsapp_business_account_id: Option<String>,
    pub whatsapp_phone_number_ids: Vec<String>,
    /// Graph API base URL. Only overridden in tests (wiremock).
    pub graph_base: String,
}

const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com/v21.0";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: database_url_from_env()?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            ingestion_api_key: optional_env("INGESTION_API_KEY"),
            meta_access_token: optional_env("META_ACCESS_TOKEN"),
            meta_ad_account_id: optional_env("META_AD_ACCOUNT_ID"),
            meta_available_balance_override: parse_balance_override(
                optional_env("META_AVAILABLE_BALANCE_OVERRIDE").as_deref(),
            )?,
            whatsapp_business_account_id: optional_env("WHATSAPP_BUSINESS_ACCOUNT_ID"),
            whatsapp_phone_number_ids: [
                optional_env("WHATSAPP_PHONE_NUMBER_ID_1"),
                optional_env("WHATSAPP_PHONE_NUMBER_ID_2"),
            ]
            .into_iter()
            .flatten()
            .collect(),
            graph_base: optional_env("GRAPH_API_BASE")
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE.to_string()),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Server Port: {}", config.port);
        if config.ingestion_api_key.is_none() {
            tracing::warn!("INGESTION_API_KEY not set; /ingest accepts unauthenticated calls");
        }
        if config.meta_access_token.is_none() {
            tracing::warn!("META_ACCESS_TOKEN not set; budget/sync endpoints will return 503");
        }
        tracing::debug!(
            "WhatsApp phone ids configured: {}",
            config.whatsapp_phone_number_ids.len()
        );

        Ok(config)
    }
}

/// Non-empty env var, trimmed. Blank values count as unset.
fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// DATABASE_URL wins; otherwise discrete DB_HOST/DB_PORT/DB_NAME/DB_USER/DB_PASSWORD
/// are assembled into a connection URL.
fn database_url_from_env() -> anyhow::Result<String> {
    if let Some(url) = optional_env("DATABASE_URL") {
        if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
            anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
        }
        return Ok(url);
    }

    let host = optional_env("DB_HOST");
    let name = optional_env("DB_NAME");
    let user = optional_env("DB_USER");
    let password = optional_env("DB_PASSWORD");
    let port = optional_env("DB_PORT").unwrap_or_else(|| "5432".to_string());

    match (host, name, user, password) {
        (Some(host), Some(name), Some(user), Some(password)) => Ok(format!(
            "postgresql://{}:{}@{}:{}/{}",
            user, password, host, port, name
        )),
        _ => anyhow::bail!(
            "database not configured: set DATABASE_URL or DB_HOST, DB_PORT, DB_NAME, DB_USER, DB_PASSWORD"
        ),
    }
}

/// Accepts "3025", "3025.50" and the pt-BR comma form "3025,50".
/// Negative or non-numeric values are rejected.
fn parse_balance_override(raw: Option<&str>) -> anyhow::Result<Option<f64>> {
    let Some(raw) = raw else { return Ok(None) };
    let parsed: f64 = raw
        .replace(',', ".")
        .parse()
        .map_err(|_| anyhow::anyhow!("META_AVAILABLE_BALANCE_OVERRIDE must be a number"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        anyhow::bail!("META_AVAILABLE_BALANCE_OVERRIDE must be a non-negative number");
    }
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_override_accepts_comma_decimals() {
        assert_eq!(
            parse_balance_override(Some("3025,50")).unwrap(),
            Some(3025.5)
        );
        assert_eq!(parse_balance_override(Some("3025")).unwrap(), Some(3025.0));
        assert_eq!(parse_balance_override(None).unwrap(), None);
    }

    #[test]
    fn balance_override_rejects_garbage() {
        assert!(parse_balance_override(Some("abc")).is_err());
        assert!(parse_balance_override(Some("-10")).is_err());
    }
}
