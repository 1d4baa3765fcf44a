use crate::errors::{AppError, ResultExt};
use crate::identity;
use crate::ingest_models::CanonicalRecord;
use crate::localtime;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Outcome of one ingestion batch.
#[derive(Debug)]
pub struct IngestOutcome {
    pub job_id: Uuid,
    pub metrics_upserted: usize,
    pub utm_upserted: usize,
    pub leads_upserted: usize,
}

/// Writes canonical ingestion batches into the rastreio_whats schema.
///
/// All writes for one batch happen inside a single transaction: the audit
/// row, the snapshot/UTM/lead upserts and the status transition either all
/// land or none do.
pub struct IngestStorage {
    pool: PgPool,
}

impl IngestStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persists one normalized batch.
    ///
    /// `raw_payload` is the pre-normalization request body; the audit row
    /// keeps it verbatim so a bad flow upstream can be replayed later.
    pub async fn ingest_batch(
        &self,
        records: &[CanonicalRecord],
        raw_payload: &Value,
    ) -> Result<IngestOutcome, AppError> {
        let source = records
            .first()
            .map(|r| r.source.as_str())
            .unwrap_or("unknown");
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open ingestion transaction")?;

        // Audit row first; every later write references this batch.
        let job_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO rastreio_whats.ingestion_jobs (source, payload, status)
            VALUES ($1, $2, 'received')
            RETURNING id
            "#,
        )
        .bind(source)
        .bind(raw_payload)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to insert ingestion_jobs row")?;

        let job_id = job_id.ok_or_else(|| {
            AppError::InternalError("Failed to insert ingestion_jobs row.".to_string())
        })?;

        let mut utm_upserted = 0;
        let mut leads_upserted = 0;

        for record in records {
            let metric_date = parse_metric_date(&record.metric_date)?;

            sqlx::query(
                r#"
                INSERT INTO rastreio_whats.metric_snapshots
                    (metric_date, platform, spend, leads, opportunities, sales_count, revenue, source, updated_at)
                VALUES ($1, $2, $3, ($4)::int, ($5)::int, ($6)::int, $7, $8, $9)
                ON CONFLICT (metric_date, platform) DO UPDATE SET
                    spend = EXCLUDED.spend,
                    leads = EXCLUDED.leads,
                    opportunities = EXCLUDED.opportunities,
                    sales_count = EXCLUDED.sales_count,
                    revenue = EXCLUDED.revenue,
                    source = EXCLUDED.source,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(metric_date)
            .bind(&record.platform)
            .bind(record.spend)
            .bind(record.leads)
            .bind(record.opportunities)
            .bind(record.sales_count)
            .bind(record.revenue)
            .bind(&record.source)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert metric_snapshots row")?;

            for entry in &record.utm_breakdown {
                sqlx::query(
                    r#"
                    INSERT INTO rastreio_whats.utm_metrics
                        (metric_date, platform, utm_campaign, leads, source, updated_at)
                    VALUES ($1, $2, $3, ($4)::int, $5, $6)
                    ON CONFLICT (metric_date, platform, utm_campaign) DO UPDATE SET
                        leads = EXCLUDED.leads,
                        source = EXCLUDED.source,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(metric_date)
                .bind(&record.platform)
                .bind(&entry.utm_campaign)
                .bind(entry.leads)
                .bind(&record.source)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to upsert utm_metrics row")?;
                utm_upserted += 1;
            }

            for msg in &record.lead_messages {
                let telefone =
                    identity::lead_key(&record.platform, &msg.lead_name, &msg.message_at);
                let id_transacao = identity::ingest_transaction_id(&telefone);
                let data_criacao = localtime::parse_message_at(&msg.message_at).ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "Invalid message_at timestamp '{}'.",
                        msg.message_at
                    ))
                })?;

                upsert_lead(
                    &mut tx,
                    &telefone,
                    &id_transacao,
                    data_criacao,
                    None,
                    &msg.lead_name,
                    &record.platform,
                )
                .await?;
                leads_upserted += 1;
            }
        }

        sqlx::query("UPDATE rastreio_whats.ingestion_jobs SET status = 'processed' WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .context("Failed to mark ingestion job processed")?;

        tx.commit()
            .await
            .context("Failed to commit ingestion transaction")?;

        Ok(IngestOutcome {
            job_id,
            metrics_upserted: records.len(),
            utm_upserted,
            leads_upserted,
        })
    }

    /// Upsert path used by the WhatsApp sync job: same conflict clause as the
    /// ingest path, all rows of one sync inside one transaction. The ad id
    /// recovered from the referral token becomes the row's source_id.
    pub async fn upsert_whatsapp_leads(
        &self,
        leads: &[crate::whatsapp_sync::WhatsappLead],
    ) -> Result<usize, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open whatsapp upsert transaction")?;

        for lead in leads {
            let telefone = identity::lead_key(&lead.platform, &lead.lead_name, &lead.message_at);
            let id_transacao = identity::whatsapp_transaction_id(&telefone);
            let data_criacao = localtime::parse_message_at(&lead.message_at).ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Invalid message_at timestamp '{}'.",
                    lead.message_at
                ))
            })?;

            upsert_lead(
                &mut tx,
                &telefone,
                &id_transacao,
                data_criacao,
                lead.ad_creative.as_deref(),
                &lead.lead_name,
                &lead.platform,
            )
            .await?;
        }

        tx.commit()
            .await
            .context("Failed to commit whatsapp upsert")?;
        Ok(leads.len())
    }
}

/// Conflict path deliberately refreshes only data_criacao, source_id and
/// nome; mensagem/cta/source_url keep their first-write values.
async fn upsert_lead(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    telefone: &str,
    id_transacao: &str,
    data_criacao: chrono::DateTime<Utc>,
    source_id: Option<&str>,
    nome: &str,
    plataforma: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO rastreio_whats.whatsapp_anuncio
            (telefone, id_transacao, data_criacao, source_id, nome, plataforma)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (telefone) DO UPDATE SET
            data_criacao = EXCLUDED.data_criacao,
            source_id = EXCLUDED.source_id,
            nome = EXCLUDED.nome
        "#,
    )
    .bind(telefone)
    .bind(id_transacao)
    .bind(data_criacao)
    .bind(source_id)
    .bind(nome)
    .bind(plataforma)
    .execute(&mut **tx)
    .await
    .context("Failed to upsert whatsapp_anuncio row")?;
    Ok(())
}

fn parse_metric_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("metric_date must be in YYYY-MM-DD format.".to_string()))
}
