use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Derives the stable lead identity key used as the `telefone` surrogate in
/// `rastreio_whats.whatsapp_anuncio`.
///
/// The sources feeding this system never carry a real phone number, so the
/// lead table is keyed by a digest of (platform, lead name, message time).
/// Repeated ingestion of the same logical lead therefore upserts instead of
/// duplicating. Not security-sensitive; it is only a natural-key surrogate.
pub fn lead_key(platform: &str, lead_name: &str, message_at: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(platform.as_bytes());
    hasher.update(lead_name.as_bytes());
    hasher.update(message_at.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..15].to_string()
}

/// Transaction id for rows written by POST /ingest.
///
/// The suffix is a random uuid rather than wall-clock millis: two writes for
/// the same lead key inside the same millisecond must still get distinct ids.
pub fn ingest_transaction_id(lead_key: &str) -> String {
    format!("ingest-{}-{}", lead_key, Uuid::new_v4().simple())
}

/// Transaction id for rows written by the WhatsApp sync job.
pub fn whatsapp_transaction_id(lead_key: &str) -> String {
    format!("wa-{}-{}", lead_key, Uuid::new_v4().simple())
}
