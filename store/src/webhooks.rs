use chrono::Utc;
use rusqlite::params;

use crate::error::StoreResult;
use crate::time::to_text;
use crate::Store;

/// Raw inbound payment-provider callback, kept verbatim for replay/audit
/// (spec.md §4.2 "webhook envelopes are never discarded").
#[derive(Debug, Clone)]
pub struct PaymentWebhook {
    pub id: i64,
    pub provider_transaction_id: Option<String>,
    pub raw_payload: String,
    pub received_at: chrono::DateTime<Utc>,
}

impl Store {
    pub async fn record_webhook(
        &self,
        provider_transaction_id: Option<&str>,
        raw_payload: &str,
    ) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO payment_webhooks (provider_transaction_id, raw_payload, received_at)
             VALUES (?1, ?2, ?3)",
            params![provider_transaction_id, raw_payload, to_text(Utc::now())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn list_webhooks_for(&self, provider_transaction_id: &str) -> StoreResult<Vec<PaymentWebhook>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, provider_transaction_id, raw_payload, received_at
             FROM payment_webhooks WHERE provider_transaction_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![provider_transaction_id], |row| {
                Ok(PaymentWebhook {
                    id: row.get(0)?,
                    provider_transaction_id: row.get(1)?,
                    raw_payload: row.get(2)?,
                    received_at: crate::time::from_text(&row.get::<_, String>(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
