use chrono::{DateTime, Utc};
use duelstake_core::prelude::*;
use rusqlite::{params, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::time::{from_text, to_text};
use crate::Store;

fn row_to_withdrawal(row: &rusqlite::Row) -> rusqlite::Result<WithdrawRequest> {
    let status: String = row.get(7)?;
    let processed_at: Option<String> = row.get(10)?;
    Ok(WithdrawRequest {
        id: WithdrawId(row.get(0)?),
        player_id: PlayerId(row.get(1)?),
        amount: Money(row.get(2)?),
        fee: Money(row.get(3)?),
        net_amount: Money(row.get(4)?),
        method: row.get(5)?,
        destination: row.get(6)?,
        status: parse_status(&status),
        provider_transaction_id: row.get(8)?,
        created_at: from_text(&row.get::<_, String>(9)?),
        processed_at: processed_at.map(|s| from_text(&s)),
        note: row.get(11)?,
    })
}

fn parse_status(s: &str) -> PaymentStatus {
    match s {
        "pending" => PaymentStatus::Pending,
        "completed" => PaymentStatus::Completed,
        "failed" => PaymentStatus::Failed,
        other => panic!("unknown withdraw status in storage: {other}"),
    }
}

fn status_str(s: PaymentStatus) -> &'static str {
    match s {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
    }
}

const SELECT_WITHDRAWAL: &str = "SELECT id, player_id, amount, fee, net_amount, method,
        destination, status, provider_transaction_id, created_at, processed_at, note
        FROM withdraw_requests";

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_withdraw_request(
        &self,
        player_id: PlayerId,
        amount: Money,
        fee: Money,
        net_amount: Money,
        method: &str,
        destination: &str,
    ) -> StoreResult<WithdrawRequest> {
        let conn = self.conn.lock().await;
        let now = to_text(Utc::now());
        conn.execute(
            "INSERT INTO withdraw_requests
                (player_id, amount, fee, net_amount, method, destination, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
            params![player_id.0, amount.0, fee.0, net_amount.0, method, destination, now],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("{SELECT_WITHDRAWAL} WHERE id = ?1"),
            params![id],
            row_to_withdrawal,
        )
        .map_err(StoreError::from)
    }

    pub async fn get_withdraw_request(&self, id: WithdrawId) -> StoreResult<WithdrawRequest> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_WITHDRAWAL} WHERE id = ?1"),
            params![id.0],
            row_to_withdrawal,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub async fn attach_withdraw_provider_id(&self, id: WithdrawId, provider_transaction_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE withdraw_requests SET provider_transaction_id = ?1 WHERE id = ?2",
            params![provider_transaction_id, id.0],
        )?;
        Ok(())
    }

    pub async fn get_withdraw_request_by_provider_id(&self, provider_transaction_id: &str) -> StoreResult<WithdrawRequest> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_WITHDRAWAL} WHERE provider_transaction_id = ?1"),
            params![provider_transaction_id],
            row_to_withdrawal,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub async fn finalize_withdraw_request(
        &self,
        id: WithdrawId,
        status: PaymentStatus,
        provider_transaction_id: Option<&str>,
        note: Option<&str>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE withdraw_requests SET status = ?1, provider_transaction_id = ?2,
                processed_at = ?3, note = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![status_str(status), provider_transaction_id, to_text(Utc::now()), note, id.0],
        )?;
        Ok(updated == 1)
    }

    pub async fn list_pending_withdrawals(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<WithdrawRequest>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_WITHDRAWAL} WHERE status = 'pending' AND created_at <= ?1"
        ))?;
        let rows = stmt
            .query_map(params![to_text(older_than)], row_to_withdrawal)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finalize_withdraw_request_is_status_guarded() {
        let store = Store::try_new_mem().unwrap();
        let player = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let req = store
            .create_withdraw_request(player.id, Money(1000), Money(50), Money(950), "momo", "256700111111")
            .await
            .unwrap();

        assert!(store
            .finalize_withdraw_request(req.id, PaymentStatus::Completed, Some("prov-1"), None)
            .await
            .unwrap());
        assert!(!store
            .finalize_withdraw_request(req.id, PaymentStatus::Failed, None, Some("too late"))
            .await
            .unwrap());
    }
}
