use chrono::{DateTime, Utc};
use duelstake_core::prelude::*;
use rusqlite::{params, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::time::{from_text, to_text};
use crate::Store;

fn row_to_payment(row: &rusqlite::Row) -> rusqlite::Result<PaymentTransaction> {
    let payment_type: String = row.get(2)?;
    let status: String = row.get(4)?;
    let completed_at: Option<String> = row.get(8)?;
    let game_kind: String = row.get(10)?;
    Ok(PaymentTransaction {
        id: PaymentId(row.get(0)?),
        player_id: PlayerId(row.get(1)?),
        payment_type: parse_type(&payment_type),
        amount: Money(row.get(3)?),
        status: parse_status(&status),
        game_kind: parse_kind(&game_kind),
        provider_transaction_id: row.get(5)?,
        provider_status_code: row.get(6)?,
        provider_status_message: row.get(7)?,
        created_at: from_text(&row.get::<_, String>(9)?),
        completed_at: completed_at.map(|s| from_text(&s)),
    })
}

fn parse_kind(s: &str) -> GameKind {
    match s {
        "matatu" => GameKind::Matatu,
        "pool" => GameKind::Pool,
        other => panic!("unknown game kind in storage: {other}"),
    }
}

fn kind_str(k: GameKind) -> &'static str {
    match k {
        GameKind::Matatu => "matatu",
        GameKind::Pool => "pool",
    }
}

fn parse_type(s: &str) -> PaymentType {
    match s {
        "stake" => PaymentType::Stake,
        "stake_winnings" => PaymentType::StakeWinnings,
        "payout" => PaymentType::Payout,
        "withdraw" => PaymentType::Withdraw,
        other => panic!("unknown payment_type in storage: {other}"),
    }
}

fn type_str(t: PaymentType) -> &'static str {
    match t {
        PaymentType::Stake => "stake",
        PaymentType::StakeWinnings => "stake_winnings",
        PaymentType::Payout => "payout",
        PaymentType::Withdraw => "withdraw",
    }
}

fn parse_status(s: &str) -> PaymentStatus {
    match s {
        "pending" => PaymentStatus::Pending,
        "completed" => PaymentStatus::Completed,
        "failed" => PaymentStatus::Failed,
        other => panic!("unknown payment status in storage: {other}"),
    }
}

fn status_str(s: PaymentStatus) -> &'static str {
    match s {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
    }
}

const SELECT_PAYMENT: &str = "SELECT id, player_id, transaction_type, amount, status,
        provider_transaction_id, provider_status_code, provider_status_message, completed_at,
        created_at, game_kind FROM transactions";

impl Store {
    pub async fn create_pending_payment(
        &self,
        player_id: PlayerId,
        payment_type: PaymentType,
        amount: Money,
        game_kind: GameKind,
    ) -> StoreResult<PaymentTransaction> {
        let conn = self.conn.lock().await;
        let now = to_text(Utc::now());
        conn.execute(
            "INSERT INTO transactions (player_id, transaction_type, amount, status, created_at, game_kind)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![player_id.0, type_str(payment_type), amount.0, now, kind_str(game_kind)],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(&format!("{SELECT_PAYMENT} WHERE id = ?1"), params![id], row_to_payment)
            .map_err(StoreError::from)
    }

    pub async fn get_payment(&self, id: PaymentId) -> StoreResult<PaymentTransaction> {
        let conn = self.conn.lock().await;
        conn.query_row(&format!("{SELECT_PAYMENT} WHERE id = ?1"), params![id.0], row_to_payment)
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub async fn get_payment_by_provider_id(&self, provider_transaction_id: &str) -> StoreResult<PaymentTransaction> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_PAYMENT} WHERE provider_transaction_id = ?1"),
            params![provider_transaction_id],
            row_to_payment,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub async fn attach_provider_id(&self, id: PaymentId, provider_transaction_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE transactions SET provider_transaction_id = ?1 WHERE id = ?2",
            params![provider_transaction_id, id.0],
        )?;
        Ok(())
    }

    /// Status-guarded terminal transition (spec.md §4.2 exactly-once): only
    /// a row still `pending` can move to `completed`/`failed`, so a retried
    /// webhook or a racing poller tick is a safe no-op.
    pub async fn finalize_payment(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        provider_status_code: Option<&str>,
        provider_status_message: Option<&str>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE transactions SET status = ?1, provider_status_code = ?2,
                provider_status_message = ?3, completed_at = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![
                status_str(status),
                provider_status_code,
                provider_status_message,
                to_text(Utc::now()),
                id.0
            ],
        )?;
        Ok(updated == 1)
    }

    pub async fn list_pending_payments(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<PaymentTransaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_PAYMENT} WHERE status = 'pending' AND created_at <= ?1"
        ))?;
        let rows = stmt
            .query_map(params![to_text(older_than)], row_to_payment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
