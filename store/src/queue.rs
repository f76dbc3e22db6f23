use chrono::{DateTime, Utc};
use duelstake_core::prelude::*;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::time::{from_text, to_text};
use crate::Store;

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<QueueEntry> {
    let status: String = row.get(6)?;
    let match_code: Option<String> = row.get(7)?;
    let matched_at: Option<String> = row.get(12)?;
    let session_id: Option<i64> = row.get(13)?;
    let transaction_id: Option<i64> = row.get(4)?;
    let game_kind: String = row.get(14)?;
    Ok(QueueEntry {
        id: QueueEntryId(row.get(0)?),
        player_id: PlayerId(row.get(1)?),
        phone: row.get(2)?,
        stake_amount: Money(row.get(3)?),
        game_kind: parse_kind(&game_kind),
        transaction_id: transaction_id.map(PaymentId),
        queue_token: row.get(5)?,
        status: parse_status(&status),
        match_code,
        is_private: row.get::<_, i64>(8)? != 0,
        created_at: from_text(&row.get::<_, String>(9)?),
        expires_at: from_text(&row.get::<_, String>(10)?),
        matched_at: matched_at.map(|s| from_text(&s)),
        session_id: session_id.map(SessionId),
    })
}

fn parse_status(s: &str) -> QueueStatus {
    match s {
        "queued" => QueueStatus::Queued,
        "processing" => QueueStatus::Processing,
        "matching" => QueueStatus::Matching,
        "matched" => QueueStatus::Matched,
        "expired" => QueueStatus::Expired,
        "declined" => QueueStatus::Declined,
        "cancelled" => QueueStatus::Cancelled,
        other => panic!("unknown queue status in storage: {other}"),
    }
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

const SELECT_ENTRY: &str = "SELECT id, player_id, phone_number, stake_amount, transaction_id,
        queue_token, status, match_code, is_private, created_at, expires_at, claimed_at,
        matched_at, session_id, game_kind FROM matchmaking_queue";

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        player_id: PlayerId,
        phone: &str,
        stake_amount: Money,
        game_kind: GameKind,
        transaction_id: Option<PaymentId>,
        is_private: bool,
        match_code: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<QueueEntry> {
        let conn = self.conn.lock().await;
        let token = Uuid::new_v4().to_string();
        let now = to_text(Utc::now());
        conn.execute(
            "INSERT INTO matchmaking_queue
                (player_id, phone_number, stake_amount, game_kind, transaction_id, queue_token,
                 status, match_code, is_private, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7, ?8, ?9, ?10)",
            params![
                player_id.0,
                phone,
                stake_amount.0,
                kind_str(game_kind),
                transaction_id.map(|t| t.0),
                token,
                match_code,
                is_private as i64,
                now,
                to_text(expires_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(&format!("{SELECT_ENTRY} WHERE id = ?1"), params![id], row_to_entry)
            .map_err(StoreError::from)
    }

    pub async fn get_queue_entry(&self, id: QueueEntryId) -> StoreResult<QueueEntry> {
        let conn = self.conn.lock().await;
        conn.query_row(&format!("{SELECT_ENTRY} WHERE id = ?1"), params![id.0], row_to_entry)
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// spec.md §4.3 "Reject if the player already has any active entry in
    /// {queued, processing, matching}" — `processing` only ever exists in
    /// the coordination store, so the durable check is `queued`/`matching`.
    pub async fn find_active_queue_entry(&self, player_id: PlayerId) -> StoreResult<Option<QueueEntry>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_ENTRY} WHERE player_id = ?1 AND status IN ('queued', 'matching')"),
            params![player_id.0],
            row_to_entry,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub async fn get_waiting_entry_by_match_code(&self, code: &str) -> StoreResult<QueueEntry> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_ENTRY} WHERE match_code = ?1 AND status = 'queued'"),
            params![code],
            row_to_entry,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    /// Public queue candidates at a given stake, oldest first — the durable
    /// backstop behind the in-memory coordination store's fast path.
    pub async fn list_waiting_at_stake(&self, stake_amount: Money) -> StoreResult<Vec<QueueEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_ENTRY} WHERE status = 'queued' AND is_private = 0 AND stake_amount = ?1
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![stake_amount.0], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Step 2 of the match claim: `UPDATE queue SET status = 'matching'
    /// WHERE id = opp_id AND status = 'queued'` (spec.md §4.3). Only
    /// succeeds once per row, guarding against a second claimant or a
    /// cancellation racing the same entry.
    pub async fn try_claim(&self, id: QueueEntryId) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE matchmaking_queue SET status = 'matching', claimed_at = ?1
             WHERE id = ?2 AND status = 'queued'",
            params![to_text(Utc::now()), id.0],
        )?;
        Ok(updated == 1)
    }

    pub async fn mark_matched(&self, id: QueueEntryId, session_id: SessionId) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE matchmaking_queue SET status = 'matched', matched_at = ?1, session_id = ?2
             WHERE id = ?3",
            params![to_text(Utc::now()), session_id.0, id.0],
        )?;
        Ok(())
    }

    /// Revert a claimed entry back to `queued` when the match attempt fails
    /// (the opponent double-booked, a transient error, etc).
    pub async fn release_claim(&self, id: QueueEntryId) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE matchmaking_queue SET status = 'queued', claimed_at = NULL
             WHERE id = ?1 AND status = 'matching'",
            params![id.0],
        )?;
        Ok(())
    }

    pub async fn cancel_queue_entry(&self, id: QueueEntryId) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE matchmaking_queue SET status = 'cancelled' WHERE id = ?1 AND status = 'queued'",
            params![id.0],
        )?;
        Ok(updated == 1)
    }

    /// spec.md §8 scenario 4 "Private invite decline": flips a still-
    /// waiting private invite row to `declined` by its match code.
    pub async fn decline_queue_entry(&self, match_code: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE matchmaking_queue SET status = 'declined' WHERE match_code = ?1 AND status = 'queued'",
            params![match_code],
        )?;
        Ok(updated == 1)
    }

    /// Delete a private invite row outright — used when a joiner's own
    /// claim attempt fails, so it never leaks into the public queue
    /// (spec.md §4.3 "Private matches").
    pub async fn delete_queue_entry(&self, id: QueueEntryId) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM matchmaking_queue WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    /// Expire every `queued` entry whose TTL has passed; returns the ids
    /// expired so the caller can refund stakes.
    pub async fn expire_stale_entries(&self, now: DateTime<Utc>) -> StoreResult<Vec<QueueEntryId>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "UPDATE matchmaking_queue SET status = 'expired'
             WHERE status = 'queued' AND expires_at <= ?1
             RETURNING id",
        )?;
        let ids = stmt
            .query_map(params![to_text(now)], |r| r.get::<_, i64>(0).map(QueueEntryId))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
