use chrono::{DateTime, Utc};
use duelstake_core::prelude::*;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::time::{from_text, to_text};
use crate::Store;

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<GameSession> {
    let kind: String = row.get(2)?;
    let status: String = row.get(6)?;
    let winner: Option<i64> = row.get(7)?;
    let started_at: Option<String> = row.get(9)?;
    let completed_at: Option<String> = row.get(10)?;
    Ok(GameSession {
        id: SessionId(row.get(0)?),
        game_token: row.get(1)?,
        kind: parse_kind(&kind),
        player1_id: PlayerId(row.get(3)?),
        player2_id: PlayerId(row.get(4)?),
        stake_amount: Money(row.get(5)?),
        status: parse_status(&status),
        winner_id: winner.map(PlayerId),
        created_at: from_text(&row.get::<_, String>(8)?),
        started_at: started_at.map(|s| from_text(&s)),
        completed_at: completed_at.map(|s| from_text(&s)),
        expiry_time: from_text(&row.get::<_, String>(11)?),
    })
}

fn parse_kind(s: &str) -> GameKind {
    match s {
        "matatu" => GameKind::Matatu,
        "pool" => GameKind::Pool,
        other => panic!("unknown game kind in storage: {other}"),
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "awaiting_players" => SessionStatus::AwaitingPlayers,
        "in_progress" => SessionStatus::InProgress,
        "completed" => SessionStatus::Completed,
        "cancelled" => SessionStatus::Cancelled,
        other => panic!("unknown session status in storage: {other}"),
    }
}

const SELECT_SESSION: &str = "SELECT id, game_token, kind, player1_id, player2_id, stake_amount,
        status, winner_id, created_at, started_at, completed_at, expiry_time FROM game_sessions";

impl Store {
    pub async fn create_session(
        &self,
        kind: GameKind,
        player1_id: PlayerId,
        player2_id: PlayerId,
        stake_amount: Money,
        expiry_time: DateTime<Utc>,
    ) -> StoreResult<GameSession> {
        let conn = self.conn.lock().await;
        let token = Uuid::new_v4().to_string();
        let now = to_text(Utc::now());
        conn.execute(
            "INSERT INTO game_sessions
                (game_token, kind, player1_id, player2_id, stake_amount, status, created_at, expiry_time)
             VALUES (?1, ?2, ?3, ?4, ?5, 'awaiting_players', ?6, ?7)",
            params![
                token,
                kind.as_str(),
                player1_id.0,
                player2_id.0,
                stake_amount.0,
                now,
                to_text(expiry_time),
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(&format!("{SELECT_SESSION} WHERE id = ?1"), params![id], row_to_session)
            .map_err(StoreError::from)
    }

    pub async fn get_session(&self, id: SessionId) -> StoreResult<GameSession> {
        let conn = self.conn.lock().await;
        conn.query_row(&format!("{SELECT_SESSION} WHERE id = ?1"), params![id.0], row_to_session)
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub async fn get_session_by_token(&self, token: &str) -> StoreResult<GameSession> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_SESSION} WHERE game_token = ?1"),
            params![token],
            row_to_session,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub async fn mark_in_progress(&self, id: SessionId) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE game_sessions SET status = 'in_progress', started_at = ?1
             WHERE id = ?2 AND status = 'awaiting_players'",
            params![to_text(Utc::now()), id.0],
        )?;
        Ok(updated == 1)
    }

    pub async fn mark_completed(
        &self,
        id: SessionId,
        winner_id: Option<PlayerId>,
        final_status: SessionStatus,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE game_sessions SET status = ?1, winner_id = ?2, completed_at = ?3 WHERE id = ?4",
            params![final_status.as_str(), winner_id.map(|p| p.0), to_text(Utc::now()), id.0],
        )?;
        Ok(())
    }

    pub async fn list_expired_in_progress(&self, now: DateTime<Utc>) -> StoreResult<Vec<GameSession>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SESSION} WHERE status = 'in_progress' AND expiry_time <= ?1"
        ))?;
        let rows = stmt
            .query_map(params![to_text(now)], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sessions still `awaiting_players` past their `expiry_time`
    /// (spec.md §4.4.4: cancel if either player never connected).
    pub async fn list_expired_awaiting_players(&self, now: DateTime<Utc>) -> StoreResult<Vec<GameSession>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SESSION} WHERE status = 'awaiting_players' AND expiry_time <= ?1"
        ))?;
        let rows = stmt
            .query_map(params![to_text(now)], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn transition_guards_reject_out_of_order_moves() {
        let store = Store::try_new_mem().unwrap();
        let p1 = store.get_or_create_player("256700111111", "A").await.unwrap();
        let p2 = store.get_or_create_player("256700222222", "B").await.unwrap();
        let session = store
            .create_session(GameKind::Matatu, p1.id, p2.id, Money(1000), Utc::now() + Duration::minutes(10))
            .await
            .unwrap();

        assert!(store.mark_in_progress(session.id).await.unwrap());
        assert!(!store.mark_in_progress(session.id).await.unwrap());
    }
}
