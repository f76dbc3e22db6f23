use chrono::Utc;
use duelstake_core::prelude::*;
use rusqlite::{params, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::time::{from_text, to_text};
use crate::Store;

impl Store {
    /// Append-only move log; `move_number` is assigned by the caller so it
    /// stays monotonic and gap-free per session (spec.md §8).
    pub async fn append_move(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        move_number: u32,
        move_type: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<GameMove> {
        let conn = self.conn.lock().await;
        let now = to_text(Utc::now());
        let payload_text = serde_json::to_string(payload)?;
        conn.execute(
            "INSERT INTO game_moves (session_id, player_id, move_number, move_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id.0, player_id.0, move_number, move_type, payload_text, now],
        )?;
        Ok(GameMove {
            id: conn.last_insert_rowid(),
            session_id,
            player_id,
            move_number,
            move_type: move_type.to_string(),
            payload: payload.clone(),
            created_at: from_text(&now),
        })
    }

    pub async fn list_moves(&self, session_id: SessionId) -> StoreResult<Vec<GameMove>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, player_id, move_number, move_type, payload, created_at
             FROM game_moves WHERE session_id = ?1 ORDER BY move_number ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id.0], |row| {
                let payload_text: String = row.get(5)?;
                Ok(GameMove {
                    id: row.get(0)?,
                    session_id: SessionId(row.get(1)?),
                    player_id: PlayerId(row.get(2)?),
                    move_number: row.get(3)?,
                    move_type: row.get(4)?,
                    payload: serde_json::from_str(&payload_text)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: from_text(&row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Snapshot the authoritative engine state, grounded in the teacher's
    /// `game_states` checkpoint table; the latest row wins on reload.
    pub async fn save_game_state(&self, session_id: SessionId, state: &serde_json::Value) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO game_states (session_id, game_state, created_at) VALUES (?1, ?2, ?3)",
            params![session_id.0, serde_json::to_string(state)?, to_text(Utc::now())],
        )?;
        Ok(())
    }

    pub async fn load_latest_game_state(&self, session_id: SessionId) -> StoreResult<serde_json::Value> {
        let conn = self.conn.lock().await;
        let text: String = conn
            .query_row(
                "SELECT game_state FROM game_states WHERE session_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![session_id.0],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn moves_round_trip_in_order() {
        let store = Store::try_new_mem().unwrap();
        let p1 = store.get_or_create_player("256700111111", "A").await.unwrap();
        let p2 = store.get_or_create_player("256700222222", "B").await.unwrap();
        let session = store
            .create_session(GameKind::Pool, p1.id, p2.id, Money(500), Utc::now() + Duration::minutes(10))
            .await
            .unwrap();

        store
            .append_move(session.id, p1.id, 1, "take_shot", &serde_json::json!({"angle": 45}))
            .await
            .unwrap();
        store
            .append_move(session.id, p2.id, 2, "take_shot", &serde_json::json!({"angle": 90}))
            .await
            .unwrap();

        let moves = store.list_moves(session.id).await.unwrap();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].move_number, 1);
        assert_eq!(moves[1].player_id, p2.id);
    }

    #[tokio::test]
    async fn game_state_reload_returns_latest_snapshot() {
        let store = Store::try_new_mem().unwrap();
        let p1 = store.get_or_create_player("256700111111", "A").await.unwrap();
        let p2 = store.get_or_create_player("256700222222", "B").await.unwrap();
        let session = store
            .create_session(GameKind::Matatu, p1.id, p2.id, Money(500), Utc::now() + Duration::minutes(10))
            .await
            .unwrap();

        store.save_game_state(session.id, &serde_json::json!({"turn": 1})).await.unwrap();
        store.save_game_state(session.id, &serde_json::json!({"turn": 2})).await.unwrap();

        let state = store.load_latest_game_state(session.id).await.unwrap();
        assert_eq!(state["turn"], 2);
    }
}
