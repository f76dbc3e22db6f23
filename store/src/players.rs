use chrono::Utc;
use duelstake_core::prelude::*;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::time::{from_text, to_text};
use crate::Store;

fn row_to_player(row: &rusqlite::Row) -> rusqlite::Result<Player> {
    let last_active: Option<String> = row.get(12)?;
    let block_until: Option<String> = row.get(9)?;
    let pin_locked_until: Option<String> = row.get(6)?;
    Ok(Player {
        id: PlayerId(row.get(0)?),
        phone: row.get(1)?,
        display_name: row.get(2)?,
        player_token: row.get(3)?,
        pin: PinState {
            pin_hash: row.get(4)?,
            failed_attempts: row.get::<_, i64>(5)? as u32,
            locked_until: pin_locked_until.map(|s| from_text(&s)),
        },
        block: BlockState {
            blocked: row.get::<_, i64>(7)? != 0,
            reason: row.get(8)?,
            until: block_until.map(|s| from_text(&s)),
        },
        disconnect_count: row.get::<_, i64>(10)? as u32,
        no_show_count: row.get::<_, i64>(11)? as u32,
        last_active: last_active.map(|s| from_text(&s)),
        stats: PlayerStats {
            games_played: row.get::<_, i64>(13)? as u32,
            games_won: row.get::<_, i64>(14)? as u32,
            games_drawn: row.get::<_, i64>(15)? as u32,
            total_winnings: Money(row.get(16)?),
        },
        created_at: from_text(&row.get::<_, String>(17)?),
    })
}

const SELECT_PLAYER: &str = "SELECT id, phone_number, display_name, player_token, pin_hash,
        pin_failed_attempts, pin_locked_until, is_blocked, block_reason, block_until,
        disconnect_count, no_show_count, last_active, total_games_played, total_games_won,
        total_games_drawn, total_winnings, created_at FROM players";

impl Store {
    /// Find-or-create by normalized phone (spec.md §3 "created on first
    /// normalized phone contact; never destroyed").
    pub async fn get_or_create_player(&self, phone: &str, display_name: &str) -> StoreResult<Player> {
        let conn = self.conn.lock().await;
        if let Some(existing) = conn
            .query_row(
                &format!("{SELECT_PLAYER} WHERE phone_number = ?1"),
                params![phone],
                row_to_player,
            )
            .optional()?
        {
            return Ok(existing);
        }

        let now = to_text(Utc::now());
        let token = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO players (phone_number, display_name, player_token, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![phone, display_name, token, now],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("{SELECT_PLAYER} WHERE id = ?1"),
            params![id],
            row_to_player,
        )
        .map_err(StoreError::from)
    }

    pub async fn get_player(&self, id: PlayerId) -> StoreResult<Player> {
        let conn = self.conn.lock().await;
        conn.query_row(&format!("{SELECT_PLAYER} WHERE id = ?1"), params![id.0], row_to_player)
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub async fn get_player_by_token(&self, token: &str) -> StoreResult<Player> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_PLAYER} WHERE player_token = ?1"),
            params![token],
            row_to_player,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub async fn touch_last_active(&self, id: PlayerId) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET last_active = ?1 WHERE id = ?2",
            params![to_text(Utc::now()), id.0],
        )?;
        Ok(())
    }

    pub async fn record_disconnect(&self, id: PlayerId) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET disconnect_count = disconnect_count + 1 WHERE id = ?1",
            params![id.0],
        )?;
        Ok(())
    }

    pub async fn record_no_show(&self, id: PlayerId) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET no_show_count = no_show_count + 1 WHERE id = ?1",
            params![id.0],
        )?;
        Ok(())
    }

    /// spec.md §4.4.3: increment games_played for both; won/winnings only
    /// for the winner; games_drawn for both on a draw.
    pub async fn record_result(
        &self,
        player_id: PlayerId,
        won: bool,
        drawn: bool,
        winnings: Money,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET total_games_played = total_games_played + 1,
                total_games_won = total_games_won + ?1,
                total_games_drawn = total_games_drawn + ?2,
                total_winnings = total_winnings + ?3
             WHERE id = ?4",
            params![
                if won { 1 } else { 0 },
                if drawn { 1 } else { 0 },
                winnings.0,
                player_id.0
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent_on_phone() {
        let store = Store::try_new_mem().unwrap();
        let a = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let b = store.get_or_create_player("256700111111", "Alice Again").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.display_name, "Alice");
    }

    #[tokio::test]
    async fn record_result_credits_winner_only() {
        let store = Store::try_new_mem().unwrap();
        let winner = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let loser = store.get_or_create_player("256700222222", "Bob").await.unwrap();
        store.record_result(winner.id, true, false, Money(1000)).await.unwrap();
        store.record_result(loser.id, false, false, Money(0)).await.unwrap();

        let winner = store.get_player(winner.id).await.unwrap();
        let loser = store.get_player(loser.id).await.unwrap();
        assert_eq!(winner.stats.games_won, 1);
        assert_eq!(winner.stats.total_winnings, Money(1000));
        assert_eq!(loser.stats.games_won, 0);
        assert_eq!(loser.stats.games_played, 1);
    }
}
