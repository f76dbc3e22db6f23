use rusqlite::Connection;

use crate::error::StoreResult;

/// One `CREATE TABLE IF NOT EXISTS` per table (spec.md §6 "Persistent
/// state layout"), following `race-facade::db::prepare_all_tables`.
pub fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            phone_number TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            player_token TEXT NOT NULL UNIQUE,
            pin_hash TEXT,
            pin_failed_attempts INTEGER NOT NULL DEFAULT 0,
            pin_locked_until TEXT,
            is_blocked INTEGER NOT NULL DEFAULT 0,
            block_reason TEXT,
            block_until TEXT,
            disconnect_count INTEGER NOT NULL DEFAULT 0,
            no_show_count INTEGER NOT NULL DEFAULT 0,
            last_active TEXT,
            total_games_played INTEGER NOT NULL DEFAULT 0,
            total_games_won INTEGER NOT NULL DEFAULT 0,
            total_games_drawn INTEGER NOT NULL DEFAULT 0,
            total_winnings INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_type TEXT NOT NULL,
            owner_player_id INTEGER,
            balance INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(account_type, owner_player_id)
        );

        CREATE TABLE IF NOT EXISTS account_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            debit_account_id INTEGER,
            credit_account_id INTEGER,
            amount INTEGER NOT NULL,
            reference_type TEXT NOT NULL,
            reference_id INTEGER NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_id INTEGER NOT NULL,
            transaction_type TEXT NOT NULL,
            amount INTEGER NOT NULL,
            status TEXT NOT NULL,
            game_kind TEXT NOT NULL DEFAULT 'matatu',
            provider_transaction_id TEXT,
            provider_status_code TEXT,
            provider_status_message TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_provider
            ON transactions(provider_transaction_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_status
            ON transactions(status);

        CREATE TABLE IF NOT EXISTS matchmaking_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_id INTEGER NOT NULL,
            phone_number TEXT NOT NULL,
            stake_amount INTEGER NOT NULL,
            game_kind TEXT NOT NULL DEFAULT 'matatu',
            transaction_id INTEGER,
            queue_token TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            match_code TEXT UNIQUE,
            is_private INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            claimed_at TEXT,
            matched_at TEXT,
            session_id INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_queue_player_status
            ON matchmaking_queue(player_id, status);
        CREATE INDEX IF NOT EXISTS idx_queue_stake_status
            ON matchmaking_queue(stake_amount, status);

        CREATE TABLE IF NOT EXISTS game_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_token TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            player1_id INTEGER NOT NULL,
            player2_id INTEGER NOT NULL,
            stake_amount INTEGER NOT NULL,
            status TEXT NOT NULL,
            winner_id INTEGER,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            expiry_time TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_status ON game_sessions(status);

        CREATE TABLE IF NOT EXISTS game_moves (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            player_id INTEGER NOT NULL,
            move_number INTEGER NOT NULL,
            move_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, move_number)
        );

        CREATE TABLE IF NOT EXISTS game_states (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            game_state TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS escrow_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            amount INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS withdraw_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            fee INTEGER NOT NULL,
            net_amount INTEGER NOT NULL,
            method TEXT NOT NULL,
            destination TEXT NOT NULL,
            status TEXT NOT NULL,
            provider_transaction_id TEXT,
            created_at TEXT NOT NULL,
            processed_at TEXT,
            note TEXT
        );

        CREATE TABLE IF NOT EXISTS payment_webhooks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_transaction_id TEXT,
            raw_payload TEXT NOT NULL,
            received_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
