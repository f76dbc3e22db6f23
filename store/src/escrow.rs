use chrono::Utc;
use duelstake_core::prelude::*;
use rusqlite::params;

use crate::error::StoreResult;
use crate::time::{from_text, to_text};
use crate::Store;

fn kind_str(kind: EscrowEntryKind) -> &'static str {
    match kind {
        EscrowEntryKind::StakeIn => "stake_in",
        EscrowEntryKind::Settlement => "settlement",
        EscrowEntryKind::Cancel => "cancel",
    }
}

fn parse_kind(s: &str) -> EscrowEntryKind {
    match s {
        "stake_in" => EscrowEntryKind::StakeIn,
        "settlement" => EscrowEntryKind::Settlement,
        "cancel" => EscrowEntryKind::Cancel,
        other => panic!("unknown escrow entry kind in storage: {other}"),
    }
}

impl Store {
    /// Appends an audit row alongside the `account_transactions` posting
    /// that actually moved the money (spec.md §4.1 escrow subledger).
    pub async fn record_escrow_entry(
        &self,
        session_id: SessionId,
        kind: EscrowEntryKind,
        amount: Money,
    ) -> StoreResult<EscrowLedgerEntry> {
        let conn = self.conn.lock().await;
        let now = to_text(Utc::now());
        conn.execute(
            "INSERT INTO escrow_ledger (session_id, kind, amount, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id.0, kind_str(kind), amount.0, now],
        )?;
        Ok(EscrowLedgerEntry {
            id: conn.last_insert_rowid(),
            session_id,
            kind,
            amount,
            created_at: from_text(&now),
        })
    }

    pub async fn list_escrow_entries(&self, session_id: SessionId) -> StoreResult<Vec<EscrowLedgerEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, kind, amount, created_at FROM escrow_ledger
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id.0], |row| {
                let kind: String = row.get(2)?;
                Ok(EscrowLedgerEntry {
                    id: row.get(0)?,
                    session_id: SessionId(row.get(1)?),
                    kind: parse_kind(&kind),
                    amount: Money(row.get(3)?),
                    created_at: from_text(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
