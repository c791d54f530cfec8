use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS flagged_wallets (
            wallet_id   TEXT PRIMARY KEY,
            reason      TEXT NOT NULL,
            risk_score  INTEGER NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transfers (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            chain        TEXT NOT NULL,
            tx_ref       TEXT NOT NULL,
            output_index INTEGER,
            from_address TEXT,
            to_address   TEXT,
            value        REAL NOT NULL,
            fee          REAL,
            block_height INTEGER NOT NULL,
            timestamp    INTEGER NOT NULL -- unix seconds
        );

        CREATE INDEX IF NOT EXISTS idx_transfers_chain_time ON transfers(chain, timestamp);
        CREATE INDEX IF NOT EXISTS idx_flagged_score ON flagged_wallets(risk_score DESC);
        ",
    )?;
    Ok(())
}
