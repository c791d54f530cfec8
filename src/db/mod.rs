pub mod schema;

use chrono::DateTime;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{Chain, Flag, TransferRecord, MAX_RISK};
use crate::error::EngineError;
use crate::ledger::LedgerReader;
use crate::store::FlagPersistence;

const UPSERT_FLAG: &str = "INSERT INTO flagged_wallets (wallet_id, reason, risk_score, updated_at)
     VALUES (?1, ?2, ?3, datetime('now'))
     ON CONFLICT(wallet_id) DO UPDATE SET
         reason = excluded.reason,
         risk_score = excluded.risk_score,
         updated_at = excluded.updated_at
     WHERE excluded.risk_score > flagged_wallets.risk_score";

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, EngineError> {
        self.inner
            .lock()
            .map_err(|_| EngineError::unavailable("sqlite", "connection mutex poisoned"))
    }

    /// Monotonic upsert of one flag. Returns whether the row changed.
    #[cfg(test)]
    fn upsert_flag_if_higher(&self, flag: &Flag) -> Result<bool, EngineError> {
        Ok(self.lock()?.upsert_flag_if_higher(flag)?)
    }

    /// Monotonic upsert of many flags in a single transaction.
    pub fn upsert_flags(&self, flags: &[Flag]) -> Result<usize, EngineError> {
        Ok(self.lock()?.upsert_flags(flags)?)
    }

    pub fn all_flags(&self) -> Result<Vec<Flag>, EngineError> {
        Ok(self.lock()?.all_flags()?)
    }

    /// Append transfer rows for one chain in a single transaction.
    #[cfg(test)]
    fn insert_transfers(&self, chain: Chain, records: &[TransferRecord]) -> Result<(), EngineError> {
        Ok(self.lock()?.insert_transfers(chain, records)?)
    }

    /// All transfers of one chain, oldest first.
    pub fn read_transfers(&self, chain: Chain) -> Result<Vec<TransferRecord>, EngineError> {
        Ok(self.lock()?.read_transfers(chain)?)
    }
}

impl FlagPersistence for SharedDatabase {
    fn load_all(&self) -> Result<Vec<Flag>, EngineError> {
        self.all_flags()
    }

    fn persist(&self, flags: &[Flag]) -> Result<(), EngineError> {
        self.upsert_flags(flags).map(|_| ())
    }
}

impl LedgerReader for SharedDatabase {
    fn read_chain(&self, chain: Chain) -> Result<Vec<TransferRecord>, EngineError> {
        self.read_transfers(chain)
    }
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            // missing directory surfaces as a CannotOpen error from sqlite below
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    fn upsert_flag_if_higher(&self, flag: &Flag) -> Result<bool, rusqlite::Error> {
        let changed = self.conn.execute(
            UPSERT_FLAG,
            rusqlite::params![flag.wallet, flag.reason, flag.score.min(MAX_RISK) as i64],
        )?;
        Ok(changed > 0)
    }

    pub fn upsert_flags(&self, flags: &[Flag]) -> Result<usize, rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(UPSERT_FLAG)?;
            for f in flags {
                changed += stmt.execute(rusqlite::params![f.wallet, f.reason, f.score.min(MAX_RISK) as i64])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn all_flags(&self) -> Result<Vec<Flag>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT wallet_id, reason, risk_score FROM flagged_wallets ORDER BY wallet_id")?;
        let rows = stmt.query_map([], |row| {
            let score: i64 = row.get(2)?;
            Ok(Flag::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                score.clamp(0, MAX_RISK as i64) as u8,
            ))
        })?;
        rows.collect()
    }

    #[cfg(test)]
    fn insert_transfers(&self, chain: Chain, records: &[TransferRecord]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO transfers (chain, tx_ref, output_index, from_address, to_address, value, fee, block_height, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for r in records {
                stmt.execute(rusqlite::params![
                    chain.as_str(),
                    r.tx_ref,
                    r.output_index,
                    r.from,
                    r.to,
                    r.value,
                    r.fee,
                    r.block_height as i64,
                    r.timestamp.timestamp(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn read_transfers(&self, chain: Chain) -> Result<Vec<TransferRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_ref, output_index, from_address, to_address, value, fee, block_height, timestamp
             FROM transfers WHERE chain = ?1 ORDER BY timestamp, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![chain.as_str()], |row| {
            let secs: i64 = row.get(7)?;
            let timestamp =
                DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(7, secs))?;
            Ok(TransferRecord {
                tx_ref: row.get(0)?,
                output_index: row.get(1)?,
                from: row.get(2)?,
                to: row.get(3)?,
                value: row.get(4)?,
                fee: row.get(5)?,
                block_height: row.get::<_, i64>(6)?.max(0) as u64,
                timestamp,
            })
        })?;
        rows.collect()
    }
}
