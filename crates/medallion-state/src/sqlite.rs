//! `SQLite`-backed implementation of [`LayerStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Amounts are stored
//! as canonical decimal text and decoded with `BigDecimal`, so no precision
//! is lost to `REAL` affinity.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use medallion_types::{
    Aggregate, Amount, AmountStats, Layer, LedgerEntry, LedgerRecord, LedgerStatus, NewRawRecord,
    QualityStatus, RawId, RawRecord, SourceLabel, TypedRecord,
};
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::{LayerCounts, LayerStore, ScanScope};
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// `SQLite` date format for `typed_events.event_date`.
const SQLITE_DATE_FMT: &str = "%Y-%m-%d";

/// Idempotent DDL for the layer tables, plus the zero-initialized aggregate.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS raw_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_file TEXT NOT NULL,
    row_number INTEGER NOT NULL,
    timestamp_raw TEXT,
    price_raw TEXT,
    user_id_raw TEXT,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (source_file, row_number)
);

CREATE TABLE IF NOT EXISTS typed_events (
    raw_id INTEGER PRIMARY KEY REFERENCES raw_events(id),
    event_date TEXT NOT NULL,
    price TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    dq_status TEXT NOT NULL CHECK (dq_status IN ('OK', 'COERCED')),
    source_file TEXT NOT NULL,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS aggregate_stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    total_count INTEGER NOT NULL,
    total_sum TEXT NOT NULL,
    min_price TEXT,
    max_price TEXT,
    watermark INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS batch_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    layer TEXT NOT NULL,
    subject TEXT,
    records INTEGER NOT NULL,
    min_price TEXT,
    avg_price TEXT,
    max_price TEXT,
    chunk_size INTEGER NOT NULL,
    status TEXT NOT NULL,
    details TEXT,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT OR IGNORE INTO aggregate_stats
    (id, total_count, total_sum, min_price, max_price, watermark, updated_at)
VALUES (1, 0, '0.00', NULL, NULL, 0, datetime('now'));
";

const TYPED_COLUMNS: &str =
    "raw_id, event_date, price, user_id, dq_status, source_file, loaded_at";

/// Columns of `typed_events` exactly as `SQLite` returns them.
type TypedRow = (i64, String, String, i64, String, String, String);

/// `SQLite`-backed layer storage.
///
/// Create with [`SqliteLayerStore::open`] for file-backed persistence
/// or [`SqliteLayerStore::in_memory`] for tests.
pub struct SqliteLayerStore {
    conn: Mutex<Connection>,
}

impl SqliteLayerStore {
    /// Open or create a `SQLite` database at `path` and bootstrap the tables.
    ///
    /// File-backed databases are switched to WAL journaling.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| StateError::backend_context("open", e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(|e| StateError::backend_context("open: journal_mode", e))?;
        Self::bootstrap(conn)
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("bootstrap: create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Self::to_sqlite(&Utc::now())
    }

    fn to_sqlite(ts: &DateTime<Utc>) -> String {
        ts.format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Parse a stored `SQLite` datetime back into UTC.
    fn from_sqlite(column: &'static str, raw: &str) -> error::Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT)
            .map(|ndt| ndt.and_utc())
            .map_err(|_| StateError::corrupt(column, raw))
    }

    fn parse_amount(column: &'static str, raw: &str) -> error::Result<Amount> {
        Amount::from_str(raw).map_err(|_| StateError::corrupt(column, raw))
    }

    fn parse_opt_amount(column: &'static str, raw: Option<String>) -> error::Result<Option<Amount>> {
        raw.map(|r| Self::parse_amount(column, &r)).transpose()
    }

    fn decode_typed(row: TypedRow) -> error::Result<TypedRecord> {
        let (raw_id, event_date, price, user_id, dq_status, source_file, loaded_at) = row;
        Ok(TypedRecord {
            raw_id: RawId::new(raw_id),
            event_date: NaiveDate::parse_from_str(&event_date, SQLITE_DATE_FMT)
                .map_err(|_| StateError::corrupt("typed_events.event_date", event_date.clone()))?,
            price: Self::parse_amount("typed_events.price", &price)?,
            user_id,
            dq_status: QualityStatus::from_str(&dq_status)
                .map_err(|_| StateError::corrupt("typed_events.dq_status", dq_status.clone()))?,
            source: SourceLabel::new(source_file),
            loaded_at: Self::from_sqlite("typed_events.loaded_at", &loaded_at)?,
        })
    }

    #[cfg(test)]
    fn raw_ids(&self) -> error::Result<Vec<i64>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM raw_events ORDER BY id")
            .map_err(StateError::backend)?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(StateError::backend)?
            .collect::<Result<Vec<i64>, _>>()
            .map_err(StateError::backend)?;
        Ok(ids)
    }
}

impl LayerStore for SqliteLayerStore {
    fn insert_raw_batch(&self, rows: &[NewRawRecord]) -> error::Result<Vec<u32>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock_conn()?;
        let now = Self::now_sqlite();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_raw_batch: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT OR IGNORE INTO raw_events \
                 (source_file, row_number, timestamp_raw, price_raw, user_id_raw, loaded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(|e| StateError::backend_context("insert_raw_batch: prepare", e))?;

        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let changed = stmt
                .execute(params![
                    row.source.as_str(),
                    row.row_number,
                    row.timestamp_raw,
                    row.price_raw,
                    row.user_id_raw,
                    now,
                ])
                .map_err(|e| StateError::backend_context("insert_raw_batch: execute", e))?;
            if changed > 0 {
                inserted.push(row.row_number);
            }
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_raw_batch: commit", e))?;

        Ok(inserted)
    }

    fn pending_raw(&self, limit: u32) -> error::Result<Vec<RawRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.id, r.source_file, r.row_number, r.timestamp_raw, r.price_raw, \
                        r.user_id_raw, r.loaded_at \
                 FROM raw_events r \
                 LEFT JOIN typed_events t ON t.raw_id = r.id \
                 WHERE t.raw_id IS NULL \
                 ORDER BY r.id \
                 LIMIT ?1",
            )
            .map_err(|e| StateError::backend_context("pending_raw: prepare", e))?;

        let rows = stmt
            .query_map([i64::from(limit)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|e| StateError::backend_context("pending_raw: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StateError::backend_context("pending_raw: read row", e))?;

        rows.into_iter()
            .map(|(id, source, row_number, ts, price, user, loaded_at)| {
                Ok(RawRecord {
                    id: RawId::new(id),
                    source: SourceLabel::new(source),
                    row_number,
                    timestamp_raw: ts.unwrap_or_default(),
                    price_raw: price.unwrap_or_default(),
                    user_id_raw: user.unwrap_or_default(),
                    loaded_at: Self::from_sqlite("raw_events.loaded_at", &loaded_at)?,
                })
            })
            .collect()
    }

    fn insert_typed_batch(&self, rows: &[TypedRecord]) -> error::Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_typed_batch: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT OR IGNORE INTO typed_events \
                 (raw_id, event_date, price, user_id, dq_status, source_file, loaded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| StateError::backend_context("insert_typed_batch: prepare", e))?;

        let mut count = 0u64;
        for row in rows {
            let changed = stmt
                .execute(params![
                    row.raw_id.get(),
                    row.event_date.format(SQLITE_DATE_FMT).to_string(),
                    row.price.to_string(),
                    row.user_id,
                    row.dq_status.as_str(),
                    row.source.as_str(),
                    Self::to_sqlite(&row.loaded_at),
                ])
                .map_err(|e| StateError::backend_context("insert_typed_batch: execute", e))?;
            count += changed as u64;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_typed_batch: commit", e))?;

        Ok(count)
    }

    fn load_aggregate(&self) -> error::Result<Aggregate> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT total_count, total_sum, min_price, max_price, watermark, updated_at \
                 FROM aggregate_stats WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StateError::backend_context("load_aggregate", e))?;

        let Some((count, sum, min, max, watermark, updated_at)) = row else {
            return Ok(Aggregate::empty(Utc::now()));
        };
        Ok(Aggregate {
            stats: AmountStats {
                count: u64::try_from(count)
                    .map_err(|_| StateError::corrupt("aggregate_stats.total_count", count.to_string()))?,
                sum: Self::parse_amount("aggregate_stats.total_sum", &sum)?,
                min: Self::parse_opt_amount("aggregate_stats.min_price", min)?,
                max: Self::parse_opt_amount("aggregate_stats.max_price", max)?,
            },
            watermark: RawId::new(watermark),
            updated_at: Self::from_sqlite("aggregate_stats.updated_at", &updated_at)?,
        })
    }

    fn typed_after(&self, watermark: RawId, limit: u32) -> error::Result<Vec<TypedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TYPED_COLUMNS} FROM typed_events \
                 WHERE raw_id > ?1 ORDER BY raw_id LIMIT ?2"
            ))
            .map_err(|e| StateError::backend_context("typed_after: prepare", e))?;

        let rows = stmt
            .query_map(params![watermark.get(), i64::from(limit)], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .map_err(|e| StateError::backend_context("typed_after: query", e))?
            .collect::<Result<Vec<TypedRow>, _>>()
            .map_err(|e| StateError::backend_context("typed_after: read row", e))?;

        rows.into_iter().map(Self::decode_typed).collect()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn commit_aggregate(&self, expected: RawId, next: &Aggregate) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let rows_affected = conn
            .execute(
                "UPDATE aggregate_stats SET total_count = ?1, total_sum = ?2, \
                 min_price = ?3, max_price = ?4, watermark = ?5, updated_at = ?6 \
                 WHERE id = 1 AND watermark = ?7",
                params![
                    next.stats.count as i64,
                    next.stats.sum.to_string(),
                    next.stats.min.as_ref().map(ToString::to_string),
                    next.stats.max.as_ref().map(ToString::to_string),
                    next.watermark.get(),
                    Self::to_sqlite(&next.updated_at),
                    expected.get(),
                ],
            )
            .map_err(|e| StateError::backend_context("commit_aggregate", e))?;
        Ok(rows_affected > 0)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn append_ledger(&self, entry: &LedgerEntry) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO batch_ledger \
             (layer, subject, records, min_price, avg_price, max_price, chunk_size, status, \
              details, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.layer.as_str(),
                entry.subject,
                entry.records as i64,
                entry.min.as_ref().map(ToString::to_string),
                entry.avg.as_ref().map(ToString::to_string),
                entry.max.as_ref().map(ToString::to_string),
                entry.chunk_size,
                entry.status.as_str(),
                entry.detail,
                Self::now_sqlite(),
            ],
        )
        .map_err(|e| StateError::backend_context("append_ledger", e))?;
        Ok(conn.last_insert_rowid())
    }

    fn ledger_entries(&self) -> error::Result<Vec<LedgerRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, layer, subject, records, min_price, avg_price, max_price, \
                        chunk_size, status, details, recorded_at \
                 FROM batch_ledger ORDER BY id",
            )
            .map_err(|e| StateError::backend_context("ledger_entries: prepare", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, u32>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })
            .map_err(|e| StateError::backend_context("ledger_entries: query", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StateError::backend_context("ledger_entries: read row", e))?;

        rows.into_iter()
            .map(
                |(id, layer, subject, records, min, avg, max, chunk_size, status, detail, at)| {
                    Ok(LedgerRecord {
                        id,
                        entry: LedgerEntry {
                            layer: Layer::from_str(&layer)
                                .map_err(|_| StateError::corrupt("batch_ledger.layer", layer.clone()))?,
                            subject: subject.unwrap_or_default(),
                            records: u64::try_from(records).map_err(|_| {
                                StateError::corrupt("batch_ledger.records", records.to_string())
                            })?,
                            min: Self::parse_opt_amount("batch_ledger.min_price", min)?,
                            avg: Self::parse_opt_amount("batch_ledger.avg_price", avg)?,
                            max: Self::parse_opt_amount("batch_ledger.max_price", max)?,
                            chunk_size,
                            status: LedgerStatus::from_str(&status).map_err(|_| {
                                StateError::corrupt("batch_ledger.status", status.clone())
                            })?,
                            detail,
                        },
                        recorded_at: Self::from_sqlite("batch_ledger.recorded_at", &at)?,
                    })
                },
            )
            .collect()
    }

    #[allow(clippy::cast_sign_loss)]
    fn layer_counts(&self) -> error::Result<LayerCounts> {
        let conn = self.lock_conn()?;
        let count = |table: &str| -> error::Result<u64> {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(|e| StateError::backend_context("layer_counts", e))?;
            // COUNT(*) is never negative.
            Ok(n as u64)
        };
        Ok(LayerCounts {
            raw: count("raw_events")?,
            typed: count("typed_events")?,
            ledger: count("batch_ledger")?,
        })
    }

    fn typed_stats(&self, scope: &ScanScope) -> error::Result<AmountStats> {
        let conn = self.lock_conn()?;
        let (sql, label) = match scope {
            ScanScope::All => ("SELECT price FROM typed_events WHERE ?1 IS NULL", None),
            ScanScope::OnlySource(label) => (
                "SELECT price FROM typed_events WHERE source_file = ?1",
                Some(label.as_str()),
            ),
            ScanScope::ExcludingSource(label) => (
                "SELECT price FROM typed_events WHERE source_file <> ?1",
                Some(label.as_str()),
            ),
        };
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StateError::backend_context("typed_stats: prepare", e))?;
        let mut rows = stmt
            .query([label])
            .map_err(|e| StateError::backend_context("typed_stats: query", e))?;

        let mut stats = AmountStats::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| StateError::backend_context("typed_stats: read row", e))?
        {
            let raw: String = row
                .get(0)
                .map_err(|e| StateError::backend_context("typed_stats: read row", e))?;
            stats.observe(&Self::parse_amount("typed_events.price", &raw)?);
        }
        Ok(stats)
    }
}
