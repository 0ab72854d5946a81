//! `PostgreSQL`-backed implementation of [`LayerStore`].
//!
//! Uses the sync `postgres` crate with a single `Mutex<Client>` for
//! thread safety. Amounts live in `NUMERIC` columns and cross the wire as
//! text, so the server never rounds them through a float.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use medallion_types::{
    Aggregate, Amount, AmountStats, Layer, LedgerEntry, LedgerRecord, LedgerStatus, NewRawRecord,
    QualityStatus, RawId, RawRecord, SourceLabel, TypedRecord,
};
use postgres::{Client, NoTls, Row};

use crate::backend::{LayerCounts, LayerStore, ScanScope};
use crate::error::{self, StateError};

/// Idempotent DDL for the layer tables (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS raw_events (
    id BIGSERIAL PRIMARY KEY,
    source_file TEXT NOT NULL,
    row_number BIGINT NOT NULL,
    timestamp_raw TEXT,
    price_raw TEXT,
    user_id_raw TEXT,
    loaded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (source_file, row_number)
);

CREATE TABLE IF NOT EXISTS typed_events (
    raw_id BIGINT PRIMARY KEY REFERENCES raw_events(id),
    event_date DATE NOT NULL,
    price NUMERIC(18, 2) NOT NULL,
    user_id BIGINT NOT NULL,
    dq_status TEXT NOT NULL CHECK (dq_status IN ('OK', 'COERCED')),
    source_file TEXT NOT NULL,
    loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS aggregate_stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    total_count BIGINT NOT NULL,
    total_sum NUMERIC(20, 2) NOT NULL,
    min_price NUMERIC(18, 2),
    max_price NUMERIC(18, 2),
    watermark BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS batch_ledger (
    id BIGSERIAL PRIMARY KEY,
    layer TEXT NOT NULL,
    subject TEXT,
    records BIGINT NOT NULL,
    min_price NUMERIC(18, 2),
    avg_price NUMERIC(18, 2),
    max_price NUMERIC(18, 2),
    chunk_size BIGINT NOT NULL,
    status TEXT NOT NULL,
    details TEXT,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

INSERT INTO aggregate_stats
    (id, total_count, total_sum, min_price, max_price, watermark, updated_at)
VALUES (1, 0, 0.00, NULL, NULL, 0, now())
ON CONFLICT (id) DO NOTHING;
";

const TYPED_SELECT: &str = "SELECT raw_id, event_date, price::text, user_id, dq_status, \
                            source_file, loaded_at FROM typed_events";

/// `PostgreSQL`-backed layer storage.
///
/// Create with [`PostgresLayerStore::open`] providing a libpq-style
/// connection string (e.g. `"host=localhost dbname=medallion user=postgres"`).
pub struct PostgresLayerStore {
    client: Mutex<Client>,
}

impl PostgresLayerStore {
    /// Connect to a `PostgreSQL` database and initialize the layer tables.
    ///
    /// `connstr` is a libpq-style connection string or `PostgreSQL` URI:
    /// - `"host=localhost port=5432 dbname=medallion user=postgres"`
    /// - `"postgresql://postgres@localhost/medallion"`
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if connection or DDL execution fails.
    pub fn open(connstr: &str) -> error::Result<Self> {
        let mut client =
            Client::connect(connstr, NoTls).map_err(|e| StateError::backend_context("connect", e))?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("bootstrap: create tables", e))?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Acquire the client lock.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn parse_amount(column: &'static str, raw: &str) -> error::Result<Amount> {
        Amount::from_str(raw).map_err(|_| StateError::corrupt(column, raw))
    }

    fn parse_opt_amount(column: &'static str, raw: Option<String>) -> error::Result<Option<Amount>> {
        raw.map(|r| Self::parse_amount(column, &r)).transpose()
    }

    fn non_negative(column: &'static str, value: i64) -> error::Result<u64> {
        u64::try_from(value).map_err(|_| StateError::corrupt(column, value.to_string()))
    }

    fn decode_typed(row: &Row) -> error::Result<TypedRecord> {
        let price: String = row.get(2);
        let dq_status: String = row.get(4);
        let source: String = row.get(5);
        Ok(TypedRecord {
            raw_id: RawId::new(row.get(0)),
            event_date: row.get::<_, NaiveDate>(1),
            price: Self::parse_amount("typed_events.price", &price)?,
            user_id: row.get(3),
            dq_status: QualityStatus::from_str(&dq_status)
                .map_err(|_| StateError::corrupt("typed_events.dq_status", dq_status.clone()))?,
            source: SourceLabel::new(source),
            loaded_at: row.get::<_, DateTime<Utc>>(6),
        })
    }
}

impl LayerStore for PostgresLayerStore {
    fn insert_raw_batch(&self, rows: &[NewRawRecord]) -> error::Result<Vec<u32>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut client = self.lock_client()?;
        let now = Utc::now();
        let mut tx = client
            .transaction()
            .map_err(|e| StateError::backend_context("insert_raw_batch: begin tx", e))?;
        let stmt = tx
            .prepare(
                "INSERT INTO raw_events \
                 (source_file, row_number, timestamp_raw, price_raw, user_id_raw, loaded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (source_file, row_number) DO NOTHING",
            )
            .map_err(|e| StateError::backend_context("insert_raw_batch: prepare", e))?;

        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let changed = tx
                .execute(
                    &stmt,
                    &[
                        &row.source.as_str(),
                        &i64::from(row.row_number),
                        &row.timestamp_raw,
                        &row.price_raw,
                        &row.user_id_raw,
                        &now,
                    ],
                )
                .map_err(|e| StateError::backend_context("insert_raw_batch: execute", e))?;
            if changed > 0 {
                inserted.push(row.row_number);
            }
        }
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_raw_batch: commit", e))?;

        Ok(inserted)
    }

    fn pending_raw(&self, limit: u32) -> error::Result<Vec<RawRecord>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT r.id, r.source_file, r.row_number, r.timestamp_raw, r.price_raw, \
                        r.user_id_raw, r.loaded_at \
                 FROM raw_events r \
                 LEFT JOIN typed_events t ON t.raw_id = r.id \
                 WHERE t.raw_id IS NULL \
                 ORDER BY r.id \
                 LIMIT $1",
                &[&i64::from(limit)],
            )
            .map_err(|e| StateError::backend_context("pending_raw", e))?;

        rows.iter()
            .map(|row| {
                let row_number: i64 = row.get(2);
                Ok(RawRecord {
                    id: RawId::new(row.get(0)),
                    source: SourceLabel::new(row.get::<_, String>(1)),
                    row_number: u32::try_from(row_number).map_err(|_| {
                        StateError::corrupt("raw_events.row_number", row_number.to_string())
                    })?,
                    timestamp_raw: row.get::<_, Option<String>>(3).unwrap_or_default(),
                    price_raw: row.get::<_, Option<String>>(4).unwrap_or_default(),
                    user_id_raw: row.get::<_, Option<String>>(5).unwrap_or_default(),
                    loaded_at: row.get(6),
                })
            })
            .collect()
    }

    fn insert_typed_batch(&self, rows: &[TypedRecord]) -> error::Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut client = self.lock_client()?;
        let mut tx = client
            .transaction()
            .map_err(|e| StateError::backend_context("insert_typed_batch: begin tx", e))?;
        let stmt = tx
            .prepare(
                "INSERT INTO typed_events \
                 (raw_id, event_date, price, user_id, dq_status, source_file, loaded_at) \
                 VALUES ($1, $2, $3::text::numeric, $4, $5, $6, $7) \
                 ON CONFLICT (raw_id) DO NOTHING",
            )
            .map_err(|e| StateError::backend_context("insert_typed_batch: prepare", e))?;

        let mut count = 0u64;
        for row in rows {
            count += tx
                .execute(
                    &stmt,
                    &[
                        &row.raw_id.get(),
                        &row.event_date,
                        &row.price.to_string(),
                        &row.user_id,
                        &row.dq_status.as_str(),
                        &row.source.as_str(),
                        &row.loaded_at,
                    ],
                )
                .map_err(|e| StateError::backend_context("insert_typed_batch: execute", e))?;
        }
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_typed_batch: commit", e))?;

        Ok(count)
    }

    fn load_aggregate(&self) -> error::Result<Aggregate> {
        let mut client = self.lock_client()?;
        let row = client
            .query_opt(
                "SELECT total_count, total_sum::text, min_price::text, max_price::text, \
                        watermark, updated_at \
                 FROM aggregate_stats WHERE id = 1",
                &[],
            )
            .map_err(|e| StateError::backend_context("load_aggregate", e))?;

        let Some(row) = row else {
            return Ok(Aggregate::empty(Utc::now()));
        };
        let sum: String = row.get(1);
        Ok(Aggregate {
            stats: AmountStats {
                count: Self::non_negative("aggregate_stats.total_count", row.get(0))?,
                sum: Self::parse_amount("aggregate_stats.total_sum", &sum)?,
                min: Self::parse_opt_amount("aggregate_stats.min_price", row.get(2))?,
                max: Self::parse_opt_amount("aggregate_stats.max_price", row.get(3))?,
            },
            watermark: RawId::new(row.get(4)),
            updated_at: row.get(5),
        })
    }

    fn typed_after(&self, watermark: RawId, limit: u32) -> error::Result<Vec<TypedRecord>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                &format!("{TYPED_SELECT} WHERE raw_id > $1 ORDER BY raw_id LIMIT $2"),
                &[&watermark.get(), &i64::from(limit)],
            )
            .map_err(|e| StateError::backend_context("typed_after", e))?;

        rows.iter().map(Self::decode_typed).collect()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn commit_aggregate(&self, expected: RawId, next: &Aggregate) -> error::Result<bool> {
        let mut client = self.lock_client()?;
        let rows_affected = client
            .execute(
                "UPDATE aggregate_stats SET total_count = $1, total_sum = $2::text::numeric, \
                 min_price = $3::text::numeric, max_price = $4::text::numeric, \
                 watermark = $5, updated_at = $6 \
                 WHERE id = 1 AND watermark = $7",
                &[
                    &(next.stats.count as i64),
                    &next.stats.sum.to_string(),
                    &next.stats.min.as_ref().map(ToString::to_string),
                    &next.stats.max.as_ref().map(ToString::to_string),
                    &next.watermark.get(),
                    &next.updated_at,
                    &expected.get(),
                ],
            )
            .map_err(|e| StateError::backend_context("commit_aggregate", e))?;
        Ok(rows_affected > 0)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn append_ledger(&self, entry: &LedgerEntry) -> error::Result<i64> {
        let mut client = self.lock_client()?;
        let row = client
            .query_one(
                "INSERT INTO batch_ledger \
                 (layer, subject, records, min_price, avg_price, max_price, chunk_size, status, \
                  details, recorded_at) \
                 VALUES ($1, $2, $3, $4::text::numeric, $5::text::numeric, $6::text::numeric, \
                         $7, $8, $9, $10) \
                 RETURNING id",
                &[
                    &entry.layer.as_str(),
                    &entry.subject,
                    &(entry.records as i64),
                    &entry.min.as_ref().map(ToString::to_string),
                    &entry.avg.as_ref().map(ToString::to_string),
                    &entry.max.as_ref().map(ToString::to_string),
                    &i64::from(entry.chunk_size),
                    &entry.status.as_str(),
                    &entry.detail,
                    &Utc::now(),
                ],
            )
            .map_err(|e| StateError::backend_context("append_ledger", e))?;
        Ok(row.get(0))
    }

    fn ledger_entries(&self) -> error::Result<Vec<LedgerRecord>> {
        let mut client = self.lock_client()?;
        let rows = client
            .query(
                "SELECT id, layer, subject, records, min_price::text, avg_price::text, \
                        max_price::text, chunk_size, status, details, recorded_at \
                 FROM batch_ledger ORDER BY id",
                &[],
            )
            .map_err(|e| StateError::backend_context("ledger_entries", e))?;

        rows.iter()
            .map(|row| {
                let layer: String = row.get(1);
                let status: String = row.get(8);
                let chunk_size: i64 = row.get(7);
                Ok(LedgerRecord {
                    id: row.get(0),
                    entry: LedgerEntry {
                        layer: Layer::from_str(&layer)
                            .map_err(|_| StateError::corrupt("batch_ledger.layer", layer.clone()))?,
                        subject: row.get::<_, Option<String>>(2).unwrap_or_default(),
                        records: Self::non_negative("batch_ledger.records", row.get(3))?,
                        min: Self::parse_opt_amount("batch_ledger.min_price", row.get(4))?,
                        avg: Self::parse_opt_amount("batch_ledger.avg_price", row.get(5))?,
                        max: Self::parse_opt_amount("batch_ledger.max_price", row.get(6))?,
                        chunk_size: u32::try_from(chunk_size).map_err(|_| {
                            StateError::corrupt("batch_ledger.chunk_size", chunk_size.to_string())
                        })?,
                        status: LedgerStatus::from_str(&status)
                            .map_err(|_| StateError::corrupt("batch_ledger.status", status.clone()))?,
                        detail: row.get(9),
                    },
                    recorded_at: row.get(10),
                })
            })
            .collect()
    }

    fn layer_counts(&self) -> error::Result<LayerCounts> {
        let mut client = self.lock_client()?;
        let row = client
            .query_one(
                "SELECT (SELECT COUNT(*) FROM raw_events), \
                        (SELECT COUNT(*) FROM typed_events), \
                        (SELECT COUNT(*) FROM batch_ledger)",
                &[],
            )
            .map_err(|e| StateError::backend_context("layer_counts", e))?;
        Ok(LayerCounts {
            raw: Self::non_negative("raw_events", row.get(0))?,
            typed: Self::non_negative("typed_events", row.get(1))?,
            ledger: Self::non_negative("batch_ledger", row.get(2))?,
        })
    }

    fn typed_stats(&self, scope: &ScanScope) -> error::Result<AmountStats> {
        let mut client = self.lock_client()?;
        let (sql, label) = match scope {
            ScanScope::All => (
                "SELECT price::text FROM typed_events WHERE $1::text IS NULL",
                None,
            ),
            ScanScope::OnlySource(label) => (
                "SELECT price::text FROM typed_events WHERE source_file = $1",
                Some(label.as_str()),
            ),
            ScanScope::ExcludingSource(label) => (
                "SELECT price::text FROM typed_events WHERE source_file <> $1",
                Some(label.as_str()),
            ),
        };
        let rows = client
            .query(sql, &[&label])
            .map_err(|e| StateError::backend_context("typed_stats", e))?;

        let mut stats = AmountStats::new();
        for row in &rows {
            let raw: String = row.get(0);
            stats.observe(&Self::parse_amount("typed_events.price", &raw)?);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: get test connection string from env.
    fn test_connstr() -> String {
        std::env::var("TEST_POSTGRES_URL").expect("TEST_POSTGRES_URL not set")
    }

    /// Helper: clean up test tables and reset the aggregate before each test.
    fn clean_tables(client: &mut Client) {
        client
            .batch_execute(
                "DELETE FROM batch_ledger; DELETE FROM typed_events; DELETE FROM raw_events; \
                 UPDATE aggregate_stats SET total_count = 0, total_sum = 0, min_price = NULL, \
                 max_price = NULL, watermark = 0 WHERE id = 1;",
            )
            .unwrap();
    }

    fn open_clean() -> PostgresLayerStore {
        let store = PostgresLayerStore::open(&test_connstr()).unwrap();
        clean_tables(&mut store.lock_client().unwrap());
        store
    }

    fn raw(source: &str, row_number: u32, price: &str) -> NewRawRecord {
        NewRawRecord {
            source: SourceLabel::new(source),
            row_number,
            timestamp_raw: "2024-03-01T10:00:00Z".into(),
            price_raw: price.into(),
            user_id_raw: "7".into(),
        }
    }

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn raw_insert_skips_duplicates() {
        let store = open_clean();
        let first = store
            .insert_raw_batch(&[raw("a.csv", 1, "1"), raw("a.csv", 2, "2")])
            .unwrap();
        assert_eq!(first, vec![1, 2]);
        let second = store
            .insert_raw_batch(&[raw("a.csv", 2, "2"), raw("a.csv", 3, "3")])
            .unwrap();
        assert_eq!(second, vec![3]);
        assert_eq!(store.layer_counts().unwrap().raw, 3);
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn typed_roundtrip_keeps_exact_amounts() {
        let store = open_clean();
        store.insert_raw_batch(&[raw("a.csv", 1, "19.99")]).unwrap();
        let pending = store.pending_raw(10).unwrap();
        assert_eq!(pending.len(), 1);

        let typed = TypedRecord {
            raw_id: pending[0].id,
            event_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            price: amt("19.99"),
            user_id: 7,
            dq_status: QualityStatus::Ok,
            source: pending[0].source.clone(),
            loaded_at: Utc::now(),
        };
        assert_eq!(store.insert_typed_batch(std::slice::from_ref(&typed)).unwrap(), 1);
        assert_eq!(store.insert_typed_batch(&[typed]).unwrap(), 0);
        assert!(store.pending_raw(10).unwrap().is_empty());

        let read = store.typed_after(RawId::ZERO, 10).unwrap();
        assert_eq!(read[0].price, amt("19.99"));
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn commit_aggregate_compare_and_set() {
        let store = open_clean();
        let current = store.load_aggregate().unwrap();
        assert_eq!(current.watermark, RawId::ZERO);

        let chunk: AmountStats = [amt("1.25")].iter().collect();
        let next = current.fold(&chunk, RawId::new(4), Utc::now());
        assert!(store.commit_aggregate(RawId::ZERO, &next).unwrap());
        assert!(!store.commit_aggregate(RawId::ZERO, &next).unwrap());

        let stored = store.load_aggregate().unwrap();
        assert_eq!(stored.watermark, RawId::new(4));
        assert_eq!(stored.stats.sum, amt("1.25"));
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn ledger_roundtrip() {
        let store = open_clean();
        let stats: AmountStats = [amt("1.00"), amt("2.00")].iter().collect();
        let entry = LedgerEntry::new(Layer::Raw, "a.csv", &stats, 5, LedgerStatus::Success);
        store.append_ledger(&entry).unwrap();

        let entries = store.ledger_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry, entry);
    }
}
