//! [`SqliteStore`]: the SQLite implementation of the record-type, schema,
//! record and query traits. Boundaries live in [`crate::boundary`].

use std::{path::Path, time::Duration};

use ashlar_core::{
  Error as CoreError,
  aggregate::{RecentCounts, RecentWindow, ToddowBucket},
  filter::{RecordFilter, SchemaFilter},
  geometry::Srid,
  record::Record,
  record_type::{NewRecordType, RecordType},
  schema::RecordSchema,
  store::{QueryEngine, RecordRepository, RecordTypeStore, SchemaStore, Store},
  validator::{CompiledSchema, Validator},
};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior, params, params_from_iter};
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RawRecord, RawRecordType, RawSchema, decode_uuid, encode_dt, encode_uuid, now},
  schema::SCHEMA,
  sql::{self, Query, SCHEMA_COLUMNS},
};

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Ashlar store backed by a single SQLite file.
///
/// Cloning is cheap; clones share one connection thread. Separate handles
/// opened on the same file coordinate through SQLite's locking.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  srid:            Srid,
}

impl SqliteStore {
  /// Open (or create) a store at `path` for geometries in `srid`.
  ///
  /// A database remembers the SRID it was created with; opening it with a
  /// different one fails with [`Error::SridMismatch`].
  pub async fn open(path: impl AsRef<Path>, srid: Srid) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, srid).await
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory(srid: Srid) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, srid).await
  }

  async fn init(conn: tokio_rusqlite::Connection, srid: Srid) -> Result<Self> {
    let stored: u32 = conn
      .call(move |conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
          "INSERT OR IGNORE INTO settings (key, value) VALUES ('srid', ?1)",
          params![srid.0.to_string()],
        )?;
        Ok(conn.query_row(
          "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'srid'",
          [],
          |row| row.get(0),
        )?)
      })
      .await?;

    if stored != srid.0 {
      return Err(Error::SridMismatch {
        stored:    Srid(stored),
        requested: srid,
      });
    }
    debug!(%srid, "opened store");
    Ok(Self { conn, srid })
  }

  /// Run `f` on the connection thread.
  pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }
}

impl Store for SqliteStore {
  type Error = Error;

  fn srid(&self) -> Srid { self.srid }
}

/// Run a prepared [`Query`] and decode every row with `decode`.
pub(crate) fn query_rows<R>(
  conn: &Connection,
  query: &Query,
  decode: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<R>,
) -> Result<Vec<R>> {
  let mut stmt = conn.prepare(&query.sql)?;
  let rows = stmt
    .query_map(params_from_iter(query.params.iter()), decode)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

fn log_chain_failure<T>(result: &Result<T>) {
  if let Err(e @ Error::Core(CoreError::ChainIntegrity { .. })) = result {
    error!(error = %e, "schema chain integrity failure");
  }
}

// ─── Transactional steps ─────────────────────────────────────────────────────

fn record_type_exists(conn: &Connection, record_type: &str) -> Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM record_types WHERE record_type_id = ?1",
        params![record_type],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

/// The head of `record_type`'s chain, checking that there is exactly one.
fn load_current(conn: &Connection, record_type: Uuid) -> Result<RawSchema> {
  let id = encode_uuid(record_type);
  let mut stmt = conn.prepare(&format!(
    "SELECT {SCHEMA_COLUMNS} FROM record_schemas s
     WHERE s.record_type_id = ?1 AND s.next_version_id IS NULL"
  ))?;
  let mut heads = stmt
    .query_map(params![id], RawSchema::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  match heads.len() {
    1 => Ok(heads.remove(0)),
    0 => {
      let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM record_schemas WHERE record_type_id = ?1",
        params![id],
        |row| row.get(0),
      )?;
      let err = if total > 0 {
        CoreError::ChainIntegrity {
          record_type,
          detail: format!("{total} versions but none is current"),
        }
      } else if record_type_exists(conn, &id)? {
        CoreError::NoCurrentSchema(record_type)
      } else {
        CoreError::RecordTypeNotFound(record_type)
      };
      Err(err.into())
    }
    n => Err(
      CoreError::ChainIntegrity {
        record_type,
        detail: format!("{n} current versions"),
      }
      .into(),
    ),
  }
}

/// Append `document` to the chain. The write lock is taken before the head
/// is read, so concurrent writers serialise here.
fn append_schema(conn: &mut Connection, record_type: Uuid, document: Value) -> Result<RecordSchema> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  let head = match load_current(&tx, record_type) {
    Ok(head) => Some(head),
    Err(Error::Core(CoreError::NoCurrentSchema(_))) => None,
    Err(e) => return Err(e),
  };

  let schema = RecordSchema {
    schema_id:        Uuid::new_v4(),
    record_type_id:   record_type,
    version:          head.as_ref().map_or(1, |h| h.version + 1),
    schema:           document,
    created_at:       now(),
    next_version:     None,
    previous_version: head.as_ref().map(|h| decode_uuid(&h.schema_id)).transpose()?,
  };

  let schema_id = encode_uuid(schema.schema_id);
  if let Some(head) = &head {
    tx.execute(
      "UPDATE record_schemas SET next_version_id = ?1 WHERE schema_id = ?2",
      params![schema_id, head.schema_id],
    )?;
  }
  tx.execute(
    "INSERT INTO record_schemas (schema_id, record_type_id, version, schema_json, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    params![
      schema_id,
      encode_uuid(record_type),
      schema.version,
      serde_json::to_string(&schema.schema)?,
      encode_dt(schema.created_at),
    ],
  )?;
  tx.commit()?;
  Ok(schema)
}

/// Validate `payload` against the current schema and insert it, all under
/// one write lock so the schema cannot move in between.
fn append_record(
  conn: &mut Connection,
  srid: Srid,
  record_type: Uuid,
  payload: Value,
) -> Result<Record> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  let schema = load_current(&tx, record_type)?.into_schema()?;
  let compiled = CompiledSchema::compile(&schema.schema)?;
  let candidate = Validator::new(srid).validate(&compiled, &payload).into_record()?;

  let record = Record {
    record_id:      Uuid::new_v4(),
    record_type_id: record_type,
    schema_id:      schema.schema_id,
    occurred_from:  candidate.occurred_from.trunc_subsecs(3),
    occurred_to:    candidate.occurred_to.map(|t| t.trunc_subsecs(3)),
    geom:           candidate.geom,
    data:           candidate.data,
    created_at:     now(),
  };

  tx.execute(
    "INSERT INTO records (
       record_id, record_type_id, schema_id, occurred_from, occurred_to,
       geom_x, geom_y, data_json, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    params![
      encode_uuid(record.record_id),
      encode_uuid(record.record_type_id),
      encode_uuid(record.schema_id),
      encode_dt(record.occurred_from),
      record.occurred_to.map(encode_dt),
      record.geom.x(),
      record.geom.y(),
      serde_json::to_string(&record.data)?,
      encode_dt(record.created_at),
    ],
  )?;
  tx.commit()?;
  Ok(record)
}

fn single_schema(conn: &Connection, condition: &str, args: impl rusqlite::Params) -> Result<Option<RecordSchema>> {
  conn
    .query_row(
      &format!("SELECT {SCHEMA_COLUMNS} FROM record_schemas s WHERE {condition}"),
      args,
      RawSchema::from_row,
    )
    .optional()?
    .map(RawSchema::into_schema)
    .transpose()
}

// ─── Record types ────────────────────────────────────────────────────────────

impl RecordTypeStore for SqliteStore {
  async fn create_record_type(&self, input: NewRecordType) -> Result<RecordType> {
    input.validate()?;
    let record_type = RecordType {
      record_type_id: Uuid::new_v4(),
      label:          input.label,
      plural_label:   input.plural_label,
      description:    input.description,
      active:         input.active,
      created_at:     now(),
    };

    let row = record_type.clone();
    self
      .with_conn(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO record_types ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            RawRecordType::COLUMNS
          ),
          params![
            encode_uuid(row.record_type_id),
            row.label,
            row.plural_label,
            row.description,
            row.active,
            encode_dt(row.created_at),
          ],
        )?;
        Ok(())
      })
      .await?;

    debug!(record_type = %record_type.record_type_id, label = %record_type.label, "created record type");
    Ok(record_type)
  }

  async fn get_record_type(&self, id: Uuid) -> Result<Option<RecordType>> {
    let id_str = encode_uuid(id);
    let raw = self
      .with_conn(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM record_types WHERE record_type_id = ?1",
                RawRecordType::COLUMNS
              ),
              params![id_str],
              RawRecordType::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawRecordType::into_record_type).transpose()
  }

  async fn list_record_types(&self) -> Result<Vec<RecordType>> {
    let raws = self
      .with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM record_types ORDER BY plural_label, rowid",
          RawRecordType::COLUMNS
        ))?;
        let rows = stmt
          .query_map([], RawRecordType::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRecordType::into_record_type).collect()
  }
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

impl SchemaStore for SqliteStore {
  async fn create_schema(&self, record_type: Uuid, document: Value) -> Result<RecordSchema> {
    CompiledSchema::compile(&document)?;

    let result = self
      .with_conn(move |conn| append_schema(conn, record_type, document))
      .await;
    log_chain_failure(&result);
    if let Ok(schema) = &result {
      info!(
        record_type = %record_type,
        version = schema.version,
        schema_id = %schema.schema_id,
        "created record schema version"
      );
    }
    result
  }

  async fn current_schema(&self, record_type: Uuid) -> Result<RecordSchema> {
    let result = self
      .with_conn(move |conn| load_current(conn, record_type)?.into_schema())
      .await;
    log_chain_failure(&result);
    result
  }

  async fn schema_version(&self, record_type: Uuid, version: u32) -> Result<RecordSchema> {
    let id_str = encode_uuid(record_type);
    self
      .with_conn(move |conn| {
        single_schema(
          conn,
          "s.record_type_id = ?1 AND s.version = ?2",
          params![id_str, version],
        )
      })
      .await?
      .ok_or_else(|| CoreError::SchemaVersionNotFound { record_type, version }.into())
  }

  async fn get_schema(&self, schema_id: Uuid) -> Result<Option<RecordSchema>> {
    let id_str = encode_uuid(schema_id);
    self
      .with_conn(move |conn| single_schema(conn, "s.schema_id = ?1", params![id_str]))
      .await
  }

  async fn list_schemas(&self, filter: &SchemaFilter) -> Result<Vec<RecordSchema>> {
    let query = sql::select_schemas(filter);
    debug!(sql = %query.sql, "list_schemas");
    let raws = self
      .with_conn(move |conn| query_rows(conn, &query, RawSchema::from_row))
      .await?;
    raws.into_iter().map(RawSchema::into_schema).collect()
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

impl RecordRepository for SqliteStore {
  async fn create_record(&self, record_type: Uuid, payload: Value) -> Result<Record> {
    let srid = self.srid;
    let result = self
      .with_conn(move |conn| append_record(conn, srid, record_type, payload))
      .await;
    log_chain_failure(&result);
    if let Ok(record) = &result {
      debug!(record = %record.record_id, schema = %record.schema_id, "created record");
    }
    result
  }

  async fn get_record(&self, record_id: Uuid) -> Result<Option<Record>> {
    let id_str = encode_uuid(record_id);
    let raw = self
      .with_conn(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM records WHERE record_id = ?1", sql::RECORD_COLUMNS),
              params![id_str],
              RawRecord::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawRecord::into_record).transpose()
  }

  async fn query_records(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
    let query = sql::select_records(filter);
    debug!(sql = %query.sql, "query_records");
    let raws = self
      .with_conn(move |conn| query_rows(conn, &query, RawRecord::from_row))
      .await?;
    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn count_records(&self, filter: &RecordFilter) -> Result<u64> {
    let query = sql::count_records(filter);
    let count: i64 = self
      .with_conn(move |conn| {
        Ok(conn.query_row(&query.sql, params_from_iter(query.params.iter()), |row| row.get(0))?)
      })
      .await?;
    Ok(count.max(0) as u64)
  }
}

impl QueryEngine for SqliteStore {
  async fn explain_records(&self, filter: &RecordFilter) -> Result<String> {
    Ok(sql::select_records(filter).render())
  }

  async fn toddow(&self, filter: &RecordFilter) -> Result<Vec<ToddowBucket>> {
    let query = sql::toddow(filter);
    debug!(sql = %query.sql, "toddow");
    let rows: Vec<(u32, u32, i64)> = self
      .with_conn(move |conn| {
        query_rows(conn, &query, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      })
      .await?;
    Ok(
      rows
        .into_iter()
        .map(|(tod, dow, count)| ToddowBucket {
          tod,
          dow,
          count: count.max(0) as u64,
        })
        .collect(),
    )
  }

  async fn recent_counts(&self, record_type: Uuid, now: DateTime<Utc>) -> Result<RecentCounts> {
    let id_str = encode_uuid(record_type);
    let bounds: Vec<String> = RecentWindow::ALL
      .iter()
      .map(|w| encode_dt(w.start(now)))
      .collect();
    let now_str = encode_dt(now);

    let counts = self
      .with_conn(move |conn| {
        if !record_type_exists(conn, &id_str)? {
          return Ok(None);
        }
        // Joining through the schemas counts records of every version.
        let counts: (i64, i64, i64) = conn.query_row(
          "SELECT COALESCE(SUM(r.occurred_from >= ?2), 0),
                  COALESCE(SUM(r.occurred_from >= ?3), 0),
                  COALESCE(SUM(r.occurred_from >= ?4), 0)
           FROM records r
           JOIN record_schemas s ON s.schema_id = r.schema_id
           WHERE s.record_type_id = ?1
             AND r.occurred_from >= ?4
             AND r.occurred_from <= ?5",
          params![id_str, bounds[0], bounds[1], bounds[2], now_str],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(Some(counts))
      })
      .await?
      .ok_or(CoreError::RecordTypeNotFound(record_type))?;

    Ok(RecentCounts {
      month:   counts.0.max(0) as u64,
      quarter: counts.1.max(0) as u64,
      year:    counts.2.max(0) as u64,
    })
  }
}
