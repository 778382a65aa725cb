//! [`BoundaryEngine`] for [`SqliteStore`].

use ashlar_core::{
  Error as CoreError,
  boundary::{Boundary, BoundaryPolygon, NewBoundary, feature_collection},
  filter::PolygonFilter,
  geometry::{BoundingBox, polygon_geometry},
  store::{BoundaryEngine, Store},
};
use geo::Polygon;
use geojson::FeatureCollection;
use rusqlite::{
  Connection, ErrorCode, OptionalExtension as _, TransactionBehavior, ffi, params,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result, SqliteStore,
  encode::{RawBoundary, RawPolygon, encode_dt, encode_uuid, now},
  sql,
  store::query_rows,
};

fn is_unique_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _)
      if f.code == ErrorCode::ConstraintViolation
        && (f.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
          || f.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
  )
}

fn insert_boundary(
  conn: &mut Connection,
  boundary: &Boundary,
  polygons: &[(Uuid, Polygon, serde_json::Value)],
) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  let inserted = tx.execute(
    &format!("INSERT INTO boundaries ({}) VALUES (?1, ?2, ?3, ?4, ?5)", RawBoundary::COLUMNS),
    params![
      encode_uuid(boundary.boundary_id),
      boundary.label,
      boundary.display_field,
      serde_json::to_string(&boundary.data)?,
      encode_dt(boundary.created_at),
    ],
  );
  match inserted {
    Err(e) if is_unique_violation(&e) => {
      return Err(
        CoreError::Conflict(format!("a boundary labelled {:?} already exists", boundary.label))
          .into(),
      );
    }
    other => {
      other?;
    }
  }

  {
    let mut stmt = tx.prepare(
      "INSERT INTO boundary_polygons (
         polygon_id, boundary_id, geom_json, data_json, min_x, min_y, max_x, max_y
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for (polygon_id, polygon, data) in polygons {
      let envelope = BoundingBox::envelope(polygon);
      stmt.execute(params![
        encode_uuid(*polygon_id),
        encode_uuid(boundary.boundary_id),
        serde_json::to_string(&polygon_geometry(polygon))?,
        serde_json::to_string(data)?,
        envelope.min_x(),
        envelope.min_y(),
        envelope.max_x(),
        envelope.max_y(),
      ])?;
    }
  }

  tx.commit()?;
  Ok(())
}

fn boundary_exists(conn: &Connection, id: &str) -> Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM boundaries WHERE boundary_id = ?1", params![id], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}

impl SqliteStore {
  /// Polygons matching `filter`: envelopes are checked in SQL, then each
  /// candidate is tested exactly against the box before paginating.
  async fn matching_polygons(&self, filter: &PolygonFilter) -> Result<Vec<BoundaryPolygon>> {
    let query = sql::select_polygons(filter);
    debug!(sql = %query.sql, "list_polygons");
    let raws = self
      .with_conn(move |conn| query_rows(conn, &query, RawPolygon::from_row))
      .await?;
    let candidates = raws
      .into_iter()
      .map(RawPolygon::into_polygon)
      .collect::<Result<Vec<_>>>()?;

    Ok(match filter.bbox {
      // Pagination already happened in SQL.
      None => candidates,
      Some(_) => filter.apply(candidates),
    })
  }
}

impl BoundaryEngine for SqliteStore {
  async fn create_boundary(&self, input: NewBoundary) -> Result<Boundary> {
    let polygons = input.validate(self.srid())?;

    let boundary = Boundary {
      boundary_id:   Uuid::new_v4(),
      label:         input.label,
      display_field: input.display_field,
      data:          input.data,
      created_at:    now(),
    };
    let rows: Vec<_> = polygons
      .into_iter()
      .zip(input.polygons)
      .map(|(geom, submitted)| (Uuid::new_v4(), geom, submitted.data))
      .collect();
    let polygon_count = rows.len();

    let row = boundary.clone();
    self
      .with_conn(move |conn| insert_boundary(conn, &row, &rows))
      .await?;

    debug!(boundary = %boundary.boundary_id, label = %boundary.label, polygon_count, "created boundary");
    Ok(boundary)
  }

  async fn get_boundary(&self, boundary_id: Uuid) -> Result<Option<Boundary>> {
    let id_str = encode_uuid(boundary_id);
    let raw = self
      .with_conn(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM boundaries WHERE boundary_id = ?1", RawBoundary::COLUMNS),
              params![id_str],
              RawBoundary::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawBoundary::into_boundary).transpose()
  }

  async fn list_boundaries(&self) -> Result<Vec<Boundary>> {
    let raws = self
      .with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM boundaries ORDER BY display_field, label",
          RawBoundary::COLUMNS
        ))?;
        let rows = stmt
          .query_map([], RawBoundary::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawBoundary::into_boundary).collect()
  }

  async fn delete_boundary(&self, boundary_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(boundary_id);
    let deleted = self
      .with_conn(move |conn| {
        Ok(conn.execute("DELETE FROM boundaries WHERE boundary_id = ?1", params![id_str])?)
      })
      .await?;
    if deleted == 0 {
      return Err(CoreError::BoundaryNotFound(boundary_id).into());
    }
    debug!(boundary = %boundary_id, "deleted boundary");
    Ok(())
  }

  async fn list_polygons(&self, filter: &PolygonFilter) -> Result<Vec<BoundaryPolygon>> {
    self.matching_polygons(filter).await
  }

  async fn count_polygons(&self, filter: &PolygonFilter) -> Result<u64> {
    Ok(self.matching_polygons(&filter.unpaged()).await?.len() as u64)
  }

  async fn export_geojson(&self, boundary_id: Uuid) -> Result<FeatureCollection> {
    let id_str = encode_uuid(boundary_id);
    let exists = self
      .with_conn(move |conn| boundary_exists(conn, &id_str))
      .await?;
    if !exists {
      return Err(Error::Core(CoreError::BoundaryNotFound(boundary_id)));
    }
    let polygons = self
      .matching_polygons(&PolygonFilter::for_boundary(boundary_id))
      .await?;
    Ok(feature_collection(&polygons))
  }
}
