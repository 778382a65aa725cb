//! SQL schema for the Ashlar SQLite store.
//!
//! Executed once at connection startup. Integrity rules that the store code
//! relies on (one current schema per record type, immutable schemas,
//! append-only records, unique boundary labels) are enforced here as well,
//! so that a racing or buggy writer fails instead of corrupting the data.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS record_types (
    record_type_id TEXT PRIMARY KEY,
    label          TEXT NOT NULL,
    plural_label   TEXT NOT NULL,
    description    TEXT,
    active         INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL    -- RFC 3339 UTC, millisecond precision
);

-- One row per schema version. The previous head is linked to its successor
-- before the successor is inserted, hence the deferred self-reference.
CREATE TABLE IF NOT EXISTS record_schemas (
    schema_id       TEXT PRIMARY KEY,
    record_type_id  TEXT NOT NULL REFERENCES record_types(record_type_id),
    version         INTEGER NOT NULL CHECK (version >= 1),
    schema_json     TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    next_version_id TEXT UNIQUE
                    REFERENCES record_schemas(schema_id) DEFERRABLE INITIALLY DEFERRED,
    UNIQUE (record_type_id, version),
    CHECK  (next_version_id IS NULL OR next_version_id != schema_id)
);

-- At most one current version per record type.
CREATE UNIQUE INDEX IF NOT EXISTS record_schemas_head_idx
    ON record_schemas(record_type_id) WHERE next_version_id IS NULL;

CREATE TRIGGER IF NOT EXISTS record_schemas_immutable
BEFORE UPDATE OF schema_id, record_type_id, version, schema_json, created_at
ON record_schemas
BEGIN
    SELECT RAISE(ABORT, 'record schemas are immutable');
END;

CREATE TRIGGER IF NOT EXISTS record_schemas_link_once
BEFORE UPDATE OF next_version_id ON record_schemas
WHEN OLD.next_version_id IS NOT NULL
BEGIN
    SELECT RAISE(ABORT, 'record schema is already superseded');
END;

CREATE TRIGGER IF NOT EXISTS record_schemas_no_delete
BEFORE DELETE ON record_schemas
BEGIN
    SELECT RAISE(ABORT, 'record schemas cannot be deleted');
END;

-- Records are strictly append-only and stay bound to the schema version
-- they were validated against.
CREATE TABLE IF NOT EXISTS records (
    record_id      TEXT PRIMARY KEY,
    record_type_id TEXT NOT NULL REFERENCES record_types(record_type_id),
    schema_id      TEXT NOT NULL REFERENCES record_schemas(schema_id),
    occurred_from  TEXT NOT NULL,
    occurred_to    TEXT,
    geom_x         REAL NOT NULL,
    geom_y         REAL NOT NULL,
    data_json      TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    CHECK (occurred_to IS NULL OR occurred_to >= occurred_from)
);

CREATE TRIGGER IF NOT EXISTS records_no_update
BEFORE UPDATE ON records
BEGIN
    SELECT RAISE(ABORT, 'records are append-only');
END;

CREATE TRIGGER IF NOT EXISTS records_no_delete
BEFORE DELETE ON records
BEGIN
    SELECT RAISE(ABORT, 'records are append-only');
END;

CREATE INDEX IF NOT EXISTS records_type_idx     ON records(record_type_id);
CREATE INDEX IF NOT EXISTS records_schema_idx   ON records(schema_id);
CREATE INDEX IF NOT EXISTS records_occurred_idx ON records(occurred_from);
CREATE INDEX IF NOT EXISTS records_geom_idx     ON records(geom_x, geom_y);

CREATE TABLE IF NOT EXISTS boundaries (
    boundary_id   TEXT PRIMARY KEY,
    label         TEXT NOT NULL UNIQUE,
    display_field TEXT,
    data_json     TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

-- Polygons carry their envelope so bounding-box filters can prefilter in SQL.
CREATE TABLE IF NOT EXISTS boundary_polygons (
    polygon_id  TEXT PRIMARY KEY,
    boundary_id TEXT NOT NULL REFERENCES boundaries(boundary_id) ON DELETE CASCADE,
    geom_json   TEXT NOT NULL,   -- GeoJSON Polygon
    data_json   TEXT NOT NULL,
    min_x       REAL NOT NULL,
    min_y       REAL NOT NULL,
    max_x       REAL NOT NULL,
    max_y       REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS boundary_polygons_boundary_idx ON boundary_polygons(boundary_id);
CREATE INDEX IF NOT EXISTS boundary_polygons_envelope_idx ON boundary_polygons(min_x, max_x);

PRAGMA user_version = 1;
";
