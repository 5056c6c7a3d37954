use sea_query::{ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, SqliteQueryBuilder, Table};

use crate::constants::RECORDING_SENTINEL;
use crate::schema::{CaptureRecords, Metadata, OfficerSessions, VehicleDetections};

/// CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_metadata_table() -> String {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).string().primary_key())
        .col(ColumnDef::new(Metadata::Value).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS capture_records (
///     id TEXT PRIMARY KEY,
///     session_id TEXT NOT NULL UNIQUE,
///     status TEXT NOT NULL CHECK (status IN ('DRAFT', 'SYNCING', 'UPLOADED')),
///     local_video_path TEXT NOT NULL,
///     video_hash TEXT,
///     gps_lat REAL,
///     gps_lng REAL,
///     manual_tags TEXT NOT NULL DEFAULT '[]',
///     system_tags TEXT NOT NULL DEFAULT '[]',
///     created_at_ms INTEGER NOT NULL,
///     updated_at_ms INTEGER NOT NULL
/// )
pub fn create_capture_records_table() -> String {
    Table::create()
        .table(CaptureRecords::Table)
        .if_not_exists()
        .col(ColumnDef::new(CaptureRecords::Id).string().primary_key())
        .col(
            ColumnDef::new(CaptureRecords::SessionId)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(CaptureRecords::Status)
                .string()
                .not_null()
                .check(Expr::col(CaptureRecords::Status).is_in(["DRAFT", "SYNCING", "UPLOADED"])),
        )
        .col(
            ColumnDef::new(CaptureRecords::LocalVideoPath)
                .string()
                .not_null(),
        )
        .col(ColumnDef::new(CaptureRecords::VideoHash).string().null())
        .col(ColumnDef::new(CaptureRecords::GpsLat).double().null())
        .col(ColumnDef::new(CaptureRecords::GpsLng).double().null())
        .col(
            ColumnDef::new(CaptureRecords::ManualTags)
                .string()
                .not_null()
                .default("[]"),
        )
        .col(
            ColumnDef::new(CaptureRecords::SystemTags)
                .string()
                .not_null()
                .default("[]"),
        )
        .col(
            ColumnDef::new(CaptureRecords::CreatedAtMs)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(CaptureRecords::UpdatedAtMs)
                .big_integer()
                .not_null(),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_capture_records_status ON capture_records(status)
pub fn create_capture_records_status_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_capture_records_status")
        .table(CaptureRecords::Table)
        .col(CaptureRecords::Status)
        .to_string(SqliteQueryBuilder)
}

/// Partial unique index: a finalized video file belongs to exactly one record.
/// In-progress records all share the sentinel, so it is excluded.
pub fn create_capture_records_video_path_index() -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_capture_records_video_path \
         ON capture_records (local_video_path) WHERE local_video_path <> '{}'",
        RECORDING_SENTINEL
    )
}

/// CREATE TABLE IF NOT EXISTS vehicle_detections (
///     id TEXT PRIMARY KEY,
///     capture_record_id TEXT NOT NULL REFERENCES capture_records(id) ON DELETE CASCADE,
///     vehicle_identifier TEXT NOT NULL,
///     vehicle_class TEXT NOT NULL,
///     thumbnail_uri TEXT,
///     manual_tags TEXT NOT NULL DEFAULT '[]',
///     created_at_ms INTEGER NOT NULL,
///     updated_at_ms INTEGER NOT NULL
/// )
pub fn create_vehicle_detections_table() -> String {
    Table::create()
        .table(VehicleDetections::Table)
        .if_not_exists()
        .col(ColumnDef::new(VehicleDetections::Id).string().primary_key())
        .col(
            ColumnDef::new(VehicleDetections::CaptureRecordId)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(VehicleDetections::VehicleIdentifier)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(VehicleDetections::VehicleClass)
                .string()
                .not_null(),
        )
        .col(ColumnDef::new(VehicleDetections::ThumbnailUri).string().null())
        .col(
            ColumnDef::new(VehicleDetections::ManualTags)
                .string()
                .not_null()
                .default("[]"),
        )
        .col(
            ColumnDef::new(VehicleDetections::CreatedAtMs)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(VehicleDetections::UpdatedAtMs)
                .big_integer()
                .not_null(),
        )
        .foreign_key(
            ForeignKey::create()
                .from(VehicleDetections::Table, VehicleDetections::CaptureRecordId)
                .to(CaptureRecords::Table, CaptureRecords::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_vehicle_detections_identity
/// ON vehicle_detections(capture_record_id, vehicle_identifier)
pub fn create_vehicle_detections_identity_index() -> String {
    Index::create()
        .if_not_exists()
        .unique()
        .name("idx_vehicle_detections_identity")
        .table(VehicleDetections::Table)
        .col(VehicleDetections::CaptureRecordId)
        .col(VehicleDetections::VehicleIdentifier)
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS officer_sessions (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     officer_id TEXT NOT NULL,
///     started_at_ms INTEGER NOT NULL
/// )
pub fn create_officer_sessions_table() -> String {
    Table::create()
        .table(OfficerSessions::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(OfficerSessions::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(OfficerSessions::OfficerId).string().not_null())
        .col(
            ColumnDef::new(OfficerSessions::StartedAtMs)
                .big_integer()
                .not_null(),
        )
        .to_string(SqliteQueryBuilder)
}

/// Ordered schema migrations. Step `n` upgrades a database at version `n - 1`
/// to version `n`; steps only ever add tables, columns or indexes.
pub fn migration_steps(version: u32) -> Vec<String> {
    match version {
        1 => vec![
            create_capture_records_table(),
            create_capture_records_status_index(),
            create_capture_records_video_path_index(),
        ],
        2 => vec![
            create_vehicle_detections_table(),
            create_vehicle_detections_identity_index(),
        ],
        3 => vec![create_officer_sessions_table()],
        _ => Vec::new(),
    }
}
