use sea_query::{Expr, Func, Order, Query, SqliteQueryBuilder};

use crate::constants::RECORDING_SENTINEL;
use crate::lifecycle::RecordStatus;
use crate::model::CaptureRecord;
use crate::schema::CaptureRecords;

/// Column order shared by every SELECT that decodes into a `CaptureRecord`
pub const COLUMNS: [CaptureRecords; 11] = [
    CaptureRecords::Id,
    CaptureRecords::SessionId,
    CaptureRecords::Status,
    CaptureRecords::LocalVideoPath,
    CaptureRecords::VideoHash,
    CaptureRecords::GpsLat,
    CaptureRecords::GpsLng,
    CaptureRecords::ManualTags,
    CaptureRecords::SystemTags,
    CaptureRecords::CreatedAtMs,
    CaptureRecords::UpdatedAtMs,
];

/// INSERT INTO capture_records (...) VALUES (...)
/// Tag sets are passed pre-encoded as JSON arrays
pub fn insert(record: &CaptureRecord, manual_tags_json: &str, system_tags_json: &str) -> String {
    Query::insert()
        .into_table(CaptureRecords::Table)
        .columns(COLUMNS)
        .values_panic([
            record.id.as_str().into(),
            record.session_id.as_str().into(),
            record.status.as_str().into(),
            record.local_video_path.as_str().into(),
            record
                .video_hash
                .as_ref()
                .map(|h| h.as_str().to_string())
                .into(),
            record.gps.map(|g| g.lat).into(),
            record.gps.map(|g| g.lng).into(),
            manual_tags_json.into(),
            system_tags_json.into(),
            record.created_at_ms.into(),
            record.updated_at_ms.into(),
        ])
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM capture_records ORDER BY created_at_ms, id
pub fn select_all() -> String {
    Query::select()
        .columns(COLUMNS)
        .from(CaptureRecords::Table)
        .order_by(CaptureRecords::CreatedAtMs, Order::Asc)
        .order_by(CaptureRecords::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM capture_records WHERE id = ?
pub fn select_by_id(id: &str) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(CaptureRecords::Table)
        .and_where(Expr::col(CaptureRecords::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM capture_records WHERE session_id = ?
pub fn select_by_session(session_id: &str) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(CaptureRecords::Table)
        .and_where(Expr::col(CaptureRecords::SessionId).eq(session_id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM capture_records WHERE status = ? ORDER BY created_at_ms, id
pub fn select_by_status(status: RecordStatus) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(CaptureRecords::Table)
        .and_where(Expr::col(CaptureRecords::Status).eq(status.as_str()))
        .order_by(CaptureRecords::CreatedAtMs, Order::Asc)
        .order_by(CaptureRecords::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT id FROM capture_records WHERE local_video_path = ?
pub fn select_id_by_path(path: &str) -> String {
    Query::select()
        .column(CaptureRecords::Id)
        .from(CaptureRecords::Table)
        .and_where(Expr::col(CaptureRecords::LocalVideoPath).eq(path))
        .to_string(SqliteQueryBuilder)
}

/// SELECT id FROM capture_records WHERE local_video_path = '<sentinel>'
pub fn select_ids_still_recording() -> String {
    select_id_by_path(RECORDING_SENTINEL)
}

/// SELECT local_video_path FROM capture_records WHERE local_video_path <> '<sentinel>'
pub fn select_video_paths() -> String {
    Query::select()
        .column(CaptureRecords::LocalVideoPath)
        .from(CaptureRecords::Table)
        .and_where(Expr::col(CaptureRecords::LocalVideoPath).ne(RECORDING_SENTINEL))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(id) FROM capture_records WHERE status IN ('DRAFT', 'SYNCING')
pub fn count_pending() -> String {
    Query::select()
        .expr(Func::count(Expr::col(CaptureRecords::Id)))
        .from(CaptureRecords::Table)
        .and_where(Expr::col(CaptureRecords::Status).is_in([
            RecordStatus::Draft.as_str(),
            RecordStatus::Syncing.as_str(),
        ]))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE capture_records SET status = ?, updated_at_ms = ? WHERE id = ? AND status = ?
pub fn update_status(id: &str, from: RecordStatus, to: RecordStatus, now_ms: i64) -> String {
    Query::update()
        .table(CaptureRecords::Table)
        .value(CaptureRecords::Status, to.as_str())
        .value(CaptureRecords::UpdatedAtMs, now_ms)
        .and_where(Expr::col(CaptureRecords::Id).eq(id))
        .and_where(Expr::col(CaptureRecords::Status).eq(from.as_str()))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE capture_records SET status = ?, updated_at_ms = ?
/// WHERE id = ? AND status = ? AND video_hash = ?
pub fn update_status_for_hash(
    id: &str,
    from: RecordStatus,
    to: RecordStatus,
    video_hash: &str,
    now_ms: i64,
) -> String {
    Query::update()
        .table(CaptureRecords::Table)
        .value(CaptureRecords::Status, to.as_str())
        .value(CaptureRecords::UpdatedAtMs, now_ms)
        .and_where(Expr::col(CaptureRecords::Id).eq(id))
        .and_where(Expr::col(CaptureRecords::Status).eq(from.as_str()))
        .and_where(Expr::col(CaptureRecords::VideoHash).eq(video_hash))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE capture_records SET status = ?, updated_at_ms = ? WHERE status = ?
pub fn update_all_status(from: RecordStatus, to: RecordStatus, now_ms: i64) -> String {
    Query::update()
        .table(CaptureRecords::Table)
        .value(CaptureRecords::Status, to.as_str())
        .value(CaptureRecords::UpdatedAtMs, now_ms)
        .and_where(Expr::col(CaptureRecords::Status).eq(from.as_str()))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE capture_records SET local_video_path = ?, video_hash = ?, updated_at_ms = ?
/// WHERE id = ? AND status = 'DRAFT' AND local_video_path = '<sentinel>'
pub fn finalize_video(id: &str, path: &str, video_hash: &str, now_ms: i64) -> String {
    Query::update()
        .table(CaptureRecords::Table)
        .value(CaptureRecords::LocalVideoPath, path)
        .value(CaptureRecords::VideoHash, video_hash)
        .value(CaptureRecords::UpdatedAtMs, now_ms)
        .and_where(Expr::col(CaptureRecords::Id).eq(id))
        .and_where(Expr::col(CaptureRecords::Status).eq(RecordStatus::Draft.as_str()))
        .and_where(Expr::col(CaptureRecords::LocalVideoPath).eq(RECORDING_SENTINEL))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE capture_records SET manual_tags = ?, updated_at_ms = ? WHERE id = ? AND status = 'DRAFT'
pub fn update_manual_tags(id: &str, manual_tags_json: &str, now_ms: i64) -> String {
    Query::update()
        .table(CaptureRecords::Table)
        .value(CaptureRecords::ManualTags, manual_tags_json)
        .value(CaptureRecords::UpdatedAtMs, now_ms)
        .and_where(Expr::col(CaptureRecords::Id).eq(id))
        .and_where(Expr::col(CaptureRecords::Status).eq(RecordStatus::Draft.as_str()))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE capture_records SET system_tags = ?, updated_at_ms = ? WHERE id = ?
pub fn update_system_tags(id: &str, system_tags_json: &str, now_ms: i64) -> String {
    Query::update()
        .table(CaptureRecords::Table)
        .value(CaptureRecords::SystemTags, system_tags_json)
        .value(CaptureRecords::UpdatedAtMs, now_ms)
        .and_where(Expr::col(CaptureRecords::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM capture_records WHERE id = ?
pub fn delete_by_id(id: &str) -> String {
    Query::delete()
        .from_table(CaptureRecords::Table)
        .and_where(Expr::col(CaptureRecords::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}
