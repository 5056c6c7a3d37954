use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::model::VehicleDetection;
use crate::schema::VehicleDetections;

pub const COLUMNS: [VehicleDetections; 8] = [
    VehicleDetections::Id,
    VehicleDetections::CaptureRecordId,
    VehicleDetections::VehicleIdentifier,
    VehicleDetections::VehicleClass,
    VehicleDetections::ThumbnailUri,
    VehicleDetections::ManualTags,
    VehicleDetections::CreatedAtMs,
    VehicleDetections::UpdatedAtMs,
];

/// INSERT INTO vehicle_detections (...) VALUES (...)
/// ON CONFLICT (capture_record_id, vehicle_identifier) DO NOTHING
pub fn insert_or_ignore(detection: &VehicleDetection, manual_tags_json: &str) -> String {
    Query::insert()
        .into_table(VehicleDetections::Table)
        .columns(COLUMNS)
        .values_panic([
            detection.id.as_str().into(),
            detection.capture_record_id.as_str().into(),
            detection.vehicle_identifier.as_str().into(),
            detection.vehicle_class.as_str().into(),
            detection.thumbnail_uri.clone().into(),
            manual_tags_json.into(),
            detection.created_at_ms.into(),
            detection.updated_at_ms.into(),
        ])
        .on_conflict(
            OnConflict::columns([
                VehicleDetections::CaptureRecordId,
                VehicleDetections::VehicleIdentifier,
            ])
            .do_nothing()
            .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM vehicle_detections WHERE capture_record_id = ? ORDER BY created_at_ms, id
pub fn select_by_record(record_id: &str) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(VehicleDetections::Table)
        .and_where(Expr::col(VehicleDetections::CaptureRecordId).eq(record_id))
        .order_by(VehicleDetections::CreatedAtMs, Order::Asc)
        .order_by(VehicleDetections::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM vehicle_detections WHERE id = ?
pub fn select_by_id(id: &str) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(VehicleDetections::Table)
        .and_where(Expr::col(VehicleDetections::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE vehicle_detections SET manual_tags = ?, updated_at_ms = ? WHERE id = ?
pub fn update_manual_tags(id: &str, manual_tags_json: &str, now_ms: i64) -> String {
    Query::update()
        .table(VehicleDetections::Table)
        .value(VehicleDetections::ManualTags, manual_tags_json)
        .value(VehicleDetections::UpdatedAtMs, now_ms)
        .and_where(Expr::col(VehicleDetections::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}
