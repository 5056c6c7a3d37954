use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Capture records - one row per recording attempt
#[derive(Iden)]
pub enum CaptureRecords {
    Table,
    Id,
    SessionId,
    Status,
    LocalVideoPath,
    VideoHash,
    GpsLat,
    GpsLng,
    ManualTags,
    SystemTags,
    CreatedAtMs,
    UpdatedAtMs,
}

/// Vehicle detections - children of a capture record, surfaced by fast pings
#[derive(Iden)]
pub enum VehicleDetections {
    Table,
    Id,
    CaptureRecordId,
    VehicleIdentifier,
    VehicleClass,
    ThumbnailUri,
    ManualTags,
    CreatedAtMs,
    UpdatedAtMs,
}

/// Officer sessions - informational log of who opened the engine and when
#[derive(Iden)]
pub enum OfficerSessions {
    Table,
    Id,
    OfficerId,
    StartedAtMs,
}
