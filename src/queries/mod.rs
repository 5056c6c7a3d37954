//! SQL builders, one module per table. Each function returns a SQLite
//! statement string built with sea-query.

pub mod ddl;
pub mod detections;
pub mod metadata;
pub mod officer_sessions;
pub mod records;
