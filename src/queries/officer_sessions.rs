use sea_query::{Order, Query, SqliteQueryBuilder};

use crate::schema::OfficerSessions;

/// INSERT INTO officer_sessions (officer_id, started_at_ms) VALUES (?, ?)
pub fn insert(officer_id: &str, started_at_ms: i64) -> String {
    Query::insert()
        .into_table(OfficerSessions::Table)
        .columns([OfficerSessions::OfficerId, OfficerSessions::StartedAtMs])
        .values_panic([officer_id.into(), started_at_ms.into()])
        .to_string(SqliteQueryBuilder)
}

/// SELECT officer_id, started_at_ms FROM officer_sessions ORDER BY id DESC LIMIT 1
pub fn select_latest() -> String {
    Query::select()
        .columns([OfficerSessions::OfficerId, OfficerSessions::StartedAtMs])
        .from(OfficerSessions::Table)
        .order_by(OfficerSessions::Id, Order::Desc)
        .limit(1)
        .to_string(SqliteQueryBuilder)
}
