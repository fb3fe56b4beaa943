//! libSQL backend — async `EventStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (UTC, nanoseconds) so range filters can compare
//! them as text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::dead_letter::DeadLetter;
use crate::pipeline::Stage;
use crate::schema::DetectionEvent;
use crate::store::migrations;
use crate::store::traits::EventStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Detection store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return ndt.and_utc();
        }
    }
    DateTime::<Utc>::MIN_UTC
}

const DETECTION_COLUMNS: &str =
    "id, timestamp, camera_id, sector, confidence, rat_class, bbox, recent_24h, time_of_day";

/// Map a libsql Row to a DetectionEvent. Column order matches DETECTION_COLUMNS.
fn row_to_detection(row: &libsql::Row) -> Result<DetectionEvent, libsql::Error> {
    let event_id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let camera_id: String = row.get(2)?;
    let sector: String = row.get(3)?;
    let confidence: f64 = row.get(4)?;
    let rat_class: String = row.get(5)?;
    let bbox: String = row.get::<String>(6).unwrap_or_default();
    let recent: i64 = row.get::<i64>(7).unwrap_or(0);
    let time_of_day: String = row.get::<String>(8).unwrap_or_default();

    Ok(DetectionEvent {
        event_id,
        timestamp: parse_datetime(&timestamp),
        camera_id,
        warehouse_sector: sector,
        confidence,
        rat_class,
        bbox: serde_json::from_str(&bbox).unwrap_or([0; 4]),
        recent_detections_24h: recent,
        time_of_day_category: time_of_day,
    })
}

fn row_to_dead_letter(row: &libsql::Row) -> Result<DeadLetter, libsql::Error> {
    let consumer: String = row.get(0)?;
    let stage: String = row.get(1)?;
    let reason: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let failed_at: String = row.get(4)?;

    Ok(DeadLetter {
        consumer,
        stage: stage.parse().unwrap_or(Stage::Received),
        reason,
        payload,
        failed_at: parse_datetime(&failed_at),
    })
}

async fn count(
    conn: &Connection,
    sql: &str,
    args: impl libsql::params::IntoParams,
    op: &str,
) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query(sql, args)
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}"))),
        None => Ok(0),
    }
}

// ── EventStore implementation ───────────────────────────────────────

#[async_trait]
impl EventStore for LibSqlStore {
    async fn upsert_detection(&self, event: &DetectionEvent) -> Result<(), DatabaseError> {
        let bbox = serde_json::to_string(&event.bbox)
            .map_err(|e| DatabaseError::Serialization(format!("bbox: {e}")))?;
        let now = format_datetime(&Utc::now());

        self.conn()
            .execute(
                "INSERT INTO detections
                    (id, timestamp, camera_id, sector, confidence, rat_class, bbox, recent_24h, time_of_day, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    camera_id = excluded.camera_id,
                    sector = excluded.sector,
                    confidence = excluded.confidence,
                    rat_class = excluded.rat_class,
                    bbox = excluded.bbox,
                    recent_24h = excluded.recent_24h,
                    time_of_day = excluded.time_of_day,
                    updated_at = excluded.updated_at",
                params![
                    event.event_id.as_str(),
                    format_datetime(&event.timestamp),
                    event.camera_id.as_str(),
                    event.warehouse_sector.as_str(),
                    event.confidence,
                    event.rat_class.as_str(),
                    bbox,
                    event.recent_detections_24h,
                    event.time_of_day_category.as_str(),
                    now
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_detection: {e}")))?;

        debug!(event_id = %event.event_id, "Detection upserted");
        Ok(())
    }

    async fn get_detection(&self, event_id: &str) -> Result<Option<DetectionEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DETECTION_COLUMNS} FROM detections WHERE id = ?1"),
                params![event_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_detection: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_detection: {e}")))?
        {
            Some(row) => row_to_detection(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_detection row: {e}"))),
            None => Ok(None),
        }
    }

    async fn count_detections(&self) -> Result<usize, DatabaseError> {
        let n = count(self.conn(), "SELECT COUNT(*) FROM detections", (), "count_detections").await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn count_recent_in_sector(
        &self,
        sector: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, DatabaseError> {
        let n = count(
            self.conn(),
            "SELECT COUNT(*) FROM detections WHERE sector = ?1 AND timestamp >= ?2",
            params![sector, format_datetime(&since)],
            "count_recent_in_sector",
        )
        .await?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    async fn record_dead_letter(&self, letter: &DeadLetter) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO dead_letters (consumer, stage, reason, payload, failed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    letter.consumer.as_str(),
                    letter.stage.as_str(),
                    letter.reason.as_str(),
                    letter.payload.as_str(),
                    format_datetime(&letter.failed_at)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_dead_letter: {e}")))?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn()
            .query(
                "SELECT consumer, stage, reason, payload, failed_at
                 FROM dead_letters ORDER BY id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dead_letters: {e}")))?;

        let mut letters = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dead_letters: {e}")))?
        {
            letters.push(
                row_to_dead_letter(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_dead_letters row: {e}")))?,
            );
        }
        Ok(letters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_db() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    fn detection(id: &str, sector: &str, confidence: f64) -> DetectionEvent {
        DetectionEvent::new(id, "CAM_A_SECTOR_1", sector, confidence, [10, 20, 110, 220])
    }

    // ── Detection tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_and_get_by_id() {
        let db = test_db().await;
        let event = detection("e1", "Sector 1", 0.91)
            .with_recent_detections(3)
            .with_time_of_day("Night/Peak");

        db.upsert_detection(&event).await.unwrap();

        let fetched = db.get_detection("e1").await.unwrap().unwrap();
        assert_eq!(fetched.event_id, "e1");
        assert_eq!(fetched.bbox, [10, 20, 110, 220]);
        assert_eq!(fetched.recent_detections_24h, 3);
        assert_eq!(fetched.time_of_day_category, "Night/Peak");
        assert_eq!(fetched.timestamp, event.timestamp);
    }

    #[tokio::test]
    async fn get_detection_not_found() {
        let db = test_db().await;
        assert!(db.get_detection("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_same_id_keeps_one_row_with_latest_values() {
        let db = test_db().await;
        db.upsert_detection(&detection("e1", "Sector 1", 0.5)).await.unwrap();
        db.upsert_detection(&detection("e1", "Sector 1", 0.8)).await.unwrap();

        assert_eq!(db.count_detections().await.unwrap(), 1);
        let fetched = db.get_detection("e1").await.unwrap().unwrap();
        assert!((fetched.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn count_recent_filters_by_sector_and_window() {
        let db = test_db().await;
        let now = Utc::now();
        db.upsert_detection(&detection("a", "Sector 1", 0.9).with_timestamp(now))
            .await
            .unwrap();
        db.upsert_detection(
            &detection("b", "Sector 1", 0.9).with_timestamp(now - Duration::hours(30)),
        )
        .await
        .unwrap();
        db.upsert_detection(&detection("c", "Sector 2", 0.9).with_timestamp(now))
            .await
            .unwrap();

        let since = now - Duration::hours(24);
        assert_eq!(db.count_recent_in_sector("Sector 1", since).await.unwrap(), 1);
        assert_eq!(db.count_recent_in_sector("Sector 2", since).await.unwrap(), 1);
        assert_eq!(db.count_recent_in_sector("Sector 9", since).await.unwrap(), 0);
    }

    // ── Dead letter tests ───────────────────────────────────────────

    #[tokio::test]
    async fn dead_letters_list_newest_first() {
        let db = test_db().await;
        for (i, stage) in [Stage::Received, Stage::RecommendationValidated].into_iter().enumerate() {
            db.record_dead_letter(&DeadLetter::new(
                "recommender",
                stage,
                format!("reason {i}"),
                "{}",
            ))
            .await
            .unwrap();
        }

        let letters = db.list_dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].stage, Stage::RecommendationValidated);
        assert_eq!(letters[0].reason, "reason 1");
        assert_eq!(letters[1].stage, Stage::Received);

        assert_eq!(db.list_dead_letters(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("detections.db");

        {
            let db = LibSqlStore::new_local(&path).await.unwrap();
            db.upsert_detection(&detection("e1", "Sector 1", 0.7)).await.unwrap();
        }

        let db = LibSqlStore::new_local(&path).await.unwrap();
        assert_eq!(db.count_detections().await.unwrap(), 1);
    }
}
