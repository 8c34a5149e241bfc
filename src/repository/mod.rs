//! Repository - Persistence Façade
//!
//! ## Responsibilities
//!
//! - Schema migration and reference-table seeding
//! - First-detection persistence (idempotent by object id) + crop images
//! - Access-condition read/atomic write
//! - History queries (events, bird risk, pilot interactions)
//! - Bird-risk and interaction logs
//!
//! Every call carries a 2 s deadline; writes that matter for liveness are
//! retried once before the operation fails. A failed image write degrades
//! to an empty path, the DB record is still written.

use crate::error::{Error, Result};
use crate::models::{Area, BirdRiskLevel, EventType, ObjectClass};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;
use tokio::time::Duration;

const DB_TIMEOUT: Duration = Duration::from_secs(2);

/// One DETECT_EVENT row joined with its reference names
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub event_type_name: String,
    pub object_id: i64,
    pub object_type_name: String,
    pub area_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Detail record behind MC_OD / LC_OI
#[derive(Debug, Clone)]
pub struct ObjectEventDetail {
    pub object_id: i64,
    pub object_type_name: String,
    pub area_name: String,
    pub timestamp: DateTime<Utc>,
    pub img_path: String,
}

/// Bird-risk log entry
#[derive(Debug, Clone)]
pub struct BirdRiskEntry {
    pub level_id: i32,
    pub timestamp: DateTime<Utc>,
}

/// Pilot interaction log entry
#[derive(Debug, Clone)]
pub struct InteractionEntry {
    pub request_id: i32,
    pub response_id: i32,
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
}

/// Repository instance
pub struct Repository {
    pool: MySqlPool,
    img_dir: PathBuf,
}

/// Crop image filename, relative to the image directory
pub fn image_filename(object_id: i64, timestamp: &DateTime<Utc>) -> String {
    format!("img_{}_{}.jpg", object_id, timestamp.format("%Y%m%d%H%M%S"))
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

async fn timed<T>(
    what: &str,
    fut: impl std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
) -> Result<T> {
    match tokio::time::timeout(DB_TIMEOUT, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::Timeout(format!("database call: {what}"))),
    }
}

impl Repository {
    pub fn new(pool: MySqlPool, img_dir: PathBuf) -> Self {
        Self { pool, img_dir }
    }

    // ========================================
    // Migration
    // ========================================

    /// Create tables and seed reference data; idempotent.
    pub async fn migrate(&self) -> Result<()> {
        let tables = [
            "CREATE TABLE IF NOT EXISTS OBJECT_TYPE (
                object_type_id INT PRIMARY KEY,
                object_type_name VARCHAR(16) NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS EVENT_TYPE (
                event_type_id INT PRIMARY KEY,
                event_type_name VARCHAR(32) NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS AREA (
                area_id INT PRIMARY KEY,
                area_name VARCHAR(16) NOT NULL,
                x1 DOUBLE, y1 DOUBLE, x2 DOUBLE, y2 DOUBLE
            )",
            "CREATE TABLE IF NOT EXISTS AUTHORITY_LEVEL (
                level_id INT PRIMARY KEY,
                level_name VARCHAR(16) NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS ACCESS_CONDITIONS (
                area_id INT,
                authority_level_id INT
            )",
            "CREATE TABLE IF NOT EXISTS DETECTED_OBJECT (
                object_id BIGINT PRIMARY KEY,
                object_type_id INT
            )",
            "CREATE TABLE IF NOT EXISTS DETECT_EVENT (
                event_id INT AUTO_INCREMENT PRIMARY KEY,
                event_type_id INT,
                object_id BIGINT,
                object_type_id INT,
                map_x DOUBLE,
                map_y DOUBLE,
                area_id INT,
                timestamp DATETIME,
                img_path VARCHAR(256)
            )",
            "CREATE TABLE IF NOT EXISTS BIRD_RISK_LEVEL (
                id INT PRIMARY KEY,
                name VARCHAR(16) NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS BIRD_RISK_LOG (
                id INT AUTO_INCREMENT PRIMARY KEY,
                prev_level_id INT,
                curr_level_id INT,
                timestamp DATETIME
            )",
            "CREATE TABLE IF NOT EXISTS REQUEST_TYPE (
                request_id INT PRIMARY KEY,
                request_code VARCHAR(16) NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS RESPONSE_TYPE (
                response_id INT PRIMARY KEY,
                response_code VARCHAR(16) NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS INTERACTION_STATUS (
                status_id INT PRIMARY KEY,
                status_code VARCHAR(16) NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS INTERACTION_LOG (
                id INT AUTO_INCREMENT PRIMARY KEY,
                request_id INT,
                response_id INT,
                request_time DATETIME,
                response_time DATETIME,
                status_id INT
            )",
        ];
        for ddl in tables {
            timed("migrate", sqlx::query(ddl).execute(&self.pool)).await?;
        }

        self.seed().await?;
        tracing::info!("Schema migration complete");
        Ok(())
    }

    async fn seed(&self) -> Result<()> {
        for (id, name) in [(1, "HAZARD"), (2, "UNAUTH"), (3, "RESCUE")] {
            timed(
                "seed EVENT_TYPE",
                sqlx::query("INSERT IGNORE INTO EVENT_TYPE (event_type_id, event_type_name) VALUES (?, ?)")
                    .bind(id)
                    .bind(name)
                    .execute(&self.pool),
            )
            .await?;
        }

        for class in [
            ObjectClass::Bird,
            ObjectClass::Fod,
            ObjectClass::Person,
            ObjectClass::Animal,
            ObjectClass::Airplane,
            ObjectClass::Vehicle,
            ObjectClass::WorkPerson,
            ObjectClass::WorkVehicle,
            ObjectClass::Aircraft,
        ] {
            timed(
                "seed OBJECT_TYPE",
                sqlx::query("INSERT IGNORE INTO OBJECT_TYPE (object_type_id, object_type_name) VALUES (?, ?)")
                    .bind(class.type_id())
                    .bind(class.name())
                    .execute(&self.pool),
            )
            .await?;
        }

        for (id, name) in [(1, "OPEN"), (2, "AUTH_ONLY"), (3, "NO_ENTRY")] {
            timed(
                "seed AUTHORITY_LEVEL",
                sqlx::query("INSERT IGNORE INTO AUTHORITY_LEVEL (level_id, level_name) VALUES (?, ?)")
                    .bind(id)
                    .bind(name)
                    .execute(&self.pool),
            )
            .await?;
        }

        for (id, name) in [(1, "BR_HIGH"), (2, "BR_MEDIUM"), (3, "BR_LOW")] {
            timed(
                "seed BIRD_RISK_LEVEL",
                sqlx::query("INSERT IGNORE INTO BIRD_RISK_LEVEL (id, name) VALUES (?, ?)")
                    .bind(id)
                    .bind(name)
                    .execute(&self.pool),
            )
            .await?;
        }

        for (id, code) in [
            (1, "BR_INQ"),
            (2, "RWY_A_STATUS"),
            (3, "RWY_B_STATUS"),
            (4, "RWY_AVAIL_IN"),
        ] {
            timed(
                "seed REQUEST_TYPE",
                sqlx::query("INSERT IGNORE INTO REQUEST_TYPE (request_id, request_code) VALUES (?, ?)")
                    .bind(id)
                    .bind(code)
                    .execute(&self.pool),
            )
            .await?;
        }

        for (id, code) in [
            (1, "BR_HIGH"),
            (2, "BR_MEDIUM"),
            (3, "BR_LOW"),
            (4, "CLEAR"),
            (5, "BLOCKED"),
            (6, "ALL"),
            (7, "A_ONLY"),
            (8, "B_ONLY"),
            (9, "NONE"),
        ] {
            timed(
                "seed RESPONSE_TYPE",
                sqlx::query("INSERT IGNORE INTO RESPONSE_TYPE (response_id, response_code) VALUES (?, ?)")
                    .bind(id)
                    .bind(code)
                    .execute(&self.pool),
            )
            .await?;
        }

        for (id, code) in [(1, "SUCCESS"), (2, "ERROR")] {
            timed(
                "seed INTERACTION_STATUS",
                sqlx::query("INSERT IGNORE INTO INTERACTION_STATUS (status_id, status_code) VALUES (?, ?)")
                    .bind(id)
                    .bind(code)
                    .execute(&self.pool),
            )
            .await?;
        }

        for area in crate::coord_transform::default_area_rows() {
            timed(
                "seed AREA",
                sqlx::query(
                    "INSERT IGNORE INTO AREA (area_id, area_name, x1, y1, x2, y2) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(area.area_id as i32)
                .bind(&area.area_name)
                .bind(area.x1)
                .bind(area.y1)
                .bind(area.x2)
                .bind(area.y2)
                .execute(&self.pool),
            )
            .await?;
        }

        // default every zone to AUTH_ONLY on first boot
        let seeded: i64 = timed(
            "count ACCESS_CONDITIONS",
            sqlx::query_scalar("SELECT COUNT(*) FROM ACCESS_CONDITIONS").fetch_one(&self.pool),
        )
        .await?;
        if seeded == 0 {
            for area_id in 1..=8 {
                timed(
                    "seed ACCESS_CONDITIONS",
                    sqlx::query(
                        "INSERT INTO ACCESS_CONDITIONS (area_id, authority_level_id) VALUES (?, 2)",
                    )
                    .bind(area_id)
                    .execute(&self.pool),
                )
                .await?;
            }
        }

        Ok(())
    }

    // ========================================
    // Access conditions
    // ========================================

    /// Load the 8-zone authority vector; missing rows default to AUTH_ONLY
    pub async fn load_access_conditions(&self) -> Result<[i32; 8]> {
        let rows = timed(
            "load access conditions",
            sqlx::query("SELECT area_id, authority_level_id FROM ACCESS_CONDITIONS ORDER BY area_id")
                .fetch_all(&self.pool),
        )
        .await?;

        let mut levels = [2i32; 8];
        for row in rows {
            let area_id: i32 = row.try_get("area_id")?;
            let level: i32 = row.try_get("authority_level_id")?;
            if (1..=8).contains(&area_id) && (1..=3).contains(&level) {
                levels[area_id as usize - 1] = level;
            }
        }
        Ok(levels)
    }

    /// Atomic upsert of all 8 zones; all-or-nothing, retried once
    pub async fn update_access_conditions(&self, levels: [i32; 8]) -> Result<()> {
        match self.try_update_access_conditions(levels).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Access condition update failed, retrying once");
                self.try_update_access_conditions(levels).await
            }
        }
    }

    async fn try_update_access_conditions(&self, levels: [i32; 8]) -> Result<()> {
        let pool = self.pool.clone();
        let fut = async move {
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM ACCESS_CONDITIONS")
                .execute(&mut *tx)
                .await?;
            for (i, level) in levels.iter().enumerate() {
                sqlx::query("INSERT INTO ACCESS_CONDITIONS (area_id, authority_level_id) VALUES (?, ?)")
                    .bind(i as i32 + 1)
                    .bind(level)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        };
        timed("update access conditions", fut).await
    }

    // ========================================
    // Areas
    // ========================================

    pub async fn get_area_list(&self) -> Result<Vec<Area>> {
        let rows = timed(
            "load area table",
            sqlx::query("SELECT area_id, area_name, x1, y1, x2, y2 FROM AREA ORDER BY area_id")
                .fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Area {
                    area_id: row.try_get::<i32, _>("area_id")? as u8,
                    area_name: row.try_get("area_name")?,
                    x1: row.try_get("x1")?,
                    y1: row.try_get("y1")?,
                    x2: row.try_get("x2")?,
                    y2: row.try_get("y2")?,
                })
            })
            .collect()
    }

    // ========================================
    // First detections
    // ========================================

    /// Object ids already persisted; seeds the alerted set so a restart
    /// does not re-announce known objects.
    pub async fn known_object_ids(&self) -> Result<HashSet<i64>> {
        let rows = timed(
            "load known object ids",
            sqlx::query_scalar::<_, i64>("SELECT object_id FROM DETECTED_OBJECT")
                .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Persist a first detection. Duplicate object ids are ignored. Returns
    /// the stored relative image path (empty when no image was written).
    #[allow(clippy::too_many_arguments)]
    pub async fn save_first_detection(
        &self,
        object_id: i64,
        event_type: EventType,
        class: ObjectClass,
        area_id: Option<u8>,
        map_x: i32,
        map_y: i32,
        timestamp: DateTime<Utc>,
        image: Option<&[u8]>,
    ) -> Result<String> {
        let inserted = match self.insert_detected_object(object_id, class).await {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::warn!(object_id = object_id, error = %e, "Object insert failed, retrying once");
                self.insert_detected_object(object_id, class).await?
            }
        };
        if !inserted {
            tracing::debug!(object_id = object_id, "Object already persisted, skipping");
            return Ok(String::new());
        }

        // image write failure degrades to an empty path
        let img_path = match image {
            Some(bytes) => match self.write_image(object_id, &timestamp, bytes).await {
                Ok(path) => path,
                Err(e) => {
                    tracing::error!(object_id = object_id, error = %e, "Image write failed");
                    String::new()
                }
            },
            None => String::new(),
        };

        timed(
            "insert detect event",
            sqlx::query(
                "INSERT INTO DETECT_EVENT
                 (event_type_id, object_id, object_type_id, map_x, map_y, area_id, timestamp, img_path)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event_type.type_id())
            .bind(object_id)
            .bind(class.type_id())
            .bind(map_x as f64)
            .bind(map_y as f64)
            .bind(area_id.map(|id| id as i32))
            .bind(timestamp)
            .bind(&img_path)
            .execute(&self.pool),
        )
        .await?;

        tracing::info!(
            object_id = object_id,
            class = %class.name(),
            event_type = %event_type.name(),
            img_path = %img_path,
            "First detection saved"
        );
        Ok(img_path)
    }

    /// INSERT IGNORE; true when the row was new
    async fn insert_detected_object(&self, object_id: i64, class: ObjectClass) -> Result<bool> {
        let result = timed(
            "insert detected object",
            sqlx::query("INSERT IGNORE INTO DETECTED_OBJECT (object_id, object_type_id) VALUES (?, ?)")
                .bind(object_id)
                .bind(class.type_id())
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn write_image(
        &self,
        object_id: i64,
        timestamp: &DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<String> {
        fs::create_dir_all(&self.img_dir).await?;
        let filename = image_filename(object_id, timestamp);
        fs::write(self.img_dir.join(&filename), bytes).await?;
        Ok(filename)
    }

    /// Load a stored crop image by its relative path
    pub async fn load_image(&self, relative_path: &str) -> Result<Vec<u8>> {
        if relative_path.is_empty() {
            return Err(Error::NotFound("no image path recorded".into()));
        }
        Ok(fs::read(self.img_dir.join(relative_path)).await?)
    }

    /// Most recent event for an object id, for MC_OD / LC_OI
    pub async fn get_event_by_object_id(&self, object_id: i64) -> Result<Option<ObjectEventDetail>> {
        let row = timed(
            "load object detail",
            sqlx::query(
                "SELECT de.object_id, ot.object_type_name, a.area_name, de.timestamp, de.img_path
                 FROM DETECT_EVENT de
                 JOIN OBJECT_TYPE ot ON de.object_type_id = ot.object_type_id
                 LEFT JOIN AREA a ON de.area_id = a.area_id
                 WHERE de.object_id = ?
                 ORDER BY de.timestamp DESC
                 LIMIT 1",
            )
            .bind(object_id)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(|row: MySqlRow| {
            Ok(ObjectEventDetail {
                object_id: row.try_get("object_id")?,
                object_type_name: row.try_get("object_type_name")?,
                area_name: row
                    .try_get::<Option<String>, _>("area_name")?
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                timestamp: utc(row.try_get("timestamp")?),
                img_path: row.try_get("img_path")?,
            })
        })
        .transpose()
    }

    // ========================================
    // History queries
    // ========================================

    /// Detection events in a date range (inclusive days), optionally
    /// restricted to the given event type ids
    pub async fn query_history(
        &self,
        from: &str,
        to: &str,
        types: &[i32],
    ) -> Result<Vec<HistoryEvent>> {
        let mut sql = String::from(
            "SELECT et.event_type_name, de.object_id, ot.object_type_name, a.area_name, de.timestamp
             FROM DETECT_EVENT de
             JOIN EVENT_TYPE et ON de.event_type_id = et.event_type_id
             JOIN OBJECT_TYPE ot ON de.object_type_id = ot.object_type_id
             LEFT JOIN AREA a ON de.area_id = a.area_id
             WHERE de.timestamp >= ? AND de.timestamp < DATE_ADD(?, INTERVAL 1 DAY)",
        );
        if !types.is_empty() {
            let ids = types
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            sql.push_str(&format!(" AND de.event_type_id IN ({ids})"));
        }
        sql.push_str(" ORDER BY de.timestamp DESC");

        let rows = timed(
            "query event history",
            sqlx::query(&sql).bind(from).bind(to).fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryEvent {
                    event_type_name: row.try_get("event_type_name")?,
                    object_id: row.try_get("object_id")?,
                    object_type_name: row.try_get("object_type_name")?,
                    area_name: row
                        .try_get::<Option<String>, _>("area_name")?
                        .unwrap_or_else(|| "UNKNOWN".to_string()),
                    timestamp: utc(row.try_get("timestamp")?),
                })
            })
            .collect()
    }

    // ========================================
    // Bird risk
    // ========================================

    /// Append a level change to the bird-risk log
    pub async fn append_bird_risk(
        &self,
        prev: BirdRiskLevel,
        curr: BirdRiskLevel,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        timed(
            "append bird risk",
            sqlx::query(
                "INSERT INTO BIRD_RISK_LOG (prev_level_id, curr_level_id, timestamp) VALUES (?, ?, ?)",
            )
            .bind(prev.level_id())
            .bind(curr.level_id())
            .bind(timestamp)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Latest recorded level, if any
    pub async fn get_latest_bird_risk(&self) -> Result<Option<BirdRiskLevel>> {
        let level: Option<i32> = timed(
            "load latest bird risk",
            sqlx::query_scalar(
                "SELECT curr_level_id FROM BIRD_RISK_LOG ORDER BY timestamp DESC, id DESC LIMIT 1",
            )
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(level.and_then(BirdRiskLevel::from_id))
    }

    /// Bird-risk level changes in a date range
    pub async fn query_bird_risk_history(&self, from: &str, to: &str) -> Result<Vec<BirdRiskEntry>> {
        let rows = timed(
            "query bird risk history",
            sqlx::query(
                "SELECT curr_level_id, timestamp FROM BIRD_RISK_LOG
                 WHERE timestamp >= ? AND timestamp < DATE_ADD(?, INTERVAL 1 DAY)
                 ORDER BY timestamp DESC",
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(BirdRiskEntry {
                    level_id: row.try_get("curr_level_id")?,
                    timestamp: utc(row.try_get("timestamp")?),
                })
            })
            .collect()
    }

    // ========================================
    // Interaction log
    // ========================================

    /// Record one pilot request/response pair
    pub async fn add_interaction_log(
        &self,
        request_id: i32,
        response_id: i32,
        request_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
    ) -> Result<()> {
        timed(
            "append interaction log",
            sqlx::query(
                "INSERT INTO INTERACTION_LOG (request_id, response_id, request_time, response_time, status_id)
                 VALUES (?, ?, ?, ?, 1)",
            )
            .bind(request_id)
            .bind(response_id)
            .bind(request_time)
            .bind(response_time)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Pilot interactions in a date range
    pub async fn query_interaction_history(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<InteractionEntry>> {
        let rows = timed(
            "query interaction history",
            sqlx::query(
                "SELECT request_id, response_id, request_time, response_time FROM INTERACTION_LOG
                 WHERE request_time >= ? AND request_time < DATE_ADD(?, INTERVAL 1 DAY)
                 ORDER BY request_time DESC",
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(InteractionEntry {
                    request_id: row.try_get("request_id")?,
                    response_id: row.try_get("response_id")?,
                    request_time: utc(row.try_get("request_time")?),
                    response_time: utc(row.try_get("response_time")?),
                })
            })
            .collect()
    }
}
