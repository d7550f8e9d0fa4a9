//! SQLite-backed record store.
//!
//! Uses a simple `Arc<Mutex<Connection>>`: SQLite allows a single writer, and
//! every batch commit runs inside one transaction on that connection.
//! The run lock lives in the database itself so that separate processes
//! opening the same file exclude each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Params, Row, TransactionBehavior,
};
use tracing::{debug, info, warn};

use trapdata_models::{
    BoundingBox, DetectedObject, DetectionId, ImageId, MonitoringSession, ProcessingStatus, Scope,
    SessionId, SourceImage, Stage, POSITIVE_BINARY_LABEL,
};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::records::{
    ClassificationOutcome, ClearSummary, LocalizationOutcome, LockPurpose, NewImage, RunLock,
    StageCounts, TrackAssignment,
};
use crate::schema;
use crate::store::RecordStore;

const IMAGE_COLUMNS: &str =
    "i.id, i.session_id, i.path, i.captured_at, i.queued_at, i.status, i.processed_at, i.last_error";

const DETECTION_COLUMNS: &str = "d.id, d.image_id, d.x1, d.y1, d.x2, d.y2, d.detection_score, \
     d.binary_label, d.binary_score, d.binary_status, d.specific_label, d.specific_score, \
     d.specific_status, d.cropped_path, d.track_id, d.last_error";

const SESSION_SELECT: &str = "SELECT s.id, s.base_directory, s.day, MIN(i.captured_at), \
     MAX(i.captured_at), COUNT(i.id) \
     FROM monitoring_sessions s LEFT JOIN images i ON i.session_id = s.id";

/// Thread-safe SQLite record store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    config: StoreConfig,
}

impl SqliteStore {
    /// Open (or create) the database described by `config` and apply migrations.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        info!(path = ?config.path, "Opening record store");

        let conn = if config.is_memory() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::Connection(format!("Failed to create directory: {}", e))
                    })?;
                }
            }
            Connection::open(&config.path)?
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        };
        store.initialize()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn memory() -> StoreResult<Self> {
        Self::open(StoreConfig::memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn with_connection_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    fn initialize(&self) -> StoreResult<()> {
        self.with_connection(|conn| {
            if self.config.wal_mode {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
            }
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(&format!(
                "PRAGMA busy_timeout = {};",
                self.config.busy_timeout_ms
            ))?;
            schema::apply_migrations(conn)
        })
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn scope_param(scope: &Scope) -> Option<i64> {
    scope.session().map(SessionId::get)
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<ProcessingStatus> {
    let raw: String = row.get(idx)?;
    ProcessingStatus::from_db(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown processing status '{}'", raw).into(),
        )
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<SourceImage> {
    Ok(SourceImage {
        id: ImageId(row.get(0)?),
        session_id: SessionId(row.get(1)?),
        path: row.get(2)?,
        captured_at: row.get(3)?,
        queued_at: row.get(4)?,
        status: status_at(row, 5)?,
        processed_at: row.get(6)?,
        last_error: row.get(7)?,
    })
}

fn detection_from_row(row: &Row<'_>) -> rusqlite::Result<DetectedObject> {
    Ok(DetectedObject {
        id: DetectionId(row.get(0)?),
        image_id: ImageId(row.get(1)?),
        bbox: BoundingBox::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
        detection_score: row.get(6)?,
        binary_label: row.get(7)?,
        binary_score: row.get(8)?,
        binary_status: status_at(row, 9)?,
        specific_label: row.get(10)?,
        specific_score: row.get(11)?,
        specific_status: status_at(row, 12)?,
        cropped_path: row.get(13)?,
        track_id: row.get(14)?,
        last_error: row.get(15)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoringSession> {
    let count: i64 = row.get(5)?;
    Ok(MonitoringSession {
        id: SessionId(row.get(0)?),
        base_directory: row.get(1)?,
        day: row.get(2)?,
        start_time: row.get::<_, Option<DateTime<Utc>>>(3)?,
        end_time: row.get::<_, Option<DateTime<Utc>>>(4)?,
        image_count: count as u64,
    })
}

/// Status label used by localization counts for pending images outside the queue.
const UNQUEUED: &str = "unqueued";

fn counts_from_rows(conn: &Connection, sql: &str, params: impl Params) -> StoreResult<StageCounts> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = StageCounts::default();
    for row in rows {
        let (status, n) = row?;
        let n = n as u64;
        if status == UNQUEUED {
            counts.unqueued = n;
            continue;
        }
        match ProcessingStatus::from_db(&status) {
            Some(ProcessingStatus::Pending) => counts.pending = n,
            Some(ProcessingStatus::Done) => counts.done = n,
            Some(ProcessingStatus::Failed) => counts.failed = n,
            None => {
                return Err(StoreError::Corrupt(format!(
                    "unknown processing status '{}'",
                    status
                )))
            }
        }
    }
    Ok(counts)
}

fn read_lock(conn: &Connection) -> StoreResult<Option<RunLock>> {
    let lock = conn
        .query_row(
            "SELECT holder, purpose, acquired_at, heartbeat_at FROM run_lock WHERE id = 1",
            [],
            |row| {
                let purpose: String = row.get(1)?;
                Ok(RunLock {
                    holder: row.get(0)?,
                    purpose: purpose.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into())
                    })?,
                    acquired_at: row.get(2)?,
                    heartbeat_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(lock)
}

impl RecordStore for SqliteStore {
    fn get_or_create_session(&self, base_directory: &str, day: NaiveDate) -> StoreResult<SessionId> {
        self.with_connection(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO monitoring_sessions (base_directory, day) VALUES (?1, ?2)",
                params![base_directory, day],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM monitoring_sessions WHERE base_directory = ?1 AND day = ?2",
                params![base_directory, day],
                |row| row.get(0),
            )?;
            if inserted > 0 {
                info!(session_id = id, base_directory, %day, "Created monitoring session");
            }
            Ok(SessionId(id))
        })
    }

    fn insert_image(&self, image: &NewImage) -> StoreResult<Option<ImageId>> {
        self.with_connection(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO images (session_id, path, captured_at, status)
                 VALUES (?1, ?2, ?3, 'pending')",
                params![image.session_id.get(), image.path, image.captured_at],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            Ok(Some(ImageId(conn.last_insert_rowid())))
        })
    }

    fn enqueue(&self, scope: &Scope, limit: Option<usize>) -> StoreResult<u64> {
        self.with_connection(|conn| {
            // LIMIT -1 is unbounded in SQLite.
            let queued = conn.execute(
                "UPDATE images SET queued_at = ?2 WHERE id IN
                 (SELECT id FROM images
                  WHERE status = 'pending' AND queued_at IS NULL
                    AND (?1 IS NULL OR session_id = ?1)
                  ORDER BY id LIMIT ?3)",
                params![
                    scope_param(scope),
                    Utc::now(),
                    limit.map_or(-1, |n| n as i64)
                ],
            )?;
            info!(%scope, ?limit, queued, "Queued images");
            Ok(queued as u64)
        })
    }

    fn enqueue_images(&self, ids: &[ImageId]) -> StoreResult<u64> {
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let mut queued = 0;
            for id in ids {
                queued += tx.execute(
                    "UPDATE images SET queued_at = ?2
                     WHERE id = ?1 AND status = 'pending' AND queued_at IS NULL",
                    params![id.get(), now],
                )?;
            }
            tx.commit()?;
            info!(requested = ids.len(), queued, "Queued images by id");
            Ok(queued as u64)
        })
    }

    fn enqueue_sample(&self, scope: &Scope, sample_size: usize) -> StoreResult<u64> {
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let session = scope_param(scope);
            let in_queue: i64 = tx.query_row(
                "SELECT COUNT(*) FROM images
                 WHERE status = 'pending' AND queued_at IS NOT NULL
                   AND (?1 IS NULL OR session_id = ?1)",
                params![session],
                |row| row.get(0),
            )?;
            let wanted = (sample_size as i64).saturating_sub(in_queue);
            if wanted <= 0 {
                return Ok(0);
            }

            let queued = tx.execute(
                "UPDATE images SET queued_at = ?2 WHERE id IN
                 (SELECT id FROM images
                  WHERE status = 'pending' AND queued_at IS NULL
                    AND (?1 IS NULL OR session_id = ?1)
                  ORDER BY RANDOM() LIMIT ?3)",
                params![session, Utc::now(), wanted],
            )?;
            tx.commit()?;
            info!(%scope, sample_size, queued, "Queued image sample");
            Ok(queued as u64)
        })
    }

    fn sessions(&self) -> StoreResult<Vec<MonitoringSession>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} GROUP BY s.id ORDER BY s.day, s.id", SESSION_SELECT))?;
            let sessions = stmt
                .query_map([], session_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
    }

    fn session(&self, id: SessionId) -> StoreResult<Option<MonitoringSession>> {
        self.with_connection(|conn| {
            let session = conn
                .query_row(
                    &format!("{} WHERE s.id = ?1 GROUP BY s.id", SESSION_SELECT),
                    [id.get()],
                    session_from_row,
                )
                .optional()?;
            Ok(session)
        })
    }

    fn eligible_images(&self, scope: &Scope, limit: usize) -> StoreResult<Vec<ImageId>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM images
                 WHERE status = 'pending' AND queued_at IS NOT NULL
                   AND (?1 IS NULL OR session_id = ?1)
                 ORDER BY id LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(params![scope_param(scope), limit as i64], |row| {
                    Ok(ImageId(row.get(0)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    fn eligible_detections(
        &self,
        stage: Stage,
        scope: &Scope,
        limit: usize,
    ) -> StoreResult<Vec<DetectionId>> {
        let predicate = match stage {
            Stage::Localization => {
                return Err(StoreError::invalid_operation(
                    "localization selects images, not detections",
                ))
            }
            Stage::BinaryClassification => "d.binary_status = 'pending'",
            Stage::SpeciesClassification => {
                "d.binary_status = 'done' AND d.binary_label = ?3 AND d.specific_status = 'pending'"
            }
        };

        self.with_connection(|conn| {
            let sql = format!(
                "SELECT d.id FROM detections d JOIN images i ON i.id = d.image_id
                 WHERE {} AND (?1 IS NULL OR i.session_id = ?1)
                 ORDER BY d.id LIMIT ?2",
                predicate
            );
            let mut stmt = conn.prepare(&sql)?;
            let map = |row: &Row<'_>| -> rusqlite::Result<DetectionId> {
                Ok(DetectionId(row.get(0)?))
            };
            let ids = if stage == Stage::SpeciesClassification {
                stmt.query_map(
                    params![scope_param(scope), limit as i64, POSITIVE_BINARY_LABEL],
                    map,
                )?
                .collect::<Result<Vec<_>, _>>()?
            } else {
                stmt.query_map(params![scope_param(scope), limit as i64], map)?
                    .collect::<Result<Vec<_>, _>>()?
            };
            Ok(ids)
        })
    }

    fn images(&self, ids: &[ImageId]) -> StoreResult<Vec<SourceImage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM images i WHERE i.id IN ({}) ORDER BY i.id",
                IMAGE_COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let images = stmt
                .query_map(params_from_iter(ids.iter().map(|id| id.get())), image_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(images)
        })
    }

    fn detections_by_id(&self, ids: &[DetectionId]) -> StoreResult<Vec<DetectedObject>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM detections d WHERE d.id IN ({}) ORDER BY d.id",
                DETECTION_COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let detections = stmt
                .query_map(params_from_iter(ids.iter().map(|id| id.get())), detection_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(detections)
        })
    }

    fn detections(&self, scope: &Scope) -> StoreResult<Vec<DetectedObject>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM detections d JOIN images i ON i.id = d.image_id
                 WHERE ?1 IS NULL OR i.session_id = ?1
                 ORDER BY d.id",
                DETECTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let detections = stmt
                .query_map(params![scope_param(scope)], detection_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(detections)
        })
    }

    fn commit_localization(&self, batch: &[LocalizationOutcome]) -> StoreResult<()> {
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let mut created = 0usize;

            for outcome in batch {
                match outcome {
                    LocalizationOutcome::Detected {
                        image_id,
                        detections,
                    } => {
                        let updated = tx.execute(
                            "UPDATE images SET status = 'done', processed_at = ?2, last_error = NULL
                             WHERE id = ?1 AND status = 'pending'",
                            params![image_id.get(), now],
                        )?;
                        if updated == 0 {
                            return Err(StoreError::invalid_operation(format!(
                                "image {} is not pending localization",
                                image_id
                            )));
                        }
                        for detection in detections {
                            tx.execute(
                                "INSERT INTO detections
                                 (image_id, x1, y1, x2, y2, detection_score, cropped_path)
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                                params![
                                    image_id.get(),
                                    detection.bbox.x1,
                                    detection.bbox.y1,
                                    detection.bbox.x2,
                                    detection.bbox.y2,
                                    detection.score,
                                    detection.cropped_path,
                                ],
                            )?;
                            created += 1;
                        }
                    }
                    LocalizationOutcome::Failed { image_id, reason } => {
                        let updated = tx.execute(
                            "UPDATE images SET status = 'failed', processed_at = ?2, last_error = ?3
                             WHERE id = ?1 AND status = 'pending'",
                            params![image_id.get(), now, reason],
                        )?;
                        if updated == 0 {
                            return Err(StoreError::invalid_operation(format!(
                                "image {} is not pending localization",
                                image_id
                            )));
                        }
                    }
                }
            }

            tx.commit()?;
            debug!(images = batch.len(), detections = created, "Committed localization batch");
            Ok(())
        })
    }

    fn commit_classification(
        &self,
        stage: Stage,
        batch: &[ClassificationOutcome],
    ) -> StoreResult<()> {
        let (labeled_sql, failed_sql) = match stage {
            Stage::Localization => {
                return Err(StoreError::invalid_operation(
                    "localization results are committed with commit_localization",
                ))
            }
            Stage::BinaryClassification => (
                "UPDATE detections
                 SET binary_label = ?2, binary_score = ?3, binary_status = 'done', last_error = NULL
                 WHERE id = ?1 AND binary_status = 'pending'",
                "UPDATE detections SET binary_status = 'failed', last_error = ?2
                 WHERE id = ?1 AND binary_status = 'pending'",
            ),
            // The positive-label guard enforces that a specific label only
            // follows a positive binary label.
            Stage::SpeciesClassification => (
                "UPDATE detections
                 SET specific_label = ?2, specific_score = ?3, specific_status = 'done', last_error = NULL
                 WHERE id = ?1 AND specific_status = 'pending'
                   AND binary_status = 'done' AND binary_label = ?4",
                "UPDATE detections SET specific_status = 'failed', last_error = ?2
                 WHERE id = ?1 AND specific_status = 'pending'
                   AND binary_status = 'done' AND binary_label = ?3",
            ),
        };

        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;

            for outcome in batch {
                let updated = match outcome {
                    ClassificationOutcome::Labeled {
                        detection_id,
                        label,
                        score,
                    } => {
                        if stage == Stage::SpeciesClassification {
                            tx.execute(
                                labeled_sql,
                                params![detection_id.get(), label, score, POSITIVE_BINARY_LABEL],
                            )?
                        } else {
                            tx.execute(labeled_sql, params![detection_id.get(), label, score])?
                        }
                    }
                    ClassificationOutcome::Failed {
                        detection_id,
                        reason,
                    } => {
                        if stage == Stage::SpeciesClassification {
                            tx.execute(
                                failed_sql,
                                params![detection_id.get(), reason, POSITIVE_BINARY_LABEL],
                            )?
                        } else {
                            tx.execute(failed_sql, params![detection_id.get(), reason])?
                        }
                    }
                };
                if updated == 0 {
                    return Err(StoreError::invalid_operation(format!(
                        "detection {} is not eligible for {}",
                        outcome.detection_id(),
                        stage
                    )));
                }
            }

            tx.commit()?;
            debug!(%stage, detections = batch.len(), "Committed classification batch");
            Ok(())
        })
    }

    fn assign_tracks(&self, assignments: &[TrackAssignment]) -> StoreResult<()> {
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            for assignment in assignments {
                let updated = tx.execute(
                    "UPDATE detections SET track_id = ?2 WHERE id = ?1",
                    params![assignment.detection_id.get(), assignment.track_id],
                )?;
                if updated == 0 {
                    return Err(StoreError::not_found(format!(
                        "detection {}",
                        assignment.detection_id
                    )));
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn clear(&self, scope: &Scope) -> StoreResult<ClearSummary> {
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let session = scope_param(scope);

            let detections_deleted = tx.execute(
                "DELETE FROM detections WHERE image_id IN
                 (SELECT id FROM images WHERE ?1 IS NULL OR session_id = ?1)",
                params![session],
            )?;
            let images_reset = tx.execute(
                "UPDATE images
                 SET status = 'pending', processed_at = NULL, last_error = NULL, queued_at = ?2
                 WHERE ?1 IS NULL OR session_id = ?1",
                params![session, Utc::now()],
            )?;

            tx.commit()?;
            info!(
                %scope,
                images_reset,
                detections_deleted,
                "Cleared queue"
            );
            Ok(ClearSummary {
                images_reset: images_reset as u64,
                detections_deleted: detections_deleted as u64,
            })
        })
    }

    fn stage_counts(&self, stage: Stage, scope: &Scope) -> StoreResult<StageCounts> {
        let session = scope_param(scope);
        self.with_connection(|conn| match stage {
            Stage::Localization => counts_from_rows(
                conn,
                "SELECT CASE WHEN status = 'pending' AND queued_at IS NULL
                             THEN 'unqueued' ELSE status END,
                        COUNT(*)
                 FROM images
                 WHERE ?1 IS NULL OR session_id = ?1
                 GROUP BY 1",
                params![session],
            ),
            Stage::BinaryClassification => counts_from_rows(
                conn,
                "SELECT d.binary_status, COUNT(*) FROM detections d
                 JOIN images i ON i.id = d.image_id
                 WHERE ?1 IS NULL OR i.session_id = ?1
                 GROUP BY d.binary_status",
                params![session],
            ),
            Stage::SpeciesClassification => counts_from_rows(
                conn,
                "SELECT d.specific_status, COUNT(*) FROM detections d
                 JOIN images i ON i.id = d.image_id
                 WHERE (?1 IS NULL OR i.session_id = ?1)
                   AND d.binary_status = 'done' AND d.binary_label = ?2
                 GROUP BY d.specific_status",
                params![session, POSITIVE_BINARY_LABEL],
            ),
        })
    }

    fn acquire_run_lock(
        &self,
        holder: &str,
        purpose: LockPurpose,
        stale_after: Duration,
    ) -> StoreResult<()> {
        self.with_connection_mut(|conn| {
            // IMMEDIATE takes the database write lock up front, so two
            // processes cannot both see the lock as free.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = Utc::now();

            if let Some(current) = read_lock(&tx)? {
                if !current.is_stale_at(now, stale_after) {
                    return Err(StoreError::Locked {
                        holder: current.holder,
                        purpose: current.purpose.to_string(),
                    });
                }
                warn!(
                    stale_holder = %current.holder,
                    purpose = %current.purpose,
                    heartbeat_at = %current.heartbeat_at,
                    "Taking over stale run lock"
                );
            }

            tx.execute(
                "INSERT OR REPLACE INTO run_lock (id, holder, purpose, acquired_at, heartbeat_at)
                 VALUES (1, ?1, ?2, ?3, ?3)",
                params![holder, purpose.as_str(), now],
            )?;
            tx.commit()?;
            debug!(holder, %purpose, "Acquired run lock");
            Ok(())
        })
    }

    fn refresh_run_lock(&self, holder: &str) -> StoreResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE run_lock SET heartbeat_at = ?2 WHERE id = 1 AND holder = ?1",
                params![holder, Utc::now()],
            )?;
            if updated == 0 {
                return Err(StoreError::LockLost(holder.to_string()));
            }
            Ok(())
        })
    }

    fn release_run_lock(&self, holder: &str) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let deleted = conn.execute(
                "DELETE FROM run_lock WHERE id = 1 AND holder = ?1",
                params![holder],
            )?;
            if deleted > 0 {
                debug!(holder, "Released run lock");
            }
            Ok(deleted > 0)
        })
    }

    fn run_lock(&self) -> StoreResult<Option<RunLock>> {
        self.with_connection(read_lock)
    }
}
