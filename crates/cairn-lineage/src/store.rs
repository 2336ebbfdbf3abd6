//! Persistence operations for the provenance graph.
//!
//! Writes are idempotent: entities are keyed by content hash and inserted
//! with `ON CONFLICT DO NOTHING`, and every edge relation has a composite
//! primary key with the same conflict clause. Repeated observations of the
//! same fact are therefore normal, not errors.
//!
//! Reads return rows in insertion order.

use cairn_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use cairn_engine::Crash;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::LineageError;

/// A row from the `entities` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Content hash of the fact.
    pub entity_id: String,
    /// Event type name.
    pub entity_type: String,
    /// Canonical JSON payload.
    pub data: String,
    /// When this entity was first recorded.
    pub first_seen_at: String,
}

/// A row from the `activities` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub activity_id: String,
    /// Name of the listener that ran.
    pub activity_type: String,
    pub start_time: String,
    /// `None` while the activity is still running.
    pub end_time: Option<String>,
    pub crash: Option<Crash>,
}

/// Row counts for each provenance relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineageCounts {
    pub entities: i64,
    pub activities: i64,
    pub used: i64,
    pub generated: i64,
    pub derived: i64,
}

/// SQLite-backed provenance graph.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Clone)]
pub struct LineageStore {
    pool: DbPool,
}

const ENTITY_COLUMNS: &str = "e.entity_id, e.entity_type, e.data, e.first_seen_at";
const ACTIVITY_COLUMNS: &str =
    "a.activity_id, a.activity_type, a.start_time, a.end_time, a.crash_message, a.crash_frames_json";

impl LineageStore {
    /// Wraps a pool whose database already has migrations applied.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Opens (or creates) the database at `path` and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::PoolInit` if the pool cannot be built,
    /// `LineageError::Pool` if no connection can be checked out, or
    /// `LineageError::Migration` if the schema cannot be brought up to date.
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self, LineageError> {
        let pool = create_pool(path, settings)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            if applied > 0 {
                tracing::info!(count = applied, path, "applied lineage migrations");
            }
        }
        Ok(Self { pool })
    }

    /// Opens a private in-memory lineage database.
    ///
    /// # Errors
    ///
    /// See [`LineageStore::open`].
    pub fn open_in_memory() -> Result<Self, LineageError> {
        Self::open(":memory:", DbRuntimeSettings::default())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, LineageError> {
        Ok(self.pool.get()?)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Records an entity. Re-recording the same `entity_id` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn record_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
        data: &str,
    ) -> Result<(), LineageError> {
        self.conn()?.execute(
            "INSERT INTO entities (entity_id, entity_type, data)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (entity_id) DO NOTHING",
            params![entity_id, entity_type, data],
        )?;
        Ok(())
    }

    /// Records the start of a listener invocation.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn record_activity_started(
        &self,
        activity_id: &str,
        activity_type: &str,
        start_time: &str,
    ) -> Result<(), LineageError> {
        self.conn()?.execute(
            "INSERT INTO activities (activity_id, activity_type, start_time)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (activity_id) DO NOTHING",
            params![activity_id, activity_type, start_time],
        )?;
        Ok(())
    }

    /// Sets the end time of an activity.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn record_activity_ended(&self, activity_id: &str, end_time: &str) -> Result<(), LineageError> {
        let updated = self.conn()?.execute(
            "UPDATE activities SET end_time = ?1 WHERE activity_id = ?2",
            params![end_time, activity_id],
        )?;
        if updated == 0 {
            tracing::warn!(activity_id, "end recorded for unknown activity");
        }
        Ok(())
    }

    /// Attaches a crash record to an activity.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Serialization` if the frames cannot be encoded
    /// or `LineageError::Database` on SQL failure.
    pub fn record_activity_crashed(&self, activity_id: &str, crash: &Crash) -> Result<(), LineageError> {
        let frames_json = serde_json::to_string(&crash.frames)?;
        self.conn()?.execute(
            "UPDATE activities SET crash_message = ?1, crash_frames_json = ?2
             WHERE activity_id = ?3",
            params![crash.message, frames_json, activity_id],
        )?;
        Ok(())
    }

    /// Records that an activity consumed an entity.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn record_used(&self, activity_id: &str, entity_id: &str) -> Result<(), LineageError> {
        self.conn()?.execute(
            "INSERT INTO used (activity_id, entity_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![activity_id, entity_id],
        )?;
        Ok(())
    }

    /// Records that an activity produced an entity.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn record_generated(&self, entity_id: &str, activity_id: &str) -> Result<(), LineageError> {
        self.conn()?.execute(
            "INSERT INTO was_generated_by (entity_id, activity_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![entity_id, activity_id],
        )?;
        Ok(())
    }

    /// Records that `derived_entity_id` was derived from `source_entity_id`.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn record_derived(
        &self,
        source_entity_id: &str,
        derived_entity_id: &str,
    ) -> Result<(), LineageError> {
        self.conn()?.execute(
            "INSERT INTO was_derived_from (source_entity_id, derived_entity_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![source_entity_id, derived_entity_id],
        )?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Fetches one activity's timing and crash record.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure or
    /// `LineageError::Serialization` if a stored crash cannot be decoded.
    pub fn get_activity(&self, activity_id: &str) -> Result<Option<Activity>, LineageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {ACTIVITY_COLUMNS} FROM activities a WHERE a.activity_id = ?1"),
                [activity_id],
                raw_activity,
            )
            .optional()?;
        row.map(RawActivity::into_activity).transpose()
    }

    /// Fetches one entity by content hash.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, LineageError> {
        let conn = self.conn()?;
        let entity = conn
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.entity_id = ?1"),
                [entity_id],
                map_entity,
            )
            .optional()?;
        Ok(entity)
    }

    /// All entities directly derived from `entity_id`, in derivation order.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn entities_derived_from(&self, entity_id: &str) -> Result<Vec<Entity>, LineageError> {
        self.query_entities(
            &format!(
                "SELECT {ENTITY_COLUMNS}
                 FROM was_derived_from d
                 JOIN entities e ON e.entity_id = d.derived_entity_id
                 WHERE d.source_entity_id = ?1
                 ORDER BY d.rowid ASC"
            ),
            entity_id,
        )
    }

    /// All entities of one event type, in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn entities_by_type(&self, entity_type: &str) -> Result<Vec<Entity>, LineageError> {
        self.query_entities(
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM entities e
                 WHERE e.entity_type = ?1
                 ORDER BY e.rowid ASC"
            ),
            entity_type,
        )
    }

    /// Activities that consumed `entity_id`, in start order.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure or
    /// `LineageError::Serialization` if a stored crash cannot be decoded.
    pub fn activities_using(&self, entity_id: &str) -> Result<Vec<Activity>, LineageError> {
        self.query_activities(
            &format!(
                "SELECT {ACTIVITY_COLUMNS}
                 FROM used u
                 JOIN activities a ON a.activity_id = u.activity_id
                 WHERE u.entity_id = ?1
                 ORDER BY a.rowid ASC"
            ),
            Some(entity_id),
        )
    }

    /// Every activity that recorded a crash, in start order.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure or
    /// `LineageError::Serialization` if a stored crash cannot be decoded.
    pub fn crashed_activities(&self) -> Result<Vec<Activity>, LineageError> {
        self.query_activities(
            &format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities a
                 WHERE a.crash_message IS NOT NULL
                 ORDER BY a.rowid ASC"
            ),
            None,
        )
    }

    /// Row counts for every relation.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::Database` on SQL failure.
    pub fn counts(&self) -> Result<LineageCounts, LineageError> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<i64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok(LineageCounts {
            entities: count("entities")?,
            activities: count("activities")?,
            used: count("used")?,
            generated: count("was_generated_by")?,
            derived: count("was_derived_from")?,
        })
    }

    fn query_entities(&self, sql: &str, key: &str) -> Result<Vec<Entity>, LineageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([key], map_entity)?;

        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?);
        }
        Ok(entities)
    }

    fn query_activities(&self, sql: &str, key: Option<&str>) -> Result<Vec<Activity>, LineageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let raw: Vec<RawActivity> = match key {
            Some(key) => stmt
                .query_map([key], raw_activity)?
                .collect::<Result<_, _>>()?,
            None => stmt.query_map([], raw_activity)?.collect::<Result<_, _>>()?,
        };
        raw.into_iter().map(RawActivity::into_activity).collect()
    }
}

fn map_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        entity_id: row.get(0)?,
        entity_type: row.get(1)?,
        data: row.get(2)?,
        first_seen_at: row.get(3)?,
    })
}

struct RawActivity {
    activity_id: String,
    activity_type: String,
    start_time: String,
    end_time: Option<String>,
    crash_message: Option<String>,
    crash_frames_json: Option<String>,
}

fn raw_activity(row: &Row<'_>) -> rusqlite::Result<RawActivity> {
    Ok(RawActivity {
        activity_id: row.get(0)?,
        activity_type: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        crash_message: row.get(4)?,
        crash_frames_json: row.get(5)?,
    })
}

impl RawActivity {
    fn into_activity(self) -> Result<Activity, LineageError> {
        let crash = match self.crash_message {
            Some(message) => {
                let frames = match self.crash_frames_json {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                };
                Some(Crash { message, frames })
            }
            None => None,
        };
        Ok(Activity {
            activity_id: self.activity_id,
            activity_type: self.activity_type,
            start_time: self.start_time,
            end_time: self.end_time,
            crash,
        })
    }
}
