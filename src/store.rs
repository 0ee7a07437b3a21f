//! Workout persistence.
//!
//! A store holds at most one [`WorkoutRecord`] per `workout_date`. The pipeline
//! only ever looks records up by date and inserts new ones; it never updates or
//! deletes. Two implementations are provided:
//!
//! - [`SqliteStore`]: `sqlx` over SQLite with a `UNIQUE(workout_date)` constraint
//! - [`MemoryStore`]: an in-process map, for tests and dry runs

use crate::error::{Error, Result};
use crate::extractor::WorkoutMetrics;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// A persisted workout.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WorkoutRecord {
    /// Calendar date of the session; unique across the store.
    pub workout_date: NaiveDate,
    /// Treadmill distance in miles.
    pub treadmill_distance: Option<f64>,
    /// Rower distance in meters.
    pub rower_distance: Option<u32>,
    /// Splat points earned.
    pub splat_points: Option<u8>,
    /// Calories burned.
    pub calories: Option<u32>,
    /// Subject of the source email.
    pub email_subject: String,
    /// When the store accepted the record.
    pub created_at: DateTime<Utc>,
}

/// A workout waiting to be written. The store assigns `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewWorkout {
    /// Calendar date of the session.
    pub workout_date: NaiveDate,
    /// Extracted metrics; all of them may be empty.
    pub metrics: WorkoutMetrics,
    /// Subject of the source email.
    pub email_subject: String,
}

impl NewWorkout {
    fn into_record(self, created_at: DateTime<Utc>) -> WorkoutRecord {
        WorkoutRecord {
            workout_date: self.workout_date,
            treadmill_distance: self.metrics.treadmill_distance,
            rower_distance: self.metrics.rower_distance,
            splat_points: self.metrics.splat_points,
            calories: self.metrics.calories,
            email_subject: self.email_subject,
            created_at,
        }
    }
}

/// Storage for workout records, keyed by date.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    /// Returns the record for `date`, if any.
    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<WorkoutRecord>>;

    /// Inserts `workout` unless a record for its date exists.
    ///
    /// Returns `true` if a row was written and `false` if the date was taken.
    /// The check and the write are a single atomic step.
    async fn insert_if_absent(&self, workout: &NewWorkout) -> Result<bool>;

    /// Returns all records ordered by date.
    async fn all(&self) -> Result<Vec<WorkoutRecord>>;
}

const SELECT_COLUMNS: &str = "SELECT workout_date, treadmill_distance, rower_distance, \
     splat_points, calories, email_subject, created_at FROM workouts";

const INSERT_SQL: &str = "INSERT INTO workouts \
     (workout_date, treadmill_distance, rower_distance, splat_points, calories, email_subject, created_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?)";

const INSERT_IF_ABSENT_SQL: &str = "INSERT INTO workouts \
     (workout_date, treadmill_distance, rower_distance, splat_points, calories, email_subject, created_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(workout_date) DO NOTHING";

/// SQLite-backed workout store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `database_url` and ensures the schema.
    ///
    /// Accepts `sqlite://path/to/file.db` URLs and `sqlite::memory:`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the URL is invalid or the database cannot be opened.
    #[instrument(name = "SqliteStore::connect", skip_all, fields(database_url = %database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|source| Error::Store {
                operation: "connect",
                source,
            })?
            .create_if_missing(true);

        // Every connection to an in-memory database gets its own empty database,
        // so the pool must hold exactly one that is never reaped
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|source| Error::Store {
                operation: "connect",
                source,
            })?;

        let store = Self { pool };
        store.init().await?;

        info!("Workout store ready");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if SQLite cannot be initialized.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS workouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workout_date TEXT NOT NULL UNIQUE,
                treadmill_distance REAL,
                rower_distance INTEGER CHECK (rower_distance >= 0),
                splat_points INTEGER CHECK (splat_points >= 0),
                calories INTEGER CHECK (calories >= 0),
                email_subject TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|source| Error::Store {
            operation: "create schema",
            source,
        })?;

        debug!("Workouts table ensured");
        Ok(())
    }

    /// Inserts `workout`, failing with [`Error::DuplicateDate`] if its date exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateDate`] on a uniqueness violation and
    /// [`Error::Store`] on any other database error.
    pub async fn insert(&self, workout: &NewWorkout) -> Result<()> {
        self.execute_insert(INSERT_SQL, workout).await?;
        Ok(())
    }

    async fn execute_insert(&self, sql: &str, workout: &NewWorkout) -> Result<SqliteQueryResult> {
        sqlx::query(sql)
            .bind(workout.workout_date)
            .bind(workout.metrics.treadmill_distance)
            .bind(workout.metrics.rower_distance)
            .bind(workout.metrics.splat_points)
            .bind(workout.metrics.calories)
            .bind(&workout.email_subject)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|source| Error::from_store("insert", workout.workout_date, source))
    }

    /// Returns the underlying pool for running queries.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl WorkoutStore for SqliteStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<WorkoutRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE workout_date = ?");
        sqlx::query_as::<_, WorkoutRecord>(&sql)
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| Error::Store {
                operation: "select by date",
                source,
            })
    }

    async fn insert_if_absent(&self, workout: &NewWorkout) -> Result<bool> {
        let result = self.execute_insert(INSERT_IF_ABSENT_SQL, workout).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn all(&self) -> Result<Vec<WorkoutRecord>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY workout_date");
        sqlx::query_as::<_, WorkoutRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| Error::Store {
                operation: "select all",
                source,
            })
    }
}

/// In-memory workout store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<NaiveDate, WorkoutRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Returns `true` if nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl WorkoutStore for MemoryStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<WorkoutRecord>> {
        Ok(self.records.lock().await.get(&date).cloned())
    }

    async fn insert_if_absent(&self, workout: &NewWorkout) -> Result<bool> {
        let mut records = self.records.lock().await;
        if records.contains_key(&workout.workout_date) {
            return Ok(false);
        }
        records.insert(
            workout.workout_date,
            workout.clone().into_record(Utc::now()),
        );
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<WorkoutRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}
