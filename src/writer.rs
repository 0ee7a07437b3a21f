//! Idempotent workout writes.
//!
//! The writer never updates or deletes. The first record written for a date is
//! the one that stays; later records for the same date are skipped as
//! duplicates. Store failures are reported as a skip outcome and never stop
//! the batch.

use crate::error::Error;
use crate::store::{NewWorkout, WorkoutStore};
use tracing::{debug, info, instrument, warn};

/// Why a record was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A record for the same date already exists.
    Duplicate,
    /// The store failed for a reason other than uniqueness.
    Error,
}

/// Result of writing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new row was stored.
    Inserted,
    /// Nothing was stored.
    Skipped(SkipReason),
}

impl WriteOutcome {
    /// Returns `true` if a new row was stored.
    #[must_use]
    pub fn is_inserted(self) -> bool {
        self == Self::Inserted
    }
}

/// Writes workouts into a [`WorkoutStore`] at most once per date.
///
/// ```
/// use chrono::NaiveDate;
/// use workout_sync::{IdempotentWriter, MemoryStore, NewWorkout, SkipReason, WorkoutMetrics, WriteOutcome};
///
/// # async fn example() {
/// let store = MemoryStore::new();
/// let writer = IdempotentWriter::new(&store);
/// let workout = NewWorkout {
///     workout_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
///     metrics: WorkoutMetrics::default(),
///     email_subject: "Your workout summary".into(),
/// };
///
/// assert_eq!(writer.write(&workout).await, WriteOutcome::Inserted);
/// assert_eq!(writer.write(&workout).await, WriteOutcome::Skipped(SkipReason::Duplicate));
/// # }
/// ```
#[derive(Debug)]
pub struct IdempotentWriter<'a, S: WorkoutStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: WorkoutStore + ?Sized> IdempotentWriter<'a, S> {
    /// Creates a writer over `store`.
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Writes `workout` unless its date is already stored.
    #[instrument(
        name = "writer::write",
        skip_all,
        fields(workout_date = %workout.workout_date)
    )]
    pub async fn write(&self, workout: &NewWorkout) -> WriteOutcome {
        match self.try_write(workout).await {
            Ok(true) => {
                info!(subject = %workout.email_subject, "Workout inserted");
                WriteOutcome::Inserted
            }
            Ok(false) | Err(Error::DuplicateDate { .. }) => {
                debug!("Workout already stored");
                WriteOutcome::Skipped(SkipReason::Duplicate)
            }
            Err(e) => {
                warn!(error = %e, "Workout write failed");
                WriteOutcome::Skipped(SkipReason::Error)
            }
        }
    }

    async fn try_write(&self, workout: &NewWorkout) -> crate::Result<bool> {
        if self.store.find_by_date(workout.workout_date).await?.is_some() {
            return Ok(false);
        }
        self.store.insert_if_absent(workout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::WorkoutMetrics;
    use crate::store::{MemoryStore, SqliteStore, WorkoutRecord};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    fn workout(day: u32) -> NewWorkout {
        NewWorkout {
            workout_date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            metrics: WorkoutMetrics {
                calories: Some(400 + day),
                ..WorkoutMetrics::default()
            },
            email_subject: format!("workout {day}"),
        }
    }

    /// Store whose reads succeed empty and whose inserts fail with a fixed error.
    struct FailingStore {
        duplicate: bool,
    }

    #[async_trait]
    impl WorkoutStore for FailingStore {
        async fn find_by_date(&self, _date: NaiveDate) -> crate::Result<Option<WorkoutRecord>> {
            Ok(None)
        }

        async fn insert_if_absent(&self, workout: &NewWorkout) -> crate::Result<bool> {
            if self.duplicate {
                Err(Error::DuplicateDate {
                    date: workout.workout_date,
                })
            } else {
                Err(Error::Store {
                    operation: "insert",
                    source: sqlx::Error::PoolTimedOut,
                })
            }
        }

        async fn all(&self) -> crate::Result<Vec<WorkoutRecord>> {
            Ok(Vec::new())
        }
    }

    /// Store that never sees a row on lookup but always loses the insert,
    /// as when another run writes the date in between.
    struct RaceLostStore;

    #[async_trait]
    impl WorkoutStore for RaceLostStore {
        async fn find_by_date(&self, _date: NaiveDate) -> crate::Result<Option<WorkoutRecord>> {
            Ok(None)
        }

        async fn insert_if_absent(&self, _workout: &NewWorkout) -> crate::Result<bool> {
            Ok(false)
        }

        async fn all(&self) -> crate::Result<Vec<WorkoutRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_first_write_inserts() {
        let store = MemoryStore::new();
        let writer = IdempotentWriter::new(&store);

        assert_eq!(writer.write(&workout(1)).await, WriteOutcome::Inserted);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_write_is_duplicate() {
        let store = MemoryStore::new();
        let writer = IdempotentWriter::new(&store);

        writer.write(&workout(2)).await;
        let mut again = workout(2);
        again.metrics.calories = Some(1);

        assert_eq!(
            writer.write(&again).await,
            WriteOutcome::Skipped(SkipReason::Duplicate)
        );

        let stored = store.find_by_date(again.workout_date).await.unwrap();
        assert_eq!(stored.and_then(|r| r.calories), Some(402));
    }

    #[tokio::test]
    async fn test_uniqueness_violation_is_duplicate() {
        let store = FailingStore { duplicate: true };
        let writer = IdempotentWriter::new(&store);

        assert_eq!(
            writer.write(&workout(3)).await,
            WriteOutcome::Skipped(SkipReason::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_store_error_is_skipped() {
        let store = FailingStore { duplicate: false };
        let writer = IdempotentWriter::new(&store);

        let outcome = writer.write(&workout(4)).await;
        assert_eq!(outcome, WriteOutcome::Skipped(SkipReason::Error));
        assert!(!outcome.is_inserted());
    }

    #[tokio::test]
    async fn test_lost_insert_race_is_duplicate() {
        let store = RaceLostStore;
        let writer = IdempotentWriter::new(&store);

        assert_eq!(
            writer.write(&workout(6)).await,
            WriteOutcome::Skipped(SkipReason::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_store_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("workouts.db").display());
        let store = SqliteStore::connect(&url).await.unwrap();

        let first = IdempotentWriter::new(&store);
        let second = IdempotentWriter::new(&store);
        let one = workout(8);
        let mut other = workout(8);
        other.metrics.calories = Some(1);

        let (a, b) = tokio::join!(first.write(&one), second.write(&other));

        let mut outcomes = [a, b];
        outcomes.sort_by_key(|o| !o.is_inserted());
        assert_eq!(
            outcomes,
            [
                WriteOutcome::Inserted,
                WriteOutcome::Skipped(SkipReason::Duplicate)
            ]
        );
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_works_through_trait_object() {
        let store = MemoryStore::new();
        let dyn_store: &dyn WorkoutStore = &store;
        let writer = IdempotentWriter::new(dyn_store);

        assert!(writer.write(&workout(5)).await.is_inserted());
    }
}
