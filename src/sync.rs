//! Sync orchestration.
//!
//! The [`WorkoutSync`] runs the pipeline once, in order:
//!
//! 1. Open a mailbox session
//! 2. Locate workout emails
//! 3. Retrieve and decode each one
//! 4. Close the session
//! 5. Extract metrics and write one record per date
//!
//! Every run returns a [`SyncReport`]. Failures before the write phase are
//! reported with the phase that failed. The session is closed on every path
//! that opened it.
//!
//! # Example
//!
//! ```no_run
//! use workout_sync::{SyncConfig, WorkoutSync};
//!
//! # async fn example() -> workout_sync::Result<()> {
//! let config = SyncConfig::from_env()?;
//! let sync = WorkoutSync::connect(config).await?;
//!
//! let report = sync.run().await;
//! println!("{}", report.message);
//! # Ok(())
//! # }
//! ```

use crate::config::SyncConfig;
use crate::error::Result;
use crate::extractor;
use crate::mailbox::{ImapProvider, Mailbox, MailboxProvider};
use crate::report::{SyncPhase, SyncReport};
use crate::retriever::{self, RawMessage};
use crate::search::{self, SearchFilter};
use crate::store::{NewWorkout, SqliteStore, WorkoutStore};
use crate::writer::IdempotentWriter;
use tracing::{debug, info, instrument, warn};

/// One-shot workout email sync.
///
/// Create with [`WorkoutSync::new`] for custom wiring, or
/// [`WorkoutSync::connect`] for IMAP plus SQLite.
#[derive(Debug)]
pub struct WorkoutSync<P, S> {
    provider: P,
    store: S,
    filter: SearchFilter,
}

impl WorkoutSync<ImapProvider, SqliteStore> {
    /// Builds the production pipeline: an IMAP provider and a SQLite store.
    ///
    /// No IMAP connection is made until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if the database cannot be opened.
    #[instrument(name = "WorkoutSync::connect", skip_all, fields(imap_host = %config.imap.imap_host))]
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        Ok(Self::new(ImapProvider::new(config.imap), store, config.filter))
    }
}

impl<P: MailboxProvider, S: WorkoutStore> WorkoutSync<P, S> {
    /// Creates a pipeline from its parts.
    #[must_use]
    pub fn new(provider: P, store: S, filter: SearchFilter) -> Self {
        Self {
            provider,
            store,
            filter,
        }
    }

    /// Returns the store records are written to.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the search filter.
    #[must_use]
    pub fn filter(&self) -> &SearchFilter {
        &self.filter
    }

    /// Runs the pipeline once.
    ///
    /// Never fails: errors are reported through [`SyncReport::success`],
    /// [`SyncReport::phase`] and [`SyncReport::details`].
    #[instrument(
        name = "WorkoutSync::run",
        skip_all,
        fields(sender = %self.filter.sender, subject = %self.filter.subject)
    )]
    pub async fn run(&self) -> SyncReport {
        let mut report = SyncReport::new();

        let mut mailbox = match self.provider.open().await {
            Ok(mailbox) => mailbox,
            Err(e) => {
                warn!(error = %e, "Failed to open mailbox");
                report.fail(SyncPhase::Connect, &e);
                return report;
            }
        };

        let uids = match search::locate(mailbox.as_mut(), &self.filter).await {
            Ok(uids) => uids,
            Err(e) => {
                warn!(error = %e, "Search failed");
                close_quietly(mailbox.as_mut()).await;
                report.fail(SyncPhase::Search, &e);
                return report;
            }
        };

        report.found = uids.len();
        if uids.is_empty() {
            close_quietly(mailbox.as_mut()).await;
            report.complete();
            info!("No workout emails found");
            return report;
        }

        let retrieval = match retriever::retrieve(mailbox.as_mut(), &uids).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                warn!(error = %e, "Retrieval aborted");
                close_quietly(mailbox.as_mut()).await;
                report.fail(SyncPhase::Fetch, &e);
                return report;
            }
        };

        close_quietly(mailbox.as_mut()).await;
        drop(mailbox);

        report.parsed = retrieval.messages.len();
        report.decode_failures = retrieval.failed;

        let writer = IdempotentWriter::new(&self.store);
        for message in retrieval.messages {
            let workout = to_new_workout(message);
            let outcome = writer.write(&workout).await;
            report.record(outcome);
        }

        report.complete();
        info!(
            found = report.found,
            parsed = report.parsed,
            inserted = report.inserted,
            skipped = report.skipped,
            "Sync finished"
        );
        report
    }
}

/// Extracts metrics and the workout date from one decoded message.
///
/// The workout date is the calendar date in the sender's own offset.
fn to_new_workout(message: RawMessage) -> NewWorkout {
    let metrics = extractor::extract(&message.body);
    let workout_date = message.received_date.date_naive();

    debug!(
        %workout_date,
        metrics_found = !metrics.is_empty(),
        "Extracted workout metrics"
    );

    NewWorkout {
        workout_date,
        metrics,
        email_subject: message.subject,
    }
}

/// Logs out, logging any failure instead of returning it.
async fn close_quietly(mailbox: &mut (dyn Mailbox + '_)) {
    if let Err(e) = mailbox.close().await {
        warn!(error = %e, "Failed to close mailbox session");
    }
}

/// Convenience wrapper: build the production pipeline from `config` and run it.
///
/// # Errors
///
/// Returns an error only if the store cannot be opened. Pipeline failures are
/// reported in the returned [`SyncReport`].
pub async fn sync_once(config: SyncConfig) -> Result<SyncReport> {
    let sync = WorkoutSync::connect(config).await?;
    Ok(sync.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mailbox::SessionState;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn email(date: &str, body: &str) -> Vec<u8> {
        format!(
            "From: studio@orangetheoryfitness.com\r\n\
             Subject: Your workout summary\r\n\
             Date: {date}\r\n\
             Content-Type: text/html\r\n\
             \r\n\
             {body}"
        )
        .into_bytes()
    }

    #[derive(Clone, Default)]
    struct Script {
        open_error: bool,
        search_error: bool,
        fault_on: Option<u32>,
        messages: Vec<(u32, Vec<u8>)>,
        closes: Arc<AtomicUsize>,
    }

    struct ScriptedMailbox {
        script: Script,
        state: SessionState,
    }

    #[async_trait]
    impl Mailbox for ScriptedMailbox {
        fn state(&self) -> SessionState {
            self.state
        }

        async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
            if self.script.search_error {
                return Err(Error::SearchTimeout {
                    timeout: std::time::Duration::from_secs(1),
                });
            }
            assert!(query.contains("FROM"));
            Ok(self.script.messages.iter().map(|(uid, _)| *uid).collect())
        }

        async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
            if self.script.fault_on == Some(uid) {
                return Err(Error::SessionClosed);
            }
            self.script
                .messages
                .iter()
                .find(|(id, _)| *id == uid)
                .map(|(_, raw)| raw.clone())
                .ok_or(Error::MessageNotFound { uid })
        }

        async fn close(&mut self) -> Result<()> {
            if self.state != SessionState::Disconnected {
                self.state = SessionState::Disconnected;
                self.script.closes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MailboxProvider for Script {
        async fn open(&self) -> Result<Box<dyn Mailbox>> {
            if self.open_error {
                return Err(Error::MissingCredentials { missing: "password" });
            }
            Ok(Box::new(ScriptedMailbox {
                script: self.clone(),
                state: SessionState::Ready,
            }))
        }
    }

    fn pipeline(script: Script) -> WorkoutSync<Script, MemoryStore> {
        WorkoutSync::new(script, MemoryStore::new(), SearchFilter::default())
    }

    #[tokio::test]
    async fn test_open_failure_reports_connect() {
        let sync = pipeline(Script {
            open_error: true,
            ..Script::default()
        });

        let report = sync.run().await;
        assert!(!report.success);
        assert_eq!(report.phase, Some(SyncPhase::Connect));
        assert_eq!(report.found, 0);
    }

    #[tokio::test]
    async fn test_search_failure_closes_session() {
        let script = Script {
            search_error: true,
            ..Script::default()
        };
        let closes = Arc::clone(&script.closes);

        let report = pipeline(script).run().await;
        assert_eq!(report.phase, Some(SyncPhase::Search));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_fault_reports_fetch() {
        let script = Script {
            fault_on: Some(2),
            messages: vec![
                (1, email("Tue, 5 Mar 2024 07:15:00 -0500", "1")),
                (2, email("Wed, 6 Mar 2024 07:15:00 -0500", "2")),
            ],
            ..Script::default()
        };
        let closes = Arc::clone(&script.closes);

        let sync = pipeline(script);
        let report = sync.run().await;
        assert_eq!(report.phase, Some(SyncPhase::Fetch));
        assert_eq!(report.found, 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(sync.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_mailbox_succeeds() {
        let script = Script::default();
        let closes = Arc::clone(&script.closes);

        let report = pipeline(script).run().await;
        assert!(report.success);
        assert_eq!(
            (report.found, report.parsed, report.inserted, report.skipped),
            (0, 0, 0, 0)
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_workout_date_uses_sender_offset() {
        // 23:30 at -0800 is already the next day in UTC
        let script = Script {
            messages: vec![(
                7,
                email("Fri, 1 Mar 2024 23:30:00 -0800", "500 CALORIES BURNED"),
            )],
            ..Script::default()
        };

        let sync = pipeline(script);
        let report = sync.run().await;
        assert_eq!(report.inserted, 1);

        let records = sync.store().all().await.unwrap();
        assert_eq!(
            records[0].workout_date,
            chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(records[0].calories, Some(500));
    }

    #[tokio::test]
    async fn test_same_day_messages_insert_once() {
        let script = Script {
            messages: vec![
                (1, email("Tue, 5 Mar 2024 07:15:00 -0500", "300 CALORIES BURNED")),
                (2, email("Tue, 5 Mar 2024 18:40:00 -0500", "600 CALORIES BURNED")),
            ],
            ..Script::default()
        };

        let sync = pipeline(script);
        let report = sync.run().await;
        assert!(report.success);
        assert_eq!(report.parsed, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(sync.store().len().await, 1);
    }

    #[test]
    fn test_to_new_workout() {
        let message = RawMessage {
            received_date: chrono::DateTime::parse_from_rfc2822("Tue, 5 Mar 2024 07:15:00 -0500")
                .unwrap(),
            subject: "Summary".into(),
            body: "<b>12</b> SPLAT POINTS".into(),
        };

        let workout = to_new_workout(message);
        assert_eq!(workout.metrics.splat_points, Some(12));
        assert_eq!(workout.email_subject, "Summary");
    }
}
