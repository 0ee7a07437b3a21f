//! # workout-sync
//!
//! Async ingestion of workout summary emails into a local workout log.
//!
//! This crate provides a one-shot pipeline that:
//! - Connects to an IMAP mailbox over TLS and opens it read-only
//! - Locates workout summary emails by sender and subject
//! - Extracts calories, splat points, treadmill and rower distance from each body
//! - Writes at most one record per calendar date into a SQLite store
//!
//! ## Features
//!
//! - **`observability`**: Enables OpenTelemetry integration for distributed tracing.
//!   Without this feature, tracing spans are still emitted but require no OTEL dependencies.
//!
//! ## Quick Start
//!
//! ```no_run
//! use workout_sync::{ImapConfig, SyncConfig, WorkoutSync};
//!
//! # async fn example() -> workout_sync::Result<()> {
//! // Configure the mailbox
//! let imap = ImapConfig::builder()
//!     .email("user@gmail.com")
//!     .password("app-password")  // Use app-specific password for Gmail
//!     .build()?;
//!
//! // Open the store; the mailbox is only contacted by `run`
//! let sync = WorkoutSync::connect(SyncConfig::new(imap)).await?;
//!
//! let report = sync.run().await;
//! println!("{}: {} inserted", report.message, report.inserted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration from the Environment
//!
//! [`SyncConfig::from_env`] reads `EMAIL_USER` and `EMAIL_PASS`, plus optional
//! `IMAP_HOST`, `IMAP_PORT`, `IMAP_MAILBOX`, `WORKOUT_SENDER`, `WORKOUT_SUBJECT`
//! and `DATABASE_URL`.
//!
//! ## Custom Wiring
//!
//! The pipeline is generic over a [`MailboxProvider`] and a [`WorkoutStore`],
//! so tests and dry runs can swap in [`MemoryStore`]:
//!
//! ```no_run
//! use workout_sync::{ImapConfig, ImapProvider, MemoryStore, SearchFilter, WorkoutSync};
//!
//! # async fn example() -> workout_sync::Result<()> {
//! # let imap = ImapConfig::builder().email("a@b.c").password("x").build()?;
//! let sync = WorkoutSync::new(ImapProvider::new(imap), MemoryStore::new(), SearchFilter::default());
//! let report = sync.run().await;
//! assert_eq!(sync.store().len().await, report.inserted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Pipeline failures land in the [`SyncReport`]; the phase that failed is in
//! [`SyncReport::phase`]. Lower-level calls return [`Error`], and
//! [`Error::is_retryable`] tells whether re-running could help:
//!
//! ```
//! use workout_sync::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, can retry: {}", error);
//!     } else {
//!         println!("Permanent error ({}): {}", error.category(), error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. All major operations emit spans with
//! structured fields suitable for distributed tracing.
//!
//! ### Span Naming Convention
//!
//! - `WorkoutSync::run` - One full sync
//! - `mailbox::open` - Connect, login and open the mailbox
//! - `connection::establish_tls` - TLS connection
//! - `search::locate` - Message search
//! - `retriever::retrieve` - Fetch and decode
//! - `writer::write` - One record write
//!
//! ### Standard Fields
//!
//! - `imap_host` - IMAP server hostname
//! - `mailbox` - Mailbox name
//! - `uid` - Email UID
//! - `workout_date` - Calendar date of a record
//! - `found` / `parsed` - Run counts
//!
//! Enable the `observability` feature for OpenTelemetry integration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod error;
pub mod extractor;
pub mod mailbox;
pub mod report;
pub mod retriever;
pub mod search;
pub mod store;
pub mod sync;
pub mod writer;

// Internal modules
mod connection;

// Re-exports for ergonomic API
pub use config::{ImapConfig, ImapConfigBuilder, SyncConfig, TimeoutConfig};
pub use error::{Error, ErrorCategory, Result};
pub use extractor::WorkoutMetrics;
pub use mailbox::{ImapMailbox, ImapProvider, Mailbox, MailboxProvider, SessionState};
pub use report::{SyncPhase, SyncReport};
pub use retriever::{FetchTracker, RawMessage, Retrieval};
pub use search::SearchFilter;
pub use store::{MemoryStore, NewWorkout, SqliteStore, WorkoutRecord, WorkoutStore};
pub use sync::{sync_once, WorkoutSync};
pub use writer::{IdempotentWriter, SkipReason, WriteOutcome};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // Ensure all public types are accessible
        let _ = ImapConfig::builder();
        let _ = SearchFilter::default();
        let _ = SyncReport::new();
        let _ = FetchTracker::new(0);
        assert!(extractor::extract("").is_empty());
    }
}
