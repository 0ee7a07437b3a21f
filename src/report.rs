//! Run summary.

use crate::error::Error;
use crate::writer::{SkipReason, WriteOutcome};
use serde::Serialize;

/// Pipeline phase in which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Connecting, authenticating or opening the mailbox.
    Connect,
    /// Locating candidate messages.
    Search,
    /// Retrieving message bodies.
    Fetch,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Search => write!(f, "search"),
            Self::Fetch => write!(f, "fetch"),
        }
    }
}

/// Outcome of one sync run.
///
/// `skipped` is always `duplicates + write_errors`. Messages that were found
/// but could not be decoded are counted in `decode_failures`, not in `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Whether the run reached the write phase.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Messages matching the search filter.
    pub found: usize,
    /// Messages decoded into a date, subject and body.
    pub parsed: usize,
    /// Records newly stored.
    pub inserted: usize,
    /// Records not stored, for any reason.
    pub skipped: usize,
    /// Records skipped because their date was already stored.
    pub duplicates: usize,
    /// Records skipped because the store failed.
    pub write_errors: usize,
    /// Found messages that could not be fetched or decoded.
    pub decode_failures: usize,
    /// Phase that failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SyncPhase>,
    /// Error text for a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SyncReport {
    /// Creates the zero-count report a run starts from.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the run as failed in `phase`.
    pub fn fail(&mut self, phase: SyncPhase, error: &Error) {
        self.success = false;
        self.phase = Some(phase);
        self.message = format!("Sync failed during {phase}: {error}");
        self.details = Some(error.to_string());
    }

    /// Counts one write outcome.
    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Inserted => self.inserted += 1,
            WriteOutcome::Skipped(reason) => {
                self.skipped += 1;
                match reason {
                    SkipReason::Duplicate => self.duplicates += 1,
                    SkipReason::Error => self.write_errors += 1,
                }
            }
        }
    }

    /// Marks the run as successful and writes the summary message.
    pub fn complete(&mut self) {
        self.success = true;
        self.phase = None;
        self.details = None;
        self.message = if self.found == 0 {
            "No workout emails found".to_string()
        } else {
            format!(
                "Synced {} workout emails: {} inserted, {} skipped",
                self.parsed, self.inserted, self.skipped
            )
        };
    }
}
