//! Error types for the workout-sync crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are grouped by the pipeline stage that produced them - see [`Error::category`].
//! Only some of them abort a run: per-message and per-record failures are absorbed
//! into the [`SyncReport`](crate::SyncReport) counts.

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while syncing workouts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A mailbox credential was not supplied. Raised before any network I/O.
    #[error("mailbox credential missing: {missing}")]
    MissingCredentials {
        /// Which credential is absent (`"email"` or `"password"`).
        missing: &'static str,
    },

    /// IMAP login failed.
    #[error("IMAP login failed for {email}")]
    ImapLogin {
        /// The email address used for login.
        email: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {email} after {timeout:?}")]
    AuthTimeout {
        /// The email address used for authentication.
        email: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Connection errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Failed to open the archive mailbox.
    #[error("failed to open mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Mailbox open timeout.
    #[error("mailbox open timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// The IMAP connection dropped in the middle of a session.
    #[error("IMAP connection lost during {operation}")]
    ConnectionLost {
        /// The operation that was in flight.
        operation: &'static str,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The session was used after it had been closed.
    #[error("IMAP session is closed")]
    SessionClosed,

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Search errors
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP search failed.
    #[error("IMAP search failed for query {query}")]
    ImapSearch {
        /// The search criteria sent to the server.
        query: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Search timeout.
    #[error("IMAP search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Fetch errors
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP fetch failed for a single message.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The server returned no content for a located UID.
    #[error("no message content returned for UID {uid}")]
    MessageNotFound {
        /// The UID that was requested.
        uid: u32,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// The UID being fetched.
        uid: u32,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Message decode errors (malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse the raw message.
    #[error("failed to parse email")]
    ParseEmail {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// The message has no usable `Date` header.
    #[error("email has no parseable Date header")]
    MissingDate,

    /// The message has no text or HTML body.
    #[error("email has no text body")]
    EmptyBody,

    // ─────────────────────────────────────────────────────────────────────────
    // Store errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A store operation failed.
    #[error("store {operation} failed")]
    Store {
        /// The store operation that failed.
        operation: &'static str,
        /// The underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// A record for this date already exists (uniqueness constraint).
    #[error("a workout for {date} already exists")]
    DuplicateDate {
        /// The conflicting workout date.
        date: NaiveDate,
    },
}

impl Error {
    /// Wraps a `sqlx` error, turning uniqueness violations on `workout_date`
    /// into [`Error::DuplicateDate`].
    pub(crate) fn from_store(operation: &'static str, date: NaiveDate, source: sqlx::Error) -> Self {
        let unique_violation = source
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());

        if unique_violation {
            Error::DuplicateDate { date }
        } else {
            Error::Store { operation, source }
        }
    }

    /// Returns `true` if this error represents a transient failure that might
    /// succeed when the sync is invoked again later.
    ///
    /// The pipeline itself never retries; this is for callers that schedule runs.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::ConnectionLost { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::MessageNotFound { .. }
            | Error::Store { .. } => true,

            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::MissingCredentials { .. }
            | Error::SessionClosed
            | Error::ImapLogout { .. }
            | Error::LogoutTimeout { .. }
            | Error::ParseEmail { .. }
            | Error::MissingDate
            | Error::EmptyBody
            | Error::DuplicateDate { .. } => false,
        }
    }

    /// Returns `true` if the error means the session itself is unusable,
    /// as opposed to a single message being unfetchable.
    ///
    /// Session faults abort the fetch phase; other fetch errors skip one message.
    #[must_use]
    pub fn is_session_fault(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost { .. } | Error::FetchTimeout { .. } | Error::SessionClosed
        )
    }

    /// Returns the error category for logging and reporting.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::MissingCredentials { .. }
            | Error::ImapLogin { .. }
            | Error::AuthTimeout { .. } => ErrorCategory::Auth,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::SelectMailbox { .. }
            | Error::SelectTimeout { .. }
            | Error::ConnectionLost { .. }
            | Error::SessionClosed
            | Error::ImapLogout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Connection,

            Error::ImapSearch { .. } | Error::SearchTimeout { .. } => ErrorCategory::Search,

            Error::ImapFetch { .. } | Error::MessageNotFound { .. } | Error::FetchTimeout { .. } => {
                ErrorCategory::Fetch
            }

            Error::ParseEmail { .. } | Error::MissingDate | Error::EmptyBody => {
                ErrorCategory::Decode
            }

            Error::Store { .. } | Error::DuplicateDate { .. } => ErrorCategory::Write,
        }
    }
}

/// Error categories, one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Missing or rejected mailbox credentials.
    Auth,
    /// Network, TLS, or mailbox-open errors.
    Connection,
    /// Search (message location) errors.
    Search,
    /// Errors fetching message content.
    Fetch,
    /// Raw message decoding errors.
    Decode,
    /// Store write errors.
    Write,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Auth => write!(f, "auth"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Search => write!(f, "search"),
            ErrorCategory::Fetch => write!(f, "fetch"),
            ErrorCategory::Decode => write!(f, "decode"),
            ErrorCategory::Write => write!(f, "write"),
        }
    }
}
