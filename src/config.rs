//! Configuration for the mailbox session and the sync run.
//!
//! Use [`ImapConfigBuilder`] to create a mailbox configuration with sensible defaults:
//!
//! ```
//! use workout_sync::ImapConfig;
//!
//! let config = ImapConfig::builder()
//!     .email("user@gmail.com")
//!     .password("app-password")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.server_address(), "imap.gmail.com:993");
//! assert_eq!(config.mailbox, "[Gmail]/All Mail");
//! ```
//!
//! Credentials are optional at build time. A config without them is still valid;
//! [`ImapMailbox::open`](crate::ImapMailbox::open) rejects it with
//! [`Error::MissingCredentials`] before touching the network.

use crate::error::{Error, Result};
use crate::search::SearchFilter;
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::time::Duration;

/// Default IMAP host.
pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";

/// Default IMAPS port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Archive folder holding all mail, not only the inbox.
pub const DEFAULT_MAILBOX: &str = "[Gmail]/All Mail";

/// Default SQLite database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://workouts.db";

/// Configuration for connecting to the IMAP server.
///
/// Create using [`ImapConfig::builder()`].
///
/// Note: The `password` field is stored as a [`SecretString`] to prevent
/// accidental logging of sensitive credentials.
#[derive(Clone)]
pub struct ImapConfig {
    email: Option<EmailAddress>,
    password: Option<SecretString>,
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port (default: 993 for IMAPS).
    pub imap_port: u16,
    /// Mailbox opened read-only for searching.
    pub mailbox: String,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConfig")
            .field("email", &self.email.as_ref().map(EmailAddress::as_str))
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("mailbox", &self.mailbox)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ImapConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ImapConfigBuilder {
        ImapConfigBuilder::default()
    }

    /// Returns the email address, if one was configured.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_ref().map(EmailAddress::as_str)
    }

    /// Returns both credentials, or the first one that is missing.
    ///
    /// The password is intentionally not directly accessible elsewhere to prevent
    /// accidental logging.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] if either secret is absent.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let email = self
            .email
            .as_ref()
            .ok_or(Error::MissingCredentials { missing: "email" })?;
        let password = self
            .password
            .as_ref()
            .ok_or(Error::MissingCredentials {
                missing: "password",
            })?;

        Ok((email.as_str(), password.expose_secret()))
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.imap_host, self.imap_port)
    }
}

/// Timeout configuration for the session operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for opening the mailbox.
    pub select: Duration,
    /// Timeout for the search command.
    pub search: Duration,
    /// Timeout for fetching one message, stream included.
    pub message_fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(30),
            message_fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Validates an email address format.
fn validate_email(email: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(email, email_address::Options::default()).map_err(|_| {
        Error::InvalidEmailFormat {
            email: email.to_string(),
        }
    })
}

/// Builder for [`ImapConfig`].
#[derive(Debug, Default)]
pub struct ImapConfigBuilder {
    email: Option<String>,
    password: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    mailbox: Option<String>,
    timeouts: Option<TimeoutConfig>,
}

impl ImapConfigBuilder {
    /// Sets the account address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the account secret. For Gmail, use an app-specific password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the IMAP server hostname. Default is `imap.gmail.com`.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port. Default is 993 (IMAPS with TLS).
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Sets the mailbox to search. Default is `[Gmail]/All Mail`.
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the per-message fetch timeout.
    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .message_fetch = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// Empty credential strings are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is malformed or the host or mailbox is empty.
    pub fn build(self) -> Result<ImapConfig> {
        let email = self
            .email
            .filter(|e| !e.trim().is_empty())
            .map(|e| validate_email(e.trim()))
            .transpose()?;

        let password = self
            .password
            .filter(|p| !p.is_empty())
            .map(SecretString::from);

        let imap_host = self
            .imap_host
            .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string());
        if imap_host.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "imap host must not be empty".into(),
            });
        }

        let mailbox = self.mailbox.unwrap_or_else(|| DEFAULT_MAILBOX.to_string());
        if mailbox.is_empty() {
            return Err(Error::InvalidConfig {
                message: "mailbox must not be empty".into(),
            });
        }

        Ok(ImapConfig {
            email,
            password,
            imap_host,
            imap_port: self.imap_port.unwrap_or(DEFAULT_IMAP_PORT),
            mailbox,
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

/// Everything one sync run needs: where to read mail, what to look for, where to write.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Mailbox session settings.
    pub imap: ImapConfig,
    /// Sender/subject filter for locating workout summaries.
    pub filter: SearchFilter,
    /// SQLite URL for the workout store.
    pub database_url: String,
}

impl SyncConfig {
    /// Creates a sync config with the default filter and database location.
    #[must_use]
    pub fn new(imap: ImapConfig) -> Self {
        Self {
            imap,
            filter: SearchFilter::default(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `EMAIL_USER` / `EMAIL_PASS` | mailbox credentials |
    /// | `IMAP_HOST` / `IMAP_PORT` / `IMAP_MAILBOX` | server overrides |
    /// | `WORKOUT_SENDER` / `WORKOUT_SUBJECT` | search filter overrides |
    /// | `DATABASE_URL` | store location |
    ///
    /// Missing credentials are not an error here; the run reports them.
    ///
    /// # Errors
    ///
    /// Returns an error if a present value is malformed.
    pub fn from_env() -> Result<Self> {
        let mut builder = ImapConfig::builder();

        if let Ok(email) = env::var("EMAIL_USER") {
            builder = builder.email(email);
        }
        if let Ok(password) = env::var("EMAIL_PASS") {
            builder = builder.password(password);
        }
        if let Ok(host) = env::var("IMAP_HOST") {
            builder = builder.imap_host(host);
        }
        if let Ok(port) = env::var("IMAP_PORT") {
            let port = port.parse().map_err(|_| Error::InvalidConfig {
                message: format!("IMAP_PORT is not a port number: {port}"),
            })?;
            builder = builder.imap_port(port);
        }
        if let Ok(mailbox) = env::var("IMAP_MAILBOX") {
            builder = builder.mailbox(mailbox);
        }

        let defaults = SearchFilter::default();
        let filter = SearchFilter::new(
            env::var("WORKOUT_SENDER").unwrap_or(defaults.sender),
            env::var("WORKOUT_SUBJECT").unwrap_or(defaults.subject),
        )?;

        Ok(Self {
            imap: builder.build()?,
            filter,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
        })
    }
}
