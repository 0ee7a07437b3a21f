//! Mailbox session lifecycle.
//!
//! [`ImapMailbox`] owns one authenticated IMAP session against the archive folder,
//! opened read-only with `EXAMINE`. Its state moves through [`SessionState`]:
//!
//! ```text
//! Disconnected → Connecting → Ready ⇄ Searching / Fetching → Closing → Disconnected
//! ```
//!
//! The pipeline talks to the session through the [`Mailbox`] trait and obtains it
//! from a [`MailboxProvider`], so tests can script a mailbox without a server.

use crate::config::{ImapConfig, TimeoutConfig};
use crate::connection::{self, TlsStream};
use crate::error::{Error, Result};
use async_imap::Session;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, instrument, warn};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// Fetch item requesting the full raw message without setting `\Seen`.
const FETCH_FULL_MESSAGE: &str = "BODY.PEEK[]";

/// Lifecycle state of a mailbox session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection.
    Disconnected,
    /// TLS handshake, login, or mailbox open in progress.
    Connecting,
    /// Authenticated with the archive mailbox open.
    Ready,
    /// A search command is in flight.
    Searching,
    /// A message fetch is in flight.
    Fetching,
    /// Logout in progress.
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Searching => "searching",
            SessionState::Fetching => "fetching",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// An open mailbox that can be searched and fetched from.
#[async_trait]
pub trait Mailbox: Send {
    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Runs an IMAP `UID SEARCH` with the given criteria.
    async fn search(&mut self, query: &str) -> Result<Vec<u32>>;

    /// Fetches the complete raw RFC 822 bytes of one message.
    ///
    /// Resolves only after the server has finished streaming the message;
    /// the returned buffer is never partial.
    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>>;

    /// Logs out. Calling this on a closed mailbox is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Opens mailbox sessions for a sync run.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Opens a fresh, ready session.
    async fn open(&self) -> Result<Box<dyn Mailbox>>;
}

/// [`MailboxProvider`] that opens real IMAP sessions.
#[derive(Debug, Clone)]
pub struct ImapProvider {
    config: ImapConfig,
}

impl ImapProvider {
    /// Creates a provider for the given server configuration.
    #[must_use]
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxProvider for ImapProvider {
    async fn open(&self) -> Result<Box<dyn Mailbox>> {
        let mailbox = ImapMailbox::open(&self.config).await?;
        Ok(Box::new(mailbox))
    }
}

/// IMAP session against the archive mailbox.
pub struct ImapMailbox {
    session: Option<ImapSession>,
    state: SessionState,
    mailbox: String,
    timeouts: TimeoutConfig,
}

impl ImapMailbox {
    /// Connects, authenticates, and opens the configured mailbox read-only.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredentials`] if either secret is absent; no I/O is attempted.
    /// - Connection, TLS, login, or mailbox-open errors otherwise. A session that
    ///   authenticated but could not open the mailbox is logged out before returning.
    #[instrument(
        name = "mailbox::open",
        skip_all,
        fields(imap_host = %config.imap_host, mailbox = %config.mailbox)
    )]
    pub async fn open(config: &ImapConfig) -> Result<Self> {
        let (email, password) = config.credentials()?;
        let timeouts = &config.timeouts;
        let target_addr = config.server_address();

        let tls_stream = tokio::time::timeout(
            timeouts.connect,
            connection::establish_tls_connection(&config.imap_host, &target_addr),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target_addr.clone(),
            timeout: timeouts.connect,
        })??;

        debug!("TLS connection established");

        let client = async_imap::Client::new(tls_stream);
        let session = tokio::time::timeout(timeouts.auth, client.login(email, password))
            .await
            .map_err(|_| Error::AuthTimeout {
                email: email.to_string(),
                timeout: timeouts.auth,
            })?
            .map_err(|(source, _client)| Error::ImapLogin {
                email: email.to_string(),
                source,
            })?;

        debug!("Authenticated");

        let mut mailbox = Self {
            session: Some(session),
            state: SessionState::Connecting,
            mailbox: config.mailbox.clone(),
            timeouts: timeouts.clone(),
        };

        if let Err(e) = mailbox.examine().await {
            if let Err(close_err) = mailbox.close().await {
                warn!(error = %close_err, "Logout after failed mailbox open also failed");
            }
            return Err(e);
        }

        mailbox.state = SessionState::Ready;
        debug!("Mailbox opened read-only");

        Ok(mailbox)
    }

    /// Opens the archive mailbox with `EXAMINE`.
    async fn examine(&mut self) -> Result<()> {
        let timeout = self.timeouts.select;
        let name = self.mailbox.clone();
        let session = self.session.as_mut().ok_or(Error::SessionClosed)?;

        tokio::time::timeout(timeout, session.examine(&name))
            .await
            .map_err(|_| Error::SelectTimeout {
                mailbox: name.clone(),
                timeout,
            })?
            .map_err(|source| Error::SelectMailbox {
                mailbox: name,
                source,
            })?;

        Ok(())
    }
}

/// Maps an IMAP error to [`Error::ConnectionLost`] when the transport is gone,
/// otherwise to the operation-specific error.
fn classify_imap_error(
    operation: &'static str,
    source: async_imap::error::Error,
    otherwise: impl FnOnce(async_imap::error::Error) -> Error,
) -> Error {
    match source {
        async_imap::error::Error::Io(_) | async_imap::error::Error::ConnectionLost => {
            Error::ConnectionLost { operation, source }
        }
        source => otherwise(source),
    }
}

/// Issues a UID fetch and drains the response stream into one buffer.
///
/// The stream is always read to its end, even after an error, so the next
/// command on the session does not see leftover responses.
async fn read_full_message(session: &mut ImapSession, uid: u32) -> Result<Vec<u8>> {
    let uid_set = uid.to_string();

    let mut stream = session
        .uid_fetch(&uid_set, FETCH_FULL_MESSAGE)
        .await
        .map_err(|source| {
            classify_imap_error("fetch", source, |source| Error::ImapFetch { uid, source })
        })?
        .boxed();

    let mut buffer: Option<Vec<u8>> = None;
    let mut failure: Option<async_imap::error::Error> = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(fetch) => {
                if let Some(body) = fetch.body() {
                    buffer.get_or_insert_with(Vec::new).extend_from_slice(body);
                }
            }
            Err(source) => {
                if failure.is_none() {
                    failure = Some(source);
                }
            }
        }
    }

    if let Some(source) = failure {
        return Err(classify_imap_error("fetch", source, |source| {
            Error::ImapFetch { uid, source }
        }));
    }

    buffer.ok_or(Error::MessageNotFound { uid })
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn state(&self) -> SessionState {
        self.state
    }

    #[instrument(name = "mailbox::search", skip(self))]
    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let timeout = self.timeouts.search;
        let session = self.session.as_mut().ok_or(Error::SessionClosed)?;
        self.state = SessionState::Searching;

        let result = tokio::time::timeout(timeout, session.uid_search(query)).await;
        self.state = SessionState::Ready;

        let uids = result
            .map_err(|_| Error::SearchTimeout { timeout })?
            .map_err(|source| {
                classify_imap_error("search", source, |source| Error::ImapSearch {
                    query: query.to_string(),
                    source,
                })
            })?;

        // UID SEARCH results are unordered
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();

        debug!(uid_count = uids.len(), "Search complete");

        Ok(uids)
    }

    #[instrument(name = "mailbox::fetch_raw", skip(self))]
    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
        let timeout = self.timeouts.message_fetch;
        let session = self.session.as_mut().ok_or(Error::SessionClosed)?;
        self.state = SessionState::Fetching;

        let result = tokio::time::timeout(timeout, read_full_message(session, uid)).await;
        self.state = SessionState::Ready;

        let raw = result.map_err(|_| Error::FetchTimeout { uid, timeout })??;

        debug!(bytes = raw.len(), "Fetched message");

        Ok(raw)
    }

    #[instrument(name = "mailbox::close", skip(self))]
    async fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        self.state = SessionState::Closing;
        debug!("Logging out");

        let timeout = self.timeouts.logout;
        let result = tokio::time::timeout(timeout, session.logout()).await;
        self.state = SessionState::Disconnected;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(Error::ImapLogout { source }),
            Err(_) => Err(Error::LogoutTimeout { timeout }),
        }
    }
}

impl std::fmt::Debug for ImapMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailbox")
            .field("mailbox", &self.mailbox)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        let logout_timeout = self.timeouts.logout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("ImapMailbox dropped while open, logging out in the background");
                handle.spawn(async move {
                    match tokio::time::timeout(logout_timeout, session.logout()).await {
                        Ok(Ok(())) => debug!("Background logout succeeded"),
                        Ok(Err(e)) => warn!(error = %e, "Background logout failed"),
                        Err(_) => warn!(
                            timeout_secs = logout_timeout.as_secs(),
                            "Background logout timed out"
                        ),
                    }
                });
            }
            Err(_) => {
                warn!(
                    "ImapMailbox dropped outside of tokio runtime context. \
                     Connection will be closed without IMAP logout."
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_mailbox() -> ImapMailbox {
        ImapMailbox {
            session: None,
            state: SessionState::Disconnected,
            mailbox: "[Gmail]/All Mail".into(),
            timeouts: TimeoutConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_open_without_password_fails_before_io() {
        // Host would never resolve; the error must come from the credential check
        let config = ImapConfig::builder()
            .email("user@gmail.com")
            .imap_host("host.invalid")
            .build()
            .unwrap();

        let err = ImapMailbox::open(&config).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MissingCredentials {
                missing: "password"
            }
        ));
    }

    #[tokio::test]
    async fn test_open_without_email_fails_before_io() {
        let config = ImapConfig::builder()
            .password("secret")
            .imap_host("host.invalid")
            .build()
            .unwrap();

        let Err(err) = ImapProvider::new(config).open().await else {
            panic!("open without an email should fail");
        };
        assert!(matches!(err, Error::MissingCredentials { missing: "email" }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut mailbox = closed_mailbox();
        assert!(mailbox.close().await.is_ok());
        assert!(mailbox.close().await.is_ok());
        assert_eq!(mailbox.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_closed_mailbox_rejects_commands() {
        let mut mailbox = closed_mailbox();
        assert!(matches!(
            mailbox.search("ALL").await,
            Err(Error::SessionClosed)
        ));
        assert!(matches!(
            mailbox.fetch_raw(1).await,
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_connection_lost_classification() {
        let err = classify_imap_error(
            "fetch",
            async_imap::error::Error::ConnectionLost,
            |source| Error::ImapFetch { uid: 1, source },
        );
        assert!(err.is_session_fault());

        let err = classify_imap_error(
            "fetch",
            async_imap::error::Error::No("gone".into()),
            |source| Error::ImapFetch { uid: 1, source },
        );
        assert!(!err.is_session_fault());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Fetching.to_string(), "fetching");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }
}
