//! Turning located UIDs into decoded messages.
//!
//! Each message is fetched whole (see [`Mailbox::fetch_raw`]) and then decoded
//! into a [`RawMessage`]. Fetch and decode failures for a single message are
//! logged and skipped; only a session fault aborts the retrieval.

use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

/// Trailing zone comment some senders append, e.g. `... -0500 (EST)`.
static TRAILING_ZONE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([A-Za-z ]+\)\s*$").expect("valid regex"));

/// A day number and a four-digit year, the least a usable date must carry.
static HAS_DAY_AND_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}\b.*\b\d{4}\b").expect("valid regex"));

/// A decoded message, ready for metric extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Send time, in the offset of the message's own `Date` header.
    pub received_date: DateTime<FixedOffset>,
    /// Decoded subject line (empty if absent).
    pub subject: String,
    /// HTML or plain-text body.
    pub body: String,
}

/// Outcome of retrieving a batch of messages.
#[derive(Debug, Default)]
pub struct Retrieval {
    /// Successfully decoded messages, in fetch order.
    pub messages: Vec<RawMessage>,
    /// Number of messages that could not be fetched or decoded.
    pub failed: usize,
}

/// Counts fetch attempts against the number of located messages.
///
/// Retrieval is finished only when every located UID has either completed or
/// failed; the session must not be closed before then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTracker {
    expected: usize,
    completed: usize,
    failed: usize,
}

impl FetchTracker {
    /// Creates a tracker expecting `expected` attempts.
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            completed: 0,
            failed: 0,
        }
    }

    /// Records a successful attempt.
    pub fn record_completed(&mut self) {
        self.completed += 1;
    }

    /// Records a failed attempt.
    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.completed + self.failed
    }

    /// Returns `true` once every expected attempt has been recorded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.attempts() == self.expected
    }

    /// Number of failed attempts.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }
}

/// Fetches and decodes every UID in `uids`, one at a time.
///
/// # Errors
///
/// Returns the underlying error if the session faults (see
/// [`Error::is_session_fault`]). Any other per-message error is absorbed.
#[instrument(name = "retriever::retrieve", skip_all, fields(expected = uids.len()))]
pub async fn retrieve(mailbox: &mut (dyn Mailbox + '_), uids: &[u32]) -> Result<Retrieval> {
    let mut tracker = FetchTracker::new(uids.len());
    let mut messages = Vec::with_capacity(uids.len());

    for &uid in uids {
        let raw = match mailbox.fetch_raw(uid).await {
            Ok(raw) => raw,
            Err(e) if e.is_session_fault() => {
                warn!(uid, error = %e, attempts = tracker.attempts(), "Session fault during fetch");
                return Err(e);
            }
            Err(e) => {
                warn!(uid, error = %e, "Failed to fetch email, skipping message");
                tracker.record_failed();
                continue;
            }
        };

        match decode_message(&raw) {
            Ok(message) => {
                debug!(uid, subject = %message.subject, date = %message.received_date, "Decoded email");
                tracker.record_completed();
                messages.push(message);
            }
            Err(e) => {
                warn!(uid, error = %e, "Failed to decode email, skipping message");
                tracker.record_failed();
            }
        }
    }

    debug_assert!(tracker.is_finished());
    debug!(
        decoded = messages.len(),
        failed = tracker.failed(),
        "Retrieval finished"
    );

    Ok(Retrieval {
        messages,
        failed: tracker.failed(),
    })
}

/// Decodes raw RFC 822 bytes into a [`RawMessage`].
///
/// # Errors
///
/// - [`Error::ParseEmail`] if the MIME structure is malformed
/// - [`Error::MissingDate`] if no date can be derived
/// - [`Error::EmptyBody`] if there is no text or HTML content
pub fn decode_message(raw: &[u8]) -> Result<RawMessage> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { source })?;

    let received_date = parsed
        .headers
        .get_first_value("Date")
        .as_deref()
        .and_then(parse_date)
        .ok_or(Error::MissingDate)?;

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_default()
        .trim()
        .to_string();

    let body = extract_body_text(&parsed).ok_or(Error::EmptyBody)?;

    Ok(RawMessage {
        received_date,
        subject,
        body,
    })
}

/// Parses a `Date` header, keeping the sender's UTC offset where possible.
fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }

    let stripped = TRAILING_ZONE_COMMENT.replace(value, "");
    if let Ok(date) = DateTime::parse_from_rfc2822(&stripped) {
        return Some(date);
    }

    // Lenient fallback; the offset is lost so the date is taken in UTC.
    // dateparse yields 0 rather than an error for text with no date in it.
    if !HAS_DAY_AND_YEAR.is_match(value) {
        return None;
    }
    let timestamp = mailparse::dateparse(value).ok().filter(|&ts| ts > 0)?;
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|date| date.fixed_offset())
}

/// Finds the message body, preferring HTML over plain text and skipping attachments.
fn extract_body_text(parsed: &ParsedMail<'_>) -> Option<String> {
    if parsed.subparts.is_empty() {
        return parsed.get_body().ok().filter(|body| !body.trim().is_empty());
    }

    let mut html = None;
    let mut plain = None;
    collect_text_parts(parsed, &mut html, &mut plain);
    html.or(plain)
}

/// Walks the MIME tree, keeping the first non-empty `text/html` and `text/plain` parts.
fn collect_text_parts(
    part: &ParsedMail<'_>,
    html: &mut Option<String>,
    plain: &mut Option<String>,
) {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }

    for sub in &part.subparts {
        collect_text_parts(sub, html, plain);
        if html.is_some() {
            return;
        }
    }

    if !part.subparts.is_empty() {
        return;
    }

    let slot = match part.ctype.mimetype.to_lowercase().as_str() {
        "text/html" => html,
        "text/plain" => plain,
        _ => return,
    };

    if slot.is_none() {
        match part.get_body() {
            Ok(body) if !body.trim().is_empty() => *slot = Some(body),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Undecodable body part, ignoring"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::SessionState;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    const SIMPLE: &[u8] = b"From: OTbeatReport@orangetheoryfitness.com\r\n\
Subject: Way to conquer that workout!\r\n\
Date: Tue, 05 Mar 2024 19:42:10 -0500\r\n\
\r\n\
347 CALORIES BURNED";

    #[test]
    fn test_decode_simple_message() {
        let message = decode_message(SIMPLE).unwrap();
        assert_eq!(message.subject, "Way to conquer that workout!");
        assert!(message.body.contains("347 CALORIES BURNED"));
        // Evening in the sender's zone stays on the sender's calendar day
        assert_eq!(
            message.received_date.date_naive(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn test_decode_prefers_html_part() {
        let raw = b"From: a@orangetheoryfitness.com\r\n\
Subject: workout\r\n\
Date: Wed, 06 Mar 2024 08:00:00 +0000\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain version\r\n\
--b1\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html version</p>\r\n\
--b1--\r\n";

        let message = decode_message(raw).unwrap();
        assert!(message.body.contains("html version"));
    }

    #[test]
    fn test_decode_falls_back_to_plain_and_skips_attachments() {
        let raw = b"From: a@orangetheoryfitness.com\r\n\
Subject: workout\r\n\
Date: Wed, 06 Mar 2024 08:00:00 +0000\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/html\r\n\
Content-Disposition: attachment; filename=\"report.html\"\r\n\
\r\n\
<p>attached</p>\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
inline text\r\n\
--b1--\r\n";

        let message = decode_message(raw).unwrap();
        assert!(message.body.contains("inline text"));
        assert!(!message.body.contains("attached"));
    }

    #[test]
    fn test_decode_missing_date() {
        let raw = b"Subject: workout\r\n\r\nbody";
        assert!(matches!(decode_message(raw), Err(Error::MissingDate)));
    }

    #[test]
    fn test_decode_empty_body() {
        let raw = b"Subject: workout\r\nDate: Wed, 06 Mar 2024 08:00:00 +0000\r\n\r\n   ";
        assert!(matches!(decode_message(raw), Err(Error::EmptyBody)));
    }

    #[test]
    fn test_parse_date_with_zone_comment() {
        let date = parse_date("Tue, 05 Mar 2024 19:42:10 -0500 (EST)").unwrap();
        assert_eq!(date.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(date.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_parse_date_garbage() {
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("sometime last week").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_parse_date_lenient_fallback() {
        // No comma after the weekday
        let date = parse_date("Tue 5 Mar 2024 19:42:10 +0000").unwrap();
        assert_eq!(date.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_decode_unparseable_date_is_missing() {
        let raw = b"Subject: workout\r\nDate: sometime last week\r\n\r\n347 CALORIES BURNED";
        assert!(matches!(decode_message(raw), Err(Error::MissingDate)));
    }

    #[test]
    fn test_tracker_counts_to_expected() {
        let mut tracker = FetchTracker::new(3);
        tracker.record_completed();
        tracker.record_failed();
        assert!(!tracker.is_finished());
        tracker.record_completed();
        assert!(tracker.is_finished());
        assert_eq!(tracker.failed(), 1);
    }

    /// Serves canned messages; UIDs without an entry fail like a vanished message.
    struct CannedMailbox {
        messages: HashMap<u32, Vec<u8>>,
        fault_on: Option<u32>,
    }

    #[async_trait]
    impl Mailbox for CannedMailbox {
        fn state(&self) -> SessionState {
            SessionState::Ready
        }

        async fn search(&mut self, _query: &str) -> Result<Vec<u32>> {
            Ok(self.messages.keys().copied().collect())
        }

        async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
            if self.fault_on == Some(uid) {
                return Err(Error::SessionClosed);
            }
            self.messages
                .get(&uid)
                .cloned()
                .ok_or(Error::MessageNotFound { uid })
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retrieve_skips_bad_messages() {
        let mut mailbox = CannedMailbox {
            messages: HashMap::from([
                (1, SIMPLE.to_vec()),
                (2, b"Subject: no date\r\n\r\nbody".to_vec()),
                (4, SIMPLE.to_vec()),
            ]),
            fault_on: None,
        };

        let retrieval = retrieve(&mut mailbox, &[1, 2, 3, 4]).await.unwrap();
        assert_eq!(retrieval.messages.len(), 2);
        assert_eq!(retrieval.failed, 2);
    }

    #[tokio::test]
    async fn test_retrieve_aborts_on_session_fault() {
        let mut mailbox = CannedMailbox {
            messages: HashMap::from([(1, SIMPLE.to_vec()), (2, SIMPLE.to_vec())]),
            fault_on: Some(2),
        };

        let result = retrieve(&mut mailbox, &[1, 2]).await;
        assert!(matches!(result, Err(Error::SessionClosed)));
    }
}
