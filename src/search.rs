//! Locating workout summary messages in the mailbox.
//!
//! A [`SearchFilter`] combines a sender substring and a subject substring.
//! IMAP `SEARCH` keys are ANDed and matched case-insensitively as substrings,
//! so the filter renders directly to `FROM "<sender>" SUBJECT "<subject>"`.

use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use tracing::{debug, instrument};

/// Sender and subject substrings that identify a workout summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    /// Substring of the sender address.
    pub sender: String,
    /// Substring of the subject line.
    pub subject: String,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            sender: "orangetheoryfitness".to_string(),
            subject: "workout".to_string(),
        }
    }
}

impl SearchFilter {
    /// Creates a filter from a sender and subject substring.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if either substring is empty (it would
    /// match the whole archive) or contains a line break.
    pub fn new(sender: impl Into<String>, subject: impl Into<String>) -> Result<Self> {
        let sender = sender.into();
        let subject = subject.into();

        if sender.trim().is_empty() || subject.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "search sender and subject must not be empty".into(),
            });
        }
        if [&sender, &subject].iter().any(|v| v.contains(['\r', '\n'])) {
            return Err(Error::InvalidConfig {
                message: "search sender and subject must be single-line".into(),
            });
        }

        Ok(Self { sender, subject })
    }

    /// Renders the filter as IMAP `SEARCH` criteria, declaring `CHARSET UTF-8`
    /// when either value is not ASCII.
    ///
    /// ```
    /// use workout_sync::SearchFilter;
    ///
    /// let filter = SearchFilter::default();
    /// assert_eq!(filter.to_imap_query(), r#"FROM "orangetheoryfitness" SUBJECT "workout""#);
    /// ```
    #[must_use]
    pub fn to_imap_query(&self) -> String {
        let charset = if self.sender.is_ascii() && self.subject.is_ascii() {
            ""
        } else {
            "CHARSET UTF-8 "
        };
        format!(
            "{charset}FROM {} SUBJECT {}",
            quote(&self.sender),
            quote(&self.subject)
        )
    }
}

/// Quotes a string for use as an IMAP search argument.
///
/// A quoted string cannot hold a line break, so CR and LF become spaces.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(ch);
            }
            '\r' | '\n' => quoted.push(' '),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

/// Returns the UIDs of all messages matching `filter`, in server order.
///
/// An empty result is not an error.
///
/// # Errors
///
/// Returns a search-category error if the server rejects or times out the search.
#[instrument(
    name = "search::locate",
    skip_all,
    fields(sender = %filter.sender, subject = %filter.subject)
)]
pub async fn locate(mailbox: &mut (dyn Mailbox + '_), filter: &SearchFilter) -> Result<Vec<u32>> {
    let query = filter.to_imap_query();
    let uids = mailbox.search(&query).await?;

    debug!(uid_count = uids.len(), "Located workout emails");

    Ok(uids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query() {
        assert_eq!(
            SearchFilter::default().to_imap_query(),
            r#"FROM "orangetheoryfitness" SUBJECT "workout""#
        );
    }

    #[test]
    fn test_query_escapes_quotes() {
        let filter = SearchFilter::new("coach@gym.com", r#"your "best" workout"#).unwrap();
        assert_eq!(
            filter.to_imap_query(),
            r#"FROM "coach@gym.com" SUBJECT "your \"best\" workout""#
        );
    }

    #[test]
    fn test_query_escapes_backslash() {
        assert_eq!(quote(r"a\b"), r#""a\\b""#);
    }

    #[test]
    fn test_empty_filter_rejected() {
        assert!(SearchFilter::new("", "workout").is_err());
        assert!(SearchFilter::new("gym", "  ").is_err());
    }

    #[test]
    fn test_line_breaks_rejected() {
        let err = SearchFilter::new("gym", "workout\r\nA999 LOGOUT").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(SearchFilter::new("gym\n", "workout").is_err());
    }

    #[test]
    fn test_line_breaks_never_reach_query() {
        // Fields are public, so a filter can bypass `new`
        let filter = SearchFilter {
            sender: "gym".into(),
            subject: "workout\r\nA999 LOGOUT".into(),
        };
        let query = filter.to_imap_query();
        assert!(!query.contains(['\r', '\n']));
        assert_eq!(query, r#"FROM "gym" SUBJECT "workout  A999 LOGOUT""#);
    }

    #[test]
    fn test_non_ascii_declares_charset() {
        let filter = SearchFilter::new("orangetheoryfitness", "entraînement").unwrap();
        assert_eq!(
            filter.to_imap_query(),
            r#"CHARSET UTF-8 FROM "orangetheoryfitness" SUBJECT "entraînement""#
        );
    }
}
