//! Metric extraction from workout summary bodies.
//!
//! Bodies are first [normalized](normalize) to single-spaced plain text, because
//! the summary markup often puts a number and its unit in different table cells.
//! Four independent [`Matcher`]s then pull out one field each.
//!
//! # Example
//!
//! ```
//! use workout_sync::extractor::extract;
//!
//! let metrics = extract("<td>347</td><td>CALORIES BURNED</td><td>12 SPLAT POINTS</td>");
//! assert_eq!(metrics.calories, Some(347));
//! assert_eq!(metrics.splat_points, Some(12));
//! assert_eq!(metrics.treadmill_distance, None);
//! ```

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Trait for pulling one value out of normalized body text.
pub trait Matcher: Send + Sync {
    /// Attempts to find and extract matching content from the text.
    ///
    /// Returns the borrowed match when it can be taken directly from `text`.
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>>;

    /// Returns a human-readable description of what this matcher looks for.
    fn description(&self) -> &str;
}

/// Case-insensitive regex matcher that extracts the first capture group.
///
/// ```
/// use workout_sync::extractor::{Matcher, RegexMatcher};
///
/// let matcher = RegexMatcher::new(r"(\d+)\s*laps", "lap count").unwrap();
/// assert_eq!(matcher.find_match("12 LAPS").as_deref(), Some("12"));
/// ```
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a case-insensitive matcher. The first capture group is the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str, description: impl Into<String>) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            regex,
            description: description.into(),
        })
    }
}

impl Matcher for RegexMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| Cow::Borrowed(m.as_str()))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

fn rule(pattern: &str, description: &str) -> RegexMatcher {
    RegexMatcher::new(pattern, description).expect("valid regex")
}

static CALORIES: LazyLock<RegexMatcher> =
    LazyLock::new(|| rule(r"(\d{2,4})\s*CALORIES\s*BURNED", "calories burned"));

static SPLAT_POINTS: LazyLock<RegexMatcher> =
    LazyLock::new(|| rule(r"(\d{1,2})\s*SPLAT\s*POINTS", "splat points"));

static TREADMILL: LazyLock<RegexMatcher> = LazyLock::new(|| {
    rule(
        r"TREADMILL\s*PERFORMANCE\s*TOTALS?\s*(\d+\.?\d*)\s*miles?",
        "treadmill distance (miles)",
    )
});

static ROWER: LazyLock<RegexMatcher> = LazyLock::new(|| {
    rule(
        r"ROWER\s*PERFORMANCE\s*TOTALS?\s*([\d,]+)\s*m\b",
        "rower distance (meters)",
    )
});

/// Elements whose content is never rendered. Each is stripped with its own
/// closing tag; an unclosed element is left for [`TAG`] to remove tag by tag.
static INVISIBLE_BLOCKS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    ["script", "style", "head"].map(|name| {
        Regex::new(&format!(r"(?is)<{name}\b[^>]*>.*?</{name}\s*>")).expect("valid regex")
    })
});

/// Comments and tags. A `<` not followed by a letter, `/` or `!` is text.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<[A-Za-z/!][^>]*>").expect("valid regex")
});

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// The four metrics carried by a workout summary. Any of them may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WorkoutMetrics {
    /// Treadmill distance in miles.
    pub treadmill_distance: Option<f64>,
    /// Rower distance in meters.
    ///
    /// Values above `u32::MAX` (about 4.3 million km) cannot come from a rower
    /// and are treated as unreadable, leaving the field `None`.
    pub rower_distance: Option<u32>,
    /// Splat points earned.
    pub splat_points: Option<u8>,
    /// Calories burned.
    pub calories: Option<u32>,
}

impl WorkoutMetrics {
    /// Returns `true` if no metric was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.treadmill_distance.is_none()
            && self.rower_distance.is_none()
            && self.splat_points.is_none()
            && self.calories.is_none()
    }
}

/// Extracts workout metrics from an HTML or plain-text body. Never fails.
#[must_use]
pub fn extract(body: &str) -> WorkoutMetrics {
    extract_normalized(&normalize(body))
}

/// Extracts workout metrics from text already passed through [`normalize`].
#[must_use]
pub fn extract_normalized(text: &str) -> WorkoutMetrics {
    WorkoutMetrics {
        treadmill_distance: TREADMILL
            .find_match(text)
            .and_then(|m| m.parse().ok()),
        rower_distance: ROWER
            .find_match(text)
            .and_then(|m| m.replace(',', "").parse().ok()),
        splat_points: SPLAT_POINTS.find_match(text).and_then(|m| m.parse().ok()),
        calories: CALORIES.find_match(text).and_then(|m| m.parse().ok()),
    }
}

/// Strips markup and collapses every whitespace run to a single space.
///
/// ```
/// use workout_sync::extractor::normalize;
///
/// assert_eq!(normalize("<p>3.2</p>\n <p>miles</p>"), "3.2 miles");
/// ```
#[must_use]
pub fn normalize(body: &str) -> String {
    let mut text = body.to_string();
    for block in INVISIBLE_BLOCKS.iter() {
        text = block.replace_all(&text, " ").into_owned();
    }
    let text = TAG.replace_all(&text, " ");
    let text = ENTITY.replace_all(&text, |caps: &regex::Captures<'_>| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Decodes an HTML entity body (the text between `&` and `;`).
fn decode_entity(entity: &str) -> Option<String> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }

    let decoded = match entity {
        "nbsp" | "ensp" | "emsp" | "thinsp" => " ",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "middot" => "·",
        "ndash" => "–",
        "mdash" => "—",
        _ => return None,
    };
    Some(decoded.to_string())
}
