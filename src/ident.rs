//! Package identifier derivation and assignment.
//!
//! Every preservation package is named by a four-part identifier:
//!
//! ```text
//! {department}-{scope}-{period}-{sequence}
//! e.g. ua-0042-202608-0003
//! ```
//!
//! - **department**: short code derived from the seed's collector string;
//! - **scope**: four-digit scope number pulled from the seed's relation text,
//!   or the `0000` sentinel when the seed carries no relation;
//! - **period**: `YYYYMM` calendar tag of the run;
//! - **sequence**: four-digit counter, unique per (department, scope, period).
//!
//! Sequence numbers come from [`IdentifierAssigner`], which keeps its counters
//! behind a mutex. A duplicated identifier would silently overwrite another
//! package's directory, so uniqueness under concurrent assignment is the one
//! invariant this module must never lose.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

/// Matches one run of ASCII digits inside relation text.
#[allow(clippy::expect_used)]
static DIGIT_RUN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit run regex is valid")); // Static pattern, safe to panic

/// Maximum length of a single-word department code.
const MAX_DEPARTMENT_CODE_LEN: usize = 8;

/// Department code used when the collector string contains no usable words.
const FALLBACK_DEPARTMENT_CODE: &str = "unknown";

/// Errors raised while parsing a seed's relation text.
///
/// A seed with no relation at all is valid (it gets the sentinel scope);
/// these errors only apply to relation text that is present but unusable.
/// An unusable relation is never silently defaulted: a wrong scope number
/// would file the package under another department's series.
#[derive(Debug, Error)]
pub enum RelationError {
    /// Relation text is present but contains no number.
    #[error("relation text {text:?} contains no scope number")]
    MissingNumber {
        /// The offending relation text.
        text: String,
    },

    /// Relation text contains more than one number.
    #[error("relation text {text:?} is ambiguous: found {count} numbers")]
    Ambiguous {
        /// The offending relation text.
        text: String,
        /// How many digit runs were found.
        count: usize,
    },

    /// The number found does not fit a scope number.
    #[error("scope number {digits} in relation text {text:?} is out of range")]
    OutOfRange {
        /// The offending relation text.
        text: String,
        /// The digit run that failed to parse.
        digits: String,
    },
}

/// Scope component of a package identifier.
///
/// Seeds that belong to a numbered accession series carry the series number
/// in their relation text. Seeds without one share a sentinel scope; they
/// remain distinguishable through their sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Scope number parsed from relation text.
    Numbered(u32),
    /// No relation text; sentinel scope `0000`.
    Unscoped,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numbered(n) => write!(f, "{n:04}"),
            Self::Unscoped => write!(f, "0000"),
        }
    }
}

/// Parses a seed's relation text into a [`Scope`].
///
/// Rules:
/// - `None` or blank text → [`Scope::Unscoped`] (the documented default);
/// - exactly one run of digits anywhere in the text → [`Scope::Numbered`];
/// - no digits, or more than one digit run → [`RelationError`].
///
/// # Errors
///
/// Returns [`RelationError`] when relation text is present but ambiguous or
/// numberless.
pub fn parse_relation(relation: Option<&str>) -> Result<Scope, RelationError> {
    let Some(text) = relation.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(Scope::Unscoped);
    };

    let runs: Vec<&str> = DIGIT_RUN_PATTERN
        .find_iter(text)
        .map(|m| m.as_str())
        .collect();

    match runs.as_slice() {
        [] => Err(RelationError::MissingNumber {
            text: text.to_string(),
        }),
        [digits] => digits
            .parse::<u32>()
            .map(Scope::Numbered)
            .map_err(|_| RelationError::OutOfRange {
                text: text.to_string(),
                digits: (*digits).to_string(),
            }),
        runs => Err(RelationError::Ambiguous {
            text: text.to_string(),
            count: runs.len(),
        }),
    }
}

/// Derives a department code from a seed's collector string.
///
/// A multi-word collector ("University Archives") becomes an acronym of word
/// initials ("ua"); a single word is lowercased and truncated to 8 chars.
/// Only alphanumeric characters contribute; an empty collector falls back to
/// `"unknown"`.
#[must_use]
pub fn department_code(collector: &str) -> String {
    let words: Vec<String> = collector
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect();

    match words.as_slice() {
        [] => FALLBACK_DEPARTMENT_CODE.to_string(),
        [word] => word.chars().take(MAX_DEPARTMENT_CODE_LEN).collect(),
        words => words
            .iter()
            .filter_map(|word| word.chars().next())
            .collect(),
    }
}

/// Formats a run date as a `YYYYMM` period tag.
#[must_use]
pub fn period_tag(date: NaiveDate) -> String {
    date.format("%Y%m").to_string()
}

/// A fully assigned package identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentifier {
    /// Department code derived from the collector.
    pub department: String,
    /// Scope number or sentinel.
    pub scope: Scope,
    /// Calendar period tag, `YYYYMM`.
    pub period: String,
    /// Sequence number within (department, scope, period), 1-based.
    pub sequence: u32,
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{:04}",
            self.department, self.scope, self.period, self.sequence
        )
    }
}

/// Hands out never-repeating package identifiers for one run.
///
/// Counters live behind a [`Mutex`]; each (department, scope) pair advances
/// independently, starting at 1. The period tag is fixed at construction so
/// every identifier in a run shares the same calendar period.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use warcpack_core::ident::{IdentifierAssigner, Scope};
///
/// # fn example() -> Option<()> {
/// let assigner = IdentifierAssigner::new(NaiveDate::from_ymd_opt(2026, 8, 23)?);
/// let first = assigner.assign("University Archives", Scope::Numbered(42));
/// let second = assigner.assign("University Archives", Scope::Numbered(42));
/// assert_eq!(first.to_string(), "ua-0042-202608-0001");
/// assert_eq!(second.to_string(), "ua-0042-202608-0002");
/// # Some(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug)]
pub struct IdentifierAssigner {
    period: String,
    counters: Mutex<HashMap<(String, Scope), u32>>,
}

impl IdentifierAssigner {
    /// Creates an assigner whose identifiers carry the given run date's period.
    #[must_use]
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            period: period_tag(run_date),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the period tag shared by every identifier from this assigner.
    #[must_use]
    pub fn period(&self) -> &str {
        &self.period
    }

    /// Assigns the next identifier for a collector/scope pair.
    ///
    /// The department code is derived from `collector` internally so callers
    /// cannot feed inconsistent codes for the same collector.
    #[must_use]
    pub fn assign(&self, collector: &str, scope: Scope) -> PackageIdentifier {
        let department = department_code(collector);
        let sequence = {
            let mut counters = self
                .counters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let counter = counters.entry((department.clone(), scope)).or_insert(0);
            *counter += 1;
            *counter
        };

        let identifier = PackageIdentifier {
            department,
            scope,
            period: self.period.clone(),
            sequence,
        };
        debug!(identifier = %identifier, "assigned package identifier");
        identifier
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 23).unwrap()
    }

    // ==================== Relation Parsing Tests ====================

    #[test]
    fn test_parse_relation_absent_is_unscoped() {
        assert_eq!(parse_relation(None).unwrap(), Scope::Unscoped);
    }

    #[test]
    fn test_parse_relation_blank_is_unscoped() {
        assert_eq!(parse_relation(Some("")).unwrap(), Scope::Unscoped);
        assert_eq!(parse_relation(Some("   ")).unwrap(), Scope::Unscoped);
    }

    #[test]
    fn test_parse_relation_single_number() {
        assert_eq!(
            parse_relation(Some("Accession 42")).unwrap(),
            Scope::Numbered(42)
        );
    }

    #[test]
    fn test_parse_relation_number_embedded_in_text() {
        assert_eq!(
            parse_relation(Some("transfer-2031/records")).unwrap(),
            Scope::Numbered(2031)
        );
    }

    #[test]
    fn test_parse_relation_no_number_is_error() {
        let err = parse_relation(Some("general records")).unwrap_err();
        assert!(matches!(err, RelationError::MissingNumber { .. }));
        assert!(err.to_string().contains("general records"));
    }

    #[test]
    fn test_parse_relation_multiple_numbers_is_error() {
        let err = parse_relation(Some("series 12 box 7")).unwrap_err();
        match err {
            RelationError::Ambiguous { count, .. } => assert_eq!(count, 2),
            other => panic!("expected Ambiguous, got: {other:?}"),
        }
    }

    #[test]
    fn test_parse_relation_oversized_number_is_error() {
        let err = parse_relation(Some("ref 99999999999999999999")).unwrap_err();
        assert!(matches!(err, RelationError::OutOfRange { .. }));
    }

    // ==================== Department Code Tests ====================

    #[test]
    fn test_department_code_multi_word_acronym() {
        assert_eq!(department_code("University Archives"), "ua");
        assert_eq!(department_code("Rare Books and Manuscripts"), "rbam");
    }

    #[test]
    fn test_department_code_single_word_truncated() {
        assert_eq!(department_code("Library"), "library");
        assert_eq!(department_code("Administration"), "administ");
    }

    #[test]
    fn test_department_code_strips_punctuation() {
        assert_eq!(department_code("Gov't Documents"), "gd");
    }

    #[test]
    fn test_department_code_empty_collector_falls_back() {
        assert_eq!(department_code(""), "unknown");
        assert_eq!(department_code("  --  "), "unknown");
    }

    // ==================== Formatting Tests ====================

    #[test]
    fn test_scope_display_zero_padded() {
        assert_eq!(Scope::Numbered(7).to_string(), "0007");
        assert_eq!(Scope::Numbered(4321).to_string(), "4321");
        assert_eq!(Scope::Unscoped.to_string(), "0000");
    }

    #[test]
    fn test_period_tag_format() {
        assert_eq!(period_tag(run_date()), "202608");
        assert_eq!(
            period_tag(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()),
            "202501"
        );
    }

    #[test]
    fn test_identifier_display() {
        let identifier = PackageIdentifier {
            department: "ua".to_string(),
            scope: Scope::Numbered(42),
            period: "202608".to_string(),
            sequence: 3,
        };
        assert_eq!(identifier.to_string(), "ua-0042-202608-0003");
    }

    // ==================== Assigner Tests ====================

    #[test]
    fn test_assigner_sequences_start_at_one() {
        let assigner = IdentifierAssigner::new(run_date());
        let id = assigner.assign("University Archives", Scope::Numbered(42));
        assert_eq!(id.sequence, 1);
        assert_eq!(id.to_string(), "ua-0042-202608-0001");
    }

    #[test]
    fn test_assigner_sequences_increase_per_key() {
        let assigner = IdentifierAssigner::new(run_date());
        let first = assigner.assign("University Archives", Scope::Numbered(42));
        let second = assigner.assign("University Archives", Scope::Numbered(42));
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn test_assigner_keys_are_independent() {
        let assigner = IdentifierAssigner::new(run_date());
        let a = assigner.assign("University Archives", Scope::Numbered(42));
        let b = assigner.assign("University Archives", Scope::Numbered(43));
        let c = assigner.assign("Library", Scope::Numbered(42));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 1);
        assert_eq!(c.sequence, 1);
    }

    #[test]
    fn test_assigner_sentinel_scope_seeds_get_distinct_sequences() {
        let assigner = IdentifierAssigner::new(run_date());
        let first = assigner.assign("University Archives", Scope::Unscoped);
        let second = assigner.assign("University Archives", Scope::Unscoped);
        assert_eq!(first.to_string(), "ua-0000-202608-0001");
        assert_eq!(second.to_string(), "ua-0000-202608-0002");
        assert_ne!(first, second);
    }

    #[test]
    fn test_assigner_concurrent_assignment_never_repeats() {
        use std::collections::HashSet;
        use std::thread;

        let assigner = Arc::new(IdentifierAssigner::new(run_date()));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let assigner = Arc::clone(&assigner);
            handles.push(thread::spawn(move || {
                (0..50)
                    .map(|_| {
                        assigner
                            .assign("University Archives", Scope::Numbered(42))
                            .to_string()
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for identifier in handle.join().unwrap() {
                assert!(
                    seen.insert(identifier.clone()),
                    "identifier {identifier} was assigned twice"
                );
            }
        }
        assert_eq!(seen.len(), 8 * 50);
    }
}
