//! Metric name allow-list.
//!
//! An allow-list is compiled once at configuration time from a list of
//! regular-expression fragments. Each fragment must match the full metric
//! name; fragments combine with logical OR.

use regex::Regex;
use tracing::warn;

/// Compiled allow-list matcher.
///
/// An unset allow-list matches everything. A configured allow-list matches a
/// name iff at least one fragment fully matches it; an explicitly empty
/// fragment list therefore matches nothing.
#[derive(Debug)]
pub enum Allowlist {
    /// No allow-list configured: every name is allowed.
    MatchAll,
    /// One compiled regex per surviving fragment.
    Patterns(Vec<Regex>),
}

impl Allowlist {
    /// The "unset" sentinel that allows every name.
    pub fn match_all() -> Self {
        Allowlist::MatchAll
    }

    /// Compile a list of regex fragments into one combined matcher.
    ///
    /// Each fragment is anchored to require a full match. A fragment that
    /// fails to compile is dropped; the surviving fragments still combine
    /// into a working matcher. Zero surviving fragments reject every name.
    pub fn compile(fragments: &[String]) -> Self {
        let patterns = fragments
            .iter()
            .filter_map(|fragment| {
                let anchored = format!("^(?:{})$", fragment);
                match Regex::new(&anchored) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(
                            pattern = %fragment,
                            error = %e,
                            "Dropping invalid allowlist pattern"
                        );
                        None
                    }
                }
            })
            .collect();

        Allowlist::Patterns(patterns)
    }

    /// Whether the given metric name passes this allow-list.
    pub fn is_allowed(&self, name: &str) -> bool {
        match self {
            Allowlist::MatchAll => true,
            Allowlist::Patterns(patterns) => patterns.iter().any(|re| re.is_match(name)),
        }
    }
}
