//! Session search queries.
//!
//! Query forms:
//! - `3` selects the session with id 3
//! - `*` selects every session
//! - `platform:win admin` selects sessions whose `platform` contains `win`
//!   and where any attribute contains `admin`
//!
//! All substring comparisons are case-insensitive.

use crate::registry::Session;

/// One whitespace-separated search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// `field:needle`, the named attribute must contain `needle`.
    Field { field: String, needle: String },
    /// Bare `needle`, any attribute may contain it.
    Any(String),
}

/// Parsed session search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionQuery {
    Id(i64),
    All,
    Terms(Vec<Term>),
}

/// Case-fold text for comparison.
fn fold(text: &str) -> String {
    text.to_lowercase()
}

impl SessionQuery {
    /// Parse a query string.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        if let Ok(id) = query.trim().parse::<i64>() {
            return Self::Id(id);
        }
        if query == "*" {
            return Self::All;
        }
        let terms = query
            .split_whitespace()
            .map(|token| match token.split_once(':') {
                Some((field, needle)) => Term::Field {
                    field: field.to_string(),
                    needle: fold(needle),
                },
                None => Term::Any(fold(token)),
            })
            .collect();
        Self::Terms(terms)
    }

    /// Whether `session` satisfies the query.
    ///
    /// A query without terms matches nothing.
    #[must_use]
    pub fn matches(&self, session: &Session) -> bool {
        match self {
            Self::Id(id) => i64::try_from(session.id()).is_ok_and(|sid| sid == *id),
            Self::All => true,
            Self::Terms(terms) => {
                !terms.is_empty() && terms.iter().all(|term| term.matches(session))
            }
        }
    }
}

impl Term {
    fn matches(&self, session: &Session) -> bool {
        match self {
            Self::Field { field, needle } => session
                .attribute(field)
                .is_some_and(|value| fold(&value).contains(needle.as_str())),
            Self::Any(needle) => session
                .attributes()
                .filter_map(|(_, value)| value)
                .any(|value| fold(&value).contains(needle.as_str())),
        }
    }
}
