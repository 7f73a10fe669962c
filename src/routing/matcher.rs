//! Route matching logic.
//!
//! # Responsibilities
//! - Match path prefix (case-sensitive)
//! - Represent the catch-all predicate
//! - Compute the forwarded path when a prefix is stripped
//!
//! # Design Decisions
//! - Path matching is case-sensitive, byte-wise prefix comparison
//! - Empty prefix = always matches (catch-all)
//! - No regex to guarantee O(n) matching

/// A path predicate compiled from a route's `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPredicate {
    /// Matches any path starting with the prefix.
    Prefix(String),
    /// Matches every path.
    CatchAll,
}

impl PathPredicate {
    /// Compile a configured prefix. `None`, `""` and `"/"` all mean catch-all.
    pub fn from_prefix(prefix: Option<&str>) -> Self {
        match prefix {
            None | Some("") | Some("/") => PathPredicate::CatchAll,
            Some(p) => PathPredicate::Prefix(p.to_string()),
        }
    }

    /// Returns true if the path satisfies this predicate.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPredicate::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPredicate::CatchAll => true,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, PathPredicate::CatchAll)
    }

    /// The configured prefix, `"/"` for the catch-all.
    pub fn as_str(&self) -> &str {
        match self {
            PathPredicate::Prefix(prefix) => prefix,
            PathPredicate::CatchAll => "/",
        }
    }

    /// For a trailing-slash prefix, the same prefix without its slash.
    ///
    /// `/api/` yields `/api`; `/api` and the catch-all yield nothing.
    pub fn bare_form(&self) -> Option<&str> {
        match self {
            PathPredicate::Prefix(prefix) if prefix.len() > 1 => prefix.strip_suffix('/'),
            _ => None,
        }
    }

    /// Remove this predicate's prefix from a matching path.
    ///
    /// The prefix is cut without its trailing slash so the remainder keeps
    /// its leading one: `/api/docs` under `/api/` becomes `/docs`. An empty
    /// remainder becomes `/`, and a remainder without a leading slash gets one.
    pub fn strip(&self, path: &str) -> String {
        let prefix = match self {
            PathPredicate::Prefix(prefix) => prefix.trim_end_matches('/'),
            PathPredicate::CatchAll => return path.to_string(),
        };

        match path.strip_prefix(prefix) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            Some(rest) => format!("/{}", rest),
            None => path.to_string(),
        }
    }
}

impl std::fmt::Display for PathPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathPredicate::Prefix(prefix) => write!(f, "{}*", prefix),
            PathPredicate::CatchAll => f.write_str("*"),
        }
    }
}
