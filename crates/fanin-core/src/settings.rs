//! Resolver settings.
//!
//! Reads:
//! - `FANIN_MAX_BACKTRACK_LIMIT` (optional, default: 100)
//! - `FANIN_RESOLVE_REVISIONS` (optional, default: "Y"); "N" disables fan-in
//!   resolution and passes actual revisions through unchanged

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default number of historical instances a node may scan.
pub const DEFAULT_MAX_BACKTRACK_LIMIT: usize = 100;

pub const MAX_BACKTRACK_LIMIT_ENV: &str = "FANIN_MAX_BACKTRACK_LIMIT";
pub const RESOLVE_REVISIONS_ENV: &str = "FANIN_RESOLVE_REVISIONS";

/// Settings for one resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Backtrack ceiling per dependency node.
    pub max_backtrack_limit: usize,
    /// When false, resolution returns the actual revisions unchanged.
    pub enforce_revision_compatibility: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_backtrack_limit: DEFAULT_MAX_BACKTRACK_LIMIT,
            enforce_revision_compatibility: true,
        }
    }
}

impl ResolverSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create settings from an arbitrary key lookup. Unparseable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_backtrack_limit = match lookup(MAX_BACKTRACK_LIMIT_ENV) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(
                    key = MAX_BACKTRACK_LIMIT_ENV,
                    value = %raw,
                    "ignoring unparseable backtrack limit"
                );
                defaults.max_backtrack_limit
            }),
            None => defaults.max_backtrack_limit,
        };
        let enforce_revision_compatibility = lookup(RESOLVE_REVISIONS_ENV)
            .map(|v| !v.trim().eq_ignore_ascii_case("n"))
            .unwrap_or(defaults.enforce_revision_compatibility);

        Self {
            max_backtrack_limit,
            enforce_revision_compatibility,
        }
    }

    pub fn with_max_backtrack_limit(mut self, limit: usize) -> Self {
        self.max_backtrack_limit = limit;
        self
    }

    pub fn with_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_revision_compatibility = enforce;
        self
    }
}
