//! Engine configuration.
//!
//! Defaults suit most deployments; [`EngineConfig::from_env`] applies overrides from the
//! process environment:
//!
//! - `MAX_ITEMS_PER_PAGE`: upper bound on the page size (default 100)
//! - `STORAGE_URL_EXPIRATION_SECS`: lifetime of signed blob URLs (default 3600)
//! - `TEXT_SEARCH_LANGUAGE`: language of full-text indexes (default `english`)
//!
//! Missing or malformed values keep the default.

use std::{env, time::Duration};

const DEFAULT_MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_TEXT_SEARCH_LANGUAGE: &str = "english";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest page a listing returns.
    pub max_page_size: u64,
    /// Lifetime of URLs produced by the blob store for fetched records.
    pub signed_url_ttl: Duration,
    /// Language used when building full-text indexes.
    pub text_search_language: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
            text_search_language: DEFAULT_TEXT_SEARCH_LANGUAGE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(size) = lookup("MAX_ITEMS_PER_PAGE")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|size| *size > 0)
        {
            self.max_page_size = size;
        }

        if let Some(secs) = lookup("STORAGE_URL_EXPIRATION_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.signed_url_ttl = Duration::from_secs(secs);
        }

        if let Some(language) = lookup("TEXT_SEARCH_LANGUAGE").filter(|v| !v.trim().is_empty()) {
            self.text_search_language = language.trim().to_string();
        }

        self
    }

    pub fn max_page_size(mut self, max_page_size: u64) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub fn signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn overrides_apply() {
        let config = EngineConfig::default().with_overrides(lookup(&[
            ("MAX_ITEMS_PER_PAGE", "25"),
            ("STORAGE_URL_EXPIRATION_SECS", "60"),
        ]));

        assert_eq!(config.max_page_size, 25);
        assert_eq!(config.signed_url_ttl, Duration::from_secs(60));
        assert_eq!(config.text_search_language, "english");
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let config = EngineConfig::default().with_overrides(lookup(&[
            ("MAX_ITEMS_PER_PAGE", "0"),
            ("STORAGE_URL_EXPIRATION_SECS", "soon"),
        ]));

        assert_eq!(config, EngineConfig::default());
    }
}
