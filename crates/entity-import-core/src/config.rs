//! Importer configuration, read from the environment or built in code.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ImportError, ImportResult};
use crate::guards::{clamp_timeout_secs, clamp_workers};

pub const DEFAULT_API_URL: &str = "https://www.wikidata.org/w/api.php";
pub const DEFAULT_CONCEPT_URI: &str = "http://www.wikidata.org/entity/";
pub const DEFAULT_LOCAL_CONCEPT_URI: &str = "http://localhost/entity/";
pub const DEFAULT_USER_AGENT: &str = "entity-import/0.1 (+https://localhost/)";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DB_PATH: &str = "~/.entity-import/import.db";

#[derive(Debug, Clone, PartialEq)]
pub struct ImporterConfig {
    /// `api.php` endpoint of the remote repository.
    pub api_url: String,
    /// Prefix of remote concept URIs (quantity units, globes).
    pub remote_concept_uri: String,
    /// Prefix that replaces `remote_concept_uri` in translated values.
    pub local_concept_uri: String,
    pub fetch_timeout: Duration,
    pub user_agent: String,
    pub workers: usize,
    pub db_path: PathBuf,
    /// Shallow-import unmapped referenced entities before translating
    /// statements.
    pub import_referenced_entities: bool,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            remote_concept_uri: DEFAULT_CONCEPT_URI.to_string(),
            local_concept_uri: DEFAULT_LOCAL_CONCEPT_URI.to_string(),
            fetch_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            workers: DEFAULT_WORKERS,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            import_referenced_entities: false,
        }
    }
}

impl ImporterConfig {
    /// Build a config from `ENTITY_IMPORT_*` environment variables, falling
    /// back to defaults for unset ones.
    pub fn from_env() -> ImportResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ImporterConfig::from_env`] but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> ImportResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("ENTITY_IMPORT_API_URL") {
            config.api_url = v;
        }
        if let Some(v) = get("ENTITY_IMPORT_CONCEPT_URI") {
            config.remote_concept_uri = v;
        }
        if let Some(v) = get("ENTITY_IMPORT_LOCAL_CONCEPT_URI") {
            config.local_concept_uri = v;
        }
        if let Some(v) = get("ENTITY_IMPORT_TIMEOUT_SECS") {
            let secs = v.parse::<u64>().map_err(|_| {
                ImportError::Config(format!("ENTITY_IMPORT_TIMEOUT_SECS is not a number: {v}"))
            })?;
            config.fetch_timeout = Duration::from_secs(clamp_timeout_secs(secs));
        }
        if let Some(v) = get("ENTITY_IMPORT_USER_AGENT") {
            config.user_agent = v;
        }
        if let Some(v) = get("ENTITY_IMPORT_WORKERS") {
            let workers = v.parse::<usize>().map_err(|_| {
                ImportError::Config(format!("ENTITY_IMPORT_WORKERS is not a number: {v}"))
            })?;
            config.workers = clamp_workers(workers);
        }
        if let Some(v) = get("ENTITY_IMPORT_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("ENTITY_IMPORT_REFERENCED") {
            config.import_referenced_entities = flag_enabled(&v);
        }
        Ok(config)
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_concept_uris(
        mut self,
        remote: impl Into<String>,
        local: impl Into<String>,
    ) -> Self {
        self.remote_concept_uri = remote.into();
        self.local_concept_uri = local.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Duration::from_secs(clamp_timeout_secs(timeout.as_secs()));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = clamp_workers(workers);
        self
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_referenced_entities(mut self, enabled: bool) -> Self {
        self.import_referenced_entities = enabled;
        self
    }
}

fn flag_enabled(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    matches!(v.as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ImporterConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ImporterConfig::default());
        assert!(!config.import_referenced_entities);
    }

    #[test]
    fn env_values_override_defaults() {
        let config = ImporterConfig::from_lookup(lookup_from(&[
            ("ENTITY_IMPORT_API_URL", "https://example.org/w/api.php"),
            ("ENTITY_IMPORT_TIMEOUT_SECS", "10"),
            ("ENTITY_IMPORT_WORKERS", "500"),
            ("ENTITY_IMPORT_REFERENCED", "yes"),
            ("ENTITY_IMPORT_USER_AGENT", "  "),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://example.org/w/api.php");
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.workers, crate::guards::MAX_BATCH_WORKERS);
        assert!(config.import_referenced_entities);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn unparseable_numbers_are_config_errors() {
        let err = ImporterConfig::from_lookup(lookup_from(&[("ENTITY_IMPORT_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }
}
