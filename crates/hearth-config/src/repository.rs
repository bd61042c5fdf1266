use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, Result};

/// Alias the installed system is registered under.
pub const SYSTEM_REPO_ALIAS: &str = "@System";

/// Priority given to repositories that do not set one.
pub const DEFAULT_PRIORITY: u32 = 99;

/// Defines a repository known to the package backend.
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Repository {
    /// Unique alias of the repository.
    pub alias: String,

    /// Human readable name.
    /// Default: the alias
    pub name: Option<String>,

    /// Metadata URLs, tried in order until one works.
    pub urls: Vec<String>,

    /// Whether the repository is enabled.
    /// Default: true
    pub enabled: Option<bool>,

    /// Whether the repository metadata is refreshed automatically.
    /// Default: true
    pub autorefresh: Option<bool>,

    /// Repository priority; lower values are preferred.
    /// Default: 99
    pub priority: Option<u32>,
}

impl Repository {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.alias)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn autorefresh(&self) -> bool {
        self.autorefresh.unwrap_or(true)
    }

    pub fn priority(&self) -> u32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    /// Parses every configured URL.
    pub fn parsed_urls(&self) -> Result<Vec<Url>> {
        if self.urls.is_empty() {
            return Err(ConfigError::MissingRepositoryUrl(self.alias.clone()));
        }

        self.urls
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|source| {
                    ConfigError::InvalidRepositoryUrl {
                        alias: self.alias.clone(),
                        url: raw.clone(),
                        source,
                    }
                })
            })
            .collect()
    }
}

/// The repository entry written into a freshly generated configuration.
pub fn example_repository() -> Repository {
    Repository {
        alias: "main".to_string(),
        name: Some("Main Repository".to_string()),
        urls: vec!["file:///srv/hearth/repos/main".to_string()],
        enabled: Some(true),
        autorefresh: Some(true),
        priority: Some(DEFAULT_PRIORITY),
    }
}
