use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
    sync::{LazyLock, RwLock},
    time::Duration,
};

use documented::{Documented, DocumentedFields};
use hearth_utils::{
    lock::FileLock,
    path::{resolve_path, xdg_cache_home, xdg_config_home},
};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::{info, warn};

use crate::{
    annotations::{annotate_toml_array_of_tables, annotate_toml_table},
    display::DisplaySettings,
    error::{ConfigError, Result},
    repository::{example_repository, Repository, SYSTEM_REPO_ALIAS},
};

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_CONNECT_WAIT_SECS: u64 = 2;

/// Application's configuration
#[derive(Clone, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Config {
    /// How many times to try connecting to the package backend before giving up.
    /// Default: 3
    pub connect_attempts: Option<u32>,

    /// Seconds to wait between two connection attempts.
    /// Default: 2
    pub connect_wait_secs: Option<u64>,

    /// Root directory of the system packages are installed into.
    /// Default: "/"
    pub target_root: Option<String>,

    /// Directory for cached repository metadata and downloaded packages.
    /// Default: $XDG_CACHE_HOME/hearth
    pub cache_path: Option<String>,

    /// Directory for backend lock files.
    /// Default: $XDG_RUNTIME_DIR/hearth/locks
    pub lock_path: Option<String>,

    /// Behave as if running as root without changing anything on the system.
    /// Default: false
    pub fake_root: Option<bool>,

    /// Never commit any changes.
    /// Default: false
    pub read_only: Option<bool>,

    /// Skip refreshing repository metadata and use what is cached.
    /// Default: false
    pub no_repo_refresh: Option<bool>,

    /// Debugging aid: delay in milliseconds before each repository refresh.
    pub slow_repo_refresh_ms: Option<u64>,

    /// Terminal display settings.
    pub display: Option<DisplaySettings>,

    /// Repositories known to the local backend.
    pub repositories: Vec<Repository>,
}

pub static CONFIG: LazyLock<RwLock<Option<Config>>> = LazyLock::new(|| RwLock::new(None));

pub static CONFIG_PATH: LazyLock<RwLock<PathBuf>> = LazyLock::new(|| {
    RwLock::new(match std::env::var("HEARTH_CONFIG") {
        Ok(path_str) => PathBuf::from(path_str),
        Err(_) => xdg_config_home().join("hearth").join("config.toml"),
    })
});

pub fn init() -> Result<()> {
    let config = Config::new()?;
    let mut global_config = CONFIG.write().unwrap();
    *global_config = Some(config);
    Ok(())
}

pub fn get_config() -> Config {
    {
        let config_guard = CONFIG.read().unwrap();
        if let Some(config) = config_guard.as_ref() {
            return config.clone();
        }
    }

    let mut config_guard = CONFIG.write().unwrap();
    config_guard
        .get_or_insert_with(Config::default_config)
        .clone()
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            connect_attempts: Some(DEFAULT_CONNECT_ATTEMPTS),
            connect_wait_secs: Some(DEFAULT_CONNECT_WAIT_SECS),
            target_root: Some("/".to_string()),
            cache_path: Some(format!("{}/hearth", xdg_cache_home().display())),
            lock_path: None,
            fake_root: Some(false),
            read_only: Some(false),
            no_repo_refresh: Some(false),
            slow_repo_refresh_ms: None,
            display: Some(DisplaySettings::default()),
            repositories: vec![example_repository()],
        }
    }

    /// Loads the configuration file, falling back to the default
    /// configuration if it does not exist.
    pub fn new() -> Result<Self> {
        if std::env::var("HEARTH_STEALTH").is_ok() {
            return Ok(Self::default_config());
        }

        let config_path = CONFIG_PATH.read().unwrap().to_path_buf();

        let mut config = match fs::read_to_string(&config_path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No configuration at {}, using defaults",
                    config_path.display()
                );
                Self::default_config()
            }
            Err(err) => return Err(ConfigError::IoError(err)),
        };

        config.resolve()?;

        Ok(config)
    }

    pub fn resolve(&mut self) -> Result<()> {
        self.connect_attempts.get_or_insert(DEFAULT_CONNECT_ATTEMPTS);
        self.connect_wait_secs
            .get_or_insert(DEFAULT_CONNECT_WAIT_SECS);
        self.fake_root.get_or_insert(false);
        self.read_only.get_or_insert(false);
        self.no_repo_refresh.get_or_insert(false);

        let mut seen_repos = HashSet::new();

        for repo in &mut self.repositories {
            if repo.alias.trim().is_empty() {
                return Err(ConfigError::EmptyRepositoryAlias);
            }
            if repo.alias == SYSTEM_REPO_ALIAS {
                return Err(ConfigError::ReservedRepositoryAlias);
            }
            if repo.alias.contains(['/', '\\', '\0'])
                || matches!(repo.alias.as_str(), "." | "..")
            {
                return Err(ConfigError::InvalidRepositoryAlias(repo.alias.clone()));
            }
            if !seen_repos.insert(repo.alias.clone()) {
                return Err(ConfigError::DuplicateRepositoryAlias(repo.alias.clone()));
            }

            repo.parsed_urls()?;

            repo.enabled.get_or_insert(true);
            repo.autorefresh.get_or_insert(true);
        }

        if !self.repositories.iter().any(Repository::is_enabled) {
            warn!("No repositories enabled.");
        }

        Ok(())
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
            .unwrap_or(DEFAULT_CONNECT_ATTEMPTS)
            .max(1)
    }

    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(
            self.connect_wait_secs
                .unwrap_or(DEFAULT_CONNECT_WAIT_SECS),
        )
    }

    pub fn slow_repo_refresh(&self) -> Option<Duration> {
        self.slow_repo_refresh_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn fake_root(&self) -> bool {
        self.fake_root.unwrap_or(false)
    }

    pub fn read_only(&self) -> bool {
        self.read_only.unwrap_or(false)
    }

    pub fn no_repo_refresh(&self) -> bool {
        self.no_repo_refresh.unwrap_or(false)
    }

    pub fn display(&self) -> DisplaySettings {
        self.display.clone().unwrap_or_default()
    }

    pub fn get_target_root(&self) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("HEARTH_ROOT") {
            return Ok(resolve_path(&env_path)?);
        }
        Ok(resolve_path(self.target_root.as_deref().unwrap_or("/"))?)
    }

    pub fn get_cache_path(&self) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("HEARTH_CACHE") {
            return Ok(resolve_path(&env_path)?);
        }
        if let Some(cache_path) = &self.cache_path {
            return Ok(resolve_path(cache_path)?);
        }
        Ok(xdg_cache_home().join("hearth"))
    }

    pub fn get_lock_path(&self) -> Result<PathBuf> {
        match &self.lock_path {
            Some(lock_path) => Ok(resolve_path(lock_path)?),
            None => Ok(FileLock::default_dir()),
        }
    }

    pub fn to_annotated_document(&self) -> Result<DocumentMut> {
        use toml_edit::Item;

        let toml_string = toml::to_string_pretty(self)?;
        let mut doc = toml_string.parse::<DocumentMut>()?;

        annotate_toml_table::<Config>(doc.as_table_mut(), true)?;

        if let Some(Item::Table(display_table)) = doc.get_mut("display") {
            annotate_toml_table::<DisplaySettings>(display_table, false)?;
        }

        if let Some(repositories_item) = doc.get_mut("repositories") {
            if let Some(repositories_array) = repositories_item.as_array_of_tables_mut() {
                annotate_toml_array_of_tables::<Repository>(repositories_array)?;
            }
        }

        Ok(doc)
    }
}

pub fn generate_default_config() -> Result<PathBuf> {
    let config_path = CONFIG_PATH.read().unwrap().to_path_buf();

    if config_path.exists() {
        return Err(ConfigError::ConfigAlreadyExists);
    }

    let annotated_doc = Config::default_config().to_annotated_document()?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&config_path, annotated_doc.to_string())?;
    info!(
        "Default configuration file generated with documentation at: {}",
        config_path.display()
    );
    Ok(config_path)
}
