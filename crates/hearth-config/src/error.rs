use hearth_utils::error::PathError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(hearth_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(hearth_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(hearth_config::already_exists),
        help("Remove the existing config file or use a different location")
    )]
    ConfigAlreadyExists,

    #[error("Repository alias cannot be empty")]
    #[diagnostic(
        code(hearth_config::empty_repo_alias),
        help("Give every [[repositories]] entry a unique `alias`")
    )]
    EmptyRepositoryAlias,

    #[error("Reserved repository alias '@System' cannot be used")]
    #[diagnostic(
        code(hearth_config::reserved_repo_alias),
        help("'@System' names the installed system; choose a different alias")
    )]
    ReservedRepositoryAlias,

    #[error("Invalid repository alias '{0}'")]
    #[diagnostic(
        code(hearth_config::invalid_repo_alias),
        help("Aliases name cache directories; they cannot contain '/' or '\\' or be '.' or '..'")
    )]
    InvalidRepositoryAlias(String),

    #[error("Duplicate repository alias: {0}")]
    #[diagnostic(
        code(hearth_config::duplicate_repo),
        help("Each repository must have a unique alias")
    )]
    DuplicateRepositoryAlias(String),

    #[error("Repository '{0}' has no URL")]
    #[diagnostic(
        code(hearth_config::missing_repo_url),
        help("Add at least one entry to the repository's `urls` list")
    )]
    MissingRepositoryUrl(String),

    #[error("Invalid URL '{url}' for repository '{alias}': {source}")]
    #[diagnostic(
        code(hearth_config::invalid_repo_url),
        help("Use an absolute URL such as file:///srv/repo or https://example.org/repo")
    )]
    InvalidRepositoryUrl {
        alias: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("IO error: {0}")]
    #[diagnostic(code(hearth_config::io))]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(hearth_config::path))]
    Path(#[from] PathError),

    #[error("Failed to parse TOML: {0}")]
    #[diagnostic(code(hearth_config::toml))]
    Toml(#[from] toml_edit::TomlError),

    #[error("Encountered unexpected TOML item: {0}")]
    #[diagnostic(code(hearth_config::unexpected_toml_item))]
    UnexpectedTomlItem(String),

    #[error("Failed to annotate first table in array: {0}")]
    #[diagnostic(code(hearth_config::annotate_first_table))]
    AnnotateFirstTable(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
