//! Configuration management for kiss.
//!
//! Parses `kiss.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `site.url`
//! - `site.title`

mod expand;

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override content directory.
    pub content_dir: Option<PathBuf>,
    /// Override public (output) directory.
    pub public_dir: Option<PathBuf>,
    /// Override site URL.
    pub site_url: Option<String>,
    /// Override strict `@` reference resolution.
    pub strict_references: Option<bool>,
}

/// Configuration filename to search for.
pub const CONFIG_FILENAME: &str = "kiss.toml";

/// Kind of output a page produces.
///
/// Used as the capability tag for writer and transform lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputType {
    /// Rendered HTML document.
    #[default]
    Html,
    /// File copied as-is.
    Static,
    /// Image, possibly with generated derivatives.
    Image,
    /// Never written.
    Skip,
}

impl OutputType {
    /// Uppercase tag as used in configuration and page metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::Static => "STATIC",
            Self::Image => "IMAGE",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site-wide context data (exposed to pages as `site`).
    pub site: SiteConfig,
    /// Directory configuration (paths are relative strings from TOML).
    dirs: DirsConfigRaw,
    /// Page computation defaults.
    pub defaults: DefaultsConfig,
    /// Layout template names.
    pub templates: TemplatesConfig,
    /// `@` reference resolution settings.
    pub references: ReferencesConfig,
    /// Content loaders, in priority order. The position is the loader id.
    pub loaders: Vec<LoaderConfig>,
    /// Declarative hooks per build phase.
    pub hooks: HooksConfig,

    /// Resolved directory configuration (set after loading).
    #[serde(skip)]
    pub dirs_resolved: DirsConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_base(Path::new("."))
    }
}

/// Site configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Absolute site URL. Required.
    pub url: Option<String>,
    /// Site title.
    pub title: Option<String>,
    /// Site description.
    pub description: Option<String>,
    /// Default cover image.
    pub image: Option<String>,
    /// Locale as `[language, territory]`.
    pub locale: Vec<String>,
    /// Default content language. Falls back to the first locale element.
    pub language: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            url: None,
            title: None,
            description: None,
            image: None,
            locale: vec!["en".to_owned(), "US".to_owned()],
            language: None,
        }
    }
}

impl SiteConfig {
    /// Default language used for `@id` resolution and index keys.
    #[must_use]
    pub fn default_language(&self) -> &str {
        self.language
            .as_deref()
            .or_else(|| self.locale.first().map(String::as_str))
            .unwrap_or("en")
    }
}

/// Raw directory configuration as parsed from TOML (paths as strings).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DirsConfigRaw {
    content: Option<String>,
    public: Option<String>,
    theme: Option<String>,
    template: Option<String>,
    watch_extra: Option<Vec<String>>,
}

/// Resolved directory configuration.
#[derive(Debug, Default, Clone)]
pub struct DirsConfig {
    /// Where content files are loaded from.
    pub content: PathBuf,
    /// Where generated files are written.
    pub public: PathBuf,
    /// Theme directory.
    pub theme: PathBuf,
    /// Template directory.
    pub template: PathBuf,
    /// Additional paths watched in watch mode.
    pub watch_extra: Vec<PathBuf>,
}

/// Page computation defaults.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Sort key for children and descendants; a leading `-` sorts descending.
    pub sort_collection_by: String,
    /// Maximum number of computation rounds before giving up.
    pub max_computing_rounds: usize,
    /// Length of generated descriptions.
    pub description_length: usize,
    /// Attribute holding the publication date.
    pub page_published_attribute: String,
    /// Attribute holding the last update date.
    pub page_updated_attribute: String,
    /// Build O(1) lookup indexes. Lookups fall back to scans when disabled.
    pub enable_page_indexes: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            sort_collection_by: "-created".to_owned(),
            max_computing_rounds: 10,
            description_length: 160,
            page_published_attribute: "created".to_owned(),
            page_updated_attribute: "modified".to_owned(),
            enable_page_indexes: true,
        }
    }
}

/// Layout template names, relative to the template directory.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Layout for pages with children.
    pub collection: String,
    /// Layout for pages with content.
    pub post: String,
    /// Layout for everything else.
    pub default: String,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            collection: "collection.njk".to_owned(),
            post: "post.njk".to_owned(),
            default: "default.njk".to_owned(),
        }
    }
}

/// `@` reference resolution settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReferencesConfig {
    /// Report pages with unresolved references as transform failures.
    pub strict: bool,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self { strict: true }
    }
}

/// Where a loader takes its pages from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderSource {
    /// Files matched by the loader patterns.
    #[default]
    File,
    /// Pages derived from the loaded pages, on full builds only.
    Computed,
}

/// How a computed collection reads its `group_by` attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupByType {
    /// The value is the group key.
    #[default]
    String,
    /// Every element of an array value is a group key.
    Array,
}

/// A content loader entry.
#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    /// Registered loader handler name (e.g. "markdown", "json").
    pub handler: String,
    /// Glob patterns relative to the content directory.
    #[serde(rename = "match", default)]
    pub patterns: Vec<String>,
    /// Output type assigned to pages produced by this loader.
    #[serde(default)]
    pub output_type: Option<OutputType>,
    /// Inactive loaders are skipped.
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub source: LoaderSource,
    /// Page attribute path computed collections group by.
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub group_by_type: GroupByType,
    /// Collection group name of computed pages, `group_by` when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// Content-relative path of the computed top-level page, the slugified
    /// `group_by` when unset.
    #[serde(default)]
    pub base_link: Option<String>,
    /// Logged when the loader runs.
    #[serde(default)]
    pub description: Option<String>,
}

impl LoaderConfig {
    fn new(handler: &str, patterns: &[&str]) -> Self {
        Self {
            handler: handler.to_owned(),
            patterns: patterns.iter().map(|p| (*p).to_owned()).collect(),
            output_type: None,
            active: true,
            source: LoaderSource::File,
            group_by: None,
            group_by_type: GroupByType::String,
            name: None,
            base_link: None,
            description: None,
        }
    }

    /// Computed `collection` loader grouping pages by `group_by`.
    #[must_use]
    pub fn computed(group_by: &str, group_by_type: GroupByType) -> Self {
        Self {
            source: LoaderSource::Computed,
            group_by: Some(group_by.to_owned()),
            group_by_type,
            ..Self::new("collection", &[])
        }
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.source == LoaderSource::Computed
    }
}

fn default_true() -> bool {
    true
}

fn default_loaders() -> Vec<LoaderConfig> {
    vec![
        LoaderConfig::new("json", &["**/*.json"]),
        LoaderConfig {
            active: false,
            ..LoaderConfig::new("static", &[])
        },
        LoaderConfig::new("text", &["**/*.html"]),
        LoaderConfig {
            output_type: Some(OutputType::Image),
            ..LoaderConfig::new("static", &["**/*.jpg", "**/*.jpeg", "**/*.png", "**/*.webp"])
        },
        LoaderConfig::new("markdown", &["**/*.md"]),
    ]
}

/// Declarative hooks, per build phase.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct HooksConfig {
    /// Hooks run before anything else.
    pub load_libs: Vec<HookConfig>,
    /// Hooks run before content loading.
    pub pre_load: Vec<HookConfig>,
    /// Hooks run after content loading.
    pub post_load: Vec<HookConfig>,
    /// Hooks run after writing.
    pub post_write: Vec<HookConfig>,
}

/// A declarative hook.
#[derive(Debug, Deserialize, Clone)]
pub struct HookConfig {
    /// Action name (`copy` or `exec`).
    pub action: String,
    /// Human readable description used in logs.
    #[serde(default)]
    pub description: Option<String>,
    /// Copy source.
    #[serde(default)]
    pub from: Option<String>,
    /// Copy destination, relative to the public directory.
    #[serde(default)]
    pub to: Option<String>,
    /// Shell command for `exec`.
    #[serde(default)]
    pub command: Option<String>,
    /// Glob patterns of changed files that make this hook run in incremental
    /// builds. Without patterns the hook is skipped in incremental builds.
    #[serde(default)]
    pub incremental_rebuild: Option<Vec<String>>,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`site.url`").
        field: String,
        /// Error message (e.g., "${`SITE_URL`} not set").
        message: String,
    },
}

/// Require a URL field to use http:// or https:// scheme.
fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `kiss.toml` in current directory and parents.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the resulting configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    /// Create a default config with directories relative to `base`.
    #[must_use]
    pub fn with_base(base: &Path) -> Self {
        Self {
            site: SiteConfig::default(),
            dirs: DirsConfigRaw::default(),
            defaults: DefaultsConfig::default(),
            templates: TemplatesConfig::default(),
            references: ReferencesConfig::default(),
            loaders: default_loaders(),
            hooks: HooksConfig::default(),
            dirs_resolved: DirsConfig {
                content: base.join("content"),
                public: base.join("public"),
                theme: base.join("theme"),
                template: base.join("theme").join("templates"),
                watch_extra: Vec::new(),
            },
            config_path: None,
        }
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(content_dir) = &settings.content_dir {
            self.dirs_resolved.content.clone_from(content_dir);
        }
        if let Some(public_dir) = &settings.public_dir {
            self.dirs_resolved.public.clone_from(public_dir);
        }
        if let Some(url) = &settings.site_url {
            self.site.url = Some(url.clone());
        }
        if let Some(strict) = settings.strict_references {
            self.references.strict = strict;
        }
    }

    /// Whether `path` is the file this configuration was loaded from.
    #[must_use]
    pub fn is_config_file(&self, path: &Path) -> bool {
        self.config_path.as_deref() == Some(path)
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::with_base(&cwd)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// A missing or non-http site URL is fatal: URLs and feeds cannot be
    /// computed without it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.site.url.as_deref().ok_or_else(|| {
            ConfigError::Validation(
                "site.url is required (e.g. https://example.org)".to_owned(),
            )
        })?;
        require_http_url(url, "site.url")?;

        if self.defaults.max_computing_rounds == 0 {
            return Err(ConfigError::Validation(
                "defaults.max_computing_rounds must be greater than 0".to_owned(),
            ));
        }
        if self.defaults.sort_collection_by.trim_start_matches('-').is_empty() {
            return Err(ConfigError::Validation(
                "defaults.sort_collection_by cannot be empty".to_owned(),
            ));
        }
        for (idx, loader) in self.loaders.iter().enumerate() {
            if loader.handler.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "loaders[{idx}].handler cannot be empty"
                )));
            }
            if loader.is_computed() && loader.group_by.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::Validation(format!(
                    "loaders[{idx}] is computed and needs a group_by option"
                )));
            }
        }
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref url) = self.site.url {
            self.site.url = Some(expand::expand_env(url, "site.url")?);
        }
        if let Some(ref title) = self.site.title {
            self.site.title = Some(expand::expand_env(title, "site.title")?);
        }
        Ok(())
    }

    /// Resolve relative paths against the config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        let resolve = |path: Option<&str>, default: &str| config_dir.join(path.unwrap_or(default));

        let theme = resolve(self.dirs.theme.as_deref(), "theme");
        let template = match self.dirs.template.as_deref() {
            Some(template) => config_dir.join(template),
            None => theme.join("templates"),
        };
        self.dirs_resolved = DirsConfig {
            content: resolve(self.dirs.content.as_deref(), "content"),
            public: resolve(self.dirs.public.as_deref(), "public"),
            theme,
            template,
            watch_extra: self
                .dirs
                .watch_extra
                .iter()
                .flatten()
                .map(|d| config_dir.join(d))
                .collect(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid_config() -> Config {
        let mut config = Config::with_base(Path::new("/test"));
        config.site.url = Some("https://example.com".to_owned());
        config
    }

    /// Assert that validation fails with expected substrings in the error message.
    fn assert_validation_error(config: &Config, expected_substrings: &[&str]) {
        let result = config.validate();
        assert!(result.is_err(), "Expected validation to fail");
        let err = result.unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation(_)),
            "Expected ConfigError::Validation, got {err:?}"
        );
        let msg = err.to_string();
        for s in expected_substrings {
            assert!(
                msg.contains(s),
                "Expected error to contain '{s}', got: {msg}"
            );
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::with_base(Path::new("/test"));
        assert_eq!(config.dirs_resolved.content, PathBuf::from("/test/content"));
        assert_eq!(config.dirs_resolved.public, PathBuf::from("/test/public"));
        assert_eq!(
            config.dirs_resolved.template,
            PathBuf::from("/test/theme/templates")
        );
        assert_eq!(config.defaults.max_computing_rounds, 10);
        assert_eq!(config.defaults.sort_collection_by, "-created");
        assert!(config.defaults.enable_page_indexes);
        assert!(config.references.strict);
        assert_eq!(config.site.default_language(), "en");
    }

    #[test]
    fn test_default_loaders() {
        let config = Config::default();
        let handlers: Vec<_> = config.loaders.iter().map(|l| l.handler.as_str()).collect();
        assert_eq!(handlers, vec!["json", "static", "text", "static", "markdown"]);
        assert!(!config.loaders[1].active);
        assert_eq!(config.loaders[3].output_type, Some(OutputType::Image));
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.site.url.is_none());
        assert_eq!(config.loaders.len(), 5);
    }

    #[test]
    fn test_parse_site_and_defaults() {
        let toml = r#"
[site]
url = "https://blog.example.org"
title = "My blog"
locale = ["fr", "FR"]

[defaults]
max_computing_rounds = 4
sort_collection_by = "title"
enable_page_indexes = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.site.url.as_deref(), Some("https://blog.example.org"));
        assert_eq!(config.site.default_language(), "fr");
        assert_eq!(config.defaults.max_computing_rounds, 4);
        assert_eq!(config.defaults.sort_collection_by, "title");
        assert!(!config.defaults.enable_page_indexes);
        // unspecified keys keep their defaults
        assert_eq!(config.defaults.description_length, 160);
    }

    #[test]
    fn test_explicit_language_wins_over_locale() {
        let toml = r#"
[site]
locale = ["en", "GB"]
language = "de"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.site.default_language(), "de");
    }

    #[test]
    fn test_parse_loaders_replace_defaults() {
        let toml = r#"
[[loaders]]
handler = "markdown"
match = ["**/*.md", "**/*.markdown"]

[[loaders]]
handler = "static"
match = ["**/*.pdf"]
output_type = "STATIC"
active = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.loaders.len(), 2);
        assert_eq!(config.loaders[0].patterns.len(), 2);
        assert!(config.loaders[0].active);
        assert_eq!(config.loaders[1].output_type, Some(OutputType::Static));
        assert!(!config.loaders[1].active);
    }

    #[test]
    fn test_parse_hooks() {
        let toml = r#"
[[hooks.post_write]]
action = "copy"
from = "theme/assets"
to = "assets"
incremental_rebuild = ["theme/assets/**"]

[[hooks.pre_load]]
action = "exec"
command = "echo hello"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.hooks.post_write.len(), 1);
        assert_eq!(config.hooks.post_write[0].action, "copy");
        assert_eq!(
            config.hooks.post_write[0].incremental_rebuild,
            Some(vec!["theme/assets/**".to_owned()])
        );
        assert_eq!(config.hooks.pre_load[0].command.as_deref(), Some("echo hello"));
        assert!(config.hooks.load_libs.is_empty());
    }

    #[test]
    fn test_resolve_paths() {
        let toml = r#"
[dirs]
content = "docs"
public = "dist"
theme = "look"
watch_extra = ["data"]
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(Path::new("/project"));

        assert_eq!(config.dirs_resolved.content, PathBuf::from("/project/docs"));
        assert_eq!(config.dirs_resolved.public, PathBuf::from("/project/dist"));
        assert_eq!(
            config.dirs_resolved.template,
            PathBuf::from("/project/look/templates")
        );
        assert_eq!(
            config.dirs_resolved.watch_extra,
            vec![PathBuf::from("/project/data")]
        );
    }

    #[test]
    fn test_apply_cli_settings() {
        let mut config = valid_config();
        let overrides = CliSettings {
            content_dir: Some(PathBuf::from("/custom/content")),
            strict_references: Some(false),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(
            config.dirs_resolved.content,
            PathBuf::from("/custom/content")
        );
        assert!(!config.references.strict);
        assert_eq!(config.dirs_resolved.public, PathBuf::from("/test/public")); // Unchanged
    }

    #[test]
    fn test_validate_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_site_url() {
        let config = Config::with_base(Path::new("/test"));
        assert_validation_error(&config, &["site.url", "required"]);
    }

    #[test]
    fn test_validate_site_url_scheme() {
        let mut config = valid_config();
        config.site.url = Some("example.com".to_owned());
        assert_validation_error(&config, &["site.url", "http"]);
    }

    #[test]
    fn test_parse_computed_loader() {
        let toml = r#"
[[loaders]]
handler = "markdown"
match = ["**/*.md"]

[[loaders]]
source = "computed"
handler = "collection"
group_by = "tags"
group_by_type = "array"
base_link = "topics"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert!(!config.loaders[0].is_computed());
        let computed = &config.loaders[1];
        assert!(computed.is_computed());
        assert_eq!(computed.group_by.as_deref(), Some("tags"));
        assert_eq!(computed.group_by_type, GroupByType::Array);
        assert_eq!(computed.base_link.as_deref(), Some("topics"));
        assert_eq!(computed.name, None);
    }

    #[test]
    fn test_validate_computed_loader_needs_group_by() {
        let mut config = valid_config();
        config.loaders.push(LoaderConfig {
            group_by: None,
            ..LoaderConfig::computed("tags", GroupByType::Array)
        });
        assert_validation_error(&config, &["loaders[5]", "group_by"]);

        config.loaders[5].group_by = Some("tags".to_owned());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_rounds() {
        let mut config = valid_config();
        config.defaults.max_computing_rounds = 0;
        assert_validation_error(&config, &["max_computing_rounds"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            "[site]\nurl = \"https://example.com\"\n\n[dirs]\ncontent = \"pages\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path), None).unwrap();

        assert_eq!(config.dirs_resolved.content, dir.path().join("pages"));
        assert!(config.is_config_file(&path));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/kiss.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_missing_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[site]\ntitle = \"No url\"\n").unwrap();

        let err = Config::load(Some(&path), None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_output_type_display() {
        assert_eq!(OutputType::Html.to_string(), "HTML");
        assert_eq!(OutputType::Image.as_str(), "IMAGE");
    }
}
