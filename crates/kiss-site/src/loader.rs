//! Content loaders.
//!
//! A loader turns one file into an attribute overlay. The graph merges the
//! overlay over the cascaded parent data, so loaders never see or set page
//! ids or relations.
//!
//! Built-in loaders:
//! - `json`: a JSON object file
//! - `text`: YAML front matter plus the raw body as `content`
//! - `markdown`: like `text`, with the body rendered to HTML
//! - `static`: no data; the file is copied as-is

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use kiss_config::{Config, LoaderConfig, OutputType};
use pulldown_cmark::{Options, Parser};

use crate::value::{Object, Value};

/// Front matter delimiter.
const FRONT_MATTER_DELIMITER: &str = "---";

/// Error loading a content file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid front matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path} does not hold an object")]
    NotAnObject { path: PathBuf },
    #[error("No content read for {path}")]
    MissingContent { path: PathBuf },
}

/// What a loader receives for one file.
#[derive(Clone, Copy, Debug)]
pub struct LoaderInput<'a> {
    pub path: &'a Path,
    /// File text, `None` for loaders that don't read content.
    pub content: Option<&'a str>,
    /// The configured loader entry.
    pub options: &'a LoaderConfig,
    pub config: &'a Config,
}

impl<'a> LoaderInput<'a> {
    fn text(&self) -> Result<&'a str, LoadError> {
        self.content.ok_or_else(|| LoadError::MissingContent {
            path: self.path.to_path_buf(),
        })
    }
}

/// Turns a content file into page attributes.
pub trait Loader: Send + Sync {
    /// Handler name referenced by `[[loaders]] handler`.
    fn name(&self) -> &'static str;

    /// Whether the file text is read before [`Loader::load`].
    fn reads_content(&self) -> bool {
        true
    }

    /// Attribute overlay for the file.
    fn load(&self, input: &LoaderInput<'_>) -> Result<Object, LoadError>;
}

/// Loader for JSON object files.
#[derive(Debug, Default)]
pub struct JsonLoader;

impl Loader for JsonLoader {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load(&self, input: &LoaderInput<'_>) -> Result<Object, LoadError> {
        let json: serde_json::Value =
            serde_json::from_str(input.text()?).map_err(|source| LoadError::Json {
                path: input.path.to_path_buf(),
                source,
            })?;
        let Value::Object(mut data) = Value::from(json) else {
            return Err(LoadError::NotAnObject {
                path: input.path.to_path_buf(),
            });
        };
        parse_date_attributes(&mut data, input.config);
        Ok(data)
    }
}

/// Loader for text files with optional YAML front matter.
#[derive(Debug, Default)]
pub struct TextLoader;

impl TextLoader {
    fn parse(input: &LoaderInput<'_>) -> Result<(Object, String), LoadError> {
        let text = input.text()?;
        let (front_matter, body) = split_front_matter(text);
        let mut data = match front_matter.map(str::trim).filter(|fm| !fm.is_empty()) {
            None => Object::new(),
            Some(yaml) => {
                let parsed: serde_json::Value =
                    serde_yaml::from_str(yaml).map_err(|source| LoadError::FrontMatter {
                        path: input.path.to_path_buf(),
                        source,
                    })?;
                match Value::from(parsed) {
                    Value::Object(map) => map,
                    Value::Null => Object::new(),
                    _ => {
                        return Err(LoadError::NotAnObject {
                            path: input.path.to_path_buf(),
                        });
                    }
                }
            }
        };
        parse_date_attributes(&mut data, input.config);
        Ok((data, body.to_owned()))
    }
}

impl Loader for TextLoader {
    fn name(&self) -> &'static str {
        "text"
    }

    fn load(&self, input: &LoaderInput<'_>) -> Result<Object, LoadError> {
        let (mut data, body) = Self::parse(input)?;
        data.insert("content".to_owned(), Value::from(body));
        Ok(data)
    }
}

/// Loader for Markdown files: front matter plus the body rendered to HTML.
#[derive(Debug, Default)]
pub struct MarkdownLoader;

impl Loader for MarkdownLoader {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn load(&self, input: &LoaderInput<'_>) -> Result<Object, LoadError> {
        let (mut data, body) = TextLoader::parse(input)?;
        data.insert("content".to_owned(), Value::from(render_markdown(&body)));
        Ok(data)
    }
}

/// Loader for files copied as-is (assets, images).
#[derive(Debug, Default)]
pub struct StaticLoader;

impl Loader for StaticLoader {
    fn name(&self) -> &'static str {
        "static"
    }

    fn reads_content(&self) -> bool {
        false
    }

    fn load(&self, _input: &LoaderInput<'_>) -> Result<Object, LoadError> {
        Ok(Object::new())
    }
}

/// Loaders by handler name.
pub struct LoaderRegistry {
    loaders: HashMap<&'static str, Box<dyn Loader>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&&str> = self.loaders.keys().collect();
        names.sort();
        f.debug_struct("LoaderRegistry").field("loaders", &names).finish()
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(JsonLoader);
        registry.register(TextLoader);
        registry.register(MarkdownLoader);
        registry.register(StaticLoader);
        registry
    }
}

impl LoaderRegistry {
    /// Registry with the built-in loaders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Register a loader, replacing any loader with the same name.
    pub fn register(&mut self, loader: impl Loader + 'static) {
        self.loaders.insert(loader.name(), Box::new(loader));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Loader> {
        self.loaders.get(name).map(AsRef::as_ref)
    }
}

/// Output type of pages produced by a configured loader.
#[must_use]
pub fn configured_output_type(loader: &LoaderConfig) -> OutputType {
    loader.output_type.unwrap_or(if loader.handler == "static" {
        OutputType::Static
    } else {
        OutputType::Html
    })
}

/// Compile glob patterns, logging and skipping invalid ones.
#[must_use]
pub fn compile_patterns(patterns: &[String]) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "Invalid glob pattern");
                None
            }
        })
        .collect()
}

/// Index of the first active loader whose patterns match `path`.
#[must_use]
pub fn find_matching_loader(config: &Config, path: &Path) -> Option<usize> {
    let relative = path.strip_prefix(&config.dirs_resolved.content).unwrap_or(path);
    let found = config.loaders.iter().position(|loader| {
        loader.active
            && !loader.is_computed()
            && compile_patterns(&loader.patterns)
                .iter()
                .any(|p| p.matches_path(relative))
    });
    if found.is_none() {
        tracing::warn!(path = %path.display(), "No matching loader found");
    }
    found
}

/// Split `---` delimited front matter from the body.
fn split_front_matter(text: &str) -> (Option<&str>, &str) {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(rest) = text.strip_prefix(FRONT_MATTER_DELIMITER) else {
        return (None, text);
    };
    let Some(rest) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) else {
        return (None, text);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FRONT_MATTER_DELIMITER {
            let body = &rest[offset + line.len()..];
            return (Some(&rest[..offset]), body);
        }
        offset += line.len();
    }
    (None, text)
}

fn render_markdown(body: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_GFM;
    let mut html = String::with_capacity(body.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut html, Parser::new_ext(body, options));
    html
}

/// Turn string values of the published and updated attributes into dates.
fn parse_date_attributes(data: &mut Object, config: &Config) {
    for key in [
        &config.defaults.page_published_attribute,
        &config.defaults.page_updated_attribute,
    ] {
        if let Some(value) = data.get_mut(key.as_str())
            && let Some(date) = value.as_str().and_then(parse_date)
        {
            *value = Value::Date(date);
        }
    }
}

/// Parse an RFC 3339 timestamp, a naive `YYYY-MM-DDTHH:MM:SS` timestamp
/// (UTC) or a `YYYY-MM-DD` date (midnight UTC).
#[must_use]
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}
