//! Pages: attribute maps plus typed structural metadata.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kiss_config::{LoaderSource, OutputType};

use crate::value::{Object, Value};

/// Prefix addressing [`PageMeta`] fields in attribute paths.
pub const META_PREFIX: &str = "meta.";

/// Metadata fields copied by [`Page::to_value`].
const SCALAR_META_FIELDS: [&str; 9] = [
    "id",
    "parent",
    "basename",
    "outputType",
    "isDirectory",
    "isPost",
    "isCollection",
    "collectionGroup",
    "source",
];

/// A file that contributed data to a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSource {
    /// Path of the file.
    pub path: PathBuf,
    /// Index of the configured loader, `None` for synthesized directories.
    pub loader_id: Option<usize>,
}

/// Structural page metadata, owned by the core.
///
/// Loaders never set these fields; the relation fields are recomputed by
/// [`PageGraph::link`](crate::PageGraph::link).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageMeta {
    pub id: String,
    /// Parent id, `None` for the root and detached pages.
    pub parent: Option<String>,
    pub children: Vec<String>,
    /// Root first, immediate parent last.
    pub ascendants: Vec<String>,
    pub descendants: Vec<String>,
    /// Last file loaded into this page.
    pub input_path: PathBuf,
    pub input_sources: Vec<InputSource>,
    pub output_type: OutputType,
    /// Build version the page was (re)created in.
    pub build_version: u64,
    pub basename: String,
    pub is_directory: bool,
    pub is_post: bool,
    pub is_collection: bool,
    pub file_created: Option<DateTime<Utc>>,
    pub file_modified: Option<DateTime<Utc>>,
    /// Loaded from files, or computed from other pages.
    pub source: LoaderSource,
    /// Collection group name; directories without one are in `directory`.
    pub collection_group: Option<String>,
    /// Pages grouped under a computed page. [`PageGraph::link`] adds them
    /// to its children.
    ///
    /// [`PageGraph::link`]: crate::PageGraph::link
    pub members: Vec<String>,
    /// Whether the page was produced by a `post.*` file.
    pub(crate) from_post_file: bool,
}

impl PageMeta {
    /// Metadata field by its camelCase name, as a [`Value`].
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        let ids = |list: &[String]| Value::Array(list.iter().map(|s| Value::from(s.as_str())).collect());
        let value = match name {
            "id" => Value::from(self.id.as_str()),
            "parent" => Value::from(self.parent.as_deref()),
            "children" => ids(&self.children),
            "ascendants" => ids(&self.ascendants),
            "descendants" => ids(&self.descendants),
            "inputPath" => Value::from(path_string(&self.input_path)),
            "inputSources" => Value::Array(
                self.input_sources
                    .iter()
                    .map(|source| {
                        let mut obj = Object::new();
                        obj.insert("path".to_owned(), Value::from(path_string(&source.path)));
                        obj.insert(
                            "loaderId".to_owned(),
                            source
                                .loader_id
                                .and_then(|id| i64::try_from(id).ok())
                                .map_or(Value::Null, Value::from),
                        );
                        Value::Object(obj)
                    })
                    .collect(),
            ),
            "outputType" => Value::from(self.output_type.as_str()),
            "buildVersion" => Value::Number(self.build_version.into()),
            "basename" => Value::from(self.basename.as_str()),
            "isDirectory" => Value::Bool(self.is_directory),
            "isPost" => Value::Bool(self.is_post),
            "isCollection" => Value::Bool(self.is_collection),
            "fileCreated" => Value::from(self.file_created),
            "fileModified" => Value::from(self.file_modified),
            "source" => Value::from(match self.source {
                LoaderSource::File => "file",
                LoaderSource::Computed => "computed",
            }),
            "collectionGroup" => Value::from(self.collection_group()),
            _ => return None,
        };
        Some(value)
    }

    /// Collection group name, `directory` for directories without one.
    #[must_use]
    pub fn collection_group(&self) -> Option<&str> {
        self.collection_group
            .as_deref()
            .or_else(|| self.is_directory.then_some("directory"))
    }
}

/// A node of the content graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    /// User-facing attributes (cascaded, loaded and computed data).
    pub attributes: Object,
    /// Structural metadata.
    pub meta: PageMeta,
}

impl Page {
    /// Create an empty page with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            attributes: Object::new(),
            meta: PageMeta {
                id: id.into(),
                ..PageMeta::default()
            },
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Value at a dot-separated path. Paths starting with `meta.` address
    /// [`PageMeta`] fields and produce owned values.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Cow<'_, Value>> {
        if let Some(rest) = path.strip_prefix(META_PREFIX) {
            let (field, tail) = rest.split_once('.').unwrap_or((rest, ""));
            let value = self.meta.field(field)?;
            return value.get_path(tail).cloned().map(Cow::Owned);
        }
        let (head, tail) = path.split_once('.').unwrap_or((path, ""));
        self.attributes
            .get(head)?
            .get_path(tail)
            .map(Cow::Borrowed)
    }

    /// Top-level attribute.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Top-level string attribute.
    #[must_use]
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn permalink(&self) -> Option<&str> {
        self.str_attr("permalink").filter(|p| !p.is_empty())
    }

    /// Whether a truthy `excludeFromWrite` attribute is set.
    #[must_use]
    pub fn is_excluded_from_write(&self) -> bool {
        self.attributes
            .get("excludeFromWrite")
            .is_some_and(Value::is_truthy)
    }

    /// Whether any attribute still holds a pending computation.
    #[must_use]
    pub fn has_deferred(&self) -> bool {
        self.attributes.values().any(Value::contains_deferred)
    }

    /// The page as one object for templates and data views: its attributes
    /// plus a `meta` object with the scalar metadata fields.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut meta = Object::new();
        for field in SCALAR_META_FIELDS {
            if let Some(value) = self.meta.field(field) {
                meta.insert(field.to_owned(), value);
            }
        }
        let mut object = self.attributes.clone();
        object.insert("meta".to_owned(), Value::Object(meta));
        Value::Object(object)
    }

    /// Whether `path` is one of the files this page was loaded from.
    #[must_use]
    pub fn has_input_source(&self, path: &Path) -> bool {
        self.meta.input_sources.iter().any(|s| s.path == path)
    }
}

/// Lossy string form of a path with `/` separators.
pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_page() -> Page {
        let mut page = Page::new("./blog/a");
        page.attributes = match Value::from(json!({
            "title": "A",
            "author": {"name": "Ada"},
        })) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        page.meta.parent = Some("./blog".to_owned());
        page.meta.ascendants = vec![".".to_owned(), "./blog".to_owned()];
        page.meta.input_sources = vec![InputSource {
            path: PathBuf::from("content/blog/a/index.md"),
            loader_id: Some(4),
        }];
        page
    }

    #[test]
    fn test_get_attribute_paths() {
        let page = sample_page();

        assert_eq!(page.get("title").as_deref(), Some(&Value::from("A")));
        assert_eq!(page.get("author.name").as_deref(), Some(&Value::from("Ada")));
        assert!(page.get("missing").is_none());
    }

    #[test]
    fn test_get_meta_paths() {
        let page = sample_page();

        assert_eq!(page.get("meta.id").as_deref(), Some(&Value::from("./blog/a")));
        assert_eq!(page.get("meta.parent").as_deref(), Some(&Value::from("./blog")));
        assert_eq!(page.get("meta.ascendants.0").as_deref(), Some(&Value::from(".")));
        assert_eq!(
            page.get("meta.inputSources.0.loaderId").as_deref(),
            Some(&Value::from(4_i64))
        );
        assert_eq!(page.get("meta.isPost").as_deref(), Some(&Value::Bool(false)));
        assert_eq!(page.get("meta.source").as_deref(), Some(&Value::from("file")));
        assert!(page.get("meta.unknown").is_none());
    }

    #[test]
    fn test_root_parent_is_null() {
        let page = Page::new(".");

        assert_eq!(page.get("meta.parent").as_deref(), Some(&Value::Null));
    }

    #[test]
    fn test_collection_group() {
        let mut page = Page::new("./tags/rust");
        assert_eq!(page.get("meta.collectionGroup").as_deref(), Some(&Value::Null));

        page.meta.is_directory = true;
        assert_eq!(
            page.get("meta.collectionGroup").as_deref(),
            Some(&Value::from("directory"))
        );

        page.meta.collection_group = Some("tags".to_owned());
        page.meta.source = LoaderSource::Computed;
        assert_eq!(page.get("meta.collectionGroup").as_deref(), Some(&Value::from("tags")));
        assert_eq!(page.get("meta.source").as_deref(), Some(&Value::from("computed")));
    }

    #[test]
    fn test_has_input_source() {
        let page = sample_page();

        assert!(page.has_input_source(Path::new("content/blog/a/index.md")));
        assert!(!page.has_input_source(Path::new("content/blog/a/post.md")));
    }

    #[test]
    fn test_to_value_carries_meta() {
        let value = sample_page().to_value();

        assert_eq!(value.get_path("title"), Some(&Value::from("A")));
        assert_eq!(value.get_path("meta.id"), Some(&Value::from("./blog/a")));
        assert_eq!(value.get_path("meta.parent"), Some(&Value::from("./blog")));
        assert!(value.get_path("meta.ascendants").is_none());
    }

    #[test]
    fn test_exclude_from_write() {
        let mut page = sample_page();
        assert!(!page.is_excluded_from_write());

        page.attributes
            .insert("excludeFromWrite".to_owned(), Value::Bool(true));
        assert!(page.is_excluded_from_write());
    }
}
