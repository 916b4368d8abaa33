//! Data views: values derived from the whole graph, stored in the context
//! data where templates and `@data:` tokens can reach them.

use kiss_config::Config;

use crate::cascade::ROOT_ID;
use crate::compute::ComputeError;
use crate::context::BuildContext;
use crate::defaults::unslugify;
use crate::diagnostics::Diagnostics;
use crate::page::Page;
use crate::value::{Object, Value, set_path};

/// Computes one context data value.
pub trait DataView: Send + Sync {
    fn name(&self) -> &'static str;

    fn compute(&self, ctx: &BuildContext, config: &Config) -> Result<Value, ComputeError>;
}

/// The most recent page update date, `null` when no page has one.
#[derive(Debug, Default)]
pub struct SiteLastUpdated;

impl DataView for SiteLastUpdated {
    fn name(&self) -> &'static str {
        "siteLastUpdated"
    }

    fn compute(&self, ctx: &BuildContext, config: &Config) -> Result<Value, ComputeError> {
        let key = &config.defaults.page_updated_attribute;
        let ids: Vec<String> = ctx.graph.ids().map(str::to_owned).collect();
        let latest = ctx
            .graph
            .sort_ids(&ids, &format!("-{key}"))
            .first()
            .and_then(|id| ctx.graph.get(id))
            .and_then(|page| page.get(key))
            .map(std::borrow::Cow::into_owned)
            .filter(|value| !value.is_deferred());
        Ok(latest.unwrap_or(Value::Null))
    }
}

/// Collection pages as a tree keyed by camelCased basename.
///
/// Every entry holds `_id`, `_type` (`collection`), `_group` (the collection
/// group), `allPosts` and its nested collections. The root level adds the
/// `allPosts` of the whole site.
#[derive(Debug, Default)]
pub struct Collections;

impl DataView for Collections {
    fn name(&self) -> &'static str {
        "collections"
    }

    fn compute(&self, ctx: &BuildContext, config: &Config) -> Result<Value, ComputeError> {
        let mut collections = collections_under(ctx, config, ROOT_ID);
        if let Some(root) = ctx.graph.root() {
            collections.insert("allPosts".to_owned(), all_posts(root, ctx, config));
        }
        Ok(Value::Object(collections))
    }
}

fn collections_under(ctx: &BuildContext, config: &Config, parent: &str) -> Object {
    let mut collections = Object::new();
    for page in child_pages(ctx, parent).filter(|p| p.meta.is_collection) {
        if page.meta.descendants.is_empty() {
            continue;
        }
        let mut entry = Object::new();
        entry.insert("_id".to_owned(), Value::from(page.id()));
        entry.insert("_type".to_owned(), Value::from("collection"));
        entry.insert("_group".to_owned(), Value::from(page.meta.collection_group()));
        entry.insert("allPosts".to_owned(), all_posts(page, ctx, config));
        entry.extend(collections_under(ctx, config, page.id()));
        collections.insert(camel_case(&page.meta.basename), Value::Object(entry));
    }
    collections
}

/// Posts below `page` that are listed in collections, sorted by the page's
/// `sortCollectionBy` or the configured default. Posts without the sort key
/// are left out.
fn all_posts(page: &Page, ctx: &BuildContext, config: &Config) -> Value {
    let sort_by = page
        .str_attr("sortCollectionBy")
        .unwrap_or(&config.defaults.sort_collection_by);
    let key = sort_by.trim_start_matches('-');
    let posts: Vec<String> = page
        .meta
        .descendants
        .iter()
        .filter(|id| {
            ctx.graph.get(id).is_some_and(|p| {
                p.meta.is_post
                    && p.permalink().is_some()
                    && !p.attr("excludeFromCollection").is_some_and(Value::is_truthy)
                    && !p.is_excluded_from_write()
                    && p.get(key).is_some_and(|v| !v.is_null() && !v.is_deferred())
            })
        })
        .cloned()
        .collect();
    Value::Array(
        ctx.graph
            .sort_ids(&posts, sort_by)
            .iter()
            .filter_map(|id| ctx.graph.get(id))
            .map(Page::to_value)
            .collect(),
    )
}

/// Directory pages as a tree: `name`, `entry` (the page), `count` (posts
/// below it) and `children`.
#[derive(Debug, Default)]
pub struct Categories;

impl DataView for Categories {
    fn name(&self) -> &'static str {
        "categories"
    }

    fn compute(&self, ctx: &BuildContext, _config: &Config) -> Result<Value, ComputeError> {
        Ok(categories_under(ctx, ROOT_ID))
    }
}

fn categories_under(ctx: &BuildContext, parent: &str) -> Value {
    Value::Array(
        child_pages(ctx, parent)
            .filter(|p| p.meta.is_directory)
            .map(|page| {
                let count = page
                    .meta
                    .descendants
                    .iter()
                    .filter_map(|id| ctx.graph.get(id))
                    .filter(|d| d.meta.is_post)
                    .count();
                let mut category = Object::new();
                category.insert("name".to_owned(), Value::from(unslugify(&page.meta.basename)));
                category.insert("entry".to_owned(), page.to_value());
                category.insert("count".to_owned(), Value::Number(count.into()));
                category.insert("children".to_owned(), categories_under(ctx, page.id()));
                Value::Object(category)
            })
            .collect(),
    )
}

/// Children of `parent` that name it as their parent, leaving out the
/// members of computed pages.
fn child_pages<'a>(ctx: &'a BuildContext, parent: &'a str) -> impl Iterator<Item = &'a Page> + 'a {
    ctx.graph
        .get(parent)
        .map(|page| page.meta.children.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(|id| ctx.graph.get(id))
        .filter(move |p| p.meta.parent.as_deref() == Some(parent))
}

/// `my-travel_notes` becomes `myTravelNotes`.
fn camel_case(text: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut after_lower = false;
    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            after_lower = false;
            continue;
        }
        if c.is_uppercase() && after_lower {
            words.push(std::mem::take(&mut word));
        }
        word.push(c);
        after_lower = !c.is_uppercase();
    }
    if !word.is_empty() {
        words.push(word);
    }

    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Data views by the attribute path they fill, in registration order.
pub struct DataViewRegistry {
    views: Vec<(String, Box<dyn DataView>)>,
}

impl std::fmt::Debug for DataViewRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let attributes: Vec<&str> = self.views.iter().map(|(a, _)| a.as_str()).collect();
        f.debug_struct("DataViewRegistry")
            .field("views", &attributes)
            .finish()
    }
}

impl Default for DataViewRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("collections", Collections);
        registry.register("categories", Categories);
        registry.register("site.lastUpdated", SiteLastUpdated);
        registry
    }
}

impl DataViewRegistry {
    /// Registry with `collections`, `categories` and `site.lastUpdated`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { views: Vec::new() }
    }

    /// Store the result of `view` at `attribute` (a dot-separated path in
    /// the context data).
    pub fn register(&mut self, attribute: impl Into<String>, view: impl DataView + 'static) {
        self.views.push((attribute.into(), Box::new(view)));
    }

    /// Compute every view. A failing view is logged, counted and leaves its
    /// attribute untouched.
    pub fn compute_all(&self, ctx: &mut BuildContext, config: &Config, diag: &Diagnostics) {
        for (attribute, view) in &self.views {
            tracing::debug!(view = view.name(), attribute = %attribute, "Computing data view");
            match view.compute(ctx, config) {
                Ok(value) => set_path(&mut ctx.data, attribute, value),
                Err(e) => {
                    tracing::error!(view = view.name(), attribute = %attribute, error = %e, "Error computing data view");
                    diag.error();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::load_computed_collection;
    use crate::graph::{LoadedFile, PageGraph};
    use chrono::{TimeZone, Utc};
    use kiss_config::{GroupByType, LoaderConfig, OutputType};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::{Path, PathBuf};

    fn dated(id: &str, day: Option<u32>) -> Page {
        let mut page = Page::new(id);
        if let Some(day) = day {
            page.attributes.insert(
                "modified".to_owned(),
                Value::Date(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
            );
        }
        page
    }

    struct Failing;

    impl DataView for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn compute(&self, _ctx: &BuildContext, _config: &Config) -> Result<Value, ComputeError> {
            Err(ComputeError::Missing("anything".to_owned()))
        }
    }

    fn load(graph: &mut PageGraph, path: &str, overlay: serde_json::Value) {
        let diag = Diagnostics::new();
        let file = LoadedFile {
            path: PathBuf::from(path),
            loader_id: Some(0),
            output_type: OutputType::Html,
            created: None,
            modified: None,
        };
        graph.ensure_directories(&file.path, &Object::new(), 1, &diag);
        let Value::Object(overlay) = Value::from(overlay) else {
            panic!("expected object");
        };
        graph.insert_loaded(&file, overlay, 1, &diag);
    }

    fn post(permalink: &str, created: Option<&str>) -> serde_json::Value {
        let mut post = json!({"content": "Text", "permalink": permalink});
        if let Some(created) = created {
            post["created"] = json!(created);
        }
        post
    }

    /// Blog with a nested `travel-notes` section, tagged posts and a `tags`
    /// computed collection.
    fn blog_context(config: &Config) -> BuildContext {
        let mut graph = PageGraph::new("content");
        load(&mut graph, "content/index.md", json!({"title": "Home"}));
        load(&mut graph, "content/blog/index.md", json!({}));
        load(&mut graph, "content/blog/a/post.md", post("/blog/a/", Some("2024-02-01")));
        let mut b = post("/blog/b", Some("2024-03-01"));
        b["tags"] = json!(["rust"]);
        load(&mut graph, "content/blog/b.md", b);
        load(
            &mut graph,
            "content/blog/travel-notes/c.md",
            post("/blog/travel-notes/c", Some("2024-01-01")),
        );
        let mut draft = post("/blog/draft", Some("2024-04-01"));
        draft["excludeFromCollection"] = json!(true);
        load(&mut graph, "content/blog/draft.md", draft);
        load(&mut graph, "content/blog/undated.md", post("/blog/undated", None));
        load(&mut graph, "content/about.md", json!({}));
        load_computed_collection(
            &mut graph,
            &LoaderConfig::computed("tags", GroupByType::Array),
            1,
            &Diagnostics::new(),
        );
        graph.link();
        graph.sort_collections(&config.defaults.sort_collection_by);

        let mut ctx = BuildContext::new(config);
        ctx.graph = graph;
        ctx
    }

    fn post_ids(collection: &Value) -> Vec<&str> {
        collection
            .get_path("allPosts")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|p| p.get_path("meta.id").and_then(Value::as_str).unwrap())
            .collect()
    }

    #[test]
    fn test_collections_tree() {
        let config = Config::with_base(Path::new("/site"));
        let ctx = blog_context(&config);

        let collections = Collections.compute(&ctx, &config).unwrap();

        // newest first; excluded and undated posts are left out
        assert_eq!(post_ids(&collections), vec!["./blog/b.md", "./blog/a", "./blog/travel-notes/c.md"]);
        let blog = collections.get_path("blog").unwrap();
        assert_eq!(blog.get_path("_id"), Some(&Value::from("./blog")));
        assert_eq!(blog.get_path("_type"), Some(&Value::from("collection")));
        assert_eq!(blog.get_path("_group"), Some(&Value::from("directory")));
        assert_eq!(post_ids(blog), vec!["./blog/b.md", "./blog/a", "./blog/travel-notes/c.md"]);

        let travel = blog.get_path("travelNotes").unwrap();
        assert_eq!(travel.get_path("_id"), Some(&Value::from("./blog/travel-notes")));
        assert_eq!(post_ids(travel), vec!["./blog/travel-notes/c.md"]);
        // posts are not collections
        assert!(blog.get_path("a").is_none());

        let tags = collections.get_path("tags").unwrap();
        assert_eq!(tags.get_path("_group"), Some(&Value::from("tags")));
        let rust = tags.get_path("rust").unwrap();
        assert_eq!(rust.get_path("_id"), Some(&Value::from("./tags/rust")));
        assert_eq!(rust.get_path("_group"), Some(&Value::from("tags")));
        assert_eq!(post_ids(rust), vec!["./blog/b.md"]);
        // members stay under their own parent only
        let keys: Vec<&str> = rust.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["_group", "_id", "_type", "allPosts"]);
    }

    #[test]
    fn test_collections_sort_override() {
        let config = Config::with_base(Path::new("/site"));
        let mut ctx = blog_context(&config);
        ctx.graph
            .get_mut("./blog")
            .unwrap()
            .attributes
            .insert("sortCollectionBy".to_owned(), Value::from("permalink"));

        let collections = Collections.compute(&ctx, &config).unwrap();

        let blog = collections.get_path("blog").unwrap();
        assert_eq!(post_ids(blog), vec!["./blog/a", "./blog/b.md", "./blog/travel-notes/c.md"]);
    }

    #[test]
    fn test_categories_tree_with_counts() {
        let config = Config::with_base(Path::new("/site"));
        let ctx = blog_context(&config);

        let categories = Categories.compute(&ctx, &config).unwrap();

        // computed pages are not directories
        let top = categories.as_array().unwrap();
        assert_eq!(top.len(), 1);
        let blog = &top[0];
        assert_eq!(blog.get_path("name"), Some(&Value::from("blog")));
        assert_eq!(blog.get_path("entry.meta.id"), Some(&Value::from("./blog")));
        assert_eq!(blog.get_path("count"), Some(&Value::Number(5.into())));

        let children = blog.get_path("children").and_then(Value::as_array).unwrap();
        let summary: Vec<(&str, &Value)> = children
            .iter()
            .map(|c| {
                (
                    c.get_path("name").and_then(Value::as_str).unwrap(),
                    c.get_path("count").unwrap(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", &Value::Number(0.into())),
                ("travel notes", &Value::Number(1.into())),
            ]
        );
    }

    #[test]
    fn test_default_views_order() {
        let registry = DataViewRegistry::default();

        let attributes: Vec<&str> = registry.views.iter().map(|(a, _)| a.as_str()).collect();

        assert_eq!(attributes, vec!["collections", "categories", "site.lastUpdated"]);
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("blog"), "blog");
        assert_eq!(camel_case("my-travel_notes"), "myTravelNotes");
        assert_eq!(camel_case("2024 photos"), "2024Photos");
        assert_eq!(camel_case("fooBar"), "fooBar");
        assert_eq!(camel_case(""), "");
    }

    #[test]
    fn test_site_last_updated() {
        let config = Config::with_base(Path::new("/site"));
        let mut ctx = BuildContext::new(&config);
        ctx.graph.insert(dated("./a.md", Some(3)));
        ctx.graph.insert(dated("./b.md", None));
        ctx.graph.insert(dated("./c.md", Some(9)));
        let diag = Diagnostics::new();

        DataViewRegistry::new().compute_all(&mut ctx, &config, &diag);

        let site = ctx.data.get("site").unwrap();
        assert_eq!(
            site.get_path("lastUpdated"),
            Some(&Value::Date(Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap()))
        );
        // the rest of the site data survives
        assert_eq!(site.get_path("language"), Some(&Value::from("en")));
    }

    #[test]
    fn test_site_last_updated_without_dates() {
        let config = Config::with_base(Path::new("/site"));
        let mut ctx = BuildContext::new(&config);
        ctx.graph.insert(dated("./a.md", None));

        let value = SiteLastUpdated.compute(&ctx, &config).unwrap();

        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_failing_view_is_counted() {
        let config = Config::with_base(Path::new("/site"));
        let mut ctx = BuildContext::new(&config);
        let diag = Diagnostics::new();
        let mut registry = DataViewRegistry::empty();
        registry.register("custom.value", Failing);

        registry.compute_all(&mut ctx, &config, &diag);

        assert!(!ctx.data.contains_key("custom"));
        assert_eq!(diag.counts().errors, 1);
    }
}
