//! Lookup tables over the page graph.
//!
//! Tables store page ids, never page copies. Every lookup goes through
//! [`Lookup`], which falls back to a linear scan when the tables are absent
//! or miss, so results never depend on the tables existing.

use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};

use crate::graph::PageGraph;
use crate::page::Page;
use crate::value::Value;

/// One key-to-id table.
///
/// An entry always names the first page in graph order holding the key.
/// Keys dropped by [`PageIndexes::patch`] may still be held by pages the
/// patch did not touch; they are kept in `unindexed` and never re-entered
/// until the next full build, so lookups of them go to the scan.
#[derive(Clone, Debug)]
struct Table<K> {
    entries: HashMap<K, String>,
    unindexed: HashSet<K>,
}

impl<K> Default for Table<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            unindexed: HashSet::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> Table<K> {
    fn get<Q>(&self, key: &Q) -> Option<&String>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Point `key` at `id` unless a page earlier in `graph` holds it.
    fn claim(&mut self, key: K, id: &str, graph: &PageGraph) {
        if self.unindexed.contains(&key) {
            return;
        }
        match self.entries.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(id.to_owned());
            }
            Entry::Occupied(mut entry) => {
                match (graph.position(id), graph.position(entry.get())) {
                    (Some(new), Some(held)) if new < held => {
                        entry.insert(id.to_owned());
                    }
                    (_, None) => {
                        let (key, _) = entry.remove_entry();
                        self.unindexed.insert(key);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Drop the entries pointing to `stale` ids.
    fn drop_stale(&mut self, stale: &HashSet<&str>) {
        let unindexed = &mut self.unindexed;
        self.entries.retain(|key, id| {
            let keep = !stale.contains(id.as_str());
            if !keep {
                unindexed.insert(key.clone());
            }
            keep
        });
    }
}

/// Id-valued lookup tables, keyed as named.
///
/// When several pages share a key the first page in graph order wins, the
/// same page a linear scan finds.
#[derive(Clone, Debug, Default)]
pub struct PageIndexes {
    by_permalink: Table<String>,
    by_input_path: Table<PathBuf>,
    by_id_and_lang: Table<String>,
    by_derivative: Table<String>,
    by_parent_permalink: Table<String>,
    by_input_source: Table<PathBuf>,
    default_lang: String,
}

impl PageIndexes {
    /// Build every table in one pass over `graph`.
    ///
    /// Pages without a `lang` attribute are keyed under `default_lang`.
    #[must_use]
    pub fn build(graph: &PageGraph, default_lang: &str) -> Self {
        let mut indexes = Self {
            default_lang: default_lang.to_owned(),
            ..Self::default()
        };
        for page in graph.pages() {
            indexes.add(page, graph);
        }
        tracing::debug!(
            pages = graph.len(),
            permalinks = indexes.by_permalink.len(),
            "Built page indexes"
        );
        indexes
    }

    /// Re-derive the entries of the pages in `ids`.
    ///
    /// Entries pointing to those pages are dropped, then the pages are added
    /// again with their current field values. A patched page takes a key
    /// only when no page before it in the graph holds the key; a dropped key
    /// another page may share stays out of the tables and is found by the
    /// scan fallback of [`Lookup`].
    pub fn patch(&mut self, graph: &PageGraph, ids: &[String]) {
        let stale: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.by_permalink.drop_stale(&stale);
        self.by_input_path.drop_stale(&stale);
        self.by_id_and_lang.drop_stale(&stale);
        self.by_derivative.drop_stale(&stale);
        self.by_parent_permalink.drop_stale(&stale);
        self.by_input_source.drop_stale(&stale);
        for page in ids.iter().filter_map(|id| graph.get(id)) {
            self.add(page, graph);
        }
    }

    fn add(&mut self, page: &Page, graph: &PageGraph) {
        let id = page.id();
        if let Some(permalink) = page.permalink() {
            self.by_permalink.claim(permalink.to_owned(), id, graph);
            if permalink.ends_with('/') {
                self.by_parent_permalink
                    .claim(permalink.to_owned(), id, graph);
            }
        }
        if !page.meta.input_path.as_os_str().is_empty() {
            self.by_input_path
                .claim(page.meta.input_path.clone(), id, graph);
        }
        if let Some(key) = id_lang_key(page, &self.default_lang) {
            self.by_id_and_lang.claim(key, id, graph);
        }
        for permalink in derivative_permalinks(page) {
            self.by_derivative.claim(permalink.to_owned(), id, graph);
        }
        for source in &page.meta.input_sources {
            self.by_input_source.claim(source.path.clone(), id, graph);
        }
    }
}

/// `"<id>:<lang>"` key of a page with an `id` attribute.
fn id_lang_key(page: &Page, default_lang: &str) -> Option<String> {
    let id = page.str_attr("id").filter(|s| !s.is_empty())?;
    let lang = page.str_attr("lang").unwrap_or(default_lang);
    Some(format!("{id}:{lang}"))
}

fn derivative_permalinks(page: &Page) -> impl Iterator<Item = &str> {
    page.attr("derivatives")
        .and_then(Value::as_array)
        .unwrap_or_default()
        .iter()
        .filter_map(|d| d.get_path("permalink").and_then(Value::as_str))
}

/// Page lookups with an optional index.
#[derive(Clone, Copy, Debug)]
pub struct Lookup<'a> {
    pages: &'a PageGraph,
    indexes: Option<&'a PageIndexes>,
}

impl<'a> Lookup<'a> {
    #[must_use]
    pub fn new(pages: &'a PageGraph, indexes: Option<&'a PageIndexes>) -> Self {
        Self { pages, indexes }
    }

    /// Lookups that always scan.
    #[must_use]
    pub fn scanning(pages: &'a PageGraph) -> Self {
        Self::new(pages, None)
    }

    #[must_use]
    pub fn pages(&self) -> &'a PageGraph {
        self.pages
    }

    fn find(
        &self,
        table: impl Fn(&'a PageIndexes) -> Option<&'a String>,
        scan: impl Fn(&Page) -> bool,
    ) -> Option<&'a Page> {
        if let Some(page) = self
            .indexes
            .and_then(table)
            .and_then(|id| self.pages.get(id))
        {
            return Some(page);
        }
        self.pages.pages().find(|page| scan(page))
    }

    #[must_use]
    pub fn by_permalink(&self, permalink: &str) -> Option<&'a Page> {
        self.find(
            |idx| idx.by_permalink.get(permalink),
            |p| p.permalink() == Some(permalink),
        )
    }

    #[must_use]
    pub fn by_input_path(&self, path: &Path) -> Option<&'a Page> {
        self.find(
            |idx| idx.by_input_path.get(path),
            |p| p.meta.input_path == path,
        )
    }

    /// Page whose `id` attribute is `id` and whose language is `lang`.
    /// Pages without `lang` are in `default_lang`.
    #[must_use]
    pub fn by_id_and_lang(&self, id: &str, lang: &str, default_lang: &str) -> Option<&'a Page> {
        let key = format!("{id}:{lang}");
        self.find(
            |idx| idx.by_id_and_lang.get(&key),
            |p| id_lang_key(p, default_lang).as_deref() == Some(key.as_str()),
        )
    }

    /// Page owning a generated derivative with this permalink.
    #[must_use]
    pub fn by_derivative(&self, permalink: &str) -> Option<&'a Page> {
        self.find(
            |idx| idx.by_derivative.get(permalink),
            |p| derivative_permalinks(p).any(|d| d == permalink),
        )
    }

    /// Directory page with this permalink (ending in `/`).
    #[must_use]
    pub fn parent_by_permalink(&self, permalink: &str) -> Option<&'a Page> {
        self.find(
            |idx| idx.by_parent_permalink.get(permalink),
            |p| p.permalink() == Some(permalink),
        )
    }

    /// Page that lists `path` among its input sources.
    #[must_use]
    pub fn by_input_source(&self, path: &Path) -> Option<&'a Page> {
        self.find(
            |idx| idx.by_input_source.get(path),
            |p| p.has_input_source(path),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::InputSource;
    use crate::value::Object;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn page(id: &str, attrs: serde_json::Value) -> Page {
        let mut page = Page::new(id);
        if let Value::Object(map) = Value::from(attrs) {
            page.attributes = map;
        }
        page.meta.input_path = PathBuf::from(format!("content/{}", id.trim_start_matches("./")));
        page.meta.input_sources = vec![InputSource {
            path: page.meta.input_path.clone(),
            loader_id: Some(0),
        }];
        page
    }

    fn graph() -> PageGraph {
        let mut graph = PageGraph::new("content");
        graph.insert(page(".", json!({"permalink": "/", "id": "home"})));
        graph.insert(page("./fr", json!({"permalink": "/fr/", "id": "home", "lang": "fr"})));
        graph.insert(page("./about.md", json!({"permalink": "/about"})));
        graph.insert(page("./dup.md", json!({"permalink": "/about"})));
        graph.insert(page(
            "./cover.png",
            json!({
                "permalink": "/cover.png",
                "derivatives": [{"permalink": "/cover-320.webp"}, {"width": 10}],
            }),
        ));
        graph.insert(page("./draft.md", json!({})));
        graph
    }

    fn id(page: Option<&Page>) -> Option<&str> {
        page.map(Page::id)
    }

    #[test]
    fn test_index_and_scan_agree() {
        let graph = graph();
        let indexes = PageIndexes::build(&graph, "en");
        let indexed = Lookup::new(&graph, Some(&indexes));
        let scanned = Lookup::scanning(&graph);

        for permalink in ["/", "/fr/", "/about", "/cover.png", "/missing"] {
            assert_eq!(
                id(indexed.by_permalink(permalink)),
                id(scanned.by_permalink(permalink)),
                "{permalink}"
            );
        }
        for (key, lang) in [("home", "en"), ("home", "fr"), ("home", "de")] {
            assert_eq!(
                id(indexed.by_id_and_lang(key, lang, "en")),
                id(scanned.by_id_and_lang(key, lang, "en"))
            );
        }
        assert_eq!(
            id(indexed.by_derivative("/cover-320.webp")),
            id(scanned.by_derivative("/cover-320.webp"))
        );
        assert_eq!(
            id(indexed.by_input_source(Path::new("content/about.md"))),
            id(scanned.by_input_source(Path::new("content/about.md")))
        );
    }

    fn set_permalink(graph: &mut PageGraph, id: &str, permalink: &str) {
        graph
            .get_mut(id)
            .unwrap()
            .attributes
            .insert("permalink".to_owned(), Value::from(permalink));
    }

    #[test]
    fn test_index_and_scan_agree_after_patches() {
        let mut graph = graph();
        let mut indexes = PageIndexes::build(&graph, "en");

        // ./about.md moves onto a later page's permalink while a later
        // page moves onto the one ./about.md shared with ./dup.md
        set_permalink(&mut graph, "./about.md", "/cover.png");
        set_permalink(&mut graph, "./draft.md", "/about");
        indexes.patch(&graph, &["./draft.md".to_owned(), "./about.md".to_owned()]);

        let indexed = Lookup::new(&graph, Some(&indexes));
        let scanned = Lookup::scanning(&graph);
        for permalink in ["/", "/fr/", "/about", "/cover.png", "/missing"] {
            assert_eq!(
                id(indexed.by_permalink(permalink)),
                id(scanned.by_permalink(permalink)),
                "{permalink}"
            );
        }
        assert_eq!(id(indexed.by_permalink("/about")), Some("./dup.md"));
        assert_eq!(id(indexed.by_permalink("/cover.png")), Some("./about.md"));

        // a later patch still cannot take the key ./dup.md holds unindexed
        set_permalink(&mut graph, "./draft.md", "/draft");
        indexes.patch(&graph, &["./draft.md".to_owned()]);
        set_permalink(&mut graph, "./draft.md", "/about");
        indexes.patch(&graph, &["./draft.md".to_owned()]);

        let indexed = Lookup::new(&graph, Some(&indexes));
        assert_eq!(id(indexed.by_permalink("/about")), Some("./dup.md"));
        assert_eq!(
            id(indexed.by_permalink("/about")),
            id(Lookup::scanning(&graph).by_permalink("/about"))
        );
    }

    #[test]
    fn test_first_page_wins_duplicate_permalink() {
        let graph = graph();
        let indexes = PageIndexes::build(&graph, "en");

        let lookup = Lookup::new(&graph, Some(&indexes));

        assert_eq!(id(lookup.by_permalink("/about")), Some("./about.md"));
    }

    #[test]
    fn test_id_and_lang_defaults_language() {
        let graph = graph();
        let indexes = PageIndexes::build(&graph, "en");
        let lookup = Lookup::new(&graph, Some(&indexes));

        assert_eq!(id(lookup.by_id_and_lang("home", "en", "en")), Some("."));
        assert_eq!(id(lookup.by_id_and_lang("home", "fr", "en")), Some("./fr"));
        assert_eq!(id(lookup.by_id_and_lang("home", "de", "en")), None);
    }

    #[test]
    fn test_parent_permalinks_only_directories() {
        let graph = graph();
        let indexes = PageIndexes::build(&graph, "en");

        assert_eq!(indexes.by_parent_permalink.len(), 2);
        assert_eq!(
            id(Lookup::new(&graph, Some(&indexes)).parent_by_permalink("/fr/")),
            Some("./fr")
        );
    }

    #[test]
    fn test_missing_index_entry_falls_back_to_scan() {
        let mut graph = graph();
        let indexes = PageIndexes::build(&graph, "en");
        let mut added = Page::new("./new.md");
        added
            .attributes
            .insert("permalink".to_owned(), Value::from("/new"));
        graph.insert(added);

        let lookup = Lookup::new(&graph, Some(&indexes));

        assert_eq!(id(lookup.by_permalink("/new")), Some("./new.md"));
    }

    #[test]
    fn test_patch_updates_changed_pages() {
        let mut graph = graph();
        let mut indexes = PageIndexes::build(&graph, "en");
        let page = graph.get_mut("./about.md").unwrap();
        page.attributes = Object::new();
        page.attributes
            .insert("permalink".to_owned(), Value::from("/about-us"));

        indexes.patch(&graph, &["./about.md".to_owned()]);

        let lookup = Lookup::new(&graph, Some(&indexes));
        assert_eq!(id(lookup.by_permalink("/about-us")), Some("./about.md"));
        assert!(!indexes.by_permalink.contains_key("/about"));
        assert_eq!(id(lookup.by_permalink("/about")), Some("./dup.md"));
    }

    #[test]
    fn test_input_path_lookup() {
        let graph = graph();
        let indexes = PageIndexes::build(&graph, "en");
        let lookup = Lookup::new(&graph, Some(&indexes));

        assert_eq!(
            id(lookup.by_input_path(Path::new("content/draft.md"))),
            Some("./draft.md")
        );
        assert!(lookup.by_input_path(Path::new("content/none.md")).is_none());
    }
}
