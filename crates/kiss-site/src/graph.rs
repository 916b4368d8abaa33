//! The page graph: an arena of pages keyed by id.
//!
//! Pages reference each other by id only. Structural relations (children,
//! ascendants, descendants) are derived from parent pointers by
//! [`PageGraph::link`] and never set independently.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kiss_config::{LoaderSource, OutputType};

use crate::cascade::{self, CanonicalIds, ROOT_ID};
use crate::diagnostics::Diagnostics;
use crate::page::{InputSource, Page, PageMeta};
use crate::value::{Object, Value};

/// Attributes detached pages keep from the cascade.
const DETACHED_KEEP: [&str; 3] = ["permalink", "outputPath", "url"];

/// A file handed to the graph after its loader produced an overlay.
#[derive(Clone, Debug)]
pub struct LoadedFile {
    pub path: PathBuf,
    /// Index of the configured loader.
    pub loader_id: Option<usize>,
    pub output_type: OutputType,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl LoadedFile {
    /// Static and image pages stay out of the page hierarchy.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        matches!(self.output_type, OutputType::Static | OutputType::Image)
    }
}

/// Which pages a phase operates on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BuildScope {
    /// Every page in the graph.
    #[default]
    All,
    /// The listed ids, in order.
    Pages(Vec<String>),
}

impl BuildScope {
    /// Ids in scope that exist in `graph`.
    #[must_use]
    pub fn ids(&self, graph: &PageGraph) -> Vec<String> {
        match self {
            Self::All => graph.ids().map(str::to_owned).collect(),
            Self::Pages(ids) => ids.iter().filter(|id| graph.contains(id)).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// All pages of a site.
#[derive(Clone, Debug, Default)]
pub struct PageGraph {
    pages: IndexMap<String, Page>,
    content_dir: PathBuf,
}

impl PageGraph {
    #[must_use]
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages: IndexMap::new(),
            content_dir: content_dir.into(),
        }
    }

    #[must_use]
    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Page> {
        self.pages.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Page> {
        self.pages.get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.pages.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Pages in insertion order (parents before children).
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub fn pages_mut(&mut self) -> impl Iterator<Item = &mut Page> {
        self.pages.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }

    /// Position of `id` in graph order.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.pages.get_index_of(id)
    }

    /// Insert or replace a page, keeping the position of a replaced id.
    pub fn insert(&mut self, page: Page) {
        self.pages.insert(page.meta.id.clone(), page);
    }

    /// Synthesize the directory pages above `input_path`, root first.
    ///
    /// A directory page is (re)created unless one from the current build
    /// `version` exists. The root starts from `defaults`; other directories
    /// inherit from their parent.
    pub fn ensure_directories(
        &mut self,
        input_path: &Path,
        defaults: &Object,
        version: u64,
        diag: &Diagnostics,
    ) {
        let Some(dir) = input_path.parent() else {
            return;
        };
        let Ok(relative) = dir.strip_prefix(&self.content_dir) else {
            return;
        };
        let mut chain = vec![self.content_dir.clone()];
        let mut current = self.content_dir.clone();
        for component in relative.components() {
            current.push(component);
            chain.push(current.clone());
        }

        for dir in chain {
            let Some(ids) = cascade::canonical_ids(&dir, &self.content_dir, OutputType::Html) else {
                continue;
            };
            if self
                .pages
                .get(&ids.id)
                .is_some_and(|p| p.meta.build_version == version)
            {
                continue;
            }
            let attributes = match &ids.parent {
                None => defaults.clone(),
                Some(parent) => self.inherited_attributes(parent, diag),
            };
            tracing::trace!(id = %ids.id, version, "Synthesized directory page");
            self.insert(Page {
                attributes,
                meta: PageMeta {
                    id: ids.id,
                    parent: ids.parent,
                    input_path: dir.clone(),
                    input_sources: vec![InputSource {
                        path: dir,
                        loader_id: None,
                    }],
                    output_type: OutputType::Html,
                    build_version: version,
                    basename: ids.basename,
                    is_directory: true,
                    ..PageMeta::default()
                },
            });
        }
    }

    /// What a parent hands down: its attributes without `_no_cascade` keys.
    fn inherited_attributes(&self, parent: &str, diag: &Diagnostics) -> Object {
        if let Some(page) = self.pages.get(parent) {
            cascade::strip_no_cascade(&page.attributes)
        } else {
            tracing::error!(parent = %parent, "Couldn't find parent page");
            diag.error();
            Object::new()
        }
    }

    /// Merge a loaded file into the graph and return the page id.
    ///
    /// A page created earlier in the same build under the same id (a
    /// directory, or `index.*` before `post.*`) is the base and keeps its own
    /// `_no_cascade` keys. Otherwise the base is the parent's inherited data.
    pub fn insert_loaded(
        &mut self,
        file: &LoadedFile,
        overlay: Object,
        version: u64,
        diag: &Diagnostics,
    ) -> Option<String> {
        let Some(ids) = cascade::canonical_ids(&file.path, &self.content_dir, file.output_type)
        else {
            tracing::error!(path = %file.path.display(), "File is outside the content directory");
            diag.error();
            return None;
        };
        let source = InputSource {
            path: file.path.clone(),
            loader_id: file.loader_id,
        };

        let mut page = match self.pages.get(&ids.id) {
            Some(existing) if existing.meta.build_version == version => {
                let mut page = existing.clone();
                page.meta.input_sources.push(source);
                page
            }
            _ => self.fresh_page(&ids, source, diag),
        };

        if file.is_detached() {
            page.attributes
                .retain(|key, _| DETACHED_KEEP.contains(&key.as_str()));
            page.meta.parent = None;
        }
        cascade::merge_overlay(&mut page.attributes, overlay);

        let meta = &mut page.meta;
        meta.input_path.clone_from(&file.path);
        meta.output_type = file.output_type;
        meta.build_version = version;
        meta.file_created = file.created;
        meta.file_modified = file.modified;
        meta.is_directory |= ids.is_index;
        meta.from_post_file |= ids.is_post;

        let id = page.meta.id.clone();
        self.insert(page);
        Some(id)
    }

    /// Insert a page computed from other pages at `path` and return its id.
    ///
    /// The page inherits from its parent like a directory does, without the
    /// parent's `content`. `members` become children of the page on the
    /// next [`link`](Self::link).
    pub fn insert_computed(
        &mut self,
        path: &Path,
        collection_group: &str,
        members: Vec<String>,
        version: u64,
        diag: &Diagnostics,
    ) -> Option<String> {
        let Some(ids) = cascade::canonical_ids(path, &self.content_dir, OutputType::Html) else {
            tracing::error!(path = %path.display(), "Computed page is outside the content directory");
            diag.error();
            return None;
        };
        if self
            .pages
            .get(&ids.id)
            .is_some_and(|p| p.meta.source == LoaderSource::File)
        {
            tracing::warn!(page = %ids.id, "Computed page replaces a loaded page");
            diag.warning();
        }
        let mut attributes = match &ids.parent {
            Some(parent) => self.inherited_attributes(parent, diag),
            None => Object::new(),
        };
        attributes.remove("content");

        let id = ids.id.clone();
        self.insert(Page {
            attributes,
            meta: PageMeta {
                id: ids.id,
                parent: ids.parent,
                input_path: path.to_path_buf(),
                output_type: OutputType::Html,
                build_version: version,
                basename: ids.basename,
                source: LoaderSource::Computed,
                collection_group: Some(collection_group.to_owned()),
                members,
                ..PageMeta::default()
            },
        });
        Some(id)
    }

    fn fresh_page(&self, ids: &CanonicalIds, source: InputSource, diag: &Diagnostics) -> Page {
        let (attributes, is_directory) = match &ids.parent {
            Some(parent) => (
                self.inherited_attributes(parent, diag),
                ids.is_index || ids.is_post,
            ),
            None => (Object::new(), true),
        };
        Page {
            attributes,
            meta: PageMeta {
                id: ids.id.clone(),
                parent: ids.parent.clone(),
                input_sources: vec![source],
                basename: ids.basename.clone(),
                is_directory,
                ..PageMeta::default()
            },
        }
    }

    /// Recompute children, ascendants, descendants, `isCollection` and
    /// `isPost` from parent pointers and the members of computed pages.
    pub fn link(&mut self) {
        let mut children: IndexMap<String, Vec<String>> = IndexMap::new();
        for page in self.pages.values() {
            if let Some(parent) = &page.meta.parent {
                if self.pages.contains_key(parent) {
                    children.entry(parent.clone()).or_default().push(page.meta.id.clone());
                } else {
                    tracing::warn!(page = %page.meta.id, parent = %parent, "Parent page is missing");
                }
            }
        }
        for page in self.pages.values().filter(|p| !p.meta.members.is_empty()) {
            let kids = children.entry(page.meta.id.clone()).or_default();
            for member in &page.meta.members {
                if member != ROOT_ID
                    && self.pages.contains_key(member)
                    && !kids.contains(member)
                {
                    kids.push(member.clone());
                }
            }
        }

        let ascendants: Vec<Vec<String>> = self
            .pages
            .values()
            .map(|page| self.ascendants_of(page))
            .collect();
        let descendants: Vec<Vec<String>> = self
            .pages
            .keys()
            .map(|id| descendants_of(id, &children))
            .collect();

        for ((page, ascendants), descendants) in self
            .pages
            .values_mut()
            .zip(ascendants)
            .zip(descendants)
        {
            let meta = &mut page.meta;
            meta.children = children.get(&meta.id).cloned().unwrap_or_default();
            meta.ascendants = ascendants;
            meta.descendants = descendants;
            meta.is_collection = !meta.children.is_empty();
            meta.is_post = meta.from_post_file
                || page
                    .attributes
                    .get("content")
                    .and_then(Value::as_str)
                    .is_some_and(|c| !c.is_empty());
        }
    }

    fn ascendants_of(&self, page: &Page) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = page.meta.parent.as_deref();
        while let Some(id) = current {
            if !seen.insert(id) {
                tracing::error!(page = %page.meta.id, "Cycle in parent chain");
                break;
            }
            let Some(parent) = self.pages.get(id) else {
                break;
            };
            chain.push(id.to_owned());
            current = parent.meta.parent.as_deref();
        }
        chain.reverse();
        chain
    }

    /// Order children and descendants of every page by its sort key.
    ///
    /// The key is the page's `sortCollectionBy` attribute or
    /// `default_sort_by`; a leading `-` sorts descending. Pages missing the
    /// key sort last.
    pub fn sort_collections(&mut self, default_sort_by: &str) {
        let sorted: Vec<(Vec<String>, Vec<String>)> = self
            .pages
            .values()
            .map(|page| {
                let sort_by = page.str_attr("sortCollectionBy").unwrap_or(default_sort_by);
                (
                    self.sort_ids(&page.meta.children, sort_by),
                    self.sort_ids(&page.meta.descendants, sort_by),
                )
            })
            .collect();
        for (page, (children, descendants)) in self.pages.values_mut().zip(sorted) {
            page.meta.children = children;
            page.meta.descendants = descendants;
        }
    }

    /// Sort page ids by the attribute path in `sort_by`.
    #[must_use]
    pub fn sort_ids(&self, ids: &[String], sort_by: &str) -> Vec<String> {
        let (descending, key) = match sort_by.strip_prefix('-') {
            Some(key) => (true, key),
            None => (false, sort_by),
        };
        let mut keyed: Vec<(&String, Option<Value>)> = ids
            .iter()
            .map(|id| {
                let value = self
                    .pages
                    .get(id)
                    .and_then(|p| p.get(key))
                    .map(std::borrow::Cow::into_owned)
                    .filter(|v| !v.is_null() && !v.is_deferred());
                (id, value)
            })
            .collect();
        keyed.sort_by(|(_, a), (_, b)| match (a, b) {
            (Some(a), Some(b)) => {
                let ord = a.sort_cmp(b);
                if descending { ord.reverse() } else { ord }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        keyed.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// The content root page, if loaded.
    #[must_use]
    pub fn root(&self) -> Option<&Page> {
        self.pages.get(ROOT_ID)
    }
}

fn descendants_of(id: &str, children: &IndexMap<String, Vec<String>>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut frontier: VecDeque<&str> = VecDeque::from([id]);
    while let Some(current) = frontier.pop_front() {
        let Some(kids) = children.get(current) else {
            continue;
        };
        for kid in kids {
            if kid != id && seen.insert(kid.as_str()) {
                result.push(kid.clone());
                frontier.push_back(kid.as_str());
            }
        }
    }
    result
}
