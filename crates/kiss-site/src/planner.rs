//! Incremental rebuild planning.
//!
//! Maps a change event onto the phases to run and the page ids to rebuild.
//! The planner only reads the previous build; an empty id list means "all
//! pages", so every situation the planner cannot narrow down falls back to a
//! full build.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use kiss_config::Config;
use kiss_storage::StorageEventKind;

use crate::cascade;
use crate::context::BuildContext;
use crate::graph::BuildScope;
use crate::hooks::{HookPhase, HookRegistry};
use crate::loader::{configured_output_type, find_matching_loader};
use crate::page::Page;

/// What triggered a build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlanRequest {
    /// Changed file (absolute).
    pub file: Option<PathBuf>,
    pub event: Option<StorageEventKind>,
    /// Watch mode: reuse the previous build where possible.
    pub incremental: bool,
}

impl PlanRequest {
    /// A full build.
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// An incremental build for a change event.
    #[must_use]
    pub fn change(file: impl Into<PathBuf>, event: StorageEventKind) -> Self {
        Self {
            file: Some(file.into()),
            event: Some(event),
            incremental: true,
        }
    }
}

/// Phases to run and pages to rebuild.
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildFlags {
    pub incremental: bool,
    pub event: Option<StorageEventKind>,
    /// File driving an incremental build.
    pub file: Option<PathBuf>,
    /// Reload `kiss.toml` and discard the previous build.
    pub reload_config: bool,
    pub load_libs: bool,
    pub pre_load: bool,
    pub content: bool,
    pub post_load: bool,
    pub dynamic_data: bool,
    pub data_views: bool,
    pub transform: bool,
    pub write: bool,
    pub post_write: bool,
    /// Changed file below the content directory.
    pub content_file: Option<PathBuf>,
    /// Changed template, relative to the template directory.
    pub template_file: Option<PathBuf>,
    /// Pages to rebuild, ordered and unique. Empty means all pages.
    pub build_page_ids: Vec<String>,
    /// Version stamped on pages (re)created by this build.
    pub version: u64,
}

impl BuildFlags {
    /// Every phase on; hook phases on when they have hooks.
    #[must_use]
    pub fn full(hooks: &HookRegistry, version: u64) -> Self {
        let has = |phase| !hooks.hooks(phase).is_empty();
        Self {
            load_libs: has(HookPhase::LoadLibs),
            pre_load: has(HookPhase::PreLoad),
            content: true,
            post_load: has(HookPhase::PostLoad),
            dynamic_data: true,
            data_views: true,
            transform: true,
            write: true,
            post_write: has(HookPhase::PostWrite),
            version,
            ..Self::default()
        }
    }

    /// Every phase off.
    #[must_use]
    pub fn none(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Pages the build operates on.
    #[must_use]
    pub fn scope(&self) -> BuildScope {
        if self.build_page_ids.is_empty() {
            BuildScope::All
        } else {
            BuildScope::Pages(self.build_page_ids.clone())
        }
    }

    /// Whether the build narrows down to a set of pages.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.incremental && !self.build_page_ids.is_empty()
    }

    /// Whether any phase runs.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.reload_config
            || self.load_libs
            || self.pre_load
            || self.content
            || self.post_load
            || self.dynamic_data
            || self.data_views
            || self.transform
            || self.write
            || self.post_write
    }
}

/// Plan the build for `request`.
///
/// `previous` is the context of the last build, `None` before the first one.
#[must_use]
pub fn plan_build(
    request: &PlanRequest,
    config: &Config,
    hooks: &HookRegistry,
    previous: Option<&BuildContext>,
) -> BuildFlags {
    let version = previous.map_or(1, |ctx| ctx.version + 1);
    let mut flags = BuildFlags::full(hooks, version);
    flags.incremental = request.incremental;
    flags.event = request.event;

    let (Some(previous), Some(file), true) = (previous, &request.file, request.incremental) else {
        return flags;
    };
    if config.is_config_file(file) {
        tracing::info!(file = %file.display(), "Configuration changed, reloading");
        flags.reload_config = true;
        return flags;
    }
    match request.event {
        Some(StorageEventKind::DirCreated) => return BuildFlags::none(version),
        Some(StorageEventKind::Created | StorageEventKind::Modified) => {}
        _ => return flags,
    }

    let dirs = &config.dirs_resolved;
    flags.file = Some(file.clone());
    flags.content = false;
    flags.dynamic_data = false;
    flags.data_views = false;
    if file.starts_with(&dirs.content) {
        flags.content = true;
        flags.content_file = Some(file.clone());
        flags.dynamic_data = true;
        flags.data_views = true;
    } else if let Ok(template) = file.strip_prefix(&dirs.template) {
        flags.template_file = Some(template.to_path_buf());
    }

    flags.load_libs = hooks.wants_incremental(HookPhase::LoadLibs, file, previous);
    flags.pre_load = hooks.wants_incremental(HookPhase::PreLoad, file, previous);
    flags.post_load = hooks.wants_incremental(HookPhase::PostLoad, file, previous);
    flags.post_write = hooks.wants_incremental(HookPhase::PostWrite, file, previous);

    flags.build_page_ids = build_page_ids(&flags, config, previous);
    if flags.build_page_ids.is_empty() {
        tracing::info!("Incremental rebuild not possible, performing full rebuild");
    } else {
        tracing::info!(pages = ?flags.build_page_ids, "Change impacts pages");
    }
    flags
}

/// Pages impacted by the change in `flags`, in rebuild order.
///
/// For a content file: its ascendants, the page, and its descendants unless
/// the file is a `post.*` file (its data doesn't cascade past the page). A
/// new file is planned through its parent. For a template: every page using
/// it as `layout`.
fn build_page_ids(flags: &BuildFlags, config: &Config, previous: &BuildContext) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(file) = &flags.content_file {
        let lookup = previous.lookup();
        let mut is_parent_page = false;
        let page: &Page = match lookup.by_input_source(file) {
            Some(page) => page,
            None if flags.event == Some(StorageEventKind::Created) => {
                let Some((id, parent)) = new_page_ids(file, config) else {
                    return Vec::new();
                };
                let Some(parent) = previous.graph.get(&parent) else {
                    tracing::warn!(file = %file.display(), "Could not find parent page for new file");
                    return Vec::new();
                };
                ids.push(id);
                is_parent_page = true;
                parent
            }
            None => {
                tracing::warn!(file = %file.display(), "Could not find existing page");
                return Vec::new();
            }
        };
        ids.extend(page.meta.ascendants.iter().cloned());
        ids.push(page.id().to_owned());
        if !is_post_file(file) && !is_parent_page {
            ids.extend(page.meta.descendants.iter().cloned());
        }
    } else if let Some(template) = &flags.template_file {
        // Templates included from other templates match no page, which
        // falls back to a full build.
        let template = template.to_string_lossy();
        ids.extend(
            previous
                .graph
                .pages()
                .filter(|page| page.str_attr("layout") == Some(template.as_ref()))
                .map(|page| page.id().to_owned()),
        );
    }
    dedup(ids)
}

/// Id and parent id a new file would get, if a loader accepts it.
fn new_page_ids(file: &Path, config: &Config) -> Option<(String, String)> {
    let Some(loader) = find_matching_loader(config, file) else {
        tracing::warn!(file = %file.display(), "Could not find loader for new file");
        return None;
    };
    let output_type = configured_output_type(&config.loaders[loader]);
    let ids = cascade::canonical_ids(file, &config.dirs_resolved.content, output_type)?;
    let Some(parent) = ids.parent else {
        tracing::warn!(file = %file.display(), "Could not find parent page for new file");
        return None;
    };
    Some((ids.id, parent))
}

fn is_post_file(path: &Path) -> bool {
    path.file_stem().is_some_and(|stem| stem == "post")
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
