//! Computed collections: pages grouping the loaded pages by an attribute
//! value, such as one page per tag.
//!
//! A `collection` loader with `group_by = "tags"` creates `./tags` and one
//! child per tag value (`./tags/rust`, ...) whose members are the pages
//! carrying that tag. Computed loaders run on full builds only, after every
//! file is loaded.

use std::path::PathBuf;

use indexmap::IndexMap;
use kiss_config::{GroupByType, LoaderConfig, LoaderSource};

use crate::cascade::ROOT_ID;
use crate::defaults::{default_attributes, slugify};
use crate::diagnostics::Diagnostics;
use crate::graph::PageGraph;
use crate::page::Page;
use crate::value::Value;

/// Handler name of computed collection loaders.
pub const COLLECTION_HANDLER: &str = "collection";

/// Create the pages of one computed collection loader.
///
/// Returns the number of pages created. Only pages loaded from files with
/// non-empty `content` are grouped; values that slugify to the same path
/// share one page.
pub fn load_computed_collection(
    graph: &mut PageGraph,
    options: &LoaderConfig,
    version: u64,
    diag: &Diagnostics,
) -> usize {
    let Some(group_by) = options.group_by.as_deref().filter(|g| !g.is_empty()) else {
        tracing::error!(handler = %options.handler, "Computed collection needs a group_by option");
        diag.error();
        return 0;
    };
    let name = options.name.as_deref().unwrap_or(group_by);
    let base_link = options
        .base_link
        .as_deref()
        .map_or_else(|| slugify(group_by), |b| b.trim_matches('/').to_owned());

    let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
    for page in graph.pages().filter(|p| is_groupable(p)) {
        let Some(value) = page.get(group_by) else {
            continue;
        };
        for key in group_keys(&value, options.group_by_type) {
            let slug = slugify(&key);
            if slug.is_empty() {
                tracing::warn!(page = %page.id(), value = %key, "Group value has no usable slug");
                diag.warning();
                continue;
            }
            let members = groups.entry(slug).or_default();
            if !members.iter().any(|id| id == page.id()) {
                members.push(page.id().to_owned());
            }
        }
    }

    let base: PathBuf = graph.content_dir().join(&base_link);
    graph.ensure_directories(&base, &default_attributes(), version, diag);
    let mut created = 0;
    if graph
        .insert_computed(&base, name, Vec::new(), version, diag)
        .is_some()
    {
        created += 1;
    }
    for (slug, members) in groups {
        tracing::trace!(group = %name, value = %slug, members = members.len(), "Computed page");
        if graph
            .insert_computed(&base.join(&slug), name, members, version, diag)
            .is_some()
        {
            created += 1;
        }
    }
    tracing::debug!(group = %name, pages = created, "Computed collection loaded");
    created
}

fn is_groupable(page: &Page) -> bool {
    page.meta.source == LoaderSource::File
        && page.id() != ROOT_ID
        && page
            .str_attr("content")
            .is_some_and(|content| !content.is_empty())
}

/// Group keys of one attribute value. Arrays give one key per element when
/// grouping by array; values with no string form give none.
fn group_keys(value: &Value, group_by_type: GroupByType) -> Vec<String> {
    match (value, group_by_type) {
        (Value::Array(items), GroupByType::Array) => items.iter().filter_map(scalar_key).collect(),
        _ => scalar_key(value).into_iter().collect(),
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Date(d) => Some(d.date_naive().to_string()),
        _ => None,
    }
}
