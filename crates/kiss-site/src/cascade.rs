//! Data cascade rules: page ids, attribute inheritance and load ordering.
//!
//! Pages inherit a deep copy of their parent's attributes and overlay their
//! own. Keys ending in [`NO_CASCADE_SUFFIX`] stay on the page defining them.

use std::cmp::Ordering;
use std::path::{Component, Path};
use std::sync::LazyLock;

use kiss_config::OutputType;
use regex::Regex;

use crate::value::{Object, Value};

/// Suffix of attributes that apply to the defining page only.
pub const NO_CASCADE_SUFFIX: &str = "_no_cascade";

/// Id of the content root.
pub const ROOT_ID: &str = ".";

static FILE_REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"@file:([^,\s\]'"<>)}#]+)"#).unwrap());

/// Ids derived from an input path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalIds {
    /// Page id (`.`, `./blog`, `./about.md`).
    pub id: String,
    /// Parent id, `None` for the root.
    pub parent: Option<String>,
    /// Basename of the page (directory name for collapsed files).
    pub basename: String,
    /// `index.*` file collapsed onto its directory.
    pub is_index: bool,
    /// `post.*` file collapsed onto its directory.
    pub is_post: bool,
}

/// Compute the id and parent id of `input_path`.
///
/// `index.*` and `post.*` files with HTML output collapse onto their
/// directory. Returns `None` if `input_path` is outside `content_dir`.
#[must_use]
pub fn canonical_ids(
    input_path: &Path,
    content_dir: &Path,
    output_type: OutputType,
) -> Option<CanonicalIds> {
    let relative = input_path.strip_prefix(content_dir).ok()?;
    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let Some((name, dirs)) = segments.split_last() else {
        return Some(CanonicalIds {
            id: ROOT_ID.to_owned(),
            parent: None,
            basename: String::new(),
            is_index: false,
            is_post: false,
        });
    };

    let is_index = output_type == OutputType::Html && name.starts_with("index.");
    let is_post = output_type == OutputType::Html && name.starts_with("post.");
    if is_index || is_post {
        let (id, parent) = match dirs.split_last() {
            Some((_, grand)) => (segments_id(dirs), Some(segments_id(grand))),
            None => (ROOT_ID.to_owned(), None),
        };
        return Some(CanonicalIds {
            id,
            parent,
            basename: dirs.last().cloned().unwrap_or_default(),
            is_index,
            is_post,
        });
    }

    Some(CanonicalIds {
        id: segments_id(&segments),
        parent: Some(segments_id(dirs)),
        basename: name.clone(),
        is_index: false,
        is_post: false,
    })
}

fn segments_id(segments: &[String]) -> String {
    if segments.is_empty() {
        ROOT_ID.to_owned()
    } else {
        format!("./{}", segments.join("/"))
    }
}

/// Deep-merge `overlay` into `base`: nested objects merge key by key, every
/// other value (arrays included) replaces the base value.
pub fn merge_overlay(base: &mut Object, overlay: Object) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_overlay(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Copy of `attributes` without `_no_cascade` keys, at any depth.
#[must_use]
pub fn strip_no_cascade(attributes: &Object) -> Object {
    attributes
        .iter()
        .filter(|(key, _)| !key.ends_with(NO_CASCADE_SUFFIX))
        .map(|(key, value)| (key.clone(), strip_value(value)))
        .collect()
}

fn strip_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(strip_no_cascade(map)),
        Value::Array(items) => Value::Array(items.iter().map(strip_value).collect()),
        other => other.clone(),
    }
}

/// Rewrite `@file:` references relative to `page_dir` (a content-absolute
/// directory such as `/blog/a`) into content-absolute paths.
///
/// Returns the rewritten absolute paths so the caller can check they exist.
pub fn absolutize_file_references(attributes: &mut Object, page_dir: &str) -> Vec<String> {
    let mut rewritten = Vec::new();
    for value in attributes.values_mut() {
        absolutize_value(value, page_dir, &mut rewritten);
    }
    rewritten
}

fn absolutize_value(value: &mut Value, page_dir: &str, rewritten: &mut Vec<String>) {
    match value {
        Value::String(s) if s.contains("@file:") => {
            let replaced = FILE_REFERENCE_REGEX.replace_all(s, |caps: &regex::Captures<'_>| {
                let target = &caps[1];
                if is_url(target) || target.starts_with('#') {
                    return caps[0].to_owned();
                }
                let absolute = if target.starts_with('/') {
                    normalize_path(target)
                } else {
                    normalize_path(&format!("{page_dir}/{target}"))
                };
                rewritten.push(absolute.clone());
                format!("@file:{absolute}")
            });
            *s = replaced.into_owned();
        }
        Value::Array(items) => {
            for item in items {
                absolutize_value(item, page_dir, rewritten);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                absolutize_value(item, page_dir, rewritten);
            }
        }
        _ => {}
    }
}

/// Whether `value` is an absolute URL with a scheme.
pub(crate) fn is_url(value: &str) -> bool {
    value
        .split_once("://")
        .is_some_and(|(scheme, rest)| {
            !scheme.is_empty()
                && !rest.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        })
}

/// Resolve `.` and `..` segments of a `/`-separated absolute path.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn file_rank(path: &Path) -> u8 {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if name.starts_with("index.") {
        0
    } else if name.starts_with("post.") {
        2
    } else {
        1
    }
}

/// Order files for loading: `index.*` first (shortest path first), other
/// files next in listing order, `post.*` last (longest path first).
///
/// Parents must be loaded before children for the cascade to see their
/// data, and deeper `post.*` files must not inherit from shallower ones.
pub fn sort_source_files<T>(files: &mut [T], path_of: impl Fn(&T) -> &Path) {
    files.sort_by(|a, b| {
        let (pa, pb) = (path_of(a), path_of(b));
        let (ra, rb) = (file_rank(pa), file_rank(pb));
        if ra != rb {
            return ra.cmp(&rb);
        }
        let (la, lb) = (pa.as_os_str().len(), pb.as_os_str().len());
        match ra {
            0 => la.cmp(&lb),
            2 => lb.cmp(&la),
            _ => Ordering::Equal,
        }
    });
}
