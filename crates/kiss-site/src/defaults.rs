//! Default attributes seeded on the content root and cascaded to every page.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use kiss_config::OutputType;
use regex::Regex;

use crate::compute::{ComputeContext, ComputeError};
use crate::deferred::{Deferred, Dependency};
use crate::page::{Page, path_string};
use crate::value::{Object, Value};

static INDEX_OR_POST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(index|post)\.[a-z]+$").unwrap());
static EXTENSION_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.[a-z]+$").unwrap());
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static NON_SLUG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static IMG_SRC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img\s[^>]*?src\s*=\s*["']([^"']+)["']"#).unwrap());

const OMISSION: &str = "...";

/// The attribute set every page starts from.
#[must_use]
pub fn default_attributes() -> Object {
    let mut author = Object::new();
    for key in ["name", "email", "uri"] {
        author.insert(key.to_owned(), Value::Null);
    }

    let mut attrs = Object::new();
    attrs.insert("author".to_owned(), Value::Object(author));
    attrs.insert("cover".to_owned(), Value::Null);
    attrs.insert("slug".to_owned(), Value::Null);
    for key in ["excludeFromCollection", "excludeFromSitemap", "excludeFromWrite"] {
        attrs.insert(key.to_owned(), Value::Bool(false));
    }

    let deferred = [
        Deferred::new(
            "permalink",
            [
                Dependency::path("meta.inputPath"),
                Dependency::path("meta.outputType"),
                Dependency::path("meta.isDirectory"),
            ],
            compute_permalink,
        ),
        Deferred::new("url", [Dependency::path("permalink")], compute_url),
        Deferred::new("title", [Dependency::path("permalink")], compute_title),
        Deferred::new(
            "layout",
            [
                Dependency::path("meta.isCollection"),
                Dependency::path("meta.isPost"),
            ],
            compute_layout,
        ),
        Deferred::new(
            "created",
            [Dependency::chained("meta.descendants", [Dependency::path("created")])],
            compute_created,
        ),
        Deferred::new(
            "modified",
            [Dependency::chained("meta.descendants", [Dependency::path("modified")])],
            compute_modified,
        ),
        Deferred::new("category", [Dependency::path("meta.parent")], compute_category),
        Deferred::new("description", [Dependency::path("content")], compute_description),
        Deferred::new(
            "image",
            [
                Dependency::path("content"),
                Dependency::path("permalink"),
                Dependency::path("meta.descendants"),
            ],
            compute_image,
        ),
        Deferred::new("outputPath", [Dependency::path("permalink")], compute_output_path),
    ];
    for d in deferred {
        attrs.insert(d.name().to_owned(), Value::Deferred(d));
    }
    attrs
}

/// Content-root relative path without `index`/`post` basenames and, for
/// HTML output, without extension. Directories end with `/`.
fn compute_permalink(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let relative = page
        .meta
        .input_path
        .strip_prefix(ctx.graph.content_dir())
        .map_err(|_| ComputeError::Invalid {
            path: "meta.inputPath".to_owned(),
            message: format!(
                "'{}' is outside the content directory",
                page.meta.input_path.display()
            ),
        })?;
    let mut permalink = format!("/{}", path_string(relative));
    if page.meta.output_type == OutputType::Html {
        permalink = INDEX_OR_POST_REGEX.replace(&permalink, "/").into_owned();
        permalink = EXTENSION_REGEX.replace(&permalink, "").into_owned();
    }
    if page.meta.is_directory && !permalink.ends_with('/') {
        permalink.push('/');
    }
    Ok(Value::from(permalink))
}

fn compute_url(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let permalink = page.str_attr("permalink").unwrap_or_default();
    let Some(site_url) = ctx.data.get("site").and_then(|s| s.get_path("url")).and_then(Value::as_str)
    else {
        return Ok(Value::from(permalink));
    };
    Ok(Value::from(join_url(site_url, permalink)))
}

/// Resolve `permalink` against `base` the way a browser resolves a link.
fn join_url(base: &str, permalink: &str) -> String {
    let origin_end = base
        .find("://")
        .and_then(|i| base[i + 3..].find('/').map(|j| i + 3 + j))
        .unwrap_or(base.len());
    if permalink.starts_with('/') {
        return format!("{}{permalink}", &base[..origin_end]);
    }
    let dir_end = base.rfind('/').filter(|&i| i >= origin_end).map_or(base.len(), |i| i + 1);
    let mut joined = base[..dir_end].to_owned();
    if !joined.ends_with('/') {
        joined.push('/');
    }
    joined.push_str(permalink);
    joined
}

fn compute_title(page: &Page, _ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    Ok(Value::from(unslugify(
        page.str_attr("permalink").unwrap_or_default(),
    )))
}

/// URL-safe form of `text`: transliterated to ASCII, lowercased, with runs
/// of other characters turned into single dashes.
#[must_use]
pub fn slugify(text: &str) -> String {
    let ascii = deunicode::deunicode(text).to_lowercase();
    NON_SLUG_REGEX
        .replace_all(&ascii, "-")
        .trim_matches('-')
        .to_owned()
}

/// Turn a permalink into a readable title: `/blog/cats-and-dogs/` becomes
/// `blog | cats & dogs`.
#[must_use]
pub fn unslugify(slug: &str) -> String {
    slug.trim_start_matches('/')
        .trim_end_matches('/')
        .replace('-', " ")
        .replace('/', " | ")
        .split(' ')
        .map(|word| if word == "and" { "&" } else { word })
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_owned()
}

fn compute_layout(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let templates = &ctx.config.templates;
    let layout = if page.meta.is_collection {
        &templates.collection
    } else if page.meta.is_post {
        &templates.post
    } else {
        &templates.default
    };
    Ok(Value::from(layout.as_str()))
}

/// Earliest published date among descendants for collections, else the
/// file creation time.
fn compute_created(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let attribute = &ctx.config.defaults.page_published_attribute;
    let earliest = page
        .meta
        .is_collection
        .then(|| descendant_dates(page, ctx, attribute).min())
        .flatten();
    Ok(Value::from(earliest.or(page.meta.file_created)))
}

/// Latest updated date among descendants for collections, else the file
/// modification time.
fn compute_modified(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let attribute = &ctx.config.defaults.page_updated_attribute;
    let latest = page
        .meta
        .is_collection
        .then(|| descendant_dates(page, ctx, attribute).max())
        .flatten();
    Ok(Value::from(latest.or(page.meta.file_modified)))
}

fn descendant_dates<'a>(
    page: &'a Page,
    ctx: &'a ComputeContext<'_>,
    attribute: &'a str,
) -> impl Iterator<Item = DateTime<Utc>> + 'a {
    page.meta
        .descendants
        .iter()
        .filter_map(move |id| ctx.graph.get(id))
        .filter_map(move |p| p.attr(attribute).and_then(Value::as_date))
}

fn compute_category(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let category = page
        .meta
        .parent
        .as_deref()
        .and_then(|id| ctx.graph.get(id))
        .map(|parent| parent.meta.basename.clone())
        .unwrap_or_default();
    Ok(Value::from(category))
}

fn compute_description(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let Some(content) = page.str_attr("content").filter(|c| !c.is_empty()) else {
        return Ok(Value::from(""));
    };
    let text = TAG_REGEX.replace_all(content, "");
    Ok(Value::from(truncate(
        text.trim(),
        ctx.config.defaults.description_length,
    )))
}

/// Cut `text` to at most `length` characters, at the last space, ending
/// with `...`.
#[must_use]
pub fn truncate(text: &str, length: usize) -> String {
    if text.chars().count() <= length {
        return text.to_owned();
    }
    let keep = length.saturating_sub(OMISSION.len());
    let cut: String = text.chars().take(keep).collect();
    let cut = match cut.rfind(' ') {
        Some(i) if i > 0 => &cut[..i],
        _ => cut.as_str(),
    };
    format!("{cut}{OMISSION}")
}

/// First image of the content, else the first image found among
/// descendants, else the site image.
fn compute_image(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    if let Some(image) = own_image(page) {
        return Ok(Value::from(image));
    }
    let from_descendants = page
        .meta
        .descendants
        .iter()
        .filter_map(|id| ctx.graph.get(id))
        .find_map(|p| {
            p.str_attr("image")
                .map(str::to_owned)
                .or_else(|| own_image(p))
        });
    if let Some(image) = from_descendants {
        return Ok(Value::from(image));
    }
    Ok(ctx
        .data
        .get("site")
        .and_then(|s| s.get_path("image"))
        .cloned()
        .unwrap_or_default())
}

fn own_image(page: &Page) -> Option<String> {
    let content = page.str_attr("content")?;
    let src = IMG_SRC_REGEX.captures(content)?.get(1)?.as_str();
    if src.starts_with('/') || crate::cascade::is_url(src) {
        return Some(src.to_owned());
    }
    let base = page.str_attr("permalink").unwrap_or("/");
    let dir = base.rfind('/').map_or("", |i| &base[..i]);
    Some(format!("{dir}/{src}"))
}

/// `dirs.public` joined with the permalink; directories get `index.html`
/// and extensionless paths get `.html`.
fn compute_output_path(page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
    let permalink = page
        .str_attr("permalink")
        .ok_or_else(|| ComputeError::Missing("permalink".to_owned()))?;
    let public = &ctx.config.dirs_resolved.public;
    let mut output = public.join(permalink.trim_start_matches('/'));
    if permalink.ends_with('/') {
        output.push("index.html");
    } else if Path::new(permalink).extension().is_none() {
        output.set_extension("html");
    }
    Ok(Value::from(path_string(&output)))
}
