//! `@kind:value` reference tokens.
//!
//! Each attribute is flattened once and scanned once for tokens. Unique
//! tokens are resolved through [`Lookup`] and replaced longest first so
//! `@id:home` never corrupts `@id:home:fr`. An unresolved token is replaced
//! by its bare value and counted as an error.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::cascade::is_url;
use crate::index::Lookup;
use crate::page::Page;
use crate::value::{Object, Value};

static REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"@([A-Za-z0-9_-]+):([^,\s\]'"<>)}#]+)"#).unwrap());
static LANG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z]{2,4})?$").unwrap());

/// How unresolved tokens affect the page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolveMode {
    /// Unresolved tokens fail the page with [`ReferenceError::Unresolved`].
    #[default]
    Strict,
    /// Unresolved tokens are only counted.
    Lenient,
}

impl ResolveMode {
    #[must_use]
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Lenient }
    }
}

/// Reference resolution failure for one page.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("Page '{page}': {count} errors found resolving @ references")]
    Unresolved { page: String, count: usize },
}

/// Resolved replacements for one page.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Rewritten top-level attributes.
    pub attributes: Vec<(String, Value)>,
    /// Unresolved or invalid tokens.
    pub errors: usize,
    pub warnings: usize,
}

impl Resolution {
    /// Write the rewritten attributes into `page`.
    pub fn apply(self, page: &mut Page) {
        for (key, value) in self.attributes {
            page.attributes.insert(key, value);
        }
    }
}

/// Resolves `@` tokens against the page graph.
#[derive(Debug)]
pub struct ReferenceResolver<'a> {
    lookup: Lookup<'a>,
    data: &'a Object,
    content_dir: &'a Path,
    default_lang: &'a str,
    mode: ResolveMode,
}

impl<'a> ReferenceResolver<'a> {
    #[must_use]
    pub fn new(
        lookup: Lookup<'a>,
        data: &'a Object,
        default_lang: &'a str,
        mode: ResolveMode,
    ) -> Self {
        Self {
            lookup,
            data,
            content_dir: lookup.pages().content_dir(),
            default_lang,
            mode,
        }
    }

    /// Resolve every token of `page` without touching it.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`ReferenceError::Unresolved`] if any token
    /// could not be resolved. Lenient mode never fails.
    pub fn resolve_page(&self, page: &Page) -> Result<Resolution, ReferenceError> {
        let resolution = self.plan(page);
        if resolution.errors > 0 && self.mode == ResolveMode::Strict {
            return Err(ReferenceError::Unresolved {
                page: page.id().to_owned(),
                count: resolution.errors,
            });
        }
        Ok(resolution)
    }

    /// Compute replacements for every attribute holding tokens.
    #[must_use]
    pub fn plan(&self, page: &Page) -> Resolution {
        let mut resolution = Resolution::default();
        for (key, value) in &page.attributes {
            let tokens = scan(value);
            if tokens.is_empty() {
                continue;
            }
            let mut replacements: Vec<(String, String)> = tokens
                .into_iter()
                .map(|(token, kind, target)| {
                    let replacement = match self.resolve(page, key, &kind, &target) {
                        Resolved::Found(r) => r,
                        Resolved::Warning(r) => {
                            resolution.warnings += 1;
                            r
                        }
                        Resolved::Error(r) => {
                            resolution.errors += 1;
                            r
                        }
                    };
                    (token, replacement)
                })
                .collect();
            replacements.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

            let mut rewritten = value.clone();
            replace_strings(&mut rewritten, &replacements);
            resolution.attributes.push((key.clone(), rewritten));
        }
        resolution
    }

    fn resolve(&self, page: &Page, key: &str, kind: &str, target: &str) -> Resolved {
        match kind {
            "data" => self.resolve_data(page, key, target),
            "file" => self.resolve_file(page, key, target),
            "id" => self.resolve_id(page, key, target),
            "permalink" => self.resolve_permalink(page, key, target),
            _ => {
                tracing::error!(page = %page.id(), attribute = %key, kind = %kind, "Unknown @ reference kind");
                Resolved::Error(target.to_owned())
            }
        }
    }

    fn resolve_data(&self, page: &Page, key: &str, target: &str) -> Resolved {
        let (head, tail) = target.split_once('.').unwrap_or((target, ""));
        match self
            .data
            .get(head)
            .and_then(|v| v.get_path(tail))
            .filter(|v| v.is_truthy())
        {
            Some(value) => Resolved::Found(value.to_string()),
            None => {
                tracing::error!(page = %page.id(), attribute = %key, path = %target, "@data not found");
                Resolved::Error(target.to_owned())
            }
        }
    }

    fn resolve_file(&self, page: &Page, key: &str, target: &str) -> Resolved {
        let path = self.content_dir.join(target.trim_start_matches('/'));
        let found = self
            .lookup
            .by_input_path(&path)
            .or_else(|| self.lookup.by_input_source(&path));
        let Some(found) = found else {
            tracing::error!(page = %page.id(), attribute = %key, file = %target, "@file not found");
            return Resolved::Error(target.to_owned());
        };
        link_to(page, key, found, "@file", target)
    }

    fn resolve_id(&self, page: &Page, key: &str, target: &str) -> Resolved {
        let reference = IdReference::parse(target);
        let lang = reference
            .lang
            .or_else(|| page.str_attr("lang"))
            .unwrap_or(self.default_lang);
        let mut candidates = vec![(reference.id, lang), (reference.id, self.default_lang)];
        if let Some(fallback) = reference.fallback {
            candidates.push((fallback, lang));
            candidates.push((fallback, self.default_lang));
        }
        let found = candidates
            .into_iter()
            .find_map(|(id, lang)| self.lookup.by_id_and_lang(id, lang, self.default_lang));
        let Some(found) = found else {
            tracing::error!(page = %page.id(), attribute = %key, id = %target, "@id not found");
            return Resolved::Error(reference.id.to_owned());
        };
        link_to(page, key, found, "@id", target)
    }

    fn resolve_permalink(&self, page: &Page, key: &str, target: &str) -> Resolved {
        if is_url(target) {
            tracing::warn!(page = %page.id(), attribute = %key, permalink = %target, "@permalink is a URL, skipping");
            return Resolved::Warning(target.to_owned());
        }
        match self.lookup.by_permalink(target) {
            Some(found) if found.is_excluded_from_write() => {
                tracing::error!(page = %page.id(), attribute = %key, permalink = %target, "@permalink target is excluded from write");
                Resolved::Error(target.to_owned())
            }
            Some(_) => Resolved::Found(target.to_owned()),
            None => {
                tracing::error!(page = %page.id(), attribute = %key, permalink = %target, "@permalink not found");
                Resolved::Error(target.to_owned())
            }
        }
    }
}

/// Permalink of `found`, an error if it is excluded from writing.
fn link_to(page: &Page, key: &str, found: &Page, kind: &str, target: &str) -> Resolved {
    let permalink = found.permalink().unwrap_or_default().to_owned();
    if found.is_excluded_from_write() {
        tracing::error!(
            page = %page.id(),
            attribute = %key,
            target = %target,
            "{kind} target is excluded from write"
        );
        return Resolved::Error(permalink);
    }
    Resolved::Found(permalink)
}

enum Resolved {
    Found(String),
    Warning(String),
    Error(String),
}

/// `id[:fallback][:lang]`. With two parts the second is a language when it
/// looks like a language tag, a fallback id otherwise.
#[derive(Debug, PartialEq, Eq)]
struct IdReference<'a> {
    id: &'a str,
    fallback: Option<&'a str>,
    lang: Option<&'a str>,
}

impl<'a> IdReference<'a> {
    fn parse(value: &'a str) -> Self {
        let mut parts = value.splitn(3, ':');
        let id = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (Some(second), Some(lang)) => Self {
                id,
                fallback: Some(second).filter(|s| !s.is_empty()),
                lang: Some(lang),
            },
            (Some(second), None) if LANG_REGEX.is_match(second) => Self {
                id,
                fallback: None,
                lang: Some(second),
            },
            (Some(second), None) => Self {
                id,
                fallback: Some(second),
                lang: None,
            },
            _ => Self {
                id,
                fallback: None,
                lang: None,
            },
        }
    }
}

/// Unique `(token, kind, value)` triples found in `value`.
///
/// String leaves are flattened into one newline-separated buffer, so a
/// whole attribute tree is scanned with a single pass of the regex.
fn scan(value: &Value) -> BTreeSet<(String, String, String)> {
    let mut flat = String::new();
    flatten(value, &mut flat);
    if !flat.contains('@') {
        return BTreeSet::new();
    }
    REFERENCE_REGEX
        .captures_iter(&flat)
        .map(|caps| (caps[0].to_owned(), caps[1].to_owned(), caps[2].to_owned()))
        .collect()
}

fn flatten(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => items.iter().for_each(|item| flatten(item, out)),
        Value::Object(map) => map.values().for_each(|item| flatten(item, out)),
        _ => {}
    }
}

fn replace_strings(value: &mut Value, replacements: &[(String, String)]) {
    match value {
        Value::String(s) if s.contains('@') => {
            for (token, replacement) in replacements {
                if s.contains(token.as_str()) {
                    *s = s.replace(token.as_str(), replacement);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_strings(item, replacements);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                replace_strings(item, replacements);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PageGraph;
    use crate::index::PageIndexes;
    use crate::page::InputSource;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::PathBuf;

    fn page(id: &str, input: &str, attrs: serde_json::Value) -> Page {
        let mut page = Page::new(id);
        if let Value::Object(map) = Value::from(attrs) {
            page.attributes = map;
        }
        page.meta.input_path = PathBuf::from(input);
        page.meta.input_sources = vec![InputSource {
            path: PathBuf::from(input),
            loader_id: Some(0),
        }];
        page
    }

    fn graph() -> PageGraph {
        let mut graph = PageGraph::new("content");
        graph.insert(page(".", "content/index.md", json!({"permalink": "/", "id": "home"})));
        graph.insert(page(
            "./fr",
            "content/fr/index.md",
            json!({"permalink": "/fr/", "id": "home", "lang": "fr"}),
        ));
        graph.insert(page(
            "./about.md",
            "content/about.md",
            json!({"permalink": "/about", "id": "about"}),
        ));
        graph.insert(page(
            "./secret.md",
            "content/secret.md",
            json!({"permalink": "/secret", "excludeFromWrite": true}),
        ));
        graph.insert(page(
            "./img/cat.png",
            "content/img/cat.png",
            json!({"permalink": "/img/cat.png"}),
        ));
        graph
    }

    fn data() -> Object {
        match Value::from(json!({"site": {"title": "Kiss", "empty": ""}})) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn resolve(graph: &PageGraph, indexes: Option<&PageIndexes>, attrs: serde_json::Value) -> (Page, Resolution) {
        let data = data();
        let resolver = ReferenceResolver::new(
            Lookup::new(graph, indexes),
            &data,
            "en",
            ResolveMode::Lenient,
        );
        let mut target = page("./x.md", "content/x.md", attrs);
        let resolution = resolver.plan(&target);
        let errors = resolution.errors;
        let warnings = resolution.warnings;
        resolution.apply(&mut target);
        (
            target,
            Resolution {
                attributes: Vec::new(),
                errors,
                warnings,
            },
        )
    }

    #[test]
    fn test_id_with_lang_and_default_fallback() {
        let graph = graph();
        let (page, res) = resolve(
            &graph,
            None,
            json!({"lang": "fr", "a": "@id:home:fr", "b": "[x](@id:home)", "c": "@id:home:de"}),
        );

        assert_eq!(page.attr("a"), Some(&Value::from("/fr/")));
        assert_eq!(page.attr("b"), Some(&Value::from("[x](/fr/)")));
        assert_eq!(page.attr("c"), Some(&Value::from("/")));
        assert_eq!(res.errors, 0);
    }

    #[test]
    fn test_id_fallback_id() {
        let graph = graph();
        let (page, res) = resolve(&graph, None, json!({"a": "@id:missing:about", "b": "@id:nope"}));

        assert_eq!(page.attr("a"), Some(&Value::from("/about")));
        assert_eq!(page.attr("b"), Some(&Value::from("nope")));
        assert_eq!(res.errors, 1);
    }

    #[test]
    fn test_longest_token_first() {
        let graph = graph();
        let indexes = PageIndexes::build(&graph, "en");
        let (page, _) = resolve(
            &graph,
            Some(&indexes),
            json!({"body": "<a href=\"@id:home\">en</a> <a href=\"@id:home:fr\">fr</a>"}),
        );

        assert_eq!(
            page.attr("body"),
            Some(&Value::from("<a href=\"/\">en</a> <a href=\"/fr/\">fr</a>"))
        );
    }

    #[test]
    fn test_file_and_permalink_references() {
        let graph = graph();
        let (page, res) = resolve(
            &graph,
            None,
            json!({
                "cover": "@file:/img/cat.png",
                "links": ["@permalink:/about", "@permalink:https://x.org/a", "@permalink:/nope"],
                "nested": {"deep": "see @file:/img/missing.png"},
            }),
        );

        assert_eq!(page.attr("cover"), Some(&Value::from("/img/cat.png")));
        assert_eq!(
            page.attr("links"),
            Some(&Value::from(json!(["/about", "https://x.org/a", "/nope"])))
        );
        assert_eq!(
            page.get("nested.deep").as_deref(),
            Some(&Value::from("see /img/missing.png"))
        );
        assert_eq!(res.errors, 2);
        assert_eq!(res.warnings, 1);
    }

    #[test]
    fn test_excluded_target_is_error_but_resolves() {
        let graph = graph();
        let (page, res) = resolve(&graph, None, json!({"a": "@file:/secret.md", "b": "@permalink:/secret"}));

        assert_eq!(page.attr("a"), Some(&Value::from("/secret")));
        assert_eq!(page.attr("b"), Some(&Value::from("/secret")));
        assert_eq!(res.errors, 2);
    }

    #[test]
    fn test_data_and_unknown_kind() {
        let graph = graph();
        let (page, res) = resolve(
            &graph,
            None,
            json!({"a": "@data:site.title, welcome", "b": "@data:site.empty", "c": "@foo:bar"}),
        );

        assert_eq!(page.attr("a"), Some(&Value::from("Kiss, welcome")));
        assert_eq!(page.attr("b"), Some(&Value::from("site.empty")));
        assert_eq!(page.attr("c"), Some(&Value::from("bar")));
        assert_eq!(res.errors, 2);
    }

    #[test]
    fn test_strict_mode_fails_page() {
        let graph = graph();
        let data = data();
        let resolver = ReferenceResolver::new(Lookup::scanning(&graph), &data, "en", ResolveMode::Strict);
        let target = page("./x.md", "content/x.md", json!({"a": "@id:nope", "b": "@id:about"}));

        let err = resolver.resolve_page(&target).unwrap_err();

        assert!(matches!(err, ReferenceError::Unresolved { count: 1, .. }));
        assert!(err.to_string().contains("./x.md"));
    }

    #[test]
    fn test_plain_values_untouched() {
        let graph = graph();
        let (page, _) = resolve(
            &graph,
            None,
            json!({"email": "a@b.c", "n": 3, "t": "no tokens"}),
        );

        assert_eq!(page.attr("email"), Some(&Value::from("a@b.c")));
        assert_eq!(page.attr("n"), Some(&Value::from(3_i64)));
    }

    #[test]
    fn test_parse_id_reference() {
        assert_eq!(
            IdReference::parse("home"),
            IdReference { id: "home", fallback: None, lang: None }
        );
        assert_eq!(
            IdReference::parse("home:pt-BR"),
            IdReference { id: "home", fallback: None, lang: Some("pt-BR") }
        );
        assert_eq!(
            IdReference::parse("home:index"),
            IdReference { id: "home", fallback: Some("index"), lang: None }
        );
        assert_eq!(
            IdReference::parse("home:index:fr"),
            IdReference { id: "home", fallback: Some("index"), lang: Some("fr") }
        );
    }
}
