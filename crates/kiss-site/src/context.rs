//! State carried from one build to the next.

use kiss_config::Config;

use crate::graph::PageGraph;
use crate::index::{Lookup, PageIndexes};
use crate::value::{Object, Value};

/// The result of a build and the input of the next incremental one.
#[derive(Clone, Debug, Default)]
pub struct BuildContext {
    /// All pages.
    pub graph: PageGraph,
    /// Context data (`site`, data views), addressed by `@data:` tokens.
    pub data: Object,
    /// Lookup tables, `None` until built or when disabled.
    pub indexes: Option<PageIndexes>,
    /// Build counter, incremented by every build.
    pub version: u64,
}

impl BuildContext {
    /// Empty context for `config`, seeded with the `site` data.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            graph: PageGraph::new(config.dirs_resolved.content.clone()),
            data: site_data(config),
            indexes: None,
            version: 0,
        }
    }

    /// Page lookups, indexed when indexes exist.
    #[must_use]
    pub fn lookup(&self) -> Lookup<'_> {
        Lookup::new(&self.graph, self.indexes.as_ref())
    }
}

/// The `site` context object built from configuration.
#[must_use]
pub fn site_data(config: &Config) -> Object {
    let site = &config.site;
    let mut obj = Object::new();
    obj.insert("url".to_owned(), Value::from(site.url.clone()));
    obj.insert("title".to_owned(), Value::from(site.title.clone()));
    obj.insert("description".to_owned(), Value::from(site.description.clone()));
    obj.insert("image".to_owned(), Value::from(site.image.clone()));
    obj.insert(
        "locale".to_owned(),
        Value::Array(site.locale.iter().map(|s| Value::from(s.as_str())).collect()),
    );
    obj.insert("language".to_owned(), Value::from(site.default_language()));

    let mut data = Object::new();
    data.insert("site".to_owned(), Value::Object(obj));
    data
}
