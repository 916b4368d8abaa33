//! Page transforms, run in registration order after data views.

use kiss_config::{Config, OutputType};

use crate::context::BuildContext;
use crate::diagnostics::Diagnostics;
use crate::graph::BuildScope;
use crate::references::{ReferenceError, ReferenceResolver, ResolveMode};

/// Error transforming one page.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    References(#[from] ReferenceError),
    #[error("{0}")]
    Failed(String),
}

/// Rewrites one page in place.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Only pages of this output type are transformed; `None` means all.
    fn output_type(&self) -> Option<OutputType> {
        None
    }

    /// Transform the page `id` of `ctx`.
    fn apply(
        &self,
        id: &str,
        ctx: &mut BuildContext,
        config: &Config,
        diag: &Diagnostics,
    ) -> Result<(), TransformError>;
}

/// Replaces `@kind:value` tokens with the values they reference.
#[derive(Debug, Default)]
pub struct ReferenceTransform;

impl Transform for ReferenceTransform {
    fn name(&self) -> &'static str {
        "references"
    }

    fn apply(
        &self,
        id: &str,
        ctx: &mut BuildContext,
        config: &Config,
        diag: &Diagnostics,
    ) -> Result<(), TransformError> {
        let mode = ResolveMode::from_strict(config.references.strict);
        let resolution = {
            let Some(page) = ctx.graph.get(id) else {
                return Ok(());
            };
            ReferenceResolver::new(ctx.lookup(), &ctx.data, config.site.default_language(), mode)
                .plan(page)
        };
        let errors = resolution.errors;
        diag.errors(errors);
        for _ in 0..resolution.warnings {
            diag.warning();
        }
        if let Some(page) = ctx.graph.get_mut(id) {
            resolution.apply(page);
        }
        if errors > 0 && mode == ResolveMode::Strict {
            return Err(ReferenceError::Unresolved {
                page: id.to_owned(),
                count: errors,
            }
            .into());
        }
        Ok(())
    }
}

/// Ordered transforms.
pub struct TransformRegistry {
    transforms: Vec<Box<dyn Transform>>,
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.transforms.iter().map(|t| t.name()).collect();
        f.debug_struct("TransformRegistry").field("transforms", &names).finish()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ReferenceTransform);
        registry
    }
}

impl TransformRegistry {
    /// Registry with the reference transform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// Append a transform; it runs after those registered before.
    pub fn register(&mut self, transform: impl Transform + 'static) {
        self.transforms.push(Box::new(transform));
    }

    /// Run every transform over the pages in `scope`.
    ///
    /// A failing page is logged and counted; the remaining pages are still
    /// transformed.
    pub fn apply_all(
        &self,
        ctx: &mut BuildContext,
        config: &Config,
        scope: &BuildScope,
        diag: &Diagnostics,
    ) {
        if self.transforms.is_empty() {
            tracing::info!("No transform registered");
            return;
        }
        let ids = scope.ids(&ctx.graph);
        for transform in &self.transforms {
            let wanted = transform.output_type();
            tracing::info!(
                transform = transform.name(),
                output_type = wanted.map_or("all", OutputType::as_str),
                pages = ids.len(),
                "Transforming pages"
            );
            for id in &ids {
                let matches = ctx
                    .graph
                    .get(id)
                    .is_some_and(|page| wanted.is_none_or(|t| t == page.meta.output_type));
                if !matches {
                    continue;
                }
                match transform.apply(id, ctx, config, diag) {
                    Ok(()) => tracing::trace!(transform = transform.name(), page = %id, "Transformed"),
                    Err(e) => {
                        tracing::error!(transform = transform.name(), page = %id, error = %e, "Transform failed");
                        diag.error();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn context(config: &Config) -> BuildContext {
        let mut ctx = BuildContext::new(config);
        let mut home = Page::new(".");
        home.attributes
            .insert("permalink".to_owned(), Value::from("/"));
        home.attributes.insert("id".to_owned(), Value::from("home"));
        let mut post = Page::new("./post.md");
        post.meta.output_type = OutputType::Html;
        post.attributes.insert(
            "content".to_owned(),
            Value::from("<a href=\"@id:home\">Home</a> <a href=\"@id:nowhere\">?</a>"),
        );
        let mut image = Page::new("./a.png");
        image.meta.output_type = OutputType::Image;
        image
            .attributes
            .insert("alt".to_owned(), Value::from("@id:home logo"));
        ctx.graph.insert(home);
        ctx.graph.insert(post);
        ctx.graph.insert(image);
        ctx
    }

    struct Upper;

    impl Transform for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn output_type(&self) -> Option<OutputType> {
            Some(OutputType::Image)
        }

        fn apply(
            &self,
            id: &str,
            ctx: &mut BuildContext,
            _config: &Config,
            _diag: &Diagnostics,
        ) -> Result<(), TransformError> {
            let page = ctx
                .graph
                .get_mut(id)
                .ok_or_else(|| TransformError::Failed(id.to_owned()))?;
            let alt = page.str_attr("alt").unwrap_or_default().to_uppercase();
            page.attributes.insert("alt".to_owned(), Value::from(alt));
            Ok(())
        }
    }

    #[test]
    fn test_reference_transform_strict_rewrites_and_fails() {
        let config = Config::with_base(Path::new("/site"));
        let mut ctx = context(&config);
        let diag = Diagnostics::new();

        let err = ReferenceTransform
            .apply("./post.md", &mut ctx, &config, &diag)
            .unwrap_err();

        assert!(matches!(
            err,
            TransformError::References(ReferenceError::Unresolved { count: 1, .. })
        ));
        assert_eq!(
            ctx.graph.get("./post.md").unwrap().str_attr("content"),
            Some("<a href=\"/\">Home</a> <a href=\"nowhere\">?</a>")
        );
        assert_eq!(diag.counts().errors, 1);
    }

    #[test]
    fn test_reference_transform_lenient_only_counts() {
        let mut config = Config::with_base(Path::new("/site"));
        config.references.strict = false;
        let mut ctx = context(&config);
        let diag = Diagnostics::new();

        ReferenceTransform
            .apply("./post.md", &mut ctx, &config, &diag)
            .unwrap();

        assert_eq!(diag.counts().errors, 1);
    }

    #[test]
    fn test_registry_runs_in_order_with_type_filter() {
        let config = Config::with_base(Path::new("/site"));
        let mut ctx = context(&config);
        let diag = Diagnostics::new();
        let mut registry = TransformRegistry::new();
        registry.register(Upper);

        registry.apply_all(&mut ctx, &config, &BuildScope::All, &diag);

        // references first, then the image-only transform
        assert_eq!(
            ctx.graph.get("./a.png").unwrap().str_attr("alt"),
            Some("/ LOGO")
        );
        assert_eq!(
            ctx.graph.get("./post.md").unwrap().str_attr("content"),
            Some("<a href=\"/\">Home</a> <a href=\"nowhere\">?</a>")
        );
        // one unresolved token plus the failed page
        assert_eq!(diag.counts().errors, 2);
    }

    #[test]
    fn test_registry_respects_scope() {
        let config = Config::with_base(Path::new("/site"));
        let mut ctx = context(&config);
        let diag = Diagnostics::new();

        TransformRegistry::new().apply_all(
            &mut ctx,
            &config,
            &BuildScope::Pages(vec!["./a.png".to_owned()]),
            &diag,
        );

        assert_eq!(
            ctx.graph.get("./a.png").unwrap().str_attr("alt"),
            Some("/ logo")
        );
        assert!(
            ctx.graph
                .get("./post.md")
                .unwrap()
                .str_attr("content")
                .unwrap()
                .contains("@id:home")
        );
        assert_eq!(diag.counts().errors, 0);
    }
}
