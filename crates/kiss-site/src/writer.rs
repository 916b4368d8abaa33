//! Output writers, one per [`OutputType`].
//!
//! Pages are written in parallel. Pages excluded from writing, without a
//! permalink, or with `SKIP` output are skipped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use kiss_config::{Config, OutputType};
use kiss_storage::{Storage, StorageError};
use rayon::prelude::*;

use crate::context::BuildContext;
use crate::diagnostics::Diagnostics;
use crate::graph::BuildScope;
use crate::page::Page;

/// Error writing one page.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Page '{page}' has no outputPath")]
    MissingOutputPath { page: String },
}

/// Writes pages of one output type.
pub trait Writer: Send + Sync {
    fn name(&self) -> &'static str;

    fn output_type(&self) -> OutputType;

    /// Write `page`, returning the path written, `None` when there was
    /// nothing to write.
    fn write(
        &self,
        page: &Page,
        storage: &dyn Storage,
        config: &Config,
    ) -> Result<Option<PathBuf>, WriteError>;
}

fn output_path(page: &Page) -> Result<PathBuf, WriteError> {
    page.str_attr("outputPath")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| WriteError::MissingOutputPath {
            page: page.id().to_owned(),
        })
}

/// Writes the rendered `html` attribute, or `content` when no template
/// rendered the page.
#[derive(Debug, Default)]
pub struct HtmlWriter;

impl Writer for HtmlWriter {
    fn name(&self) -> &'static str {
        "html"
    }

    fn output_type(&self) -> OutputType {
        OutputType::Html
    }

    fn write(
        &self,
        page: &Page,
        storage: &dyn Storage,
        _config: &Config,
    ) -> Result<Option<PathBuf>, WriteError> {
        let Some(html) = page.str_attr("html").or_else(|| page.str_attr("content")) else {
            tracing::warn!(page = %page.id(), "Page has no html content, skipping write");
            return Ok(None);
        };
        let path = output_path(page)?;
        storage.write(&path, html.as_bytes())?;
        Ok(Some(path))
    }
}

/// Copies the input file to the output path.
#[derive(Debug)]
pub struct StaticWriter {
    output_type: OutputType,
}

impl StaticWriter {
    #[must_use]
    pub fn new(output_type: OutputType) -> Self {
        Self { output_type }
    }
}

impl Writer for StaticWriter {
    fn name(&self) -> &'static str {
        "static"
    }

    fn output_type(&self) -> OutputType {
        self.output_type
    }

    fn write(
        &self,
        page: &Page,
        storage: &dyn Storage,
        _config: &Config,
    ) -> Result<Option<PathBuf>, WriteError> {
        let path = output_path(page)?;
        storage.copy(&page.meta.input_path, &path)?;
        Ok(Some(path))
    }
}

/// Writers by output type.
pub struct WriterRegistry {
    writers: HashMap<OutputType, Box<dyn Writer>>,
}

impl std::fmt::Debug for WriterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.writers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("WriterRegistry").field("writers", &types).finish()
    }
}

impl Default for WriterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(HtmlWriter);
        registry.register(StaticWriter::new(OutputType::Static));
        registry.register(StaticWriter::new(OutputType::Image));
        registry
    }
}

/// Outcome of [`WriterRegistry::write_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WriterRegistry {
    /// Registry with the HTML and static writers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            writers: HashMap::new(),
        }
    }

    /// Register a writer, replacing the writer of the same output type.
    pub fn register(&mut self, writer: impl Writer + 'static) {
        self.writers.insert(writer.output_type(), Box::new(writer));
    }

    #[must_use]
    pub fn get(&self, output_type: OutputType) -> Option<&dyn Writer> {
        self.writers.get(&output_type).map(AsRef::as_ref)
    }

    /// Write the pages of `scope` in parallel.
    pub fn write_all(
        &self,
        ctx: &BuildContext,
        config: &Config,
        storage: &dyn Storage,
        scope: &BuildScope,
        diag: &Diagnostics,
    ) -> WriteReport {
        let ids = scope.ids(&ctx.graph);
        tracing::info!(pages = ids.len(), public = %config.dirs_resolved.public.display(), "Writing pages");
        let written = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        ids.par_iter()
            .filter_map(|id| ctx.graph.get(id))
            .for_each(|page| {
                let counter = match self.write_page(page, storage, config, diag) {
                    Ok(true) => &written,
                    Ok(false) => &skipped,
                    Err(e) => {
                        tracing::error!(page = %page.id(), path = %page.meta.input_path.display(), error = %e, "Error writing page");
                        diag.error();
                        &failed
                    }
                };
                counter.fetch_add(1, Ordering::Relaxed);
            });

        WriteReport {
            written: written.into_inner(),
            skipped: skipped.into_inner(),
            failed: failed.into_inner(),
        }
    }

    fn write_page(
        &self,
        page: &Page,
        storage: &dyn Storage,
        config: &Config,
        diag: &Diagnostics,
    ) -> Result<bool, WriteError> {
        if page.is_excluded_from_write() {
            tracing::trace!(page = %page.id(), "Page is excluded from write");
            return Ok(false);
        }
        if page.permalink().is_none_or(str::is_empty) {
            tracing::trace!(page = %page.id(), "Page has no permalink");
            return Ok(false);
        }
        if page.meta.output_type == OutputType::Skip {
            return Ok(false);
        }
        let Some(writer) = self.get(page.meta.output_type) else {
            tracing::warn!(
                page = %page.id(),
                output_type = %page.meta.output_type,
                "No writer for output type"
            );
            diag.warning();
            return Ok(false);
        };
        let path = writer.write(page, storage, config)?;
        if let Some(path) = &path {
            tracing::debug!(writer = writer.name(), path = %path.display(), "Wrote page");
        }
        Ok(path.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use kiss_storage::MockStorage;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn page(id: &str, output_type: OutputType, attrs: &[(&str, Value)]) -> Page {
        let mut page = Page::new(id);
        page.meta.output_type = output_type;
        page.meta.input_path = PathBuf::from(format!("/site/content/{}", id.trim_start_matches("./")));
        for (key, value) in attrs {
            page.attributes.insert((*key).to_owned(), value.clone());
        }
        page
    }

    fn context() -> BuildContext {
        let mut ctx = BuildContext::default();
        ctx.graph.insert(page(
            "./about.md",
            OutputType::Html,
            &[
                ("permalink", Value::from("/about")),
                ("outputPath", Value::from("/site/public/about.html")),
                ("content", Value::from("<p>About</p>")),
            ],
        ));
        ctx.graph.insert(page(
            "./rendered.md",
            OutputType::Html,
            &[
                ("permalink", Value::from("/rendered")),
                ("outputPath", Value::from("/site/public/rendered.html")),
                ("content", Value::from("raw")),
                ("html", Value::from("<html>rendered</html>")),
            ],
        ));
        ctx.graph.insert(page(
            "./logo.png",
            OutputType::Image,
            &[
                ("permalink", Value::from("/logo.png")),
                ("outputPath", Value::from("/site/public/logo.png")),
            ],
        ));
        ctx.graph.insert(page(
            "./draft.md",
            OutputType::Html,
            &[
                ("permalink", Value::from("/draft")),
                ("outputPath", Value::from("/site/public/draft.html")),
                ("content", Value::from("draft")),
                ("excludeFromWrite", Value::from(true)),
            ],
        ));
        ctx.graph.insert(page(
            "./nolink.md",
            OutputType::Html,
            &[("content", Value::from("x"))],
        ));
        ctx.graph.insert(page(
            "./skip.json",
            OutputType::Skip,
            &[("permalink", Value::from("/skip"))],
        ));
        ctx
    }

    #[test]
    fn test_write_all_skips_and_writes() {
        let ctx = context();
        let config = Config::with_base(Path::new("/site"));
        let storage = MockStorage::new().with_file("/site/content/logo.png", "PNG");
        let diag = Diagnostics::new();

        let report = WriterRegistry::new().write_all(&ctx, &config, &storage, &BuildScope::All, &diag);

        assert_eq!(
            report,
            WriteReport {
                written: 3,
                skipped: 3,
                failed: 0
            }
        );
        assert_eq!(
            storage.written("/site/public/about.html").as_deref(),
            Some("<p>About</p>")
        );
        assert_eq!(
            storage.written("/site/public/rendered.html").as_deref(),
            Some("<html>rendered</html>")
        );
        assert_eq!(storage.written("/site/public/logo.png").as_deref(), Some("PNG"));
        assert!(storage.written("/site/public/draft.html").is_none());
        assert_eq!(diag.counts(), crate::diagnostics::DiagnosticCounts::default());
    }

    #[test]
    fn test_write_failures_are_counted() {
        let mut ctx = BuildContext::default();
        ctx.graph.insert(page(
            "./missing.png",
            OutputType::Static,
            &[
                ("permalink", Value::from("/missing.png")),
                ("outputPath", Value::from("/site/public/missing.png")),
            ],
        ));
        ctx.graph.insert(page(
            "./nopath.md",
            OutputType::Html,
            &[("permalink", Value::from("/nopath")), ("content", Value::from("x"))],
        ));
        let config = Config::with_base(Path::new("/site"));
        let diag = Diagnostics::new();

        let report = WriterRegistry::new().write_all(
            &ctx,
            &config,
            &MockStorage::new(),
            &BuildScope::All,
            &diag,
        );

        assert_eq!(report.failed, 2);
        assert_eq!(diag.counts().errors, 2);
    }

    #[test]
    fn test_scope_limits_writes() {
        let ctx = context();
        let config = Config::with_base(Path::new("/site"));
        let storage = MockStorage::new();
        let diag = Diagnostics::new();

        let report = WriterRegistry::new().write_all(
            &ctx,
            &config,
            &storage,
            &BuildScope::Pages(vec!["./about.md".to_owned()]),
            &diag,
        );

        assert_eq!(report.written, 1);
        assert_eq!(storage.written_paths(), vec![PathBuf::from("/site/public/about.html")]);
    }

    #[test]
    fn test_missing_writer_is_a_warning() {
        let ctx = context();
        let config = Config::with_base(Path::new("/site"));
        let diag = Diagnostics::new();
        let mut registry = WriterRegistry::empty();
        registry.register(HtmlWriter);

        let report = registry.write_all(&ctx, &config, &MockStorage::new(), &BuildScope::All, &diag);

        assert_eq!(report.written, 2);
        assert_eq!(diag.counts().warnings, 1);
    }
}
