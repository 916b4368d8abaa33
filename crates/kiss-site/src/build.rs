//! Build orchestration.
//!
//! [`Builder::build`] runs the phases enabled by the planner, in order:
//!
//! 1. `load_libs` and `pre_load` hooks
//! 2. content loading (parallel reads, then sequential cascade)
//! 3. `post_load` hooks
//! 4. linking and dynamic data computation
//! 5. collection sorting and page indexes
//! 6. data views
//! 7. transforms
//! 8. writing (parallel)
//! 9. `post_write` hooks
//!
//! Only configuration and content listing failures abort a build. Everything
//! else is logged, counted in [`Diagnostics`], and skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kiss_config::{CliSettings, Config, ConfigError};
use kiss_storage::{SourceFile, Storage, StorageError, StorageEventKind};
use rayon::prelude::*;

use crate::cascade::{self, absolutize_file_references, sort_source_files};
use crate::compute::{ComputeReport, compute_all_pages};
use crate::computed::{COLLECTION_HANDLER, load_computed_collection};
use crate::context::{BuildContext, site_data};
use crate::defaults::default_attributes;
use crate::diagnostics::{DiagnosticCounts, Diagnostics};
use crate::graph::{LoadedFile, PageGraph};
use crate::hooks::{Hook, HookPhase, HookRegistry};
use crate::index::PageIndexes;
use crate::loader::{
    LoadError, LoaderInput, LoaderRegistry, compile_patterns, configured_output_type,
    find_matching_loader,
};
use crate::planner::{BuildFlags, PlanRequest, plan_build};
use crate::transform::{Transform, TransformRegistry};
use crate::value::Object;
use crate::views::{DataView, DataViewRegistry};
use crate::writer::{WriteReport, Writer, WriterRegistry};

/// What triggered a build.
pub type BuildRequest = PlanRequest;

/// Fatal build error.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to list content: {0}")]
    Storage(#[from] StorageError),
}

/// Result of a build.
#[derive(Debug)]
pub struct BuildOutcome {
    /// Input of the next incremental build.
    pub context: BuildContext,
    pub summary: BuildSummary,
}

/// What a build did.
#[derive(Clone, Debug, Default)]
pub struct BuildSummary {
    pub flags: BuildFlags,
    pub compute: ComputeReport,
    pub writes: WriteReport,
    pub diagnostics: DiagnosticCounts,
}

/// A file about to be loaded.
#[derive(Clone, Debug)]
struct PendingFile {
    path: PathBuf,
    loader_id: usize,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl PendingFile {
    fn new(file: SourceFile, loader_id: usize) -> Self {
        Self {
            path: file.path,
            loader_id,
            created: file.created,
            modified: file.modified,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Unknown loader handler '{0}'")]
    UnknownHandler(String),
}

/// Sequences the build phases over a storage backend.
pub struct Builder {
    config: Config,
    cli: Option<CliSettings>,
    storage: Arc<dyn Storage>,
    loaders: LoaderRegistry,
    transforms: TransformRegistry,
    writers: WriterRegistry,
    views: DataViewRegistry,
    hooks: HookRegistry,
    /// Hooks registered in code, kept across configuration reloads.
    extra_hooks: Vec<(HookPhase, Hook)>,
    /// Errors found while setting up, reported by the next build.
    setup: Diagnostics,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("config_path", &self.config.config_path)
            .field("loaders", &self.loaders)
            .field("transforms", &self.transforms)
            .field("writers", &self.writers)
            .field("views", &self.views)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// Builder with the built-in loaders, transforms, writers and views and
    /// the hooks declared in `config`.
    #[must_use]
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Self {
        let setup = Diagnostics::new();
        let hooks = HookRegistry::from_config(&config.hooks, &setup);
        Self {
            config,
            cli: None,
            storage,
            loaders: LoaderRegistry::new(),
            transforms: TransformRegistry::new(),
            writers: WriterRegistry::new(),
            views: DataViewRegistry::new(),
            hooks,
            extra_hooks: Vec::new(),
            setup,
        }
    }

    /// CLI settings re-applied when the configuration is reloaded.
    #[must_use]
    pub fn with_cli_settings(mut self, cli: CliSettings) -> Self {
        self.cli = Some(cli);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn register_loader(&mut self, loader: impl crate::loader::Loader + 'static) {
        self.loaders.register(loader);
    }

    pub fn register_transform(&mut self, transform: impl Transform + 'static) {
        self.transforms.register(transform);
    }

    pub fn register_writer(&mut self, writer: impl Writer + 'static) {
        self.writers.register(writer);
    }

    pub fn register_view(&mut self, attribute: impl Into<String>, view: impl DataView + 'static) {
        self.views.register(attribute, view);
    }

    pub fn register_hook(&mut self, phase: HookPhase, hook: Hook) {
        self.hooks.register(phase, hook.clone());
        self.extra_hooks.push((phase, hook));
    }

    /// Run one build.
    ///
    /// `previous` is the context returned by the last build; pass `None`
    /// for the first one.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] if the configuration cannot be reloaded or the
    /// content directory cannot be listed.
    pub fn build(
        &mut self,
        request: &BuildRequest,
        previous: Option<BuildContext>,
    ) -> Result<BuildOutcome, BuildError> {
        let start = Instant::now();
        let diag = Diagnostics::new();
        diag.errors(self.setup.drain().errors);
        let mut previous = previous;

        let reload = request.incremental
            && request
                .file
                .as_deref()
                .is_some_and(|file| self.config.is_config_file(file));
        if reload {
            self.reload_config(&diag)?;
            previous = None;
        }

        let mut flags = plan_build(request, &self.config, &self.hooks, previous.as_ref());
        flags.reload_config |= reload;
        if !flags.has_work() {
            tracing::debug!(event = ?request.event, "Nothing to rebuild");
            return Ok(BuildOutcome {
                context: previous.unwrap_or_else(|| BuildContext::new(&self.config)),
                summary: BuildSummary {
                    flags,
                    diagnostics: diag.drain(),
                    ..BuildSummary::default()
                },
            });
        }

        let mut ctx = previous.unwrap_or_else(|| BuildContext::new(&self.config));
        ctx.version = flags.version;
        if flags.content && !flags.is_partial() {
            ctx.graph = PageGraph::new(self.config.dirs_resolved.content.clone());
            ctx.data = site_data(&self.config);
            ctx.indexes = None;
        }
        let changed = if flags.incremental { flags.file.clone() } else { None };
        let changed = changed.as_deref();
        let scope = flags.scope();

        if flags.load_libs {
            self.run_hooks(HookPhase::LoadLibs, &mut ctx, changed, &diag);
        }
        if flags.pre_load {
            self.run_hooks(HookPhase::PreLoad, &mut ctx, changed, &diag);
        }
        if flags.content {
            self.load_content(&mut ctx, &flags, &diag)?;
        }
        if flags.post_load {
            self.run_hooks(HookPhase::PostLoad, &mut ctx, changed, &diag);
        }

        let mut compute = ComputeReport::default();
        if flags.dynamic_data {
            ctx.graph.link();
            compute = compute_all_pages(&mut ctx, &self.config, &scope, &diag);
            ctx.graph.sort_collections(&self.config.defaults.sort_collection_by);
            self.update_indexes(&mut ctx, &flags);
        } else if ctx.indexes.is_none() {
            self.update_indexes(&mut ctx, &flags);
        }
        if flags.data_views {
            self.views.compute_all(&mut ctx, &self.config, &diag);
        }
        if flags.transform {
            self.transforms.apply_all(&mut ctx, &self.config, &scope, &diag);
        }
        let mut writes = WriteReport::default();
        if flags.write {
            writes = self
                .writers
                .write_all(&ctx, &self.config, self.storage.as_ref(), &scope, &diag);
        }
        if flags.post_write {
            self.run_hooks(HookPhase::PostWrite, &mut ctx, changed, &diag);
        }

        let diagnostics = diag.drain();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if diagnostics.has_errors() {
            tracing::error!(
                errors = diagnostics.errors,
                warnings = diagnostics.warnings,
                elapsed_ms,
                "Build completed with errors"
            );
        } else {
            tracing::info!(
                pages = ctx.graph.len(),
                written = writes.written,
                warnings = diagnostics.warnings,
                elapsed_ms,
                "Build completed"
            );
        }

        Ok(BuildOutcome {
            context: ctx,
            summary: BuildSummary {
                flags,
                compute,
                writes,
                diagnostics,
            },
        })
    }

    fn reload_config(&mut self, diag: &Diagnostics) -> Result<(), BuildError> {
        tracing::info!(path = ?self.config.config_path, "Reloading configuration");
        let config = Config::load(self.config.config_path.as_deref(), self.cli.as_ref())?;
        let mut hooks = HookRegistry::from_config(&config.hooks, diag);
        for (phase, hook) in &self.extra_hooks {
            hooks.register(*phase, hook.clone());
        }
        self.config = config;
        self.hooks = hooks;
        Ok(())
    }

    fn run_hooks(
        &self,
        phase: HookPhase,
        ctx: &mut BuildContext,
        changed: Option<&Path>,
        diag: &Diagnostics,
    ) {
        tracing::info!(phase = %phase, "Running hooks");
        self.hooks
            .run(phase, ctx, &self.config, self.storage.as_ref(), changed, diag);
    }

    fn update_indexes(&self, ctx: &mut BuildContext, flags: &BuildFlags) {
        if !self.config.defaults.enable_page_indexes {
            ctx.indexes = None;
            return;
        }
        let default_lang = self.config.site.default_language();
        match ctx.indexes.as_mut() {
            Some(indexes) if flags.is_partial() => {
                indexes.patch(&ctx.graph, &flags.build_page_ids);
            }
            _ => ctx.indexes = Some(PageIndexes::build(&ctx.graph, default_lang)),
        }
    }

    /// Load the files of a full build, or re-load the input sources of the
    /// pages a partial build targets.
    fn load_content(
        &self,
        ctx: &mut BuildContext,
        flags: &BuildFlags,
        diag: &Diagnostics,
    ) -> Result<(), BuildError> {
        let mut files = if flags.is_partial() {
            let files = self.files_to_reload(ctx, flags);
            tracing::info!(files = files.len(), "Reloading files");
            files
        } else {
            let files = self.list_content()?;
            tracing::info!(
                files = files.len(),
                content = %self.config.dirs_resolved.content.display(),
                "Loading content"
            );
            files
        };
        sort_source_files(&mut files, |f| f.path.as_path());

        let loaded: Vec<(PendingFile, Result<Object, ReadError>)> = files
            .into_par_iter()
            .map(|file| {
                let overlay = self.read_file(&file);
                (file, overlay)
            })
            .collect();

        let defaults = default_attributes();
        let content_dir = self.config.dirs_resolved.content.clone();
        for (file, overlay) in loaded {
            let loader = &self.config.loaders[file.loader_id];
            let mut overlay = match overlay {
                Ok(overlay) => overlay,
                Err(e) => {
                    tracing::error!(loader = %loader.handler, path = %file.path.display(), error = %e, "Error loading file");
                    diag.error();
                    continue;
                }
            };
            ctx.graph
                .ensure_directories(&file.path, &defaults, flags.version, diag);

            let page_dir = file
                .path
                .parent()
                .and_then(|dir| dir.strip_prefix(&content_dir).ok())
                .map(|dir| format!("/{}", dir.to_string_lossy()))
                .unwrap_or_default();
            for reference in absolutize_file_references(&mut overlay, &page_dir) {
                let target = content_dir.join(reference.trim_start_matches('/'));
                if !self.storage.exists(&target) {
                    tracing::warn!(path = %file.path.display(), reference = %reference, "@file reference points to a missing file");
                    diag.warning();
                }
            }

            let loaded = LoadedFile {
                path: file.path.clone(),
                loader_id: Some(file.loader_id),
                output_type: configured_output_type(loader),
                created: Some(file.created),
                modified: Some(file.modified),
            };
            if ctx
                .graph
                .insert_loaded(&loaded, overlay, flags.version, diag)
                .is_some()
            {
                tracing::trace!(loader = %loader.handler, path = %file.path.display(), "Loaded");
            }
        }
        if !flags.is_partial() {
            self.load_computed(ctx, flags, diag);
        }
        Ok(())
    }

    /// Run the active computed loaders over the loaded pages.
    fn load_computed(&self, ctx: &mut BuildContext, flags: &BuildFlags, diag: &Diagnostics) {
        for loader in self.config.loaders.iter().filter(|l| l.active && l.is_computed()) {
            if loader.handler != COLLECTION_HANDLER {
                tracing::error!(handler = %loader.handler, "Unknown computed loader handler");
                diag.error();
                continue;
            }
            match &loader.description {
                Some(description) => tracing::info!("{description}"),
                None => tracing::info!(handler = %loader.handler, "Loading computed pages"),
            }
            load_computed_collection(&mut ctx.graph, loader, flags.version, diag);
        }
    }

    /// Every file matched by an active loader.
    fn list_content(&self) -> Result<Vec<PendingFile>, BuildError> {
        let content_dir = &self.config.dirs_resolved.content;
        let mut files = Vec::new();
        for (loader_id, loader) in self.config.loaders.iter().enumerate() {
            if !loader.active || loader.is_computed() {
                tracing::debug!(loader = %loader.handler, "Not a file loader or not active, skipping");
                continue;
            }
            let patterns = compile_patterns(&loader.patterns);
            if patterns.is_empty() {
                continue;
            }
            tracing::debug!(loader = %loader.handler, patterns = ?loader.patterns, "Listing files");
            files.extend(
                self.storage
                    .list(content_dir, &patterns)?
                    .into_iter()
                    .map(|file| PendingFile::new(file, loader_id)),
            );
        }
        Ok(files)
    }

    /// Input files of the pages in `flags.build_page_ids`, plus the new file
    /// of a `Created` event. Collected before the graph changes.
    fn files_to_reload(&self, ctx: &BuildContext, flags: &BuildFlags) -> Vec<PendingFile> {
        let content_dir = &self.config.dirs_resolved.content;
        let new_page = flags
            .content_file
            .as_deref()
            .filter(|_| flags.event == Some(StorageEventKind::Created))
            .and_then(|file| {
                let loader_id = find_matching_loader(&self.config, file)?;
                let output_type = configured_output_type(&self.config.loaders[loader_id]);
                let ids = cascade::canonical_ids(file, content_dir, output_type)?;
                Some((ids.id, file, loader_id))
            });

        let mut files = Vec::new();
        for id in &flags.build_page_ids {
            match ctx.graph.get(id) {
                Some(page) => {
                    for source in &page.meta.input_sources {
                        if let Some(loader_id) = source.loader_id {
                            files.extend(self.stat(&source.path, loader_id));
                        }
                    }
                }
                None => match &new_page {
                    Some((new_id, file, loader_id)) if new_id == id => {
                        files.extend(self.stat(file, *loader_id));
                    }
                    _ => tracing::warn!(page = %id, "Page not found, skipping"),
                },
            }
        }
        files
    }

    /// The listing entry of one file, `None` if it is gone.
    fn stat(&self, path: &Path, loader_id: usize) -> Option<PendingFile> {
        let content_dir = &self.config.dirs_resolved.content;
        let relative = path.strip_prefix(content_dir).ok()?;
        let pattern = glob::Pattern::new(&glob::Pattern::escape(&relative.to_string_lossy())).ok()?;
        match self.storage.list(content_dir, &[pattern]) {
            Ok(listed) => listed
                .into_iter()
                .find(|f| f.path == path)
                .map(|f| PendingFile::new(f, loader_id)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to stat file");
                None
            }
        }
    }

    /// Read and parse one file.
    fn read_file(&self, file: &PendingFile) -> Result<Object, ReadError> {
        let options = &self.config.loaders[file.loader_id];
        let loader = self
            .loaders
            .get(&options.handler)
            .ok_or_else(|| ReadError::UnknownHandler(options.handler.clone()))?;
        let content = if loader.reads_content() {
            Some(self.storage.read(&file.path)?)
        } else {
            None
        };
        let overlay = loader.load(&LoaderInput {
            path: &file.path,
            content: content.as_deref(),
            options,
            config: &self.config,
        })?;
        Ok(overlay)
    }
}
