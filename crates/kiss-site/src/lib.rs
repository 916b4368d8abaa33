//! Content graph engine for the kiss static site generator.
//!
//! This crate provides:
//! - [`PageGraph`]: pages keyed by canonical id, with cascading attributes
//!   from directories to their children, plus computed collection pages
//!   ([`load_computed_collection`])
//! - Deferred attributes ([`Deferred`]) computed in dependency order by
//!   [`compute_all_pages`]
//! - [`PageIndexes`] and [`Lookup`] for permalink, id and input path lookups
//! - `@kind:value` reference resolution ([`ReferenceResolver`])
//! - [`plan_build`]: which phases and pages a change needs to rebuild
//! - [`Builder`]: the build pipeline over a [`kiss_storage::Storage`]
//!   backend, and [`RebuildSession`] to serialize watch-mode rebuilds
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::path::Path;
//! use std::sync::Arc;
//! use kiss_config::Config;
//! use kiss_site::{Builder, PlanRequest};
//! use kiss_storage::FsStorage;
//!
//! let config = Config::load(Some(Path::new("kiss.toml")), None)?;
//! let mut builder = Builder::new(config, Arc::new(FsStorage::new()));
//!
//! let outcome = builder.build(&PlanRequest::full(), None)?;
//! println!("{} pages", outcome.context.graph.len());
//! # Ok(())
//! # }
//! ```

mod build;
mod cascade;
mod compute;
mod computed;
mod context;
mod defaults;
mod deferred;
mod diagnostics;
mod graph;
mod hooks;
mod index;
mod loader;
mod page;
mod planner;
mod references;
mod session;
mod transform;
mod value;
mod views;
mod writer;

pub use build::{BuildError, BuildOutcome, BuildRequest, BuildSummary, Builder};
pub use cascade::{CanonicalIds, canonical_ids};
pub use compute::{ComputeContext, ComputeError, ComputeReport, UnresolvedAttribute, compute_all_pages};
pub use computed::{COLLECTION_HANDLER, load_computed_collection};
pub use context::BuildContext;
pub use defaults::{default_attributes, slugify, unslugify};
pub use deferred::{ComputeFn, Deferred, Dependency};
pub use diagnostics::{DiagnosticCounts, Diagnostics};
pub use graph::{BuildScope, LoadedFile, PageGraph};
pub use hooks::{
    Hook, HookAction, HookError, HookFn, HookPhase, HookRegistry, IncrementalPredicate,
};
pub use index::{Lookup, PageIndexes};
pub use loader::{
    JsonLoader, LoadError, Loader, LoaderInput, LoaderRegistry, MarkdownLoader, StaticLoader,
    TextLoader, parse_date,
};
pub use page::{InputSource, Page, PageMeta};
pub use planner::{BuildFlags, PlanRequest, plan_build};
pub use references::{ReferenceError, ReferenceResolver, Resolution, ResolveMode};
pub use session::RebuildSession;
pub use transform::{ReferenceTransform, Transform, TransformError, TransformRegistry};
pub use value::{Object, Value, set_path};
pub use views::{Categories, Collections, DataView, DataViewRegistry, SiteLastUpdated};
pub use writer::{HtmlWriter, StaticWriter, WriteError, WriteReport, Writer, WriterRegistry};
