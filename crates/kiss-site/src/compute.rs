//! Fixed-point evaluation of deferred page attributes.
//!
//! Every round visits each page in scope once. A deferred value is evaluated
//! when none of its dependencies is still deferred; otherwise it waits for a
//! later round. The result of each page is written back before the next page
//! is visited, so a round sees the values computed earlier in the same round.

use kiss_config::Config;

use crate::cascade::NO_CASCADE_SUFFIX;
use crate::context::BuildContext;
use crate::deferred::{Deferred, Dependency};
use crate::diagnostics::Diagnostics;
use crate::graph::{BuildScope, PageGraph};
use crate::page::Page;
use crate::value::{Object, Value};

/// What a deferred computation can see.
#[derive(Clone, Copy, Debug)]
pub struct ComputeContext<'a> {
    pub config: &'a Config,
    /// Context data (`site`, data views).
    pub data: &'a Object,
    /// Every page, as of the current round.
    pub graph: &'a PageGraph,
}

/// Error reported by a deferred computation.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// A value the computation requires is absent.
    #[error("Missing value: {0}")]
    Missing(String),
    /// A value has an unexpected shape.
    #[error("Invalid value at {path}: {message}")]
    Invalid { path: String, message: String },
}

/// An attribute left deferred when the round limit was reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedAttribute {
    pub page: String,
    /// Dot-separated attribute path.
    pub path: String,
}

/// Outcome of [`compute_all_pages`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComputeReport {
    /// Rounds run.
    pub rounds: usize,
    /// Pending dependencies left after the last round.
    pub pending: usize,
    /// Attributes still deferred, empty when everything converged.
    pub unresolved: Vec<UnresolvedAttribute>,
}

impl ComputeReport {
    #[must_use]
    pub fn converged(&self) -> bool {
        self.pending == 0
    }
}

/// Evaluate deferred attributes of the pages in `scope` until none is
/// pending or `defaults.max_computing_rounds` is exceeded.
///
/// Running out of rounds is logged once and counted as an error; the
/// remaining attributes stay deferred.
pub fn compute_all_pages(
    ctx: &mut BuildContext,
    config: &Config,
    scope: &BuildScope,
    diag: &Diagnostics,
) -> ComputeReport {
    let ids = scope.ids(&ctx.graph);
    let max_rounds = config.defaults.max_computing_rounds;
    let mut round = 1;

    loop {
        let mut pending_total = 0;
        for id in &ids {
            let computed = {
                let Some(page) = ctx.graph.get(id) else {
                    continue;
                };
                if !page.has_deferred() {
                    continue;
                }
                let compute_ctx = ComputeContext {
                    config,
                    data: &ctx.data,
                    graph: &ctx.graph,
                };
                let mut evaluator = Evaluator {
                    page,
                    ctx: &compute_ctx,
                    diag,
                    pending: 0,
                };
                let attributes = evaluator.object(&page.attributes, "");
                (attributes, evaluator.pending)
            };
            let (attributes, pending) = computed;
            if let Some(page) = ctx.graph.get_mut(id) {
                page.attributes = attributes;
            }
            pending_total += pending;
        }

        if pending_total == 0 {
            tracing::debug!(round, "All data points computed");
            return ComputeReport {
                rounds: round,
                pending: 0,
                unresolved: Vec::new(),
            };
        }
        if round + 1 > max_rounds {
            let unresolved = unresolved_attributes(&ctx.graph, &ids);
            let names: Vec<String> = unresolved
                .iter()
                .map(|u| format!("{}#{}", u.page, u.path))
                .collect();
            tracing::error!(
                rounds = max_rounds,
                pending = pending_total,
                unresolved = ?names,
                "Could not compute all data. Check for circular dependencies or increase defaults.max_computing_rounds"
            );
            diag.error();
            return ComputeReport {
                rounds: round,
                pending: pending_total,
                unresolved,
            };
        }
        tracing::debug!(round, pending = pending_total, "Data points not computed yet, new round");
        round += 1;
    }
}

/// Count the dependencies of `deps` that are not computed yet.
///
/// A path counts 1 when its value is or contains a deferred value; a missing
/// value counts 0. A chained dependency reads its `via` path: an array is a
/// list of page ids, a string is a single page id, and a deferred value
/// counts 1.
#[must_use]
pub fn count_pending(page: &Page, graph: &PageGraph, deps: &[Dependency]) -> usize {
    deps.iter()
        .map(|dep| match dep {
            Dependency::Path(path) => {
                usize::from(page.get(path).is_some_and(|v| v.contains_deferred()))
            }
            Dependency::Chained { via, then } => match page.get(via).as_deref() {
                Some(Value::Array(ids)) => ids
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|id| graph.get(id))
                    .map(|other| count_pending(other, graph, then))
                    .sum(),
                Some(Value::Deferred(_)) => 1,
                Some(Value::String(id)) => graph
                    .get(id)
                    .map_or(0, |other| count_pending(other, graph, then)),
                _ => 0,
            },
        })
        .sum()
}

struct Evaluator<'a, 'c> {
    /// Page as of the start of its evaluation.
    page: &'a Page,
    ctx: &'a ComputeContext<'c>,
    diag: &'a Diagnostics,
    pending: usize,
}

impl Evaluator<'_, '_> {
    fn object(&mut self, data: &Object, prefix: &str) -> Object {
        let mut out = data.clone();
        for (key, value) in data {
            let target = if let Some(base) = key.strip_suffix(NO_CASCADE_SUFFIX) {
                base
            } else if data.contains_key(&format!("{key}{NO_CASCADE_SUFFIX}")) {
                continue;
            } else {
                key.as_str()
            };
            let path = join(prefix, target);
            let computed = self.value(value, &path);
            if target != key.as_str() {
                out.insert(key.clone(), computed.clone());
            }
            out.insert(target.to_owned(), computed);
        }
        out
    }

    fn value(&mut self, value: &Value, path: &str) -> Value {
        match value {
            Value::Deferred(deferred) => self.deferred(deferred, path),
            Value::Object(map) => Value::Object(self.object(map, path)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.value(item, &join(path, &i.to_string())))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn deferred(&mut self, deferred: &Deferred, path: &str) -> Value {
        let pending = count_pending(self.page, self.ctx.graph, deferred.dependencies());
        if pending > 0 {
            self.pending += pending;
            return Value::Deferred(deferred.clone());
        }
        match deferred.evaluate(self.page, self.ctx) {
            Ok(value) => {
                if value.is_deferred() {
                    self.pending += 1;
                }
                value
            }
            Err(e) => {
                tracing::error!(
                    page = %self.page.id(),
                    attribute = %path,
                    compute = %deferred.name(),
                    error = %e,
                    "Error computing page data"
                );
                self.diag.error();
                Value::Null
            }
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn unresolved_attributes(graph: &PageGraph, ids: &[String]) -> Vec<UnresolvedAttribute> {
    fn walk(value: &Value, path: &str, page: &str, out: &mut Vec<UnresolvedAttribute>) {
        match value {
            Value::Deferred(_) => out.push(UnresolvedAttribute {
                page: page.to_owned(),
                path: path.to_owned(),
            }),
            Value::Object(map) => {
                for (key, item) in map {
                    walk(item, &join(path, key), page, out);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    walk(item, &join(path, &i.to_string()), page, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    for page in ids.iter().filter_map(|id| graph.get(id)) {
        for (key, value) in &page.attributes {
            walk(value, key, page.id(), &mut out);
        }
    }
    out
}
