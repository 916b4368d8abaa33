//! Build hooks, grouped by the phase they run in.
//!
//! Hooks come from `[hooks]` in `kiss.toml` (`copy` and `exec` actions) or
//! are registered in code as [`HookAction::Run`] closures. A failing hook is
//! logged and counted; the build goes on.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use kiss_config::{Config, HookConfig, HooksConfig};
use kiss_storage::{Storage, StorageError};

use crate::context::BuildContext;
use crate::diagnostics::Diagnostics;
use crate::loader::compile_patterns;

/// Build phase a hook runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before anything else.
    LoadLibs,
    /// Before content loading.
    PreLoad,
    /// After content loading, before computation.
    PostLoad,
    /// After all pages are written.
    PostWrite,
}

impl HookPhase {
    pub const ALL: [Self; 4] = [Self::LoadLibs, Self::PreLoad, Self::PostLoad, Self::PostWrite];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadLibs => "loadLibs",
            Self::PreLoad => "preLoad",
            Self::PostLoad => "postLoad",
            Self::PostWrite => "postWrite",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Command '{command}' failed: {message}")]
    Exec { command: String, message: String },
    #[error("{0}")]
    Failed(String),
}

/// Closure run by [`HookAction::Run`].
pub type HookFn = dyn Fn(&mut BuildContext, &Config) -> Result<(), HookError> + Send + Sync;

/// Decides whether a hook runs for the file changed in an incremental build.
pub type IncrementalPredicate = dyn Fn(&Path, &BuildContext) -> bool + Send + Sync;

/// What a hook does.
#[derive(Clone)]
pub enum HookAction {
    /// Copy `from` to `to` below the public directory.
    Copy { from: PathBuf, to: PathBuf },
    /// Run a shell command.
    Exec { command: String },
    /// Run a closure over the build context.
    Run(Arc<HookFn>),
}

impl fmt::Debug for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { from, to } => f
                .debug_struct("Copy")
                .field("from", from)
                .field("to", to)
                .finish(),
            Self::Exec { command } => f.debug_struct("Exec").field("command", command).finish(),
            Self::Run(_) => f.write_str("Run(..)"),
        }
    }
}

/// A hook and the conditions it runs under.
#[derive(Clone)]
pub struct Hook {
    pub action: HookAction,
    pub description: Option<String>,
    /// Hooks without a predicate are skipped by incremental builds.
    pub incremental_rebuild: Option<Arc<IncrementalPredicate>>,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("action", &self.action)
            .field("description", &self.description)
            .field("incremental_rebuild", &self.incremental_rebuild.is_some())
            .finish()
    }
}

impl Hook {
    #[must_use]
    pub fn new(action: HookAction) -> Self {
        Self {
            action,
            description: None,
            incremental_rebuild: None,
        }
    }

    /// Closure hook.
    pub fn run<F>(f: F) -> Self
    where
        F: Fn(&mut BuildContext, &Config) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::new(HookAction::Run(Arc::new(f)))
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Let incremental builds run the hook when `predicate` returns true.
    #[must_use]
    pub fn on_incremental<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Path, &BuildContext) -> bool + Send + Sync + 'static,
    {
        self.incremental_rebuild = Some(Arc::new(predicate));
        self
    }

    /// Whether an incremental build triggered by `file` runs this hook.
    #[must_use]
    pub fn wants(&self, file: &Path, ctx: &BuildContext) -> bool {
        self.incremental_rebuild
            .as_ref()
            .is_some_and(|predicate| predicate(file, ctx))
    }

    fn from_config(config: &HookConfig) -> Option<Self> {
        let action = match config.action.as_str() {
            "copy" => HookAction::Copy {
                from: PathBuf::from(config.from.as_deref()?),
                to: PathBuf::from(config.to.as_deref().unwrap_or_default()),
            },
            "exec" => HookAction::Exec {
                command: config.command.clone()?,
            },
            _ => return None,
        };
        let mut hook = Self::new(action);
        hook.description.clone_from(&config.description);
        if let Some(patterns) = &config.incremental_rebuild {
            let patterns = compile_patterns(patterns);
            hook = hook.on_incremental(move |file, _| patterns.iter().any(|p| p.matches_path(file)));
        }
        Some(hook)
    }
}

/// Hooks by phase, in registration order.
#[derive(Clone, Debug, Default)]
pub struct HookRegistry {
    hooks: HashMap<HookPhase, Vec<Hook>>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the declarative hooks of `config`.
    ///
    /// Entries with an unknown action or missing fields are logged, counted
    /// as errors in `diag` and skipped.
    #[must_use]
    pub fn from_config(config: &HooksConfig, diag: &Diagnostics) -> Self {
        let mut registry = Self::new();
        let phases = [
            (HookPhase::LoadLibs, &config.load_libs),
            (HookPhase::PreLoad, &config.pre_load),
            (HookPhase::PostLoad, &config.post_load),
            (HookPhase::PostWrite, &config.post_write),
        ];
        for (phase, entries) in phases {
            for entry in entries {
                match Hook::from_config(entry) {
                    Some(hook) => registry.register(phase, hook),
                    None => {
                        tracing::error!(
                            phase = %phase,
                            action = %entry.action,
                            "Unknown hook action or missing hook options"
                        );
                        diag.error();
                    }
                }
            }
        }
        registry
    }

    pub fn register(&mut self, phase: HookPhase, hook: Hook) {
        self.hooks.entry(phase).or_default().push(hook);
    }

    #[must_use]
    pub fn hooks(&self, phase: HookPhase) -> &[Hook] {
        self.hooks.get(&phase).map_or(&[], Vec::as_slice)
    }

    /// Whether an incremental build triggered by `file` has any hook to run
    /// in `phase`.
    #[must_use]
    pub fn wants_incremental(&self, phase: HookPhase, file: &Path, ctx: &BuildContext) -> bool {
        self.hooks(phase).iter().any(|hook| hook.wants(file, ctx))
    }

    /// Run the hooks of `phase`.
    ///
    /// With `changed` set (incremental build), only hooks whose predicate
    /// accepts the changed file run.
    pub fn run(
        &self,
        phase: HookPhase,
        ctx: &mut BuildContext,
        config: &Config,
        storage: &dyn Storage,
        changed: Option<&Path>,
        diag: &Diagnostics,
    ) {
        let hooks = self.hooks(phase);
        if hooks.is_empty() {
            tracing::debug!(phase = %phase, "No hooks registered");
            return;
        }
        for hook in hooks {
            if let Some(file) = changed
                && !hook.wants(file, ctx)
            {
                continue;
            }
            if let Some(description) = &hook.description {
                tracing::info!(phase = %phase, "{description}");
            }
            if let Err(e) = run_action(&hook.action, ctx, config, storage) {
                tracing::error!(phase = %phase, error = %e, "Hook failed");
                diag.error();
            }
        }
    }
}

fn run_action(
    action: &HookAction,
    ctx: &mut BuildContext,
    config: &Config,
    storage: &dyn Storage,
) -> Result<(), HookError> {
    match action {
        HookAction::Copy { from, to } => {
            let from = match (&config.config_path, from.is_relative()) {
                (Some(path), true) => path.parent().unwrap_or(Path::new(".")).join(from),
                _ => from.clone(),
            };
            let to = config.dirs_resolved.public.join(to);
            tracing::info!(from = %from.display(), to = %to.display(), "Copying");
            storage.copy(&from, &to)?;
            Ok(())
        }
        HookAction::Exec { command } => {
            tracing::info!(command = %command, "Executing");
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .output()
                .map_err(|e| HookError::Exec {
                    command: command.clone(),
                    message: e.to_string(),
                })?;
            if !output.status.success() {
                return Err(HookError::Exec {
                    command: command.clone(),
                    message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                });
            }
            tracing::debug!(
                command = %command,
                output = %String::from_utf8_lossy(&output.stdout).trim(),
                "Command finished"
            );
            Ok(())
        }
        HookAction::Run(f) => f(ctx, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use kiss_storage::MockStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hook_config(action: &str) -> HookConfig {
        HookConfig {
            action: action.to_owned(),
            description: None,
            from: None,
            to: None,
            command: None,
            incremental_rebuild: None,
        }
    }

    #[test]
    fn test_from_config_skips_unknown_actions() {
        let config = HooksConfig {
            pre_load: vec![
                HookConfig {
                    from: Some("assets/logo.svg".to_owned()),
                    to: Some("logo.svg".to_owned()),
                    ..hook_config("copy")
                },
                hook_config("teleport"),
                hook_config("exec"),
            ],
            ..HooksConfig::default()
        };

        let diag = Diagnostics::new();

        let registry = HookRegistry::from_config(&config, &diag);

        assert_eq!(registry.hooks(HookPhase::PreLoad).len(), 1);
        assert!(registry.hooks(HookPhase::PostWrite).is_empty());
        // "teleport" is unknown and "exec" has no command
        assert_eq!(diag.counts().errors, 2);
    }

    #[test]
    fn test_incremental_predicate_from_patterns() {
        let config = HooksConfig {
            post_write: vec![
                HookConfig {
                    command: Some("true".to_owned()),
                    incremental_rebuild: Some(vec!["**/*.css".to_owned()]),
                    ..hook_config("exec")
                },
                HookConfig {
                    command: Some("true".to_owned()),
                    ..hook_config("exec")
                },
            ],
            ..HooksConfig::default()
        };
        let diag = Diagnostics::new();
        let registry = HookRegistry::from_config(&config, &diag);
        let ctx = BuildContext::default();

        assert!(registry.wants_incremental(
            HookPhase::PostWrite,
            Path::new("/site/theme/main.css"),
            &ctx
        ));
        assert!(!registry.wants_incremental(
            HookPhase::PostWrite,
            Path::new("/site/content/post.md"),
            &ctx
        ));
        assert!(!registry.wants_incremental(HookPhase::PreLoad, Path::new("a.css"), &ctx));
        assert_eq!(diag.counts().errors, 0);
    }

    #[test]
    fn test_run_hooks_and_skip_in_incremental_mode() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register(
            HookPhase::PostLoad,
            Hook::run(move |ctx, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.data.insert("hooked".to_owned(), Value::from(true));
                Ok(())
            }),
        );
        let config = Config::with_base(Path::new("/site"));
        let storage = MockStorage::new();
        let diag = Diagnostics::new();
        let mut ctx = BuildContext::new(&config);

        registry.run(HookPhase::PostLoad, &mut ctx, &config, &storage, None, &diag);
        registry.run(
            HookPhase::PostLoad,
            &mut ctx,
            &config,
            &storage,
            Some(Path::new("/site/content/a.md")),
            &diag,
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.data.get("hooked"), Some(&Value::from(true)));
        assert_eq!(diag.counts().errors, 0);
    }

    #[test]
    fn test_failing_hook_is_counted() {
        let mut registry = HookRegistry::new();
        registry.register(
            HookPhase::PreLoad,
            Hook::run(|_, _| Err(HookError::Failed("boom".to_owned()))).with_description("Failing"),
        );
        registry.register(
            HookPhase::PreLoad,
            Hook::new(HookAction::Copy {
                from: PathBuf::from("/missing/file.txt"),
                to: PathBuf::from("file.txt"),
            }),
        );
        let config = Config::with_base(Path::new("/site"));
        let diag = Diagnostics::new();
        let mut ctx = BuildContext::new(&config);

        registry.run(
            HookPhase::PreLoad,
            &mut ctx,
            &config,
            &MockStorage::new(),
            None,
            &diag,
        );

        assert_eq!(diag.counts().errors, 2);
    }

    #[test]
    fn test_copy_hook_targets_public_dir() {
        let storage = MockStorage::new().with_file("/assets/logo.svg", "<svg/>");
        let mut registry = HookRegistry::new();
        registry.register(
            HookPhase::PostWrite,
            Hook::new(HookAction::Copy {
                from: PathBuf::from("/assets/logo.svg"),
                to: PathBuf::from("img/logo.svg"),
            }),
        );
        let config = Config::with_base(Path::new("/site"));
        let diag = Diagnostics::new();
        let mut ctx = BuildContext::new(&config);

        registry.run(HookPhase::PostWrite, &mut ctx, &config, &storage, None, &diag);

        assert_eq!(
            storage.written("/site/public/img/logo.svg").as_deref(),
            Some("<svg/>")
        );
    }
}
