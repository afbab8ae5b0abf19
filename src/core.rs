use std::sync::Arc;

use tokio::runtime::Handle;

use crate::compile::script::{Bundler, Esbuild};
use crate::config::Config;
use crate::engine::TaskId;
use crate::engine::runner::{Outcome, Scheduler};
use crate::notice::{ConsoleNotifier, Notifier};
use crate::reload::Reloader;

/// Build mode, it decides how scripts are bundled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Unminified output with inline source maps and live reload.
    Development,
    /// Minified output without source maps.
    Production,
}

/// Everything a leaf task may need, shared read-only by all of them.
pub struct Environment {
    pub config: Config,
    /// Where compile errors are shown.
    pub notifier: Arc<dyn Notifier>,
    /// Live reload signal shared by every compiler.
    pub reloader: Reloader,
    /// Backend used by the script leaves.
    pub bundler: Arc<dyn Bundler>,
}

impl Environment {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            notifier: Arc::new(ConsoleNotifier),
            reloader: Reloader::new(),
            bundler: Arc::new(Esbuild),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("reloads", &self.reloader.count())
            .finish()
    }
}

/// The context passed to every leaf execution.
#[derive(Clone)]
pub struct Context {
    pub env: Arc<Environment>,
    pub(crate) scheduler: Scheduler,
    pub(crate) handle: Handle,
    /// Tracing span assigned to this leaf.
    pub(crate) span: tracing::Span,
}

impl Context {
    /// Runs another task of the same graph and waits for it to complete.
    ///
    /// Leaves execute outside of the scheduler thread, so blocking here only
    /// holds up the calling leaf.
    pub fn run(&self, id: TaskId) -> Outcome {
        self.handle.block_on(self.scheduler.run(id))
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl std::ops::Deref for Context {
    type Target = Environment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}
