pub(crate) mod http;
mod report;
pub(crate) mod watch;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;

use indicatif::ProgressStyle;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinSet};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Context, Environment};
use crate::engine::{Action, Done, TaskGraph, TaskId, TaskKind};
use crate::error::TsumikiError;

pub use report::{Execution, Report};

static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} [{elapsed}] {msg}")
        .expect("Error setting progress bar template")
});

/// Result of running a single task.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failure(Arc<anyhow::Error>),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    fn from_failures(name: &str, failed: usize, total: usize) -> Self {
        if failed == 0 {
            Outcome::Success
        } else {
            Outcome::Failure(Arc::new(anyhow::anyhow!(
                "{failed} of {total} subtasks of '{name}' failed"
            )))
        }
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// Executes tasks of a [`TaskGraph`].
///
/// Composites are plain futures: a sequence awaits its children one by one,
/// a parallel composite spawns all of them on a [`JoinSet`] and waits for
/// every one to finish. Leaves run on the blocking pool, so a leaf which
/// never returns (a watcher) only occupies its own thread.
///
/// Failures never propagate as errors. A failed leaf is logged, recorded in
/// the [`Report`] and turned into [`Outcome::Failure`], its siblings keep
/// running.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    graph: Arc<TaskGraph>,
    env: Arc<Environment>,
    report: Mutex<Report>,
}

impl Scheduler {
    pub fn new(graph: Arc<TaskGraph>, env: Arc<Environment>) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph,
                env,
                report: Mutex::new(Report::default()),
            }),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.inner.graph
    }

    pub fn env(&self) -> &Arc<Environment> {
        &self.inner.env
    }

    /// Snapshot of every execution recorded so far.
    pub fn report(&self) -> Report {
        self.inner.report.lock().unwrap().clone()
    }

    /// Runs `id` on a fresh single-threaded runtime and returns the report.
    pub fn block_on(&self, id: TaskId) -> Result<Report, TsumikiError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        rt.block_on(self.run(id));
        rt.shutdown_background();

        Ok(self.report())
    }

    /// Runs a task and resolves once it is complete.
    pub fn run(&self, id: TaskId) -> BoxFuture {
        let this = self.clone();

        Box::pin(async move {
            let (name, kind, shape) = match this.inner.graph.node(id) {
                Ok(node) => (node.name.clone(), node.kind.clone(), node.kind()),
                Err(e) => return Outcome::Failure(Arc::new(e.into())),
            };

            let start = Instant::now();

            let outcome = match kind {
                TaskKind::Leaf(action) => this.run_leaf(&name, action).await,
                TaskKind::Sequence(children) => {
                    let total = children.len();
                    let mut failed = 0;

                    for child in children {
                        if !this.run(child).await.is_success() {
                            failed += 1;
                        }
                    }

                    Outcome::from_failures(&name, failed, total)
                }
                TaskKind::Parallel(children) => {
                    let total = children.len();
                    let mut failed = 0;
                    let mut set = JoinSet::new();

                    for child in children {
                        set.spawn(this.run(child));
                    }

                    while let Some(result) = set.join_next().await {
                        if !matches!(result, Ok(Outcome::Success)) {
                            failed += 1;
                        }
                    }

                    Outcome::from_failures(&name, failed, total)
                }
            };

            this.inner
                .report
                .lock()
                .unwrap()
                .record(name, shape, start, &outcome);

            outcome
        })
    }

    async fn run_leaf(&self, name: &str, action: Action) -> Outcome {
        let span = tracing::span!(Level::INFO, "task", name);
        span.pb_set_style(&TASK_STYLE);
        span.pb_set_message(&format!("Running {name}"));

        let context = Context {
            env: self.inner.env.clone(),
            scheduler: self.clone(),
            handle: Handle::current(),
            span: span.clone(),
        };

        let result = match action {
            Action::Sync(func) => {
                tokio::task::spawn_blocking(move || {
                    let _enter = context.span.clone().entered();
                    func(&context)
                })
                .await
            }
            Action::Deferred(func) => {
                let (done, signal) = Done::channel();

                match tokio::task::spawn_blocking(move || {
                    let _enter = context.span.clone().entered();
                    func(&context, done)
                })
                .await
                {
                    Ok(Ok(())) => Ok(signal
                        .await
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("completion signal dropped")))),
                    other => other,
                }
            }
        };

        let result = result.unwrap_or_else(|e| Err(panic_to_error(e)));

        match result {
            Ok(()) => {
                tracing::debug!(task = name, "finished");
                Outcome::Success
            }
            Err(e) => {
                tracing::error!(task = name, "{e:#}");
                Outcome::Failure(Arc::new(e))
            }
        }
    }
}

fn panic_to_error(err: JoinError) -> anyhow::Error {
    if !err.is_panic() {
        return anyhow::anyhow!("Task was cancelled");
    }

    let panic = err.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        anyhow::anyhow!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        anyhow::anyhow!("Task panicked: {s}")
    } else {
        anyhow::anyhow!("Task panicked with unknown payload")
    }
}
