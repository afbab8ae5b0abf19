//! The task graph.
//!
//! Tasks are registered on a [`Registry`], which hands out [`TaskId`] handles.
//! A task is either a leaf action or a composite over handles issued earlier,
//! so every composite only ever points backwards and the graph is acyclic by
//! construction. [`Registry::finish`] freezes the graph into a [`TaskGraph`]
//! that the [`Scheduler`](crate::Scheduler) executes.

pub(crate) mod runner;

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use tokio::sync::oneshot;

use crate::core::Context;
use crate::error::{RegistryError, TsumikiError};

static NEXT_REGISTRY: AtomicUsize = AtomicUsize::new(0);

/// Handle to a task registered on a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    registry: usize,
    index: NodeIndex,
}

type SyncFn = Arc<dyn Fn(&Context) -> anyhow::Result<()> + Send + Sync>;
type DeferredFn = Arc<dyn Fn(&Context, Done) -> anyhow::Result<()> + Send + Sync>;

/// The body of a leaf task.
#[derive(Clone)]
pub(crate) enum Action {
    /// Completes when the function returns.
    Sync(SyncFn),
    /// Completes when the [`Done`] handle is signalled.
    Deferred(DeferredFn),
}

/// Completion handle passed to deferred leaves.
///
/// The task is complete once [`Done::finish`] or [`Done::fail`] is called.
/// Dropping the handle without calling either counts as a failure.
#[derive(Debug)]
pub struct Done(oneshot::Sender<anyhow::Result<()>>);

impl Done {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<anyhow::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn finish(self) {
        let _ = self.0.send(Ok(()));
    }

    pub fn fail(self, err: impl Into<anyhow::Error>) {
        let _ = self.0.send(Err(err.into()));
    }
}

/// Shape of a task, without its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Leaf,
    Sequence,
    Parallel,
}

#[derive(Clone)]
pub(crate) enum TaskKind {
    Leaf(Action),
    Sequence(Vec<TaskId>),
    Parallel(Vec<TaskId>),
}

pub(crate) struct TaskNode {
    pub(crate) name: Arc<str>,
    pub(crate) kind: TaskKind,
}

impl TaskNode {
    fn kind(&self) -> Kind {
        match self.kind {
            TaskKind::Leaf(_) => Kind::Leaf,
            TaskKind::Sequence(_) => Kind::Sequence,
            TaskKind::Parallel(_) => Kind::Parallel,
        }
    }

    fn children(&self) -> &[TaskId] {
        match &self.kind {
            TaskKind::Leaf(_) => &[],
            TaskKind::Sequence(children) | TaskKind::Parallel(children) => children,
        }
    }
}

impl Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({}, {:?})", self.name, self.kind())
    }
}

/// Builder for a [`TaskGraph`].
pub struct Registry {
    id: usize,
    graph: DiGraph<TaskNode, ()>,
    names: HashMap<Arc<str>, NodeIndex>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            graph: DiGraph::new(),
            names: HashMap::new(),
        }
    }

    /// Registers a leaf which completes when `func` returns.
    pub fn leaf<F>(&mut self, name: impl Into<String>, func: F) -> Result<TaskId, RegistryError>
    where
        F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(name.into(), TaskKind::Leaf(Action::Sync(Arc::new(func))))
    }

    /// Registers a leaf which completes when it signals the [`Done`] handle it
    /// receives, possibly long after `func` itself has returned.
    pub fn deferred<F>(&mut self, name: impl Into<String>, func: F) -> Result<TaskId, RegistryError>
    where
        F: Fn(&Context, Done) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(name.into(), TaskKind::Leaf(Action::Deferred(Arc::new(func))))
    }

    /// Registers a composite which runs `children` one after another.
    pub fn sequence(
        &mut self,
        name: impl Into<String>,
        children: impl IntoIterator<Item = TaskId>,
    ) -> Result<TaskId, RegistryError> {
        let children = self.check(children)?;
        self.insert(name.into(), TaskKind::Sequence(children))
    }

    /// Registers a composite which starts all `children` at once.
    pub fn parallel(
        &mut self,
        name: impl Into<String>,
        children: impl IntoIterator<Item = TaskId>,
    ) -> Result<TaskId, RegistryError> {
        let children = self.check(children)?;
        self.insert(name.into(), TaskKind::Parallel(children))
    }

    /// Freezes the registry.
    pub fn finish(self) -> Result<TaskGraph, TsumikiError> {
        // Composites only reference earlier handles, this guards the invariant.
        petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| TsumikiError::Cycle(self.graph[cycle.node_id()].name.to_string()))?;

        Ok(TaskGraph {
            registry: self.id,
            graph: self.graph,
            names: self.names,
        })
    }

    fn check(
        &self,
        children: impl IntoIterator<Item = TaskId>,
    ) -> Result<Vec<TaskId>, RegistryError> {
        children
            .into_iter()
            .map(|child| {
                if child.registry == self.id && child.index.index() < self.graph.node_count() {
                    Ok(child)
                } else {
                    Err(RegistryError::UnknownTask(child.index.index()))
                }
            })
            .collect()
    }

    fn insert(&mut self, name: String, kind: TaskKind) -> Result<TaskId, RegistryError> {
        if self.names.contains_key(name.as_str()) {
            return Err(RegistryError::Duplicate(name));
        }

        let name: Arc<str> = name.into();
        let children = match &kind {
            TaskKind::Leaf(_) => vec![],
            TaskKind::Sequence(children) | TaskKind::Parallel(children) => children.clone(),
        };

        let index = self.graph.add_node(TaskNode {
            name: name.clone(),
            kind,
        });

        for child in children {
            self.graph.add_edge(index, child.index, ());
        }

        self.names.insert(name, index);

        Ok(TaskId {
            registry: self.id,
            index,
        })
    }
}

/// An immutable graph of named tasks.
#[derive(Debug)]
pub struct TaskGraph {
    registry: usize,
    graph: DiGraph<TaskNode, ()>,
    names: HashMap<Arc<str>, NodeIndex>,
}

impl TaskGraph {
    pub(crate) fn node(&self, id: TaskId) -> Result<&TaskNode, RegistryError> {
        if id.registry != self.registry {
            return Err(RegistryError::UnknownTask(id.index.index()));
        }

        self.graph
            .node_weight(id.index)
            .ok_or(RegistryError::UnknownTask(id.index.index()))
    }

    /// Looks up a task by name.
    pub fn id(&self, name: &str) -> Result<TaskId, RegistryError> {
        self.names
            .get(name)
            .map(|&index| TaskId {
                registry: self.registry,
                index,
            })
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
    }

    pub fn name(&self, id: TaskId) -> Result<&str, RegistryError> {
        self.node(id).map(|node| &*node.name)
    }

    pub fn kind(&self, id: TaskId) -> Result<Kind, RegistryError> {
        self.node(id).map(TaskNode::kind)
    }

    /// Direct children of a composite, in registration order.
    pub fn children(&self, id: TaskId) -> Result<&[TaskId], RegistryError> {
        self.node(id).map(TaskNode::children)
    }

    /// Every task that running `id` may run, `id` included.
    pub fn reachable(&self, id: TaskId) -> Result<HashSet<TaskId>, RegistryError> {
        self.node(id)?;

        let mut found = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, id.index);
        while let Some(index) = dfs.next(&self.graph) {
            found.insert(TaskId {
                registry: self.registry,
                index,
            });
        }

        Ok(found)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
