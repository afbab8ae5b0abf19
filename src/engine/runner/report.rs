use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;

use crate::engine::Kind;
use crate::engine::runner::Outcome;

/// A single finished task.
#[derive(Debug, Clone)]
pub struct Execution {
    pub name: Arc<str>,
    pub kind: Kind,
    pub start: Instant,
    pub duration: Duration,
    pub outcome: Outcome,
    /// Position in completion order, starting at zero.
    pub order: usize,
}

impl Execution {
    /// Rendered error message, if the task failed.
    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failure(e) => Some(format!("{e:#}")),
        }
    }
}

/// Structured result of a run, the same in every build mode.
///
/// Tasks appear in the order they completed; a task that ran several times
/// (e.g. a compiler triggered by a watcher) has several entries. Only the
/// latest [`Report::HISTORY`] executions are kept, so a long watch session
/// does not grow it without bound.
#[derive(Debug, Clone, Default)]
pub struct Report {
    executions: VecDeque<Execution>,
    recorded: usize,
}

impl Report {
    pub const HISTORY: usize = 512;

    pub(crate) fn record(&mut self, name: Arc<str>, kind: Kind, start: Instant, outcome: &Outcome) {
        let order = self.recorded;
        self.recorded += 1;

        if self.executions.len() == Self::HISTORY {
            self.executions.pop_front();
        }

        self.executions.push_back(Execution {
            name,
            kind,
            start,
            duration: start.elapsed(),
            outcome: outcome.clone(),
            order,
        });
    }

    pub fn executions(&self) -> impl Iterator<Item = &Execution> {
        self.executions.iter()
    }

    /// Latest execution of the task called `name`.
    pub fn get(&self, name: &str) -> Option<&Execution> {
        self.executions.iter().rev().find(|e| &*e.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Execution> {
        self.executions.iter().filter(|e| !e.outcome.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Whether `a` finished before `b` did, `false` if either never ran.
    pub fn completed_before(&self, a: &str, b: &str) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(a), Some(b)) => a.order < b.order,
            _ => false,
        }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for exec in self.executions.iter().filter(|e| e.kind == Kind::Leaf) {
            match &exec.outcome {
                Outcome::Success => writeln!(
                    f,
                    "{} {} {}",
                    style("✔").green(),
                    exec.name,
                    style(format!("({:.2?})", exec.duration)).blue()
                )?,
                Outcome::Failure(e) => writeln!(
                    f,
                    "{} {} {}\n{}",
                    style("✖").red(),
                    exec.name,
                    style(format!("({:.2?})", exec.duration)).blue(),
                    e
                )?,
            }
        }

        let failed = self
            .failures()
            .filter(|e| e.kind == Kind::Leaf)
            .count();

        if failed == 0 {
            write!(f, "{}", style("All tasks finished").green())
        } else {
            write!(f, "{}", style(format!("{failed} task(s) failed")).red())
        }
    }
}
