//! Asset compilers.
//!
//! Every compiler is a plain function over the shared
//! [`Environment`](crate::Environment): it reads sources under the project
//! root, writes artifacts next to them, reports failures through the
//! notifier and returns them to the scheduler.

pub mod script;
pub mod style;
pub mod template;

/// Whether a file is a partial, i.e. only meant to be included by others.
pub(crate) fn is_partial(path: &camino::Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('_'))
}
