//! Watch leaves.
//!
//! Each [`WatchBinding`] becomes a leaf of its own that never completes. The
//! leaf splits its patterns into static roots and absolute match patterns,
//! watches the roots recursively through a debouncer and runs the bound task
//! once per debounced batch that touches a matching path.
//!
//! Every binding owns its watcher, so a slow rebuild in one binding never
//! delays events of another.

use std::collections::HashSet;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebouncedEvent, new_debouncer};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Context;
use crate::engine::TaskId;
use crate::error::WatchError;
use crate::io::split_glob;

const DEBOUNCE: Duration = Duration::from_millis(250);

/// Association between file patterns and the task their changes trigger.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub name: String,
    /// Root-relative globs or concrete paths.
    pub patterns: Vec<String>,
    pub task: TaskId,
}

impl WatchBinding {
    pub fn new(name: impl Into<String>, patterns: Vec<String>, task: TaskId) -> Self {
        Self {
            name: name.into(),
            patterns,
            task,
        }
    }
}

/// Body of a watch leaf. Only returns early when nothing can be watched.
pub(crate) fn watch(ctx: &Context, binding: &WatchBinding) -> anyhow::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(DEBOUNCE, None, tx).map_err(WatchError::from)?;

    let mut watched = HashSet::new();
    let mut filters = Vec::new();
    for pattern in &binding.patterns {
        match resolve_watch_path(&ctx.config.root, pattern) {
            Ok((path, patterns)) => {
                watched.insert(path);
                filters.extend(patterns);
            }
            Err(e) => tracing::warn!("skipping watch pattern {pattern}: {e}"),
        }
    }

    if watched.is_empty() {
        return Err(WatchError::NothingToWatch.into());
    }

    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer
            .watch(&path, RecursiveMode::Recursive)
            .map_err(WatchError::from)?;
    }

    ctx.span()
        .pb_set_message(&format!("Watching for {} changes", binding.name));

    for result in rx {
        match result {
            Ok(events) => {
                if !is_triggered(&filters, &events) {
                    continue;
                }

                tracing::info!(watcher = %binding.name, "change detected, re-running task...");
                ctx.run(binding.task);
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {:?}", e);
                }
            }
        }
    }

    Ok(())
}

/// Whether a debounced batch contains a creation, modification or removal of
/// a path matched by any of `filters`.
pub(crate) fn is_triggered(filters: &[Pattern], events: &[DebouncedEvent]) -> bool {
    events
        .iter()
        .filter(|de| {
            matches!(
                de.event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            )
        })
        .flat_map(|de| &de.event.paths)
        .any(|path| filters.iter().any(|filter| filter.matches_path(path)))
}

/// Splits a root-relative glob into a canonicalized directory (for watching)
/// and compiled absolute [`Pattern`]s (for matching).
///
/// A static part which does not exist yet is watched through its nearest
/// existing ancestor inside `root`. Its own creation then matches too, so a
/// directory filled right after `mkdir` still triggers the binding.
pub(crate) fn resolve_watch_path(
    root: &Utf8Path,
    glob: &str,
) -> Result<(Utf8PathBuf, Vec<Pattern>), anyhow::Error> {
    let (static_part, suffix) = split_glob(&root.join(glob));

    let existing = static_part
        .ancestors()
        .find(|path| path.starts_with(root) && path.exists())
        .ok_or_else(|| anyhow::anyhow!("no part of {static_part} exists"))?;
    let missing = static_part.strip_prefix(existing)?;

    let base = existing.canonicalize_utf8()?;
    let absolute = base.join(missing);
    let escaped = Pattern::escape(absolute.as_str());

    if !missing.as_str().is_empty() {
        let inner = match suffix.as_str() {
            "" => format!("{escaped}/**/*"),
            suffix => format!("{escaped}/{suffix}"),
        };
        return Ok((base, vec![Pattern::new(&escaped)?, Pattern::new(&inner)?]));
    }

    // A concrete file is matched exactly, its parent is watched so atomic
    // writes are caught.
    let (watch_root, pattern) = if suffix.as_str().is_empty() && absolute.is_file() {
        let parent = absolute.parent().unwrap_or(&absolute).to_path_buf();
        (parent, escaped)
    } else if suffix.as_str().is_empty() {
        (absolute, format!("{escaped}/**/*"))
    } else {
        (absolute, format!("{escaped}/{suffix}"))
    };

    Ok((watch_root, vec![Pattern::new(&pattern)?]))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
pub(crate) fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Instant;

    use notify::Event;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    use super::*;
    use crate::config::Config;
    use crate::core::Environment;
    use crate::engine::Registry;
    use crate::engine::runner::Scheduler;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        fs::create_dir_all(root.join("src/js/components")).unwrap();
        fs::write(root.join("src/js/main.js"), "").unwrap();
        (dir, root)
    }

    fn matches(filters: &[Pattern], path: Utf8PathBuf) -> bool {
        filters.iter().any(|f| f.matches_path(path.as_std_path()))
    }

    fn event(kind: EventKind, path: impl Into<PathBuf>) -> DebouncedEvent {
        DebouncedEvent::new(Event::new(kind).add_path(path.into()), Instant::now())
    }

    #[test]
    fn test_concrete_file() {
        let (_dir, root) = project();
        let (watch, filters) = resolve_watch_path(&root, "src/js/main.js").unwrap();

        assert_eq!(watch, root.join("src/js"));
        assert!(matches(&filters, root.join("src/js/main.js")));
        assert!(!matches(&filters, root.join("src/js/other.js")));
    }

    #[test]
    fn test_concrete_directory() {
        let (_dir, root) = project();
        let (watch, filters) = resolve_watch_path(&root, "src/js").unwrap();

        assert_eq!(watch, root.join("src/js"));
        assert!(matches(&filters, root.join("src/js/components/a.js")));
    }

    #[test]
    fn test_directory_wildcard() {
        let (_dir, root) = project();
        let (watch, filters) = resolve_watch_path(&root, "src/js/components/*.js").unwrap();

        assert_eq!(watch, root.join("src/js/components"));
        assert!(matches(&filters, root.join("src/js/components/slider.js")));
        assert!(!matches(&filters, root.join("src/js/components/slider.ts")));
    }

    #[test]
    fn test_missing_directory_watches_ancestor() {
        let (_dir, root) = project();
        let (watch, filters) = resolve_watch_path(&root, "src/html/*.*").unwrap();

        assert_eq!(watch, root.join("src"));
        assert!(matches(&filters, root.join("src/html")));
        assert!(matches(&filters, root.join("src/html/index.html")));
        assert!(!matches(&filters, root.join("src/js/main.js")));
    }

    #[test]
    fn test_missing_concrete_path() {
        let (_dir, root) = project();
        let (watch, filters) = resolve_watch_path(&root, "src/fonts/inter").unwrap();

        assert_eq!(watch, root.join("src"));
        assert!(matches(&filters, root.join("src/fonts/inter")));
        assert!(matches(&filters, root.join("src/fonts/inter/regular.woff2")));
        assert!(!matches(&filters, root.join("src/fonts/other.woff2")));
    }

    #[test]
    fn test_missing_project_root() {
        let (_dir, root) = project();
        assert!(resolve_watch_path(&root.join("gone"), "src/sass/**/*.scss").is_err());
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        // /a/b and /a/b/c are covered by /a.
        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }

    #[test]
    fn test_is_triggered() {
        let filters = vec![Pattern::new("/p/src/sass/**/*.s*").unwrap()];

        let modify = event(EventKind::Modify(ModifyKind::Any), "/p/src/sass/main.scss");
        let create = event(EventKind::Create(CreateKind::File), "/p/src/sass/_new.scss");
        let remove = event(EventKind::Remove(RemoveKind::File), "/p/src/sass/b/_x.sass");
        let access = event(EventKind::Access(AccessKind::Any), "/p/src/sass/main.scss");
        let other = event(EventKind::Modify(ModifyKind::Any), "/p/src/js/main.js");

        assert!(is_triggered(&filters, &[modify]));
        assert!(is_triggered(&filters, &[create]));
        assert!(is_triggered(&filters, &[remove]));
        assert!(!is_triggered(&filters, &[access]));
        assert!(!is_triggered(&filters, &[other.clone()]));
        assert!(!is_triggered(&filters, &[]));
        assert!(is_triggered(
            &filters,
            &[other, event(EventKind::Modify(ModifyKind::Any), "/p/src/sass/a.scss")]
        ));
    }

    #[test]
    fn test_style_change_runs_bound_task_once() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join("src/sass")).unwrap();
        fs::write(root.join("src/sass/main.scss"), ".a { color: red; }").unwrap();

        let mut registry = Registry::new();
        let styles = registry
            .leaf("styles", |ctx| crate::compile::style::compile(ctx))
            .unwrap();
        let binding = WatchBinding::new("styles", vec!["src/sass/**/*.s*".into()], styles);
        let leaf = registry
            .leaf("watch:styles", move |ctx| watch(ctx, &binding))
            .unwrap();

        let config = Config {
            root: root.clone(),
            ..Config::default()
        };
        let env = Arc::new(Environment::new(config));
        let rx = env.reloader.subscribe();
        let scheduler = Scheduler::new(Arc::new(registry.finish().unwrap()), env);

        // The watcher never returns.
        std::thread::spawn(move || scheduler.block_on(leaf));
        std::thread::sleep(Duration::from_secs(1));

        fs::write(root.join("src/sass/main.scss"), ".a { color: blue; }").unwrap();

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let css = fs::read_to_string(root.join("src/css/styles.min.css")).unwrap();
        assert!(css.contains("#00f"), "{css}");
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_nothing_to_watch_fails() {
        let (_dir, root) = project();
        let mut registry = Registry::new();
        let target = registry.leaf("target", |_| Ok(())).unwrap();
        let binding = WatchBinding::new("missing", vec!["nope/**/*.js".into()], target);
        let leaf = registry
            .leaf("watch:missing", move |ctx| watch(ctx, &binding))
            .unwrap();

        let config = Config {
            root: root.join("gone"),
            ..Config::default()
        };
        let scheduler = Scheduler::new(
            Arc::new(registry.finish().unwrap()),
            Arc::new(Environment::new(config)),
        );
        let report = scheduler.block_on(leaf).unwrap();

        let error = report.get("watch:missing").unwrap().error().unwrap();
        assert!(error.contains("None of the watch patterns"), "{error}");
        assert!(report.get("target").is_none());
    }

    #[test]
    fn test_output_created_after_start() {
        let (_dir, root) = project();

        let mut registry = Registry::new();
        let markup = registry
            .leaf("markup", |ctx| {
                ctx.reloader.signal();
                Ok(())
            })
            .unwrap();
        let binding = WatchBinding::new("markup", vec!["src/html/*.*".into()], markup);
        let leaf = registry
            .leaf("watch:markup", move |ctx| watch(ctx, &binding))
            .unwrap();

        let config = Config {
            root: root.clone(),
            ..Config::default()
        };
        let env = Arc::new(Environment::new(config));
        let rx = env.reloader.subscribe();
        let scheduler = Scheduler::new(Arc::new(registry.finish().unwrap()), env);

        let handle = std::thread::spawn(move || scheduler.block_on(leaf));
        std::thread::sleep(Duration::from_secs(1));
        assert!(!handle.is_finished());

        fs::create_dir_all(root.join("src/html")).unwrap();
        fs::write(root.join("src/html/index.html"), "<p>index</p>").unwrap();

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(!handle.is_finished());
    }
}
