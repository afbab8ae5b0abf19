//! Packaging step.
//!
//! Copies compiled artifacts into the distribution tree. Every [`CopySpec`]
//! is independent and they all run in parallel.

use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::info;

use crate::config::{Config, CopySpec};
use crate::core::Environment;
use crate::error::{GlobError, PackageError};
use crate::io::{as_overhead, glob_files, split_glob};

type Failures = Vec<(Utf8PathBuf, std::io::Error)>;

/// Body of the packaging leaf.
pub fn run(env: &Environment) -> anyhow::Result<()> {
    let start = Instant::now();
    let copied = package(&env.config)?;

    info!(
        "copied {copied} files to {} {}",
        env.config.path(&env.config.package.dist),
        as_overhead(start)
    );

    Ok(())
}

/// Runs every copy and returns the number of files copied.
///
/// A copy whose pattern matches nothing is skipped without creating its
/// destination directory.
pub fn package(config: &Config) -> Result<usize, PackageError> {
    let dist = config.path(&config.package.dist);

    let results: Vec<_> = config
        .package
        .copies
        .par_iter()
        .map(|spec| copy(config, &dist, spec))
        .collect();

    let mut copied = 0;
    let mut failures = Vec::new();
    for result in results {
        let (count, mut failed) = result?;
        copied += count;
        failures.append(&mut failed);
    }

    if !failures.is_empty() {
        return Err(PackageError::Copy(failures));
    }

    Ok(copied)
}

fn copy(config: &Config, dist: &Utf8Path, spec: &CopySpec) -> Result<(usize, Failures), GlobError> {
    let pattern = config.path(&spec.from);
    let files = glob_files(pattern.as_str())?;

    // Structure below the static part of the pattern is kept, a concrete file
    // lands directly in the destination.
    let (base, suffix) = split_glob(&pattern);
    let base = match suffix.as_str() {
        "" => base.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
        _ => base,
    };

    let target = dist.join(&spec.to);
    let mut copied = 0;
    let mut failures = Vec::new();

    for file in files {
        let relative = file.strip_prefix(&base).unwrap_or(file.as_path());
        let dest = target.join(relative);

        let result = dest
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(&file, &dest));

        match result {
            Ok(_) => copied += 1,
            Err(e) => failures.push((dest, e)),
        }
    }

    Ok((copied, failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::tests::{project, put};

    fn config(root: &Utf8Path) -> Config {
        let mut config = Config {
            root: root.to_path_buf(),
            ..Config::default()
        };
        config.package.dist = "dist".into();
        config
    }

    #[test]
    fn test_copies_every_pattern() {
        let (_dir, root) = project();
        put(&root, "src/html/index.html", "<p>index</p>");
        put(&root, "src/root.html", "<p>root</p>");
        put(&root, "src/css/styles.min.css", "a{}");
        put(&root, "src/css/styles.min.css.map", "{}");
        put(&root, "src/fonts/inter/regular.woff2", "font");
        put(&root, "src/js/scripts.min.js", "js");
        put(&root, "src/js/main.js", "source");
        put(&root, "src/images/icons/logo.svg", "<svg/>");

        let copied = package(&config(&root)).unwrap();

        let dist = root.join("dist");
        assert_eq!(copied, 7);
        assert!(dist.join("html/index.html").is_file());
        assert!(dist.join("root.html").is_file());
        assert!(dist.join("css/styles.min.css").is_file());
        assert!(dist.join("css/styles.min.css.map").is_file());
        assert!(dist.join("fonts/inter/regular.woff2").is_file());
        assert!(dist.join("js/scripts.min.js").is_file());
        assert!(!dist.join("js/main.js").exists());
        assert!(dist.join("images/icons/logo.svg").is_file());
    }

    #[test]
    fn test_empty_match_creates_nothing() {
        let (_dir, root) = project();
        put(&root, "src/css/styles.min.css", "a{}");

        let copied = package(&config(&root)).unwrap();

        let dist = root.join("dist");
        assert_eq!(copied, 1);
        assert!(!dist.join("images").exists());
        assert!(!dist.join("fonts").exists());
        assert!(!dist.join("html").exists());
    }

    #[test]
    fn test_write_failures_are_collected() {
        let (_dir, root) = project();
        put(&root, "src/css/styles.min.css", "a{}");
        put(&root, "src/js/scripts.min.js", "js");
        // A file where the css directory should be.
        put(&root, "dist/css", "");

        let err = package(&config(&root)).unwrap_err();

        let PackageError::Copy(failures) = err else {
            panic!("expected copy failures");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, root.join("dist/css/styles.min.css"));
        assert!(root.join("dist/js/scripts.min.js").is_file());
    }
}
