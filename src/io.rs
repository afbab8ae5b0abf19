use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::error::GlobError;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Writes `data` to `path`, creating missing parent directories.
pub(crate) fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}

/// Splits a glob into its static directory prefix and the wildcard suffix.
///
/// - `src/sass/**/*.scss` -> (`src/sass`, `**/*.scss`)
/// - `src/js/main.js` -> (`src/js/main.js`, ``)
pub(crate) fn split_glob(glob: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let components: Vec<_> = glob.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix: Utf8PathBuf = components.iter().skip(split_idx).collect();

    (root, suffix)
}

/// Expands a glob into the files it matches, skipping directories.
pub(crate) fn glob_files(pattern: &str) -> Result<Vec<Utf8PathBuf>, GlobError> {
    let mut files = Vec::new();

    for entry in glob::glob(pattern)? {
        let path = Utf8PathBuf::try_from(entry?)?;
        if path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_glob_wildcard() {
        let (root, suffix) = split_glob(Utf8Path::new("src/sass/**/*.s*"));
        assert_eq!(root, "src/sass");
        assert_eq!(suffix, "**/*.s*");
    }

    #[test]
    fn test_split_glob_concrete() {
        let (root, suffix) = split_glob(Utf8Path::new("src/js/main.js"));
        assert_eq!(root, "src/js/main.js");
        assert_eq!(suffix, "");
    }

    #[test]
    fn test_split_glob_absolute() {
        let (root, suffix) = split_glob(Utf8Path::new("/project/src/*.html"));
        assert_eq!(root, "/project/src");
        assert_eq!(suffix, "*.html");
    }

    #[test]
    fn test_glob_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("a/nested")).unwrap();
        fs::write(root.join("a/one.txt"), "1").unwrap();
        fs::write(root.join("a/nested/two.txt"), "2").unwrap();

        let files = glob_files(root.join("a/**/*").as_str()).unwrap();

        assert_eq!(files, vec![root.join("a/nested/two.txt"), root.join("a/one.txt")]);
    }
}
