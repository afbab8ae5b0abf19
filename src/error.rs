use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TsumikiError {
    #[error("Failed to build runtime")]
    RuntimeBuild(#[from] std::io::Error),

    #[error("Error while loading configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while registering tasks:\n{0}")]
    Registry(#[from] RegistryError),

    #[error("Task graph contains a cycle at '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file {0}.\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),

    #[error("Couldn't resolve the project root.\n{0}")]
    Root(std::io::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Task '{0}' is already defined")]
    Duplicate(String),

    #[error("Task handle #{0} was not issued by this registry")]
    UnknownTask(usize),

    #[error("No task named '{0}'")]
    UnknownName(String),
}

/// Errors that can occur when expanding a glob into files.
#[derive(Debug, Error)]
pub enum GlobError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Walk(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("{0}")]
    Sass(#[from] Box<grass::Error>),

    /// Every entry collapses into the same output name, so only one may exist.
    #[error("Multiple stylesheet entry points would collide in one output: {0:?}")]
    MultipleEntries(Vec<Utf8PathBuf>),

    #[error("Invalid browser targets: {0}")]
    Targets(String),

    #[error("{0}")]
    Css(String),

    #[error("Source map error: {0}")]
    SourceMap(String),
}

/// Errors that can occur when bundling scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't find the esbuild binary in node_modules/.bin or PATH")]
    Missing,

    #[error("Esbuild execution failed: {0}")]
    Esbuild(String),

    #[error("Couldn't read the esbuild metafile: {0}")]
    Metafile(#[from] serde_json::Error),

    #[error("Script entry {0} is outside of the project root")]
    OutsideRoot(Utf8PathBuf),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Minification failed: {0}")]
    Minify(String),
}

/// Errors that can occur when rendering templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("{0:#}")]
    Render(#[from] minijinja::Error),

    #[error("Failed to render {} page(s):\n{}", .0.len(), format_page_failures(.0))]
    Pages(Vec<(Utf8PathBuf, TemplateError)>),
}

fn format_page_failures(failures: &[(Utf8PathBuf, TemplateError)]) -> String {
    failures
        .iter()
        .map(|(path, err)| format!("  {path}: {err}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("Failed to copy {} file(s):\n{}", .0.len(), format_copy_failures(.0))]
    Copy(Vec<(Utf8PathBuf, std::io::Error)>),
}

fn format_copy_failures(failures: &[(Utf8PathBuf, std::io::Error)]) -> String {
    failures
        .iter()
        .map(|(path, err)| format!("  {path}: {err}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Couldn't bind to a port.\n{0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("None of the watch patterns could be resolved")]
    NothingToWatch,
}
