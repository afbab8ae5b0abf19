//! Project layout and compiler options.
//!
//! Every path here is relative to [`Config::root`]. The defaults describe the
//! conventional layout: sources under `src/`, compiled artifacts next to them
//! (so the dev server can serve `src/` directly) and a distribution tree three
//! levels above the project root.
//!
//! A `tsumiki.toml` file in the root may override any subset of the values:
//!
//! ```toml
//! [style]
//! browsers = ["last 2 versions"]
//!
//! [package]
//! dist = "../public"
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the optional configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "tsumiki.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root, all other paths are resolved against it.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    pub style: StyleConfig,
    pub script: ScriptConfig,
    pub template: TemplateConfig,
    pub markup: MarkupConfig,
    pub server: ServerConfig,
    pub package: PackageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Glob matching every stylesheet source, partials included.
    pub source: String,
    /// Extra load paths for `@use` and `@import`, e.g. a mixin library.
    pub include_paths: Vec<Utf8PathBuf>,
    pub output: Utf8PathBuf,
    pub basename: String,
    pub suffix: String,
    /// Browserslist queries used for vendor prefixing.
    pub browsers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub entry: Utf8PathBuf,
    pub output: Utf8PathBuf,
    /// Patterns that trigger a rebundle in watch mode.
    pub watch: Vec<String>,
    /// Syntax level modules are lowered to.
    pub target: String,
    pub transpile: TranspileRule,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranspileRule {
    /// Dependency directory excluded from transpilation.
    pub exclude: String,
    /// Packages inside the dependency directory that are transpiled anyway.
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub source: Utf8PathBuf,
    pub extension: String,
    pub output: Utf8PathBuf,
    /// Number of leading spaces rewritten into a single tab.
    pub indent_width: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarkupConfig {
    /// Compiled markup which only needs a browser refresh when it changes.
    pub watch: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory served over HTTP.
    pub base: Utf8PathBuf,
    pub port: u16,
    pub reload_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    pub dist: Utf8PathBuf,
    pub copies: Vec<CopySpec>,
}

/// One independent copy of the packaging step.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CopySpec {
    /// Glob relative to the root.
    pub from: String,
    /// Directory relative to the distribution root.
    pub to: Utf8PathBuf,
}

impl CopySpec {
    fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: Utf8PathBuf::from(to),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            style: StyleConfig::default(),
            script: ScriptConfig::default(),
            template: TemplateConfig::default(),
            markup: MarkupConfig::default(),
            server: ServerConfig::default(),
            package: PackageConfig::default(),
        }
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            source: "src/sass/**/*.s*".into(),
            include_paths: vec!["node_modules/bourbon/core".into()],
            output: "src/css".into(),
            basename: "styles".into(),
            suffix: ".min".into(),
            browsers: vec!["last 15 versions".into()],
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            entry: "src/js/main.js".into(),
            output: "src/js/scripts.min.js".into(),
            watch: vec![
                "src/js/main.js".into(),
                "src/js/components/*.js".into(),
                "src/js/utils/*.js".into(),
            ],
            target: "es2015".into(),
            transpile: TranspileRule::default(),
        }
    }
}

impl Default for TranspileRule {
    fn default() -> Self {
        Self {
            exclude: "node_modules".into(),
            allow: vec!["dom7".into(), "ssr-window".into(), "swiper".into()],
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            source: "src/templates".into(),
            extension: "jinja".into(),
            output: "src/html".into(),
            indent_width: 2,
        }
    }
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            watch: "src/html/*.*".into(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base: "src".into(),
            port: 3000,
            reload_port: 1337,
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            dist: "../../../Public".into(),
            copies: vec![
                CopySpec::new("src/html/*.html", "html"),
                CopySpec::new("src/*.html", ""),
                CopySpec::new("src/css/*.css", "css"),
                CopySpec::new("src/css/*.map", "css"),
                CopySpec::new("src/fonts/**/*", "fonts"),
                CopySpec::new("src/js/scripts.min.js", "js"),
                CopySpec::new("src/images/**/*", "images"),
            ],
        }
    }
}

impl Config {
    /// Loads `tsumiki.toml` from `root` if it exists, otherwise returns the
    /// default layout anchored at `root`.
    pub fn load(root: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let file = root.join(CONFIG_FILE);

        let mut config = if file.is_file() {
            let text = fs::read_to_string(&file).map_err(|e| ConfigError::Read(file.clone(), e))?;
            toml::from_str::<Config>(&text).map_err(|e| ConfigError::Parse(file.clone(), e))?
        } else {
            Config::default()
        };

        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Loads the configuration for the current working directory.
    pub fn load_cwd() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::Root)?;
        Self::load(Utf8PathBuf::try_from(cwd)?)
    }

    /// Resolves a root-relative path.
    pub fn path(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Resolves a root-relative glob pattern into a pattern string.
    pub fn pattern(&self, pattern: &str) -> String {
        self.root.join(pattern).into_string()
    }

    /// File name of the compiled stylesheet, e.g. `styles.min.css`.
    pub fn style_file_name(&self) -> String {
        format!("{}{}.css", self.style.basename, self.style.suffix)
    }
}
