//! Script bundler.
//!
//! Bundling is delegated to a [`Bundler`]; the default one runs the `esbuild`
//! binary. Production output gets a separate minification pass with `oxc`.
//!
//! esbuild only knows a single target per bundle, so [`Esbuild`] works in
//! three passes: it resolves the module graph, lowers the modules picked by the
//! [`TranspileRule`] into a staged copy of the project, and bundles the staged
//! copy without a target.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;
use serde::Deserialize;
use serde::de::IgnoredAny;
use tracing::{debug, info};

use crate::config::TranspileRule;
use crate::core::{Environment, Mode};
use crate::error::ScriptError;
use crate::io::{as_overhead, write};
use crate::notice::{Category, Notice};

/// Scratch directory for the staged project, relative to the root.
const STAGE: &str = "node_modules/.cache/tsumiki";

/// A single bundling job.
#[derive(Debug, Clone, Copy)]
pub struct BundleRequest<'a> {
    /// Working directory of the bundler.
    pub root: &'a Utf8Path,
    pub entry: &'a Utf8Path,
    pub mode: Mode,
    /// Syntax level the modules selected by `rule` are lowered to.
    pub target: &'a str,
    pub rule: &'a TranspileRule,
}

/// Resolves the module graph of an entry point into a single script.
pub trait Bundler: Send + Sync {
    fn bundle(&self, request: &BundleRequest) -> Result<String, ScriptError>;
}

/// Bundles with the `esbuild` command line tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct Esbuild;

impl Esbuild {
    /// Prefers the project-local binary installed by npm over the one on PATH.
    pub fn binary(root: &Utf8Path) -> Result<PathBuf, ScriptError> {
        let local = root.join("node_modules/.bin/esbuild");
        if local.is_file() {
            return Ok(local.into_std_path_buf());
        }

        which::which("esbuild").map_err(|_| ScriptError::Missing)
    }

    /// Resolves the bundle only to record its inputs in `stage/meta.json`.
    pub fn graph_args(entry: &Utf8Path, stage: &Utf8Path) -> Vec<String> {
        vec![
            entry.to_string(),
            "--bundle".to_string(),
            "--log-level=error".to_string(),
            format!("--metafile={stage}/meta.json"),
            format!("--outfile={stage}/graph.js"),
        ]
    }

    /// Lowers each module on its own, keeping the layout below `tree`.
    pub fn lower_args(modules: &[Utf8PathBuf], tree: &Utf8Path, target: &str) -> Vec<String> {
        let mut args: Vec<_> = modules.iter().map(ToString::to_string).collect();
        args.extend([
            "--log-level=error".to_string(),
            "--outbase=.".to_string(),
            format!("--outdir={tree}"),
            format!("--target={target}"),
        ]);
        args
    }

    /// Bundles the staged tree, printing the result to stdout.
    pub fn bundle_args(entry: &Utf8Path, mode: Mode) -> Vec<String> {
        let mut args = vec![
            entry.to_string(),
            "--bundle".to_string(),
            "--log-level=error".to_string(),
        ];

        if mode == Mode::Development {
            args.push("--sourcemap=inline".to_string());
        }

        args
    }

    fn exec(binary: &Path, cwd: &Utf8Path, args: Vec<String>) -> Result<String, ScriptError> {
        let output = Command::new(binary)
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(ScriptError::Esbuild(String::from_utf8(output.stderr)?));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl Bundler for Esbuild {
    fn bundle(&self, request: &BundleRequest) -> Result<String, ScriptError> {
        let binary = Self::binary(request.root)?;
        let entry = request
            .entry
            .strip_prefix(request.root)
            .map_err(|_| ScriptError::OutsideRoot(request.entry.to_path_buf()))?;

        let stage = request.root.join(STAGE);
        let tree = stage.join("tree");
        if stage.exists() {
            fs::remove_dir_all(&stage)?;
        }
        fs::create_dir_all(&tree)?;

        Self::exec(&binary, request.root, Self::graph_args(entry, &stage))?;
        let modules = read_metafile(&fs::read_to_string(stage.join("meta.json"))?)?;

        let staging = Staging::plan(modules, request.rule);
        debug!(
            lowered = staging.lowered.len(),
            copied = staging.copied.len(),
            "staging modules"
        );

        if !staging.lowered.is_empty() {
            let args = Self::lower_args(&staging.lowered, &tree, request.target);
            Self::exec(&binary, request.root, args)?;
        }
        staging.copy(request.root, &tree)?;

        Self::exec(&binary, &tree, Self::bundle_args(entry, request.mode))
    }
}

#[derive(Deserialize)]
struct Metafile {
    inputs: BTreeMap<Utf8PathBuf, IgnoredAny>,
}

/// Lists the modules recorded in an esbuild metafile, relative to the root.
///
/// Virtual modules and paths leaving the root are skipped.
pub fn read_metafile(json: &str) -> Result<Vec<Utf8PathBuf>, ScriptError> {
    let metafile: Metafile = serde_json::from_str(json)?;

    Ok(metafile
        .inputs
        .into_keys()
        .filter(|path| {
            !path.as_str().contains(':')
                && path.components().all(|c| matches!(c, Utf8Component::Normal(_)))
        })
        .collect())
}

/// Modules of one bundle split by a [`TranspileRule`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Staging {
    /// Lowered into the staged tree by esbuild.
    pub lowered: Vec<Utf8PathBuf>,
    /// Copied into the staged tree as they are.
    pub copied: Vec<Utf8PathBuf>,
}

impl Staging {
    pub fn plan(modules: Vec<Utf8PathBuf>, rule: &TranspileRule) -> Self {
        let (lowered, copied): (Vec<_>, Vec<_>) = modules
            .into_iter()
            .partition(|module| module.extension() == Some("js") && rule.applies_to(module));

        Self { lowered, copied }
    }

    /// Copies the modules which are not lowered, together with every
    /// `package.json` above any module, so that resolution in `tree` finds the
    /// same files it found in `root`.
    pub fn copy(&self, root: &Utf8Path, tree: &Utf8Path) -> std::io::Result<()> {
        let mut files: BTreeSet<Utf8PathBuf> = self.copied.iter().cloned().collect();

        for module in self.lowered.iter().chain(&self.copied) {
            for dir in module.ancestors().skip(1) {
                let manifest = dir.join("package.json");
                if root.join(&manifest).is_file() {
                    files.insert(manifest);
                }
            }
        }

        for file in files {
            let dest = tree.join(&file);
            if let Some(dir) = dest.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::copy(root.join(&file), dest)?;
        }

        Ok(())
    }
}

impl TranspileRule {
    /// Whether a module at `path` is lowered to the configured target.
    ///
    /// Everything outside the excluded dependency directory is, and so are the
    /// allowed packages inside it.
    pub fn applies_to(&self, path: &Utf8Path) -> bool {
        let mut components = path.components().map(|c| c.as_str());

        while let Some(component) = components.next() {
            if component == self.exclude {
                return components
                    .next()
                    .is_some_and(|package| self.allow.iter().any(|allow| allow == package));
            }
        }

        true
    }
}

/// Bundles the entry point for `mode`.
///
/// In development a failure is notified and a success signals a reload. In
/// production failures are only returned and nothing is signalled.
pub fn compile(env: &Environment, mode: Mode) -> anyhow::Result<()> {
    let start = Instant::now();

    match build(env, mode) {
        Ok(()) => {
            info!(?mode, "bundled scripts {}", as_overhead(start));
            if mode == Mode::Development {
                env.reloader.signal();
            }
            Ok(())
        }
        Err(e) => {
            if mode == Mode::Development {
                env.notifier.notify(Notice::new(Category::Script, &e));
            }
            Err(e.into())
        }
    }
}

fn build(env: &Environment, mode: Mode) -> Result<(), ScriptError> {
    let config = &env.config;
    let script = &config.script;
    let entry = config.path(&script.entry);

    let request = BundleRequest {
        root: &config.root,
        entry: &entry,
        mode,
        target: &script.target,
        rule: &script.transpile,
    };

    let code = env.bundler.bundle(&request)?;
    let code = match mode {
        Mode::Development => code,
        Mode::Production => minify(&code)?,
    };

    write(&config.path(&script.output), code)?;

    Ok(())
}

/// Mangles, compresses and strips every comment from a script.
pub fn minify(source: &str) -> Result<String, ScriptError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();

    if !ret.errors.is_empty() {
        let errors: Vec<_> = ret.errors.iter().map(|e| e.to_string()).collect();
        return Err(ScriptError::Minify(errors.join("\n")));
    }

    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);

    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code;

    Ok(code)
}
