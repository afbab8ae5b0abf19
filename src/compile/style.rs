//! Stylesheet compiler.
//!
//! Sass is compiled with `grass`, then `lightningcss` adds vendor prefixes for
//! the configured browsers, minifies the result and produces a source map.

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use tracing::info;

use crate::compile::is_partial;
use crate::config::Config;
use crate::core::Environment;
use crate::error::StyleError;
use crate::io::{as_overhead, glob_files, write};
use crate::notice::{Category, Notice};

/// Compiles the stylesheet entry, notifying about and returning any error.
///
/// Signals a reload after the output has been written. Without an entry point
/// there is nothing to do and nothing is signalled.
pub fn compile(env: &Environment) -> anyhow::Result<()> {
    let start = Instant::now();

    match build(&env.config) {
        Ok(Some(path)) => {
            info!("compiled {} {}", path, as_overhead(start));
            env.reloader.signal();
            Ok(())
        }
        Ok(None) => {
            info!("no stylesheet entry point, skipping");
            Ok(())
        }
        Err(e) => {
            env.notifier.notify(Notice::new(Category::Style, &e));
            Err(e.into())
        }
    }
}

/// Compiles the single entry point and returns the path of the written CSS.
pub fn build(config: &Config) -> Result<Option<Utf8PathBuf>, StyleError> {
    let entries: Vec<_> = glob_files(&config.pattern(&config.style.source))?
        .into_iter()
        .filter(|path| !is_partial(path))
        .collect();

    let entry = match entries.as_slice() {
        [] => return Ok(None),
        [entry] => entry,
        _ => return Err(StyleError::MultipleEntries(entries)),
    };

    let load_paths: Vec<_> = config
        .style
        .include_paths
        .iter()
        .map(|path| config.path(path))
        .collect();

    let options = grass::Options::default()
        .style(grass::OutputStyle::Expanded)
        .load_paths(&load_paths);

    let css = grass::from_path(entry, &options)?;

    let name = config.style_file_name();
    let (code, map) = finish(&css, &config.root, entry, &name, &config.style.browsers)?;

    let dir = config.path(&config.style.output);
    let path = dir.join(&name);
    write(&path, code)?;
    write(&dir.join(format!("{name}.map")), map)?;

    Ok(Some(path))
}

/// Prefixes and minifies compiled CSS. Returns the code, ending with a
/// `sourceMappingURL` comment, and the JSON source map.
fn finish(
    css: &str,
    root: &Utf8Path,
    entry: &Utf8Path,
    name: &str,
    browsers: &[String],
) -> Result<(String, String), StyleError> {
    let browsers =
        Browsers::from_browserslist(browsers).map_err(|e| StyleError::Targets(e.to_string()))?;
    let targets = Targets {
        browsers,
        ..Targets::default()
    };

    let mut sheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: entry.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| StyleError::Css(e.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    let mut map = SourceMap::new(root.as_str());
    map.add_source(entry.as_str());
    map.set_source_content(0, css)
        .map_err(|e| StyleError::SourceMap(e.to_string()))?;

    let out = sheet
        .to_css(PrinterOptions {
            minify: true,
            source_map: Some(&mut map),
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    let map = map
        .to_json(None)
        .map_err(|e| StyleError::SourceMap(e.to_string()))?;
    let map = with_file(&map, name)?;

    let code = format!("{}\n/*# sourceMappingURL={name}.map */\n", out.code);

    Ok((code, map))
}

/// Sets the `file` field of a JSON source map.
fn with_file(map: &str, name: &str) -> Result<String, StyleError> {
    let mut json: serde_json::Value =
        serde_json::from_str(map).map_err(|e| StyleError::SourceMap(e.to_string()))?;

    if let Some(object) = json.as_object_mut() {
        object.insert("file".into(), name.into());
    }

    Ok(json.to_string())
}
