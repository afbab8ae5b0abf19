//! Template compiler.
//!
//! Pages are rendered with `minijinja` from the template directory, which is
//! also the loader root, so layouts and partials work through `extends` and
//! `include`. Files whose name begins with `_` are only ever included.

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use minijinja::{context, path_loader};
use tracing::info;

use crate::compile::is_partial;
use crate::config::Config;
use crate::core::Environment;
use crate::error::TemplateError;
use crate::io::{as_overhead, glob_files, write};
use crate::notice::{Category, Notice};

/// Renders every page. Failed pages are reported together in one notice.
pub fn compile(env: &Environment) -> anyhow::Result<()> {
    let start = Instant::now();

    match render_all(&env.config) {
        Ok(pages) => {
            info!("rendered {} pages {}", pages.len(), as_overhead(start));
            env.reloader.signal();
            Ok(())
        }
        Err(e) => {
            env.notifier.notify(Notice::new(Category::Template, &e));
            Err(e.into())
        }
    }
}

/// Renders all pages and returns the paths written.
///
/// A page which fails to render does not stop the others, its error is
/// collected into [`TemplateError::Pages`].
pub fn render_all(config: &Config) -> Result<Vec<Utf8PathBuf>, TemplateError> {
    let template = &config.template;
    let source = config.path(&template.source);
    let output = config.path(&template.output);

    let files = glob_files(&format!("{source}/**/*.{}", template.extension))?;

    let mut jinja = minijinja::Environment::new();
    jinja.set_loader(path_loader(&source));
    jinja.set_trim_blocks(true);
    jinja.set_lstrip_blocks(true);

    let mut written = Vec::new();
    let mut failures = Vec::new();
    for file in files.iter().filter(|file| !is_partial(file)) {
        let Ok(name) = file.strip_prefix(&source) else {
            continue;
        };

        match render_page(&jinja, name, &output, template.indent_width) {
            Ok(path) => written.push(path),
            Err(e) => failures.push((file.clone(), e)),
        }
    }

    if !failures.is_empty() {
        return Err(TemplateError::Pages(failures));
    }

    Ok(written)
}

fn render_page(
    jinja: &minijinja::Environment,
    name: &Utf8Path,
    output: &Utf8Path,
    width: usize,
) -> Result<Utf8PathBuf, TemplateError> {
    let html = jinja.get_template(name.as_str())?.render(context! {})?;
    let html = indent_with_tabs(&html, width);

    let path = output.join(name).with_extension("html");
    write(&path, html)?;
    Ok(path)
}

/// Rewrites leading indentation so that every `width` columns become one tab.
///
/// Existing tabs count as a full level, leftover spaces are kept.
pub fn indent_with_tabs(text: &str, width: usize) -> String {
    if width == 0 {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let body = line.trim_start_matches([' ', '\t']);
        let columns: usize = line[..line.len() - body.len()]
            .chars()
            .map(|c| if c == '\t' { width } else { 1 })
            .sum();

        out.extend(std::iter::repeat_n('\t', columns / width));
        out.extend(std::iter::repeat_n(' ', columns % width));
        out.push_str(body);
    }

    out
}
