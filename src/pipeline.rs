//! The task graph of the asset pipeline and its two entry points.
//!
//! ```text
//! default = parallel(serve, watch)
//!   serve = sequence(compile, server)
//!   compile = parallel(templates, styles, scripts, markup)
//!   watch = parallel(watch:styles, watch:scripts, watch:markup, watch:templates)
//! build = sequence(compile:prod, package)
//!   compile:prod = parallel(templates, styles, scripts:prod)
//! ```

use std::sync::Arc;

use clap::ValueEnum;

use crate::compile::{script, style, template};
use crate::config::Config;
use crate::core::{Environment, Mode};
use crate::engine::runner::http;
use crate::engine::runner::watch::{WatchBinding, watch};
use crate::engine::runner::{Report, Scheduler};
use crate::engine::{Registry, TaskGraph, TaskId};
use crate::error::TsumikiError;
use crate::package;

/// Named entry points of the pipeline.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Compile everything, then serve with live reload while watching sources.
    Default,
    /// Compile for production, then copy the artifacts into the dist tree.
    Build,
}

#[derive(Debug)]
pub struct Pipeline {
    graph: Arc<TaskGraph>,
    default: TaskId,
    build: TaskId,
}

impl Pipeline {
    /// Registers every task. Watch patterns are taken from `config`.
    pub fn new(config: &Config) -> Result<Self, TsumikiError> {
        let mut registry = Registry::new();

        let templates = registry.leaf("templates", |ctx| template::compile(ctx))?;
        let styles = registry.leaf("styles", |ctx| style::compile(ctx))?;
        let scripts = registry.leaf("scripts", |ctx| script::compile(ctx, Mode::Development))?;
        let scripts_prod =
            registry.leaf("scripts:prod", |ctx| script::compile(ctx, Mode::Production))?;
        // compiled markup is served as is, it only needs a refresh
        let markup = registry.leaf("markup", |ctx| {
            ctx.reloader.signal();
            Ok(())
        })?;
        let package = registry.leaf("package", |ctx| package::run(ctx))?;
        let server = registry.deferred("server", http::start)?;

        let compile = registry.parallel("compile", [templates, styles, scripts, markup])?;
        let compile_prod = registry.parallel("compile:prod", [templates, styles, scripts_prod])?;
        let serve = registry.sequence("serve", [compile, server])?;

        let bindings = [
            WatchBinding::new("styles", vec![config.style.source.clone()], styles),
            WatchBinding::new("scripts", config.script.watch.clone(), scripts),
            WatchBinding::new("markup", vec![config.markup.watch.clone()], markup),
            WatchBinding::new(
                "templates",
                vec![format!(
                    "{}/**/*.{}",
                    config.template.source, config.template.extension
                )],
                templates,
            ),
        ];

        let watchers = bindings
            .into_iter()
            .map(|binding| {
                registry.leaf(format!("watch:{}", binding.name), move |ctx| {
                    watch(ctx, &binding)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let watch = registry.parallel("watch", watchers)?;

        let default = registry.parallel("default", [serve, watch])?;
        let build = registry.sequence("build", [compile_prod, package])?;

        Ok(Self {
            graph: Arc::new(registry.finish()?),
            default,
            build,
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn task(&self, command: Command) -> TaskId {
        match command {
            Command::Default => self.default,
            Command::Build => self.build,
        }
    }

    /// Runs `command` to completion. The default command only returns once
    /// every watcher has stopped.
    pub fn run(&self, env: Environment, command: Command) -> Result<Report, TsumikiError> {
        let scheduler = Scheduler::new(self.graph.clone(), Arc::new(env));
        scheduler.block_on(self.task(command))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use super::*;
    use crate::compile::script::{BundleRequest, Bundler};
    use crate::compile::tests::{environment, project, put};
    use crate::error::ScriptError;

    struct StaticBundler(Result<&'static str, &'static str>);

    impl Bundler for StaticBundler {
        fn bundle(&self, _: &BundleRequest) -> Result<String, ScriptError> {
            match self.0 {
                Ok(code) => Ok(code.into()),
                Err(e) => Err(ScriptError::Esbuild(e.into())),
            }
        }
    }

    fn names(pipeline: &Pipeline, ids: HashSet<TaskId>) -> HashSet<String> {
        ids.into_iter()
            .map(|id| pipeline.graph().name(id).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_default_never_packages() {
        let pipeline = Pipeline::new(&Config::default()).unwrap();
        let graph = pipeline.graph();

        let reachable = names(
            &pipeline,
            graph.reachable(pipeline.task(Command::Default)).unwrap(),
        );

        assert!(!reachable.contains("package"));
        assert!(!reachable.contains("scripts:prod"));
        assert!(reachable.contains("server"));
        assert!(reachable.contains("watch:templates"));
    }

    #[test]
    fn test_build_never_serves() {
        let pipeline = Pipeline::new(&Config::default()).unwrap();
        let graph = pipeline.graph();

        let reachable = names(
            &pipeline,
            graph.reachable(pipeline.task(Command::Build)).unwrap(),
        );

        assert_eq!(
            reachable,
            HashSet::from(
                ["build", "compile:prod", "templates", "styles", "scripts:prod", "package"]
                    .map(String::from)
            )
        );
    }

    #[test]
    fn test_serve_compiles_first() {
        let pipeline = Pipeline::new(&Config::default()).unwrap();
        let graph = pipeline.graph();

        let serve = graph.id("serve").unwrap();
        let children: Vec<_> = graph
            .children(serve)
            .unwrap()
            .iter()
            .map(|&id| graph.name(id).unwrap())
            .collect();

        assert_eq!(children, ["compile", "server"]);
        assert_eq!(graph.kind(serve).unwrap(), crate::engine::Kind::Sequence);
        assert_eq!(
            graph.kind(graph.id("compile").unwrap()).unwrap(),
            crate::engine::Kind::Parallel
        );
    }

    fn site(root: &camino::Utf8Path) {
        put(root, "src/sass/_vars.scss", "$gap: 4px;");
        put(root, "src/sass/main.scss", "@use 'vars';\n.a { margin: vars.$gap; }");
        put(root, "src/templates/index.jinja", "<body>home</body>");
        put(root, "src/js/main.js", "console.log(1);");
        put(root, "src/fonts/a.woff2", "font");
    }

    #[test]
    fn test_build() {
        let (_dir, root) = project();
        site(&root);

        let (mut env, recorder) = environment(&root);
        env.config.package.dist = "dist".into();
        let env = env.with_bundler(Arc::new(StaticBundler(Ok(
            "// bundled\nconsole.log(1 + 2);\n",
        ))));

        let pipeline = Pipeline::new(&env.config).unwrap();
        let report = pipeline.run(env, Command::Build).unwrap();

        assert!(report.is_success(), "{report}");
        assert!(report.completed_before("compile:prod", "package"));
        assert!(recorder.notices().is_empty());

        let dist = root.join("dist");
        let css = fs::read_to_string(dist.join("css/styles.min.css")).unwrap();
        assert!(css.contains("margin:4px"));
        assert!(dist.join("css/styles.min.css.map").is_file());
        let js = fs::read_to_string(dist.join("js/scripts.min.js")).unwrap();
        assert!(js.contains("console.log("));
        assert!(!js.contains("bundled"));
        assert!(dist.join("html/index.html").is_file());
        assert!(dist.join("fonts/a.woff2").is_file());
        assert!(!dist.join("images").exists());
    }

    #[test]
    fn test_build_with_empty_image_directory() {
        let (_dir, root) = project();
        site(&root);
        fs::create_dir_all(root.join("src/images/icons")).unwrap();

        let (mut env, _) = environment(&root);
        env.config.package.dist = "dist".into();
        let env = env.with_bundler(Arc::new(StaticBundler(Ok("console.log(1);"))));

        let pipeline = Pipeline::new(&env.config).unwrap();
        let report = pipeline.run(env, Command::Build).unwrap();

        assert!(report.is_success(), "{report}");
        assert!(root.join("dist/css/styles.min.css").is_file());
        assert!(!root.join("dist/images").exists());
    }

    #[test]
    fn test_build_packages_after_failure() {
        let (_dir, root) = project();
        site(&root);

        let (mut env, recorder) = environment(&root);
        env.config.package.dist = "dist".into();
        let env = env.with_bundler(Arc::new(StaticBundler(Err("Unexpected token"))));

        let pipeline = Pipeline::new(&env.config).unwrap();
        let report = pipeline.run(env, Command::Build).unwrap();

        let failed: Vec<_> = report.failures().map(|e| e.name.to_string()).collect();
        assert_eq!(failed, ["scripts:prod", "compile:prod", "build"]);
        assert!(report.get("package").unwrap().outcome.is_success());
        assert!(root.join("dist/css/styles.min.css").is_file());
        assert!(!root.join("dist/js").exists());
        // production bundling is silent
        assert!(recorder.notices().is_empty());
    }
}
