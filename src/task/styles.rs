use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets as CssTargets};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;

use crate::config::Targets;
use crate::engine::StepContext;
use crate::task::{Emitted, SourceIndex, Variant, expand, report, require_dir, source_url};
use crate::utils::write_file;

/// Errors that can occur when compiling stylesheets. None of them stop the
/// pipeline.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("Sass compilation error in {0}:\n{1}")]
    Sass(Utf8PathBuf, Box<grass::Error>),

    #[error("CSS error in {0}:\n{1}")]
    Css(Utf8PathBuf, String),

    #[error("Couldn't read {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),
}

struct Compiled {
    /// Output path relative to the output root.
    path: Utf8PathBuf,
    code: String,
    map: Option<String>,
}

/// Compiles every `scss/**/*.scss` entry into `css/`. Files starting with
/// `_` are partials, only reachable through `@import` and `@use`.
///
/// Browser stylesheets are minified in production and get a source map in
/// development. Backend stylesheets only get prefixed.
pub fn build(ctx: &StepContext<'_>, variant: Variant) -> anyhow::Result<Emitted> {
    let env = ctx.env;
    let root = require_dir(env, "scss")?;

    let entries: Vec<_> = expand(&root, "**/*.scss")?
        .into_iter()
        .filter(|path| !path.file_name().is_some_and(|name| name.starts_with('_')))
        .collect();

    let browser = variant == Variant::Browser;
    let minify = browser && env.mode.is_production();
    let maps = browser && !env.mode.is_production();
    let targets = css_targets(&env.targets);

    let results: Vec<_> = entries
        .par_iter()
        .map(|path| compile(&root, path, targets, minify, maps))
        .collect();

    let mut compiled = Vec::with_capacity(results.len());
    let mut failed = false;
    for result in results {
        match result {
            Ok(item) => compiled.push(item),
            Err(e) => {
                report(ctx, &e);
                failed = true;
            }
        }
    }

    if failed {
        return Ok(Emitted::default());
    }

    let mut emitted = Emitted::default();
    for item in compiled {
        write_file(&env.dist(&item.path), &item.code)?;
        let map_path = Utf8PathBuf::from(format!("{}.map", item.path));
        emitted.files.push(item.path);

        if let Some(map) = item.map {
            write_file(&env.dist(&map_path), map)?;
            emitted.files.push(map_path);
        }
    }

    tracing::info!(step = ctx.name, "compiled {} stylesheets", entries.len());
    Ok(emitted)
}

fn compile(
    root: &Utf8Path,
    path: &Utf8Path,
    targets: CssTargets,
    minify: bool,
    maps: bool,
) -> Result<Compiled, StyleError> {
    let options = grass::Options::default()
        .style(grass::OutputStyle::Expanded)
        .load_path(root);

    let css =
        grass::from_path(path, &options).map_err(|e| StyleError::Sass(path.to_path_buf(), e))?;
    let mut code = process(&css, path, targets, minify)?;

    let rel = path
        .strip_prefix(root)
        .unwrap_or_else(|_| Utf8Path::new(path.file_name().unwrap_or_default()));
    let out = Utf8Path::new("css").join(rel).with_extension("css");

    let map = if maps {
        let name = out.file_name().unwrap_or_default();
        let source =
            std::fs::read_to_string(path).map_err(|e| StyleError::Read(path.to_path_buf(), e))?;

        // Sass reports no positions, the map only indexes the entry file.
        let map_path = Utf8PathBuf::from(format!("{out}.map"));
        let mut map = SourceIndex::new(name);
        map.add_source(source_url(&map_path, &format!("scss/{rel}")), source);

        code.push_str(&format!("\n/*# sourceMappingURL={name}.map */\n"));
        let json = map
            .to_json()
            .map_err(|e| StyleError::Css(path.to_path_buf(), e.to_string()))?;
        Some(json)
    } else {
        None
    };

    Ok(Compiled {
        path: out,
        code,
        map,
    })
}

/// Adds vendor prefixes for `targets` and optionally minifies.
fn process(
    css: &str,
    path: &Utf8Path,
    targets: CssTargets,
    minify: bool,
) -> Result<String, StyleError> {
    let error = |e: &dyn Display| StyleError::Css(path.to_path_buf(), e.to_string());

    let options = ParserOptions {
        filename: path.to_string(),
        ..ParserOptions::default()
    };

    let mut sheet = StyleSheet::parse(css, options).map_err(|e| error(&e))?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| error(&e))?;

    let result = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| error(&e))?;

    Ok(result.code)
}

/// Browser versions are encoded as `major << 16 | minor << 8 | patch`.
fn css_targets(targets: &Targets) -> CssTargets {
    let version = |major: u32| Some(major << 16);

    Browsers {
        chrome: version(targets.chrome),
        firefox: version(targets.firefox),
        safari: version(targets.safari),
        edge: version(targets.edge),
        ios_saf: version(targets.ios),
        samsung: version(targets.samsung),
        ..Browsers::default()
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::task::tests::{Project, with_context};

    const MAIN: &str = "@import 'base/vars';\n\n.card {\n  color: $accent;\n\n  .title {\n    margin: 0px 0px 0px 0px;\n  }\n}\n";
    const VARS: &str = "$accent: #ff0000;\n";

    fn project() -> Project {
        let project = Project::new();
        project
            .file("scss/main.scss", MAIN)
            .file("scss/base/_vars.scss", VARS);
        project
    }

    #[test]
    fn development_writes_source_maps() {
        let project = project();
        let env = project.env(Mode::Development);

        let emitted = with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        assert_eq!(
            emitted.files,
            vec![
                Utf8PathBuf::from("css/main.css"),
                Utf8PathBuf::from("css/main.css.map")
            ]
        );
        assert!(!project.exists("css/base/_vars.css"));

        let css = project.read("css/main.css");
        assert!(css.contains(".card .title"));
        assert!(css.trim_end().ends_with("/*# sourceMappingURL=main.css.map */"));

        let map: serde_json::Value = serde_json::from_str(&project.read("css/main.css.map")).unwrap();
        assert_eq!(map["sources"][0], "../scss/main.scss");
        assert_eq!(map["sourcesContent"][0], MAIN);
    }

    #[test]
    fn production_is_minified_and_smaller() {
        let dev = project();
        let env = dev.env(Mode::Development);
        with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        let prod = project();
        let env = prod.env(Mode::Production);
        let emitted = with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        assert_eq!(emitted.files, vec![Utf8PathBuf::from("css/main.css")]);
        assert!(!prod.exists("css/main.css.map"));

        let small = prod.read("css/main.css");
        assert!(small.len() <= dev.read("css/main.css").len());
        assert!(!small.contains("  "));
        assert!(small.contains(".card .title"));
    }

    #[test]
    fn backend_ignores_production_mode() {
        let build_in = |mode| {
            let project = project();
            project.file("scss/select.scss", ".chip {\n  user-select: none;\n}\n");

            let env = project.env(mode);
            let emitted = with_context(&env, |ctx| build(ctx, Variant::Backend)).unwrap();
            assert_eq!(
                emitted.files,
                vec![
                    Utf8PathBuf::from("css/main.css"),
                    Utf8PathBuf::from("css/select.css")
                ]
            );
            assert!(!project.exists("css/main.css.map"));

            (project.read("css/main.css"), project.read("css/select.css"))
        };

        let production = build_in(Mode::Production);
        let development = build_in(Mode::Development);
        assert_eq!(production, development);

        let (main, select) = production;
        assert!(main.contains("\n  "), "{main}");
        assert!(!main.contains("sourceMappingURL"));
        assert!(select.contains("-webkit-user-select"), "{select}");
    }

    #[test]
    fn syntax_error_is_reported_not_fatal() {
        let project = Project::new();
        project
            .file("scss/main.scss", ".a { color: red; }\n")
            .file("scss/broken.scss", ".a { color: $missing; }\n");

        let env = project.env(Mode::Development);
        let emitted = with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        assert!(emitted.is_empty());
        assert!(!project.exists("css/main.css"));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let project = Project::new();
        let env = project.env(Mode::Development);

        assert!(with_context(&env, |ctx| build(ctx, Variant::Browser)).is_err());
    }

    #[test]
    fn targets_use_lightningcss_versions() {
        let targets = css_targets(&Targets::default());
        let browsers = targets.browsers.unwrap();

        assert_eq!(browsers.chrome, Some(80 << 16));
        assert_eq!(browsers.ios_saf, Some(12 << 16));
        assert_eq!(browsers.opera, None);
    }
}
