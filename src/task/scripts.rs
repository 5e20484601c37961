use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::diagnostics::OxcDiagnostic;
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc::span::SourceType;
use oxc::transformer::{TransformOptions, Transformer};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;

use crate::engine::StepContext;
use crate::task::{Emitted, IndexMap, Variant, expand, report, require_dir, source_url};
use crate::utils::{relative, write_file};

/// Script groups in bundle order, relative to `js/`.
const SOURCES: [&str; 3] = ["vendor/*.js", "components/*.js", "app.js"];

/// Name of the bundle inside `js/`.
const BUNDLE: &str = "app.js";

/// Language level scripts are lowered to.
const TARGET: &str = "es2015";

/// A transpiled source and, in development, its map.
struct Chunk {
    code: String,
    map: Option<String>,
}

/// Errors reported by the script toolchain. None of them stop the pipeline.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Couldn't parse {0}:\n{1}")]
    Parse(Utf8PathBuf, String),

    #[error("Couldn't transpile {0}:\n{1}")]
    Transpile(Utf8PathBuf, String),

    #[error("Couldn't minify the bundle:\n{0}")]
    Minify(String),
}

/// Builds `js/app.js` for the browser: every source is lowered to ES2015,
/// then the results are concatenated in order (vendor, components, app).
/// The bundle is minified in production. In development it gets an index map
/// with one section per source, placed at the line where that source starts.
///
/// The backend variant copies the sources unchanged into `js/`.
pub fn build(ctx: &StepContext<'_>, variant: Variant) -> anyhow::Result<Emitted> {
    let env = ctx.env;
    let root = require_dir(env, "js")?;

    let mut sources = Vec::new();
    for pattern in SOURCES {
        sources.extend(expand(&root, pattern)?);
    }

    if variant == Variant::Backend {
        return copy(ctx, &sources);
    }

    let files = sources
        .into_iter()
        .map(|path| -> std::io::Result<_> {
            let text = std::fs::read_to_string(&path)?;
            Ok((path, text))
        })
        .collect::<std::io::Result<Vec<_>>>()?;

    let options = TransformOptions::from_target(TARGET).map_err(|e| anyhow::anyhow!(e))?;

    let out = Utf8Path::new("js").join(BUNDLE);
    let map_path = Utf8PathBuf::from(format!("{out}.map"));
    let maps = !env.mode.is_production();

    let results: Vec<_> = files
        .par_iter()
        .map(|(path, text)| {
            let url = maps.then(|| {
                let rel = relative(path, &env.source).unwrap_or_else(|| path.to_string());
                source_url(&map_path, &rel)
            });
            transpile(path, text, &options, url.as_deref())
        })
        .collect();

    let mut chunks = Vec::with_capacity(results.len());
    let mut failed = false;
    for result in results {
        match result {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => {
                report(ctx, &e);
                failed = true;
            }
        }
    }

    if failed {
        return Ok(Emitted::default());
    }

    let mut bundle = String::new();
    let mut index = IndexMap::new(BUNDLE);
    let mut line = 0;

    for chunk in &chunks {
        if let Some(map) = &chunk.map {
            index.add_section(line, map)?;
        }

        bundle.push_str(&chunk.code);
        if !bundle.ends_with('\n') {
            bundle.push('\n');
        }
        line = bundle.matches('\n').count();
    }

    let mut emitted = Emitted::default();

    if maps {
        bundle.push_str(&format!("//# sourceMappingURL={BUNDLE}.map\n"));
        write_file(&env.dist(&out), &bundle)?;
        write_file(&env.dist(&map_path), index.to_json()?)?;
        emitted.files.push(out);
        emitted.files.push(map_path);
    } else {
        let bundle = match minify(&bundle) {
            Ok(code) => code,
            Err(e) => {
                report(ctx, &e);
                return Ok(Emitted::default());
            }
        };

        write_file(&env.dist(&out), &bundle)?;
        emitted.files.push(out);
    }

    tracing::info!(step = ctx.name, "bundled {} scripts", chunks.len());
    Ok(emitted)
}

/// Copies every source into `js/` without its group directory.
fn copy(ctx: &StepContext<'_>, sources: &[Utf8PathBuf]) -> anyhow::Result<Emitted> {
    let mut emitted = Emitted::default();

    for path in sources {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("script without a file name: {path}"))?;
        let out = Utf8Path::new("js").join(name);

        let data = std::fs::read(path)?;
        write_file(&ctx.env.dist(&out), data)?;
        emitted.files.push(out);
    }

    tracing::info!(step = ctx.name, "copied {} scripts", emitted.len());
    Ok(emitted)
}

fn join_errors(errors: &[OxcDiagnostic]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowers a single classic script to the configured language level. With a
/// `map_source`, the result carries a map back to the original text, which
/// is listed under that name.
fn transpile(
    path: &Utf8Path,
    source: &str,
    options: &TransformOptions,
    map_source: Option<&str>,
) -> Result<Chunk, ScriptError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();
    if !ret.errors.is_empty() {
        return Err(ScriptError::Parse(path.to_owned(), join_errors(&ret.errors)));
    }

    let mut program = ret.program;
    let scoping = SemanticBuilder::new()
        .build(&program)
        .semantic
        .into_scoping();

    let ret = Transformer::new(&allocator, path.as_std_path(), options)
        .build_with_scoping(scoping, &mut program);
    if !ret.errors.is_empty() {
        return Err(ScriptError::Transpile(
            path.to_owned(),
            join_errors(&ret.errors),
        ));
    }

    let ret = Codegen::new()
        .with_options(CodegenOptions {
            source_map_path: map_source.map(PathBuf::from),
            ..CodegenOptions::default()
        })
        .build(&program);

    Ok(Chunk {
        code: ret.code,
        map: ret.map.map(|map| map.to_json_string()),
    })
}

/// Minifies the bundle. Top-level names stay intact, other scripts on the
/// page may refer to them.
fn minify(source: &str) -> Result<String, ScriptError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();
    if !ret.errors.is_empty() {
        return Err(ScriptError::Minify(join_errors(&ret.errors)));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::task::tests::{Project, with_context};

    fn project() -> Project {
        let project = Project::new();
        project
            .file("js/app.js", "console.log(\"app-marker\");\n")
            .file(
                "js/components/menu.js",
                "function openMenu(element) {\n  element.classList.add(\"open\");\n}\nconsole.log(\"component-marker\");\n",
            )
            .file("js/vendor/lib.js", "var vendorMarker = 1;\nconsole.log(\"vendor-marker\");\n")
            .file("js/vendor/nested/skipped.js", "console.log(\"nested-marker\");\n");
        project
    }

    fn assert_order(bundle: &str) {
        let vendor = bundle.find("vendor-marker").unwrap();
        let component = bundle.find("component-marker").unwrap();
        let app = bundle.find("app-marker").unwrap();

        assert!(vendor < component && component < app, "{bundle}");
        assert!(!bundle.contains("nested-marker"));
    }

    #[test]
    fn development_bundle_keeps_order_and_maps() {
        let project = project();
        let env = project.env(Mode::Development);

        let emitted = with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();
        assert_eq!(
            emitted.files,
            vec![
                Utf8PathBuf::from("js/app.js"),
                Utf8PathBuf::from("js/app.js.map")
            ]
        );

        let bundle = project.read("js/app.js");
        assert_order(&bundle);
        assert!(bundle.contains("vendorMarker"));
        assert!(bundle.trim_end().ends_with("//# sourceMappingURL=app.js.map"));

        let map: serde_json::Value = serde_json::from_str(&project.read("js/app.js.map")).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["file"], "app.js");

        let sections = map["sections"].as_array().unwrap();
        let sources: Vec<_> = sections
            .iter()
            .map(|s| s["map"]["sources"][0].as_str().unwrap())
            .collect();
        assert_eq!(
            sources,
            vec!["../js/vendor/lib.js", "../js/components/menu.js", "../js/app.js"]
        );

        // Each section starts on the line where its source begins.
        let lines: Vec<_> = bundle.lines().collect();
        for (section, marker) in sections.iter().zip(["vendorMarker", "function", "app-marker"]) {
            let line = section["offset"]["line"].as_u64().unwrap() as usize;
            assert!(lines[line].contains(marker), "{marker} not at line {line}");
            assert_eq!(section["offset"]["column"], 0);
        }

        // The first segment of the app section maps column 0 to the start of
        // the first source.
        let app = &sections[2]["map"];
        assert_eq!(app["sourcesContent"][0], "console.log(\"app-marker\");\n");
        let mappings = app["mappings"].as_str().unwrap();
        assert!(!mappings.is_empty());

        let first = mappings.split([',', ';']).next().unwrap();
        assert_eq!(decode_vlq(first), vec![0, 0, 0, 0]);
    }

    /// Decodes one base64 VLQ segment of a source map.
    fn decode_vlq(segment: &str) -> Vec<i64> {
        const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

        let mut values = Vec::new();
        let mut value = 0i64;
        let mut shift = 0;

        for c in segment.chars() {
            let digit = ALPHABET.find(c).unwrap() as i64;
            value += (digit & 31) << shift;

            if digit & 32 == 0 {
                let negative = value & 1 == 1;
                value >>= 1;
                values.push(if negative { -value } else { value });
                value = 0;
                shift = 0;
            } else {
                shift += 5;
            }
        }

        values
    }

    #[test]
    fn production_bundle_is_smaller() {
        let dev = project();
        let env = dev.env(Mode::Development);
        with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        let prod = project();
        let env = prod.env(Mode::Production);
        let emitted = with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        assert_eq!(emitted.files, vec![Utf8PathBuf::from("js/app.js")]);
        assert!(!prod.exists("js/app.js.map"));

        let small = prod.read("js/app.js");
        assert_order(&small);
        assert!(small.len() <= dev.read("js/app.js").len());
    }

    #[test]
    fn newer_syntax_is_lowered() {
        let project = Project::new();
        project.file("js/app.js", "var power = 2 ** 10;\n");

        let env = project.env(Mode::Development);
        with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        let bundle = project.read("js/app.js");
        assert!(!bundle.contains("**"), "{bundle}");
        assert!(bundle.contains("Math.pow"));
    }

    #[test]
    fn syntax_error_is_reported_not_fatal() {
        let project = Project::new();
        project.file("js/app.js", "function (\n");

        let env = project.env(Mode::Development);
        let emitted = with_context(&env, |ctx| build(ctx, Variant::Browser)).unwrap();

        assert!(emitted.is_empty());
        assert!(!project.exists("js/app.js"));
    }

    #[test]
    fn backend_copies_sources_unchanged() {
        let project = project();
        let env = project.env(Mode::Production);

        let emitted = with_context(&env, |ctx| build(ctx, Variant::Backend)).unwrap();
        assert_eq!(
            emitted.files,
            vec![
                Utf8PathBuf::from("js/lib.js"),
                Utf8PathBuf::from("js/menu.js"),
                Utf8PathBuf::from("js/app.js")
            ]
        );

        assert_eq!(
            project.read("js/lib.js"),
            "var vendorMarker = 1;\nconsole.log(\"vendor-marker\");\n"
        );
        assert_eq!(project.read("js/app.js"), "console.log(\"app-marker\");\n");
        assert!(!project.exists("js/app.js.map"));
    }
}
