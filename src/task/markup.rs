//! Assembles top-level pages from partials.
//!
//! A page pulls in a partial with `@include('partials/head.html')`. The path
//! is relative to the file containing the directive. An optional JSON object
//! passes parameters, `@include('card.html', { "title": "Hello" })`, and every
//! `@title` marker inside the partial is replaced by the value. Partials can
//! include other partials and inherit the parameters of their parent.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::engine::StepContext;
use crate::error::SourceError;
use crate::task::{Emitted, expand};
use crate::utils::{normalize_path, write_file};

static INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@include\(\s*['"]([^'"]+)['"]\s*(?:,\s*(\{[\s\S]*?\})\s*)?\)"#)
        .expect("Invalid include pattern")
});

type Params = Map<String, Value>;

/// Errors that abort the markup step.
#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("Couldn't read {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("{from} includes {target}, which does not exist")]
    Missing { from: Utf8PathBuf, target: Utf8PathBuf },

    #[error("Invalid include parameters in {0}.\n{1}")]
    Params(Utf8PathBuf, serde_json::Error),

    #[error("Include cycle: {}", .0.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(" -> "))]
    Cycle(Vec<Utf8PathBuf>),
}

/// Writes every top-level `*.html` page of the source root, with includes
/// resolved, into the output root. Pages in subdirectories are partials and
/// are only used through includes.
///
/// When a live-reload socket is attached, its client script is inserted
/// before `</body>`.
pub fn build(ctx: &StepContext<'_>) -> anyhow::Result<Emitted> {
    let env = ctx.env;
    if !env.source.is_dir() {
        return Err(SourceError::Missing(env.source.clone()).into());
    }

    let script = env.refresh_script();
    let mut emitted = Emitted::default();

    for page in expand(&env.source, "*.html")? {
        let mut stack = vec![normalize_path(&page)];
        let mut html = assemble(&page, &Params::new(), &mut stack)?;

        if let Some(script) = &script {
            html = inject_script(&html, script);
        }

        let Some(name) = page.file_name() else {
            continue;
        };

        write_file(&env.dist(name), html)?;
        emitted.files.push(Utf8PathBuf::from(name));
    }

    tracing::info!(step = ctx.name, "assembled {} pages", emitted.len());
    Ok(emitted)
}

/// Reads `path` and recursively replaces its include directives. `stack`
/// holds the chain of files being assembled, innermost last.
fn assemble(
    path: &Utf8Path,
    params: &Params,
    stack: &mut Vec<Utf8PathBuf>,
) -> Result<String, IncludeError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| IncludeError::Read(path.to_path_buf(), e))?;
    let text = substitute(&text, params);
    let base = path.parent().unwrap_or(Utf8Path::new(""));

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in INCLUDE.captures_iter(&text) {
        let (Some(whole), Some(rel)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        let target = normalize_path(&base.join(rel.as_str()));

        if stack.contains(&target) {
            let mut chain = stack.clone();
            chain.push(target);
            return Err(IncludeError::Cycle(chain));
        }

        if !target.is_file() {
            return Err(IncludeError::Missing {
                from: path.to_path_buf(),
                target,
            });
        }

        let mut inner = params.clone();
        if let Some(json) = caps.get(2) {
            let own: Params = serde_json::from_str(json.as_str())
                .map_err(|e| IncludeError::Params(path.to_path_buf(), e))?;
            inner.extend(own);
        }

        stack.push(target.clone());
        let partial = assemble(&target, &inner, stack)?;
        stack.pop();

        out.push_str(&text[last..whole.start()]);
        out.push_str(&partial);
        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Replaces `@key` markers with parameter values. Markers without a value
/// are left alone, and `include` is never a parameter so nested directives
/// survive.
fn substitute(text: &str, params: &Params) -> String {
    let mut text = text.to_string();

    for (key, value) in params {
        if key == "include" {
            continue;
        }

        let Ok(marker) = Regex::new(&format!(r"@{}\b", regex::escape(key))) else {
            continue;
        };

        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        text = marker
            .replace_all(&text, regex::NoExpand(&value))
            .into_owned();
    }

    text
}

fn inject_script(html: &str, script: &str) -> String {
    match html.rfind("</body>") {
        Some(i) => format!("{}{}\n{}", &html[..i], script, &html[i..]),
        None => format!("{html}\n{script}\n"),
    }
}
