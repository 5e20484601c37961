//! Steps which read source assets and write them into the output root.

pub mod clean;
pub mod fonts;
pub mod images;
pub mod markup;
pub mod minify;
pub mod revision;
pub mod scripts;
pub mod styles;

use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern, glob_with};
use serde::Serialize;

use crate::core::Environment;
use crate::engine::StepContext;
use crate::error::SourceError;

/// Files written by a step, relative to the output root.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub files: Vec<Utf8PathBuf>,
}

impl Emitted {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Who consumes the compiled styles and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Served to the browser: bundled, and minified in production.
    Browser,
    /// Included by a server-side application: never minified, never bundled.
    Backend,
}

/// Logs a compiler or minifier failure as a notification. The step which
/// hit it writes nothing for this run, the pipeline keeps going.
pub(crate) fn report(ctx: &StepContext<'_>, error: &impl Display) {
    tracing::error!(step = ctx.name, "{error}");
}

/// Resolves a directory below the source root, which must exist.
pub(crate) fn require_dir(env: &Environment, dir: &str) -> Result<Utf8PathBuf, SourceError> {
    let path = env.src(dir);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(SourceError::Missing(path))
    }
}

/// Lists files below `root` matching `pattern`, sorted.
pub(crate) fn expand(root: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, SourceError> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let pattern = format!("{}/{}", Pattern::escape(root.as_str()), pattern);

    let mut paths = Vec::new();
    for path in glob_with(&pattern, options)? {
        let path = Utf8PathBuf::try_from(path?)?;
        if path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Like [`expand`], for a set of patterns. Each file is listed once.
pub(crate) fn expand_all(
    root: &Utf8Path,
    patterns: &[&str],
) -> Result<Vec<Utf8PathBuf>, SourceError> {
    let mut paths = Vec::new();
    for pattern in patterns {
        paths.extend(expand(root, pattern)?);
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// URL of a source file as seen from a map in the output root. Both paths
/// are relative to their roots, and the source root is assumed to sit next
/// to the output root.
pub(crate) fn source_url(map: &Utf8Path, source: &str) -> String {
    let depth = map.parent().map_or(0, |dir| dir.components().count());
    format!("{}{source}", "../".repeat(depth))
}

/// A version 3 map which lists the original sources with their content but
/// carries no mappings. Used where the compiler cannot report positions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SourceIndex {
    version: u8,
    file: String,
    sources: Vec<String>,
    sources_content: Vec<String>,
    names: Vec<String>,
    mappings: String,
}

impl SourceIndex {
    pub(crate) fn new(file: impl Into<String>) -> Self {
        Self {
            version: 3,
            file: file.into(),
            sources: Vec::new(),
            sources_content: Vec::new(),
            names: Vec::new(),
            mappings: String::new(),
        }
    }

    pub(crate) fn add_source(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.sources.push(name.into());
        self.sources_content.push(content.into());
    }

    pub(crate) fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A version 3 index map: a concatenated file whose parts each have their
/// own map, placed at the line where the part starts.
#[derive(Debug, Serialize)]
pub(crate) struct IndexMap {
    version: u8,
    file: String,
    sections: Vec<Section>,
}

#[derive(Debug, Serialize)]
struct Section {
    offset: Offset,
    map: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Offset {
    line: usize,
    column: usize,
}

impl IndexMap {
    pub(crate) fn new(file: impl Into<String>) -> Self {
        Self {
            version: 3,
            file: file.into(),
            sections: Vec::new(),
        }
    }

    /// Adds the map of a part starting at the beginning of `line`.
    pub(crate) fn add_section(&mut self, line: usize, map: &str) -> serde_json::Result<()> {
        self.sections.push(Section {
            offset: Offset { line, column: 0 },
            map: serde_json::from_str(map)?,
        });
        Ok(())
    }

    pub(crate) fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
