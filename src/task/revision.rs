//! Cache-busting: content hashes in file names and the references to them.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;

use crate::core::{Environment, Hash32};
use crate::engine::StepContext;
use crate::task::{Emitted, expand_all};
use crate::utils::relative;

/// Name of the manifest written at the output root.
pub const MANIFEST_FILE: &str = "rev.json";

/// Extensions of the assets that get revisioned.
const EXTENSIONS: [&str; 7] = ["css", "js", "svg", "png", "jpg", "jpeg", "woff2"];

/// Length of the hash prefix embedded in file names.
const HASH_LEN: usize = 10;

/// Maps original asset paths to their revisioned paths, both relative to
/// the output root and using `/` separators.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn insert(&mut self, original: impl Into<String>, revisioned: impl Into<String>) {
        self.entries.insert(original.into(), revisioned.into());
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replaces every whole-path reference to an original asset with its
    /// revisioned path, in a single left-to-right pass.
    ///
    /// A match must not be preceded by a file name character (`/` is allowed,
    /// so `../img/a.svg` matches `img/a.svg`) and must not be followed by a
    /// path character. Longer paths take precedence over shorter ones.
    pub fn rewrite(&self, text: &str) -> String {
        let mut keys: Vec<_> = self.entries.iter().filter(|(k, _)| !k.is_empty()).collect();
        keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

        let mut out = String::with_capacity(text.len());
        let mut prev: Option<char> = None;
        let mut rest = text;

        'scan: while let Some(c) = rest.chars().next() {
            if !prev.is_some_and(is_name_char) {
                for (key, value) in &keys {
                    let Some(after) = rest.strip_prefix(key.as_str()) else {
                        continue;
                    };

                    if after
                        .chars()
                        .next()
                        .is_some_and(|next| is_name_char(next) || next == '/')
                    {
                        continue;
                    }

                    out.push_str(value);
                    prev = key.chars().last();
                    rest = after;
                    continue 'scan;
                }
            }

            out.push(c);
            prev = Some(c);
            rest = &rest[c.len_utf8()..];
        }

        out
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// `dir/name.ext` becomes `dir/name-<hash>.ext`.
fn revisioned_name(path: &Utf8Path, hash: Hash32) -> Utf8PathBuf {
    let hex = hash.to_hex();
    let stem = path.file_stem().unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{}.{ext}", &hex[..HASH_LEN]),
        None => format!("{stem}-{}", &hex[..HASH_LEN]),
    };

    path.with_file_name(name)
}

/// A manifest left at the output root means a previous run already renamed
/// the assets there.
fn is_revisioned(env: &Environment) -> bool {
    env.dist(MANIFEST_FILE).is_file()
}

/// Renames every asset in the output root to embed its content hash, then
/// writes the manifest to `rev.json`.
///
/// Revisioning an already revisioned tree hashes the hashed names again, so
/// this should only run on a fresh build.
pub fn revision(ctx: &StepContext<'_>) -> anyhow::Result<Manifest> {
    let env = ctx.env;
    let manifest_path = env.dist(MANIFEST_FILE);

    if is_revisioned(env) {
        tracing::warn!(
            path = %manifest_path,
            "output is already revisioned, assets will be hashed again"
        );
    }

    let patterns: Vec<_> = EXTENSIONS.iter().map(|ext| format!("**/*.{ext}")).collect();
    let patterns: Vec<_> = patterns.iter().map(String::as_str).collect();
    let assets = expand_all(&env.output, &patterns)?;

    let renamed: anyhow::Result<Vec<_>> = assets
        .into_par_iter()
        .map(|path| -> anyhow::Result<_> {
            let hash = Hash32::hash_file(&path)?;
            let target = revisioned_name(&path, hash);
            fs::rename(&path, &target)?;

            let original = relative(&path, &env.output).unwrap_or_else(|| path.to_string());
            let revisioned = relative(&target, &env.output).unwrap_or_else(|| target.to_string());
            Ok((original, revisioned))
        })
        .collect();

    let mut manifest = Manifest::default();
    for (original, revisioned) in renamed? {
        manifest.insert(original, revisioned);
    }

    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    for (original, revisioned) in manifest.iter() {
        tracing::debug!(step = ctx.name, "{original} -> {revisioned}");
    }
    tracing::info!(step = ctx.name, "revisioned {} assets", manifest.len());
    Ok(manifest)
}

/// Points references in output stylesheets and pages at revisioned assets.
pub fn rewrite(ctx: &StepContext<'_>, manifest: &Manifest) -> anyhow::Result<Emitted> {
    let env = ctx.env;

    if manifest.is_empty() {
        tracing::warn!(step = ctx.name, "empty manifest, nothing to rewrite");
        return Ok(Emitted::default());
    }

    let files = expand_all(&env.output, &["**/*.css", "**/*.html"])?;

    let changed: anyhow::Result<Vec<_>> = files
        .into_par_iter()
        .map(|path| -> anyhow::Result<_> {
            let text = fs::read_to_string(&path)?;
            let rewritten = manifest.rewrite(&text);

            if rewritten == text {
                return Ok(None);
            }

            fs::write(&path, rewritten)?;
            Ok(relative(&path, &env.output).map(Utf8PathBuf::from))
        })
        .collect();

    let emitted = Emitted {
        files: changed?.into_iter().flatten().collect(),
    };

    tracing::info!(step = ctx.name, "rewrote {} files", emitted.len());
    Ok(emitted)
}
