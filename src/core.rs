use std::any::Any;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{Config, Targets};

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// The revisioner embeds a prefix of this hash in output file names, so a
/// change in file contents always produces a new public URL.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode a pipeline runs in.
///
/// The mode is fixed when the pipeline is planned and never changes while it
/// runs. Every step reads it from the [`Environment`] at execution time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Source maps, no minification, no image optimization.
    #[default]
    Development,
    /// Minified styles, scripts and markup; optimized images.
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        matches!(self, Mode::Production)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Development => f.write_str("development"),
            Mode::Production => f.write_str("production"),
        }
    }
}

/// Immutable settings shared by every step of a single pipeline run.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Development or production behavior.
    pub mode: Mode,
    /// Root of the source assets.
    pub source: Utf8PathBuf,
    /// Root of the generated output.
    pub output: Utf8PathBuf,
    /// Browser baselines used for vendor prefixing.
    pub targets: Targets,
    /// Port of the live-reload socket, when a watcher is attached.
    pub reload: Option<u16>,
}

impl Environment {
    pub fn new(config: &Config, mode: Mode) -> Self {
        Self {
            mode,
            source: config.source.clone(),
            output: config.output.clone(),
            targets: config.targets,
            reload: None,
        }
    }

    /// Path inside the source root.
    pub fn src(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.source.join(path)
    }

    /// Path inside the output root.
    pub fn dist(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.output.join(path)
    }

    /// Get the JS snippet which connects a page to the live-reload socket.
    pub fn refresh_script(&self) -> Option<String> {
        self.reload.map(|port| {
            format!(
                r#"<script>
(() => {{
    const socket = new WebSocket("ws://localhost:{port}");
    socket.addEventListener("message", event => {{
        if (event.data === "css") {{
            for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
                const url = new URL(link.href);
                url.searchParams.set("t", Date.now());
                link.href = url.toString();
            }}
        }} else {{
            window.location.reload();
        }}
    }});
}})();
</script>"#
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_is_stable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("main.css");

        std::fs::write(&path, "body{}").unwrap();
        let a = Hash32::hash_file(&path).unwrap();
        let b = Hash32::hash_file(&path).unwrap();
        std::fs::write(&path, "body{ }").unwrap();
        let c = Hash32::hash_file(&path).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_hex().len(), 64);
        assert!(a.to_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn refresh_script_only_with_port() {
        let mut env = Environment::new(&Config::default(), Mode::Development);
        assert!(env.refresh_script().is_none());

        env.reload = Some(4242);
        let script = env.refresh_script().unwrap();
        assert!(script.contains("ws://localhost:4242"));
        assert!(script.starts_with("<script>"));
    }
}
