use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

static STYLE_ROOT: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("  {spinner:.blue} {msg}")
        .expect("Error setting progress bar template")
});

/// Progress bar of a whole pipeline run.
pub(crate) fn get_style_root() -> ProgressStyle {
    STYLE_ROOT.clone()
}

/// Spinner of a single running step.
pub(crate) fn get_style_task() -> ProgressStyle {
    STYLE_TASK.clone()
}

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Installs a formatter for `tracing` events which cooperates with the
/// progress bars drawn for spans. Verbosity follows `RUST_LOG`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}

/// Lexically resolves `.` and `..` components.
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut stack: Vec<Utf8Component> = Vec::new();

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match stack.last() {
                Some(Utf8Component::Normal(_)) => {
                    stack.pop();
                }
                Some(Utf8Component::RootDir | Utf8Component::Prefix(_)) => {}
                _ => stack.push(component),
            },
            _ => stack.push(component),
        }
    }

    stack.iter().collect()
}

/// Path of `path` relative to `base`, using `/` separators.
pub(crate) fn relative(path: &Utf8Path, base: &Utf8Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = rel.components().map(|c| c.as_str()).collect();
    Some(parts.join("/"))
}

/// Writes `data` to `path`, creating missing parent directories.
pub(crate) fn write_file(path: &Utf8Path, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dots() {
        let cases = [
            ("src/partials/../index.html", "src/index.html"),
            ("src/./partials/head.html", "src/partials/head.html"),
            ("/a/b/../../c", "/c"),
            ("/../a", "/a"),
            ("../a/b", "../a/b"),
        ];

        for (input, expected) in cases {
            assert_eq!(normalize_path(Utf8Path::new(input)), Utf8PathBuf::from(expected));
        }
    }

    #[test]
    fn relative_uses_forward_slashes() {
        let rel = relative(Utf8Path::new("app/img/icons/a.svg"), Utf8Path::new("app"));
        assert_eq!(rel.as_deref(), Some("img/icons/a.svg"));
        assert_eq!(relative(Utf8Path::new("other/a.svg"), Utf8Path::new("app")), None);
    }

    #[test]
    fn write_file_creates_parents() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let path = root.join("css/nested/main.css");

        write_file(&path, "a{}").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a{}");
    }
}
