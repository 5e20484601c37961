use camino::Utf8PathBuf;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::engine::StepContext;
use crate::task::{Emitted, expand};
use crate::utils::relative;

/// Removes comments and collapses whitespace in every `**/*.html` file of
/// the output root, in place.
pub fn markup(ctx: &StepContext<'_>) -> anyhow::Result<Emitted> {
    let env = ctx.env;
    let pages = expand(&env.output, "**/*.html")?;

    let results: anyhow::Result<Vec<Utf8PathBuf>> = pages
        .into_par_iter()
        .map(|path| -> anyhow::Result<_> {
            let html = std::fs::read(&path)?;
            std::fs::write(&path, minify_html(&html))?;

            let rel = relative(&path, &env.output).unwrap_or_else(|| path.to_string());
            Ok(Utf8PathBuf::from(rel))
        })
        .collect();

    let emitted = Emitted { files: results? };
    tracing::info!(step = ctx.name, "minified {} pages", emitted.len());
    Ok(emitted)
}

fn minify_html(html: &[u8]) -> Vec<u8> {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.remove_bangs = false;
    cfg.remove_processing_instructions = true;
    minify_html::minify(html, &cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::task::tests::{Project, with_context};

    const PAGE: &str = "<!DOCTYPE html>\n<html>\n  <head>\n    <title>Home</title>\n  </head>\n  <body>\n    <!-- navigation -->\n    <nav>\n      <a href=\"/\">Home</a>\n    </nav>\n    <p>\n      Some   text\n    </p>\n  </body>\n</html>\n";

    #[test]
    fn strips_comments_and_whitespace() {
        let project = Project::new();
        let env = project.env(Mode::Production);
        crate::utils::write_file(&env.dist("index.html"), PAGE).unwrap();
        crate::utils::write_file(&env.dist("docs/guide.html"), PAGE).unwrap();

        let mut emitted = with_context(&env, markup).unwrap();
        emitted.files.sort();
        assert_eq!(
            emitted.files,
            vec![
                Utf8PathBuf::from("docs/guide.html"),
                Utf8PathBuf::from("index.html")
            ]
        );

        let html = project.read("index.html");
        assert!(!html.contains("navigation"));
        assert!(!html.contains("\n    "));
        assert!(html.len() < PAGE.len());
        assert!(html.contains("Home</a>"));
    }

    #[test]
    fn second_pass_is_idempotent() {
        let once = minify_html(PAGE.as_bytes());
        let twice = minify_html(&once);
        assert_eq!(once, twice);
    }
}
