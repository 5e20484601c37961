use camino::Utf8Path;

use crate::engine::StepContext;
use crate::task::{Emitted, expand, require_dir};
use crate::utils::write_file;

/// Copies `fonts/*` into the output as they are.
pub fn copy(ctx: &StepContext<'_>) -> anyhow::Result<Emitted> {
    let env = ctx.env;
    let root = require_dir(env, "fonts")?;

    let mut emitted = Emitted::default();
    for path in expand(&root, "*")? {
        let Some(name) = path.file_name() else {
            continue;
        };

        let out = Utf8Path::new("fonts").join(name);
        write_file(&env.dist(&out), std::fs::read(&path)?)?;
        emitted.files.push(out);
    }

    tracing::info!(step = ctx.name, "copied {} fonts", emitted.len());
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::core::Mode;
    use crate::task::tests::{Project, with_context};

    #[test]
    fn copies_top_level_fonts() {
        let project = Project::new();
        project
            .file("fonts/inter.woff2", b"wOF2\x00\x01")
            .file("fonts/inter.woff", b"wOFF");

        let env = project.env(Mode::Production);
        let emitted = with_context(&env, copy).unwrap();

        assert_eq!(
            emitted.files,
            vec![
                Utf8PathBuf::from("fonts/inter.woff"),
                Utf8PathBuf::from("fonts/inter.woff2")
            ]
        );
        assert_eq!(
            std::fs::read(env.dist("fonts/inter.woff2")).unwrap(),
            b"wOF2\x00\x01"
        );
    }
}
