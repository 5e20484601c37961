use std::fs;
use std::time::Instant;

use crate::core::Environment;
use crate::error::CleanError;
use crate::utils::as_overhead;

/// Delete the entire output directory and recreate it empty.
pub fn clean(env: &Environment) -> Result<(), CleanError> {
    let s = Instant::now();

    if fs::metadata(&env.output).is_ok() {
        fs::remove_dir_all(&env.output) //
            .map_err(CleanError::Remove)?;
    }

    fs::create_dir_all(&env.output) //
        .map_err(CleanError::Create)?;

    tracing::info!("cleaned {} {}", env.output, as_overhead(s));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::task::tests::Project;

    #[test]
    fn removes_stale_output() {
        let project = Project::new();
        let env = project.env(Mode::Development);

        crate::utils::write_file(&env.dist("css/old.css"), "a{}").unwrap();
        crate::utils::write_file(&env.dist("stale.html"), "").unwrap();

        clean(&env).unwrap();

        assert!(env.output.is_dir());
        assert_eq!(fs::read_dir(&env.output).unwrap().count(), 0);
    }

    #[test]
    fn creates_missing_output() {
        let project = Project::new();
        let env = project.env(Mode::Development);

        clean(&env).unwrap();
        assert!(env.output.is_dir());
    }
}
