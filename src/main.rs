use clap::{Parser, ValueEnum};
use kiln::{CONFIG_FILE, Config, Pipeline};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Task {
    /// Build for development, serve the output and rebuild on changes.
    Default,
    /// Build for production.
    Build,
    /// Embed content hashes in the names of built assets.
    Cache,
    /// Build assets for server-side inclusion.
    Backend,
}

impl From<Task> for Pipeline {
    fn from(task: Task) -> Self {
        match task {
            Task::Default => Pipeline::Default,
            Task::Build => Pipeline::Build,
            Task::Cache => Pipeline::Cache,
            Task::Backend => Pipeline::Backend,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "default")]
    task: Task,

    /// Path to the configuration file.
    #[clap(long, default_value = CONFIG_FILE)]
    config: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    #[cfg(feature = "logging")]
    kiln::init_logging()?;

    let config = Config::load(&args.config)?;
    Pipeline::from(args.task).run(&config)?;

    Ok(())
}
