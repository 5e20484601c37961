//! The four named pipelines and the task graphs behind them.

use std::time::Instant;

use crate::config::Config;
use crate::core::{Environment, Mode};
use crate::engine::{Diagnostics, Handle, Plan, Reload, run_once};
use crate::error::KilnError;
use crate::task::{self, Emitted, Variant};
use crate::utils::as_overhead;

/// A named composition of steps, selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Development build, then serve the output and rebuild on changes.
    Default,
    /// Production build with minified markup.
    Build,
    /// Content hashes in asset names, references rewritten. Runs on the
    /// output of a previous `build`.
    Cache,
    /// Production build of assets meant for server-side inclusion.
    Backend,
}

impl Pipeline {
    pub fn name(self) -> &'static str {
        match self {
            Pipeline::Default => "default",
            Pipeline::Build => "build",
            Pipeline::Cache => "cache",
            Pipeline::Backend => "backend",
        }
    }

    /// The mode every step of this pipeline sees.
    pub fn mode(self) -> Mode {
        match self {
            Pipeline::Build | Pipeline::Backend => Mode::Production,
            Pipeline::Default | Pipeline::Cache => Mode::Development,
        }
    }

    /// Builds the task graph of this pipeline.
    pub fn plan(self) -> Plan {
        let mut plan = Plan::new();

        match self {
            Pipeline::Default => {
                assets(&mut plan, Variant::Browser);
            }
            Pipeline::Build => {
                let markup = assets(&mut plan, Variant::Browser);
                plan.step("minify-markup")
                    .after(markup)
                    .run(|ctx, ()| task::minify::markup(ctx));
            }
            Pipeline::Cache => {
                let manifest = plan
                    .step("revision")
                    .run(|ctx, ()| task::revision::revision(ctx));
                plan.step("rewrite")
                    .using(manifest)
                    .run(|ctx, manifest| task::revision::rewrite(ctx, manifest));
            }
            Pipeline::Backend => {
                assets(&mut plan, Variant::Backend);
            }
        }

        plan
    }

    /// Runs the pipeline to completion. The `default` pipeline keeps
    /// watching until the process is stopped.
    pub fn run(self, config: &Config) -> Result<Diagnostics, KilnError> {
        let env = Environment::new(config, self.mode());
        let plan = self.plan();

        tracing::info!(pipeline = self.name(), mode = %env.mode, "starting {} steps", plan.len());

        if self == Pipeline::Default {
            return serve(&plan, config, env);
        }

        let s = Instant::now();
        let (_, diagnostics) = run_once(&plan, &env)?;
        diagnostics.report(&plan);

        tracing::info!("finished {} {}", self.name(), as_overhead(s));
        Ok(diagnostics)
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(feature = "live")]
fn serve(plan: &Plan, config: &Config, env: Environment) -> Result<Diagnostics, KilnError> {
    crate::engine::watch(plan, config, env)?;
    Ok(Diagnostics::default())
}

#[cfg(not(feature = "live"))]
fn serve(_: &Plan, _: &Config, _: Environment) -> Result<Diagnostics, KilnError> {
    Err(KilnError::Unsupported("default", "live"))
}

/// Clean, then every transformer in parallel. Returns the markup step.
fn assets(plan: &mut Plan, variant: Variant) -> Handle<Emitted> {
    let clean = plan.step("clean").run(|ctx, ()| {
        task::clean::clean(ctx.env)?;
        Ok(())
    });

    let markup = plan
        .step("markup")
        .after(clean)
        .watch("*.html")
        .watch("partials/*.html")
        .reload(Reload::Page)
        .run(|ctx, ()| task::markup::build(ctx));

    let (scripts, styles) = match variant {
        Variant::Browser => ("scripts", "styles"),
        Variant::Backend => ("scripts-backend", "styles-backend"),
    };

    plan.step(scripts)
        .after(clean)
        .watch("js/**/*.js")
        .reload(Reload::Page)
        .run(move |ctx, ()| task::scripts::build(ctx, variant));

    plan.step(styles)
        .after(clean)
        .watch("scss/**/*.scss")
        .reload(Reload::Inject)
        .run(move |ctx, ()| task::styles::build(ctx, variant));

    // Fonts and images are picked up by the next page load, nothing is pushed.
    plan.step("fonts")
        .after(clean)
        .watch("fonts/**")
        .run(|ctx, ()| task::fonts::copy(ctx));

    let mut images = plan.step("images").after(clean);
    for pattern in task::images::PATTERNS {
        images = images.watch(format!("img/{pattern}"));
    }
    images.run(|ctx, ()| task::images::build(ctx));

    markup
}
