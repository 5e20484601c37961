mod diagnostics;
#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Dynamic, Environment};
use crate::engine::{Plan, StepContext};
use crate::error::KilnError;

#[cfg(feature = "live")]
pub(crate) use watch::watch;

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct StepExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Outputs of completed steps, by node.
pub(crate) type Cache = HashMap<NodeIndex, Dynamic>;

/// Runs every step of the plan once.
pub(crate) fn run_once(plan: &Plan, env: &Environment) -> Result<(Cache, Diagnostics), KilnError> {
    plan.validate()?;

    let mut cache = HashMap::new();
    let pending = plan.graph.node_indices().collect();

    let diagnostics = run_steps(plan, env, &mut cache, &pending)?;

    Ok((cache, diagnostics))
}

/// Executes a subset of the plan on the rayon pool. Steps are started as soon
/// as every predecessor inside `nodes_to_run` has completed; predecessors
/// outside of the subset are taken from `cache`.
///
/// The algorithm works as follows:
/// 1. Count, for each step to run, how many of its predecessors also need to
///    run.
/// 2. Spawn every step whose count is zero.
/// 3. Wait on a channel for completed steps. Store each output in the cache
///    and decrement the counts of its dependents, spawning those that reach
///    zero.
/// 4. After the first failure no new step is spawned. Steps already running
///    are awaited, then the failure is returned.
pub(crate) fn run_steps(
    plan: &Plan,
    env: &Environment,
    cache: &mut Cache,
    nodes_to_run: &HashSet<NodeIndex>,
) -> Result<Diagnostics, KilnError> {
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in plan.graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                plan.graph
                    .neighbors_directed(i, Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total = nodes_to_run.len();
    if total == 0 {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "pipeline");
    root_span.pb_set_length(total as u64);
    root_span.pb_set_style(&crate::utils::get_style_root());
    root_span.pb_set_message("Running steps...");
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task();
    let mut execution_times = HashMap::new();
    let mut failure: Option<KilnError> = None;

    rayon::in_place_scope(|s| {
        let (sender, receiver) =
            channel::<(NodeIndex, anyhow::Result<Dynamic>, Instant, Duration)>();

        let spawn_step = |cache: &Cache, index: NodeIndex| -> Result<(), KilnError> {
            let step = &plan.graph[index];

            let mut inputs = Vec::with_capacity(step.inputs.len());
            for input in &step.inputs {
                let output = cache.get(input).ok_or_else(|| {
                    KilnError::Step(
                        step.name.to_string(),
                        anyhow::anyhow!("missing output of step '{}'", plan.name(*input)),
                    )
                })?;
                inputs.push(output.clone());
            }

            let sender = sender.clone();
            let pb_style = pb_style.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "step", name = %step.name);
                span.pb_set_style(&pb_style);
                span.pb_set_message(&format!("Running {}", step.name));
                let _enter = span.enter();

                let context = StepContext {
                    name: &step.name,
                    env,
                };

                let start = Instant::now();

                // Steps only share immutable data, a panic cannot leave any of
                // it half-updated.
                let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    step.body.execute(&context, &inputs)
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Step panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Step panicked: {s}")
                        } else {
                            String::from("Step panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    }
                };

                // The receiver only disappears once the scheduler gave up.
                let _ = sender.send((index, output, start, start.elapsed()));
            });

            Ok(())
        };

        let mut running = 0usize;

        for &index in nodes_to_run {
            if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                match spawn_step(cache, index) {
                    Ok(()) => running += 1,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        while running > 0 {
            let Ok((index, output, start, duration)) = receiver.recv() else {
                break;
            };
            running -= 1;

            let output = match output {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(step = %plan.name(index), "step failed");
                    if failure.is_none() {
                        failure = Some(KilnError::Step(plan.name(index).to_string(), e));
                    }
                    continue;
                }
            };

            cache.insert(index, output);
            execution_times.insert(index, StepExecution { start, duration });
            root_span.pb_inc(1);

            if failure.is_some() {
                continue;
            }

            if let Some(next) = dependents.get(&index) {
                for &dependent in next {
                    if let Some(count) = dependency_counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            match spawn_step(cache, dependent) {
                                Ok(()) => running += 1,
                                Err(e) => {
                                    failure.get_or_insert(e);
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    if let Some(e) = failure {
        return Err(e);
    }

    tracing::info!("{} steps finished", execution_times.len());
    Ok(Diagnostics { execution_times })
}
