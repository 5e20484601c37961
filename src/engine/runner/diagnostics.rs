use std::collections::HashMap;
use std::time::Duration;

use petgraph::graph::NodeIndex;

use crate::engine::{Plan, StepExecution};

/// Timings of a pipeline run.
///
/// Returned by [`crate::Pipeline::run`] for one-shot pipelines. Steps that did
/// not run (for example because an earlier step failed) have no entry.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// A map of step node indices to their execution metrics.
    pub execution_times: HashMap<NodeIndex, StepExecution>,
}

impl Diagnostics {
    /// Sum of the durations of all steps that ran.
    pub fn busy_time(&self) -> Duration {
        self.execution_times.values().map(|e| e.duration).sum()
    }

    /// Steps ordered from the slowest to the fastest.
    pub fn slowest<'a>(&self, plan: &'a Plan) -> Vec<(&'a str, Duration)> {
        let mut steps: Vec<_> = self
            .execution_times
            .iter()
            .map(|(index, e)| (plan.name(*index), e.duration))
            .collect();

        steps.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        steps
    }

    /// Logs the total busy time, then one line per step at debug level.
    pub fn report(&self, plan: &Plan) {
        tracing::info!(
            "{} steps busy for {:.2?}",
            self.execution_times.len(),
            self.busy_time()
        );

        for (name, duration) in self.slowest(plan) {
            tracing::debug!(step = name, "finished in {duration:.2?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn slowest_first() {
        let mut plan = Plan::new();
        let a = plan.step("fast").run(|_, ()| Ok(()));
        let b = plan.step("slow").run(|_, ()| Ok(()));

        let now = Instant::now();
        let mut diagnostics = Diagnostics::default();
        for (h, ms) in [(a, 1), (b, 9)] {
            diagnostics.execution_times.insert(
                h.index(),
                StepExecution {
                    start: now,
                    duration: Duration::from_millis(ms),
                },
            );
        }

        let names: Vec<_> = diagnostics.slowest(&plan).into_iter().map(|s| s.0).collect();
        assert_eq!(names, vec!["slow", "fast"]);
        assert_eq!(diagnostics.busy_time(), Duration::from_millis(10));
    }
}
