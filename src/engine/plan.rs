use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::engine::{Dependencies, Handle, Reload, Step, StepContext, StepNode};
use crate::error::KilnError;

/// The task graph of a pipeline.
///
/// Steps are added through [`Plan::step`] and wired together with their
/// [`Handle`]s. An edge means "the target starts only after the source has
/// completed"; steps without a path between them may run concurrently.
///
/// # Example
///
/// ```rust
/// use kiln::Plan;
///
/// let mut plan = Plan::new();
/// let first = plan.step("first").run(|_, ()| Ok(1));
/// let _second = plan.step("second").using(first).run(|_, n| Ok(*n + 1));
/// ```
pub struct Plan {
    pub(crate) graph: Graph<Step, ()>,
}

impl Plan {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    /// Starts the definition of a new named step.
    pub fn step(&mut self, name: impl Into<Cow<'static, str>>) -> StepDef<'_> {
        StepDef {
            plan: self,
            name: name.into(),
            after: Vec::new(),
            watched: Vec::new(),
            reload: Reload::None,
            dependencies: (),
        }
    }

    /// Number of steps in the plan.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Names of all steps, in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .map(|index| self.graph[index].name.as_ref())
            .collect()
    }

    pub(crate) fn name(&self, index: NodeIndex) -> &str {
        &self.graph[index].name
    }

    /// Checks that the plan can be scheduled.
    pub fn validate(&self) -> Result<(), KilnError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|cycle| KilnError::Cycle(self.name(cycle.node_id()).to_string()))
    }

    fn add_step<D, F, R>(
        &mut self,
        name: Cow<'static, str>,
        after: Vec<NodeIndex>,
        watched: Vec<String>,
        reload: Reload,
        dependencies: D,
        callback: F,
    ) -> Handle<R>
    where
        R: Send + Sync + 'static,
        D: Dependencies + 'static,
        F: for<'a> Fn(&StepContext<'a>, D::Output<'a>) -> anyhow::Result<R>
            + Send
            + Sync
            + 'static,
    {
        let inputs = dependencies.dependencies();
        let index = self.graph.add_node(Step {
            name,
            inputs: inputs.clone(),
            watched,
            reload,
            body: Arc::new(StepNode {
                dependencies,
                callback,
                _phantom: PhantomData,
            }),
        });

        let mut sources = inputs;
        sources.extend(after);
        sources.sort();
        sources.dedup();

        for source in sources {
            self.graph.add_edge(source, index, ());
        }

        Handle::new(index)
    }

    #[cfg(test)]
    pub(crate) fn add_edge_for_test(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a single step, returned by [`Plan::step`].
pub struct StepDef<'a, D = ()> {
    plan: &'a mut Plan,
    name: Cow<'static, str>,
    after: Vec<NodeIndex>,
    watched: Vec<String>,
    reload: Reload,
    dependencies: D,
}

impl<'a> StepDef<'a, ()> {
    /// Consume the results of other steps. The step runs after all of them.
    pub fn using<D>(self, dependencies: D) -> StepDef<'a, D>
    where
        D: Dependencies,
    {
        StepDef {
            plan: self.plan,
            name: self.name,
            after: self.after,
            watched: self.watched,
            reload: self.reload,
            dependencies,
        }
    }
}

impl<'a, D> StepDef<'a, D>
where
    D: Dependencies + 'static,
{
    /// Run only after `handle` has completed, without consuming its result.
    pub fn after<T>(mut self, handle: Handle<T>) -> Self {
        self.after.push(handle.index());
        self
    }

    /// Re-run this step in watch mode when a file matching `glob` changes.
    /// The glob is relative to the source root.
    pub fn watch(mut self, glob: impl Into<String>) -> Self {
        self.watched.push(glob.into());
        self
    }

    /// What to push to browsers after a watched re-run.
    pub fn reload(mut self, reload: Reload) -> Self {
        self.reload = reload;
        self
    }

    /// Registers the step with its body and returns a handle to its result.
    pub fn run<F, R>(self, callback: F) -> Handle<R>
    where
        F: for<'b> Fn(&StepContext<'b>, D::Output<'b>) -> anyhow::Result<R>
            + Send
            + Sync
            + 'static,
        R: Send + Sync + 'static,
    {
        self.plan.add_step(
            self.name,
            self.after,
            self.watched,
            self.reload,
            self.dependencies,
            callback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_follow_inputs_and_ordering() {
        let mut plan = Plan::new();
        let a = plan.step("a").run(|_, ()| Ok(1u32));
        let b = plan.step("b").after(a).run(|_, ()| Ok(()));
        let c = plan.step("c").using(a).after(a).after(b).run(|_, a| Ok(*a));

        assert_eq!(plan.names(), vec!["a", "b", "c"]);
        assert_eq!(plan.graph.edge_count(), 3);
        assert_eq!(plan.graph[c.index()].inputs, vec![a.index()]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn cycle_is_rejected() {
        let mut plan = Plan::new();
        let a = plan.step("a").run(|_, ()| Ok(()));
        let b = plan.step("b").after(a).run(|_, ()| Ok(()));
        plan.add_edge_for_test(b.index(), a.index());

        match plan.validate() {
            Err(KilnError::Cycle(name)) => assert!(name == "a" || name == "b"),
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }
}
