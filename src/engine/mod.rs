mod plan;
mod runner;

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::{Dynamic, Environment};

pub use crate::engine::plan::{Plan, StepDef};
pub use crate::engine::runner::{Diagnostics, StepExecution};
pub(crate) use crate::engine::runner::{run_once, run_steps};

#[cfg(feature = "live")]
pub(crate) use crate::engine::runner::watch;

/// What the live-reload channel pushes to browsers after a watched step
/// re-runs. Ordered by strength, the strongest signal of a batch wins.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reload {
    /// Nothing visible changed.
    #[default]
    None,
    /// Only stylesheets changed, swap them in place.
    Inject,
    /// Reload the whole page.
    Page,
}

/// Data available to a step while it runs.
pub struct StepContext<'a> {
    /// Name of the running step.
    pub name: &'a str,
    /// Settings shared by the whole pipeline run.
    pub env: &'a Environment,
}

/// A type-safe reference to a step in the plan.
///
/// A `Handle<T>` is a lightweight, copyable token that represents the future
/// result of type `T`. Passing it to [`StepDef::using`] makes the result
/// available to another step; passing it to [`StepDef::after`] only orders
/// the two steps.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Handle<T> {
    pub(crate) index: NodeIndex,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the step in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Handle<T>
where
    T: Send + Sync + 'static,
{
    fn downcast<'a>(&self, output: &'a Dynamic) -> &'a T {
        output
            .downcast_ref::<T>()
            .expect("Type mismatch in dependency resolution")
    }
}

/// A collection of [`Handle`]s whose results a step consumes.
///
/// Implemented for `()`, a single handle, and tuples of handles. The step
/// receives the resolved values in the same shape.
pub trait Dependencies: Send + Sync {
    /// The resulting type when all dependencies are resolved.
    type Output<'a>;

    /// Returns the [`NodeIndex`] for each dependency in the collection.
    fn dependencies(&self) -> Vec<NodeIndex>;

    /// Resolves type-erased outputs, given in the order of
    /// [`Dependencies::dependencies`], into the concrete `Output` type.
    ///
    /// # Panics
    /// Panics when an output cannot be downcast to its expected type, which
    /// indicates a logic error in the executor.
    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a>;
}

impl Dependencies for () {
    type Output<'a> = ();

    fn dependencies(&self) -> Vec<NodeIndex> {
        vec![]
    }

    fn resolve<'a>(&self, _: &'a [Dynamic]) -> Self::Output<'a> {}
}

impl<T> Dependencies for Handle<T>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = &'a T;

    fn dependencies(&self) -> Vec<NodeIndex> {
        vec![self.index]
    }

    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
        self.downcast(&outputs[0])
    }
}

macro_rules! impl_deps {
    ($($T:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($T),*> Dependencies for ($(Handle<$T>,)*)
        where
            $($T: Send + Sync + 'static),*
        {
            type Output<'a> = ($(&'a $T,)*);

            fn dependencies(&self) -> Vec<NodeIndex> {
                let ($($T,)*) = self;
                vec![$($T.index,)*]
            }

            fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
                let ($($T,)*) = self;
                let mut iter = outputs.iter();

                ($($T.downcast(iter.next().expect("Missing dependency output")),)*)
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);

pub(crate) trait TypedStep: Send + Sync {
    /// The concrete output type of this step.
    type Output: Send + Sync + 'static;

    fn execute(
        &self,
        context: &StepContext<'_>,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Self::Output>;
}

/// Type-erased step body, which lets the graph hold steps with different
/// output types.
pub(crate) trait ErasedStep: Send + Sync {
    fn execute(&self, context: &StepContext<'_>, dependencies: &[Dynamic])
    -> anyhow::Result<Dynamic>;
}

impl<T> ErasedStep for T
where
    T: TypedStep + 'static,
{
    fn execute(
        &self,
        context: &StepContext<'_>,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Dynamic> {
        let output = T::execute(self, context, dependencies)?;
        Ok(Arc::new(output))
    }
}

/// A node of the plan.
pub(crate) struct Step {
    pub name: Cow<'static, str>,
    /// Steps whose outputs this step consumes, in argument order.
    pub inputs: Vec<NodeIndex>,
    /// Source globs, relative to the source root, which make this step dirty.
    pub watched: Vec<String>,
    pub reload: Reload,
    pub body: Arc<dyn ErasedStep>,
}

pub(crate) struct StepNode<R, D, F>
where
    D: Dependencies,
    F: for<'a> Fn(&StepContext<'a>, D::Output<'a>) -> anyhow::Result<R> + Send + Sync,
{
    pub dependencies: D,
    pub callback: F,
    pub _phantom: PhantomData<fn() -> R>,
}

impl<R, D, F> TypedStep for StepNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies,
    F: for<'a> Fn(&StepContext<'a>, D::Output<'a>) -> anyhow::Result<R> + Send + Sync,
{
    type Output = R;

    fn execute(
        &self,
        context: &StepContext<'_>,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Self::Output> {
        let dependencies = self.dependencies.resolve(dependencies);
        (self.callback)(context, dependencies)
    }
}
