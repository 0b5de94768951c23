//! Deferred values produced by the provisioning engine.
//!
//! An [Output] is a shared future paired with the references it waits on. Outputs are combined
//! with [join] and transformed with [Output::apply], so nothing derived from a pending
//! identifier is computed before that identifier exists.

use crate::ecs::{stack::Reference, Error};
use futures::{
    channel::oneshot,
    future::{self, BoxFuture, FutureExt, Shared},
};
use serde::{ser::SerializeMap, Serialize, Serializer};
use std::fmt::{self, Display};

/// Reason an [Output] did not produce a value
#[derive(Clone, Debug, PartialEq, Eq)]
enum Failure {
    Unresolved(Reference),
    Apply(String),
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Unresolved(reference) => Error::Unresolved(reference),
            Failure::Apply(message) => Error::Render(message),
        }
    }
}

/// A value that becomes available once every dependency is resolved
pub struct Output<T: Clone> {
    dependencies: Vec<Reference>,
    future: Shared<BoxFuture<'static, Result<T, Failure>>>,
}

impl<T: Clone> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            future: self.future.clone(),
        }
    }
}

impl<T: Clone> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Output<T> {
    /// Creates an output that is already resolved.
    pub fn known(value: T) -> Self {
        Self {
            dependencies: Vec::new(),
            future: future::ready(Ok(value)).boxed().shared(),
        }
    }

    pub(crate) fn pending(reference: Reference, receiver: oneshot::Receiver<T>) -> Self {
        let missing = reference.clone();
        let future = async move { receiver.await.map_err(|_| Failure::Unresolved(missing)) };
        Self {
            dependencies: vec![reference],
            future: future.boxed().shared(),
        }
    }

    /// References that must resolve before this output does.
    pub fn dependencies(&self) -> &[Reference] {
        &self.dependencies
    }

    /// Derives a new output from this one's value.
    pub fn apply<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let future = self.future.clone();
        Output {
            dependencies: self.dependencies.clone(),
            future: async move { future.await.map(f) }.boxed().shared(),
        }
    }

    /// Derives a new output from this one's value with a fallible function.
    pub fn try_apply<U, E, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        E: Display,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let future = self.future.clone();
        Output {
            dependencies: self.dependencies.clone(),
            future: async move { f(future.await?).map_err(|e| Failure::Apply(e.to_string())) }
                .boxed()
                .shared(),
        }
    }

    /// Returns the value if it is already available, without waiting.
    pub fn try_get(&self) -> Option<Result<T, Error>> {
        self.future
            .clone()
            .now_or_never()
            .map(|result| result.map_err(Error::from))
    }

    /// Waits for the value.
    pub async fn get(&self) -> Result<T, Error> {
        self.future.clone().await.map_err(Error::from)
    }
}

/// Combines two outputs into one that resolves only after both have.
pub fn join<A, B>(a: &Output<A>, b: &Output<B>) -> Output<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    let mut dependencies = a.dependencies.clone();
    for reference in &b.dependencies {
        if !dependencies.contains(reference) {
            dependencies.push(reference.clone());
        }
    }
    let (a, b) = (a.future.clone(), b.future.clone());
    let future = async move {
        let (a, b) = future::join(a, b).await;
        Ok::<_, Failure>((a?, b?))
    };
    Output {
        dependencies,
        future: future.boxed().shared(),
    }
}

/// Serializes as the value once resolved, otherwise as the references still awaited.
impl<T: Serialize + Clone + Send + Sync + 'static> Serialize for Output<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.future.clone().now_or_never() {
            Some(Ok(value)) => value.serialize(serializer),
            _ => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("pending", &self.dependencies)?;
                map.end()
            }
        }
    }
}
