//! Assemble a load-balanced container service as a declarative resource graph.
//!
//! The graph is handed to a provisioning engine, which creates each resource and resolves the
//! identifiers other resources refer to. See [ecs] for the resources declared and the expected
//! configuration.

pub mod ecs;
