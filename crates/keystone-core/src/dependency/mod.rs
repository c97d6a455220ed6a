//! # Keystone Dependency Resolution
//!
//! Works out what a component or configuration depends on and in which order
//! things have to start and stop.
//!
//! ## Key Submodules:
//!
//! - **[`resolver`]**: resolves component references and explicit
//!   dependencies against a [`RegistrySnapshot`].
//! - **[`graph`]**: a generic [`DependencyGraph`] with deterministic
//!   topological ordering and cycle detection, used for configurations and
//!   for the components inside one configuration.
//! - **[`node`]**: the per-configuration [`DependencyNode`] and the
//!   [`ImportType`] of a declared [`Dependency`].
//! - **[`error`]**: [`DependencyError`].
pub mod error;
pub mod graph;
pub mod node;
pub mod resolver;

pub use error::DependencyError;
pub use graph::DependencyGraph;
pub use node::{Dependency, DependencyNode, ImportType, ResolvedParent};
pub use resolver::{RegistrySnapshot, SnapshotEntry, resolve_all, resolve_reference};
