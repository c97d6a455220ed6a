//! Keystone core: a component kernel.
//!
//! Components are registered under structured names, wired to each other
//! through references resolved at start time, and driven through a small
//! lifecycle state machine. Configurations group components into
//! deployable units with parent/child dependencies.
pub mod config;
pub mod dependency;
pub mod kernel;
pub mod lifecycle;
pub mod proxy;
pub mod registry;

pub use config::{ConfigurationData, ConfigurationManager, LifecycleResults};
pub use kernel::Kernel;
pub use kernel::error::Error as KernelError;
pub use lifecycle::State;
pub use registry::{Artifact, ComponentName, NameQuery};

#[cfg(test)]
mod tests;
