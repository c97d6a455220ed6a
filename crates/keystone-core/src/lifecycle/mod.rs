//! # Keystone Lifecycle
//!
//! The per-component state machine and its observers.
//!
//! Every component moves through [`State`]: STOPPED, STARTING, RUNNING,
//! STOPPING and FAILED. The transitions themselves are driven by
//! [`Kernel`](crate::kernel::Kernel) (`start`, `stop`, `retry`, `force_stop`),
//! which serializes them per component name and reports each one to the
//! [`LifecycleMonitor`].
pub mod engine;
pub mod monitor;
pub mod state;

pub use monitor::{LifecycleEvent, LifecycleListener, LifecycleMonitor, ListenerId};
pub use state::State;

#[cfg(test)]
mod tests;
