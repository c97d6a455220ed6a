//! # Keystone Core Kernel
//!
//! The `kernel` module holds the [`Kernel`] handle that ties the other
//! subsystems together: the component registry, the lifecycle monitor, the
//! proxy manager, registered component types and shutdown hooks.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Kernel handle**: [`Kernel`](bootstrap::Kernel) in the `bootstrap`
//!   submodule; component lifecycle operations (`start`, `stop`, `retry`,
//!   `force_stop`, `unload_component`) are implemented on it in
//!   [`crate::lifecycle::engine`].
//! - **Shutdown hooks**: [`ShutdownHook`](bootstrap::ShutdownHook), run in
//!   order by [`Kernel::shutdown`](bootstrap::Kernel::shutdown).
//! - **Settings**: [`KernelSettings`](settings::KernelSettings) and the
//!   [`ConfigFormat`](settings::ConfigFormat) file-format abstraction.
//! - **Core Constants**: names and property keys used across the crate.
//! - **Error Handling**: [`Error`](error::Error) and the `Result` alias.
pub mod bootstrap;
pub mod constants;
pub mod error;
pub mod settings;

pub use bootstrap::{HookId, Kernel, ShutdownHook};
pub use error::{Error, Result};
pub use settings::{ConfigFormat, KernelSettings};
