//! # Keystone Configuration Management
//!
//! A configuration is a deployable unit: an [`Environment`] (its id and the
//! parents it depends on), a set of component descriptors and optionally
//! nested child configurations. The [`ConfigurationManager`] loads them from
//! [`ConfigurationStore`]s, registers their components with the kernel and
//! drives them through load, start, stop and unload in dependency order.
//!
//! ## Key Submodules:
//!
//! - **[`data`]**: the serializable descriptors.
//! - **[`store`]**: configuration stores (in memory, or a directory of
//!   JSON/YAML/TOML files) and listable artifact repositories.
//! - **[`manager`]**: the [`ConfigurationManager`] and its results.
//! - **[`persistent`]**: the list of configurations to start on boot.
//! - **[`attributes`]**: attribute and reference overrides re-applied
//!   whenever a configuration loads.
//! - **[`shutdown`]**: the kernel shutdown hook that takes everything down.
//! - **[`error`]**: [`StorageError`] for file-backed stores, lists and
//!   attribute stores.
pub mod attributes;
pub mod data;
pub mod error;
pub mod manager;
pub mod persistent;
pub mod shutdown;
pub mod store;

pub use attributes::{AttributeStore, ComponentOverrides, FileAttributeStore, InMemoryAttributeStore};
pub use data::{ComponentDescriptor, ConfigurationData, Environment};
pub use error::StorageError;
pub use manager::{
    ChildFailurePolicy, ConfigurationComponent, ConfigurationManager, ConfigurationManagerBuilder,
    ConfigurationState, LifecycleResults, configuration_type,
};
pub use persistent::{FileConfigurationList, InMemoryConfigurationList, ListEntry, PersistentConfigurationList};
pub use shutdown::ConfigurationShutdownHook;
pub use store::{
    ConfigurationStore, DirectoryConfigurationStore, InMemoryConfigurationStore, InMemoryRepository,
    ListableRepository,
};
