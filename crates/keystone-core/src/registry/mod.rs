//! # Keystone Component Registry
//!
//! Holds every registered component together with its identity, declared
//! references and dependencies, attribute values and current lifecycle state.
//!
//! ## Key Submodules:
//!
//! - **[`name`]**: [`Artifact`] and [`ComponentName`], the identities used
//!   throughout the kernel.
//! - **[`query`]**: [`NameQuery`] patterns and [`ReferencePatterns`].
//! - **[`component`]**: component types (attribute/reference schema plus a
//!   factory), registration data and the capability traits a live instance
//!   may implement.
//! - **[`registry`]**: the [`ComponentRegistry`] itself.
pub mod component;
pub mod name;
pub mod query;
pub mod registry;

pub use component::{
    AttributeAware, AttributeInfo, AttributeKind, Cardinality, ComponentContext, ComponentData,
    ComponentFactory, ComponentType, ComponentTypeBuilder, ManagedComponent, ReferenceInfo,
    Startable, Stoppable,
};
pub use name::{Artifact, ComponentName};
pub use query::{NameQuery, ReferencePatterns};
pub use registry::ComponentRegistry;
