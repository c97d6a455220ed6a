//! # Keystone Kernel Errors
//!
//! Defines the error type shared by every kernel subsystem.
//!
//! [`Error`] covers registry failures (unknown or duplicate names), schema
//! violations, dependency resolution problems, lifecycle transition failures
//! and configuration management errors. Subsystems with richer error types of
//! their own convert into it: [`StorageError`] through `#[from]`, and
//! [`DependencyError`](crate::dependency::DependencyError) onto the matching
//! `MissingDependency` / `CircularDependency` variants.
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::config::error::StorageError;
use crate::lifecycle::State;

/// Kernel error type
#[derive(Debug, ThisError)]
pub enum Error {
    /// A component name or configuration query resolved to nothing.
    #[error("Component not found: {name}")]
    NotFound { name: String },

    /// A component with the same name is already registered.
    #[error("Component already registered: {name}")]
    AlreadyExists { name: String },

    /// No component type with this name has been registered with the kernel.
    #[error("Unknown component type '{type_name}'")]
    UnknownComponentType { type_name: String },

    /// An attribute or reference does not match the component type's schema.
    #[error("Invalid attribute '{attribute}' on component {name}: {message}")]
    InvalidAttribute {
        name: String,
        attribute: String,
        message: String,
    },

    /// The attribute can only be changed while the component is stopped.
    #[error("Attribute '{attribute}' of component {name} cannot be changed while {state}")]
    AttributeNotMutable {
        name: String,
        attribute: String,
        state: State,
    },

    /// A required reference, dependency or parent artifact could not be resolved.
    #[error("Missing dependency for {name}: {message}")]
    MissingDependency { name: String, message: String },

    /// A cycle was found in the configuration parent graph.
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// The requested transition is not allowed from the current state.
    #[error("Cannot {action} component {name} while it is {state}")]
    InvalidTransition {
        name: String,
        action: &'static str,
        state: State,
    },

    /// A start or stop hook (or the component factory) reported an error.
    #[error("Lifecycle failure in component {name}: {reason}")]
    LifecycleFailure {
        name: String,
        reason: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// The operation is not valid in the current state of the object.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The configuration identifier is not present in any store.
    #[error("No such configuration: {0}")]
    NoSuchConfig(String),

    /// The configuration descriptor or its dependency node is unusable.
    #[error("Invalid configuration {id}: {message}")]
    InvalidConfig {
        id: String,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// A configuration failed to start because one of its components failed.
    #[error("Configuration {configuration} failed to start: component {component} is FAILED: {reason}")]
    ConfigurationStartFailed {
        configuration: String,
        component: String,
        reason: String,
    },

    /// Specific, typed storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl Error {
    /// Builds a `LifecycleFailure` wrapping the error reported by a hook.
    pub fn lifecycle(name: impl Into<String>, source: Error) -> Self {
        Error::LifecycleFailure {
            name: name.into(),
            reason: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error means the target was already gone.
    ///
    /// Teardown paths use this to ignore components that another thread
    /// unloaded first.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::NoSuchConfig(_))
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}
