use thiserror::Error;

use crate::kernel::error::Error as KernelError;

/// Errors produced while resolving references, dependencies and parent artifacts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// A required reference matched no RUNNING component
    #[error("Required reference '{reference}' of {component} matched no running component ({query})")]
    MissingReference {
        component: String,
        reference: String,
        query: String,
    },

    /// An explicit dependency of a component is not RUNNING
    #[error("Dependency of {component} is not running: {query}")]
    MissingComponent { component: String, query: String },

    /// A parent artifact is in no store, repository or loaded configuration
    #[error("Missing artifact {artifact} required by {required_by}")]
    MissingArtifact { artifact: String, required_by: String },

    /// Dependency cycle detected
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

impl DependencyError {
    /// Name of the component or configuration that could not be resolved.
    pub fn subject(&self) -> &str {
        match self {
            DependencyError::MissingReference { component, .. } => component,
            DependencyError::MissingComponent { component, .. } => component,
            DependencyError::MissingArtifact { required_by, .. } => required_by,
            DependencyError::CyclicDependency(path) => path.first().map(String::as_str).unwrap_or_default(),
        }
    }
}

impl From<DependencyError> for KernelError {
    fn from(err: DependencyError) -> Self {
        match err {
            DependencyError::CyclicDependency(path) => KernelError::CircularDependency(path),
            other => KernelError::MissingDependency {
                name: other.subject().to_string(),
                message: other.to_string(),
            },
        }
    }
}
