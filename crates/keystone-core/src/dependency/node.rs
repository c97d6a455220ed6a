use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::registry::name::Artifact;

/// What a dependency contributes to the configuration that declares it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    /// Both classes and services
    #[default]
    All,
    /// Only the artifact's code; its components need not be running
    Classes,
    /// Only the running components; no code sharing
    Services,
}

impl ImportType {
    pub fn imports_classes(&self) -> bool {
        matches!(self, ImportType::All | ImportType::Classes)
    }

    pub fn imports_services(&self) -> bool {
        matches!(self, ImportType::All | ImportType::Services)
    }
}

/// One declared dependency of a configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// May be unresolved; see [`Artifact::matches`]
    pub artifact: Artifact,
    #[serde(default)]
    pub import: ImportType,
}

impl Dependency {
    pub fn new(artifact: Artifact, import: ImportType) -> Self {
        Self { artifact, import }
    }

    /// A dependency importing both classes and services.
    pub fn all(artifact: Artifact) -> Self {
        Self::new(artifact, ImportType::All)
    }
}

/// A direct parent after artifact resolution
#[derive(Debug, Clone)]
pub struct ResolvedParent<'a> {
    pub artifact: Artifact,
    pub import: ImportType,
    /// The parent's own node when it is a configuration; `None` for a plain
    /// library artifact
    pub node: Option<&'a DependencyNode>,
}

/// Resolved, transitively closed parents of one configuration.
///
/// Built once when the configuration loads, from the already built nodes of
/// its direct parents, and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: Artifact,
    /// Configurations that must be RUNNING before this one starts
    pub service_parents: BTreeSet<Artifact>,
    /// Artifacts whose code this configuration sees
    pub class_parents: BTreeSet<Artifact>,
}

impl DependencyNode {
    pub fn build<'a>(id: Artifact, parents: impl IntoIterator<Item = ResolvedParent<'a>>) -> Self {
        let mut service_parents = BTreeSet::new();
        let mut class_parents = BTreeSet::new();

        for parent in parents {
            match parent.node {
                Some(node) => {
                    if parent.import.imports_services() {
                        service_parents.insert(parent.artifact.clone());
                        service_parents.extend(node.service_parents.iter().cloned());
                    }
                    if parent.import.imports_classes() {
                        class_parents.insert(parent.artifact.clone());
                        class_parents.extend(node.class_parents.iter().cloned());
                    }
                }
                None => {
                    if parent.import.imports_classes() {
                        class_parents.insert(parent.artifact.clone());
                    }
                }
            }
        }

        service_parents.remove(&id);
        class_parents.remove(&id);
        Self {
            id,
            service_parents,
            class_parents,
        }
    }

    /// Every artifact this node depends on in any way.
    pub fn all_parents(&self) -> BTreeSet<Artifact> {
        self.service_parents.union(&self.class_parents).cloned().collect()
    }
}
