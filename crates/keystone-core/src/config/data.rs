use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dependency::node::{Dependency, ImportType};
use crate::registry::component::ComponentData;
use crate::registry::name::{Artifact, ComponentName};
use crate::registry::query::{NameQuery, ReferencePatterns};

/// Identity and declared parents of a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(rename = "configId")]
    pub artifact: Artifact,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

fn default_kind() -> String {
    "Service".to_string()
}

fn default_true() -> bool {
    true
}

/// One component declared by a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Short name; the full name is built from the configuration id
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, ReferencePatterns>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<NameQuery>,
}

impl ComponentDescriptor {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: default_kind(),
            type_name: type_name.to_string(),
            attributes: BTreeMap::new(),
            references: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_reference(mut self, key: &str, patterns: impl Into<ReferencePatterns>) -> Self {
        self.references.insert(key.to_string(), patterns.into());
        self
    }

    pub fn with_dependency(mut self, query: NameQuery) -> Self {
        self.dependencies.push(query);
        self
    }

    /// Full name of the component inside configuration `id`.
    pub fn component_name(&self, id: &Artifact) -> ComponentName {
        ComponentName::new(id.clone(), &self.name, &self.kind)
    }

    /// Registration request for this component inside configuration `id`.
    pub fn to_component_data(&self, id: &Artifact) -> ComponentData {
        ComponentData {
            name: self.component_name(id),
            type_name: self.type_name.clone(),
            attributes: self.attributes.clone(),
            references: self.references.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// Descriptor of one configuration: its environment, its components and
/// any nested child configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationData {
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ConfigurationData>,
    /// Whether a started configuration is recorded for automatic start
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl ConfigurationData {
    pub fn new(id: Artifact) -> Self {
        Self {
            environment: Environment {
                artifact: id,
                dependencies: Vec::new(),
            },
            components: Vec::new(),
            children: Vec::new(),
            auto_start: true,
        }
    }

    pub fn id(&self) -> &Artifact {
        &self.environment.artifact
    }

    pub fn with_dependency(mut self, artifact: Artifact, import: ImportType) -> Self {
        self.environment.dependencies.push(Dependency::new(artifact, import));
        self
    }

    /// Shorthand for a dependency importing classes and services.
    pub fn with_parent(self, artifact: Artifact) -> Self {
        self.with_dependency(artifact, ImportType::All)
    }

    pub fn with_component(mut self, component: ComponentDescriptor) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_child(mut self, child: ConfigurationData) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// This configuration's id and those of all nested children, depth first.
    pub fn all_ids(&self) -> Vec<Artifact> {
        let mut ids = vec![self.id().clone()];
        for child in &self.children {
            ids.extend(child.all_ids());
        }
        ids
    }
}
