use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::Kernel;
use crate::kernel::error::{Error, Result};
use crate::registry::name::ComponentName;
use crate::registry::query::{NameQuery, ReferencePatterns};

/// Value type of a declared attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Boolean,
    Integer,
    Float,
    String,
    List,
    Map,
    /// Any JSON value, including null
    Any,
}

impl AttributeKind {
    /// Whether `value` is a valid value for this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            AttributeKind::Boolean => value.is_boolean(),
            AttributeKind::Integer => value.is_i64() || value.is_u64(),
            AttributeKind::Float => value.is_number(),
            AttributeKind::String => value.is_string(),
            AttributeKind::List => value.is_array(),
            AttributeKind::Map => value.is_object(),
            AttributeKind::Any => true,
        }
    }
}

/// Schema entry for one attribute of a component type
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name: String,
    pub kind: AttributeKind,
    /// Whether the attribute may change while the component is not STOPPED
    pub mutable_while_running: bool,
    pub default: Option<Value>,
}

impl AttributeInfo {
    pub fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mutable_while_running: false,
            default: None,
        }
    }

    pub fn mutable(mut self) -> Self {
        self.mutable_while_running = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Whether a reference expects one target or a set of targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Collection,
}

/// Schema entry for one reference of a component type
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceInfo {
    pub name: String,
    /// Interface every target must expose
    pub interface: Option<String>,
    pub cardinality: Cardinality,
    /// Whether an empty resolution prevents the owner from starting
    pub required: bool,
    /// Patterns used when the component does not declare its own
    pub default_patterns: Option<ReferencePatterns>,
}

impl ReferenceInfo {
    /// A required single-valued reference.
    pub fn single(name: &str) -> Self {
        Self {
            name: name.to_string(),
            interface: None,
            cardinality: Cardinality::Single,
            required: true,
            default_patterns: None,
        }
    }

    /// An optional collection-valued reference.
    pub fn collection(name: &str) -> Self {
        Self {
            name: name.to_string(),
            interface: None,
            cardinality: Cardinality::Collection,
            required: false,
            default_patterns: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    pub fn with_default(mut self, patterns: impl Into<ReferencePatterns>) -> Self {
        self.default_patterns = Some(patterns.into());
        self
    }
}

/// Registration request for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    pub name: ComponentName,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub references: BTreeMap<String, ReferencePatterns>,
    /// Components that must be RUNNING before this one starts
    #[serde(default)]
    pub dependencies: Vec<NameQuery>,
}

impl ComponentData {
    pub fn new(name: ComponentName, type_name: &str) -> Self {
        Self {
            name,
            type_name: type_name.to_string(),
            attributes: BTreeMap::new(),
            references: BTreeMap::new(),
            dependencies: Vec::new(),
        }
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
}

/// A live component instance.
///
/// Capabilities are discovered through the accessor methods rather than
/// through a type hierarchy: a component that needs a start hook returns
/// `Some(self)` from [`ManagedComponent::startable`], and so on.
pub trait ManagedComponent: Any + Send + Sync + fmt::Debug {
    fn startable(&self) -> Option<&dyn Startable> {
        None
    }

    fn stoppable(&self) -> Option<&dyn Stoppable> {
        None
    }

    fn attribute_aware(&self) -> Option<&dyn AttributeAware> {
        None
    }

    /// Fail hook, run when the component enters FAILED.
    fn on_fail(&self, _reason: &str) {}
}

/// Start hook, run while the component is STARTING
#[async_trait]
pub trait Startable: Send + Sync {
    async fn start(&self) -> Result<()>;
}

/// Stop hook, run while the component is STOPPING
#[async_trait]
pub trait Stoppable: Send + Sync {
    async fn stop(&self) -> Result<()>;
}

/// Receives attribute changes made while the component is running
pub trait AttributeAware: Send + Sync {
    fn attribute_changed(&self, name: &str, value: &Value) -> Result<()>;
}

/// Everything a factory gets to build an instance.
#[derive(Clone)]
pub struct ComponentContext {
    pub name: ComponentName,
    pub attributes: BTreeMap<String, Value>,
    /// Resolved targets for every declared reference
    pub references: BTreeMap<String, Vec<ComponentName>>,
    pub kernel: Kernel,
}

impl ComponentContext {
    /// Reads an attribute into a typed value.
    pub fn attribute<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// The resolved target of a single-valued reference.
    pub fn reference(&self, key: &str) -> Option<&ComponentName> {
        self.references.get(key).and_then(|targets| targets.first())
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

/// Builds a fresh instance each time a component starts.
pub trait ComponentFactory: Send + Sync {
    fn create(&self, context: ComponentContext) -> Result<Arc<dyn ManagedComponent>>;
}

impl<F> ComponentFactory for F
where
    F: Fn(ComponentContext) -> Result<Arc<dyn ManagedComponent>> + Send + Sync,
{
    fn create(&self, context: ComponentContext) -> Result<Arc<dyn ManagedComponent>> {
        self(context)
    }
}

/// Schema and factory for a family of components
pub struct ComponentType {
    name: String,
    interfaces: BTreeSet<String>,
    attributes: BTreeMap<String, AttributeInfo>,
    references: BTreeMap<String, ReferenceInfo>,
    factory: Arc<dyn ComponentFactory>,
}

impl ComponentType {
    pub fn builder(name: &str, factory: impl ComponentFactory + 'static) -> ComponentTypeBuilder {
        ComponentTypeBuilder {
            component_type: ComponentType {
                name: name.to_string(),
                interfaces: BTreeSet::new(),
                attributes: BTreeMap::new(),
                references: BTreeMap::new(),
                factory: Arc::new(factory),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interfaces(&self) -> &BTreeSet<String> {
        &self.interfaces
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.get(name)
    }

    pub fn references(&self) -> impl Iterator<Item = &ReferenceInfo> {
        self.references.values()
    }

    pub fn factory(&self) -> &Arc<dyn ComponentFactory> {
        &self.factory
    }

    /// Checks one attribute value against the schema.
    pub fn validate_attribute(&self, component: &ComponentName, key: &str, value: &Value) -> Result<&AttributeInfo> {
        let info = self.attributes.get(key).ok_or_else(|| Error::InvalidAttribute {
            name: component.to_string(),
            attribute: key.to_string(),
            message: format!("not declared by type '{}'", self.name),
        })?;
        if !info.kind.accepts(value) {
            return Err(Error::InvalidAttribute {
                name: component.to_string(),
                attribute: key.to_string(),
                message: format!("expected {:?}, got {}", info.kind, value),
            });
        }
        Ok(info)
    }

    /// Validates a registration request and fills in attribute defaults.
    pub fn validate(&self, data: &mut ComponentData) -> Result<()> {
        for (key, value) in &data.attributes {
            self.validate_attribute(&data.name, key, value)?;
        }
        for key in data.references.keys() {
            if !self.references.contains_key(key) {
                return Err(Error::InvalidAttribute {
                    name: data.name.to_string(),
                    attribute: key.clone(),
                    message: format!("reference not declared by type '{}'", self.name),
                });
            }
        }
        for info in self.attributes.values() {
            if let Some(ref default) = info.default {
                data.attributes.entry(info.name.clone()).or_insert_with(|| default.clone());
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentType")
            .field("name", &self.name)
            .field("interfaces", &self.interfaces)
            .field("attributes", &self.attributes.keys())
            .field("references", &self.references.keys())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ComponentType`]
pub struct ComponentTypeBuilder {
    component_type: ComponentType,
}

impl ComponentTypeBuilder {
    pub fn interface(mut self, interface: &str) -> Self {
        self.component_type.interfaces.insert(interface.to_string());
        self
    }

    pub fn attribute(mut self, info: AttributeInfo) -> Self {
        self.component_type.attributes.insert(info.name.clone(), info);
        self
    }

    pub fn reference(mut self, info: ReferenceInfo) -> Self {
        self.component_type.references.insert(info.name.clone(), info);
        self
    }

    pub fn build(self) -> ComponentType {
        self.component_type
    }
}
