use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::name::{Artifact, ComponentName};

/// Declarative pattern matching zero or more components.
///
/// A component matches when its artifact satisfies `artifact` (if given), its
/// name carries every property in `properties` with the same value, and its
/// type declares every interface in `interfaces`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub interfaces: BTreeSet<String>,
}

impl NameQuery {
    /// Matches every component.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches exactly one name (plus whatever interfaces get added).
    pub fn exact(name: &ComponentName) -> Self {
        Self {
            artifact: Some(name.artifact.clone()),
            properties: name.properties.clone(),
            interfaces: BTreeSet::new(),
        }
    }

    /// Matches components exposing `interface`.
    pub fn interface(interface: &str) -> Self {
        Self::any().with_interface(interface)
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interfaces.insert(interface.to_string());
        self
    }

    /// Tests a component identity and its declared interfaces against the query.
    pub fn matches(&self, name: &ComponentName, interfaces: &BTreeSet<String>) -> bool {
        if let Some(ref artifact) = self.artifact {
            if !artifact.matches(&name.artifact) {
                return false;
            }
        }
        self.properties
            .iter()
            .all(|(k, v)| name.properties.get(k) == Some(v))
            && self.interfaces.is_subset(interfaces)
    }
}

impl fmt::Display for NameQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.artifact {
            Some(a) => write!(f, "{}", a)?,
            None => write!(f, "*")?,
        }
        write!(f, "?")?;
        let props: Vec<String> = self.properties.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", props.join(","))?;
        if !self.interfaces.is_empty() {
            let ifaces: Vec<&str> = self.interfaces.iter().map(String::as_str).collect();
            write!(f, "#{}", ifaces.join(","))?;
        }
        Ok(())
    }
}

/// Value of a component reference as declared by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePatterns {
    /// Exactly one named target.
    Name(ComponentName),
    /// An explicit set of named targets.
    Names(Vec<ComponentName>),
    /// Targets found by query when the owner starts.
    Query(NameQuery),
}

impl ReferencePatterns {
    /// The patterns as queries, for evaluation against a registry snapshot.
    pub fn queries(&self) -> Vec<NameQuery> {
        match self {
            ReferencePatterns::Name(name) => vec![NameQuery::exact(name)],
            ReferencePatterns::Names(names) => names.iter().map(NameQuery::exact).collect(),
            ReferencePatterns::Query(query) => vec![query.clone()],
        }
    }
}

impl From<ComponentName> for ReferencePatterns {
    fn from(name: ComponentName) -> Self {
        ReferencePatterns::Name(name)
    }
}

impl From<NameQuery> for ReferencePatterns {
    fn from(query: NameQuery) -> Self {
        ReferencePatterns::Query(query)
    }
}
