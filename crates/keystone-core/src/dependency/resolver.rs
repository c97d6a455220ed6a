use std::collections::{BTreeMap, BTreeSet};

use crate::dependency::error::DependencyError;
use crate::lifecycle::State;
use crate::registry::component::{Cardinality, ComponentData, ComponentType, ReferenceInfo};
use crate::registry::name::ComponentName;
use crate::registry::query::{NameQuery, ReferencePatterns};

/// One component as seen by a [`RegistrySnapshot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Registration sequence number
    pub seq: u64,
    pub name: ComponentName,
    pub interfaces: BTreeSet<String>,
    pub state: State,
}

/// Fixed view of the registry used for resolution.
///
/// Resolving against the same snapshot always gives the same answer.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<SnapshotEntry>,
}

impl RegistrySnapshot {
    pub fn new(mut entries: Vec<SnapshotEntry>) -> Self {
        entries.sort_by_key(|e| e.seq);
        Self { entries }
    }

    /// Entries in registration order
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn get(&self, name: &ComponentName) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| &e.name == name)
    }

    /// Entries matching `query`, in registration order.
    pub fn find(&self, query: &NameQuery) -> Vec<&SnapshotEntry> {
        self.entries
            .iter()
            .filter(|e| query.matches(&e.name, &e.interfaces))
            .collect()
    }

    /// RUNNING entries matching `query`, in registration order.
    pub fn find_running(&self, query: &NameQuery) -> Vec<&SnapshotEntry> {
        self.find(query).into_iter().filter(|e| e.state.is_running()).collect()
    }
}

/// Resolve one reference of `owner`.
///
/// Uses the owner's own patterns, falling back to the type's default
/// patterns. Only RUNNING components that expose the reference's interface
/// qualify, and the owner never matches itself. A single-valued reference
/// with several candidates takes the lowest [`ComponentName`].
pub fn resolve_reference(
    snapshot: &RegistrySnapshot,
    owner: &ComponentName,
    info: &ReferenceInfo,
    patterns: Option<&ReferencePatterns>,
) -> Result<Vec<ComponentName>, DependencyError> {
    let missing = |query: String| DependencyError::MissingReference {
        component: owner.to_string(),
        reference: info.name.clone(),
        query,
    };

    let Some(patterns) = patterns.or(info.default_patterns.as_ref()) else {
        if info.required {
            return Err(missing("no patterns declared".to_string()));
        }
        return Ok(Vec::new());
    };

    let qualifies = |entry: &SnapshotEntry| {
        entry.state.is_running()
            && &entry.name != owner
            && info.interface.as_ref().is_none_or(|i| entry.interfaces.contains(i))
    };

    let mut matched: Vec<&SnapshotEntry> = Vec::new();
    match patterns {
        ReferencePatterns::Name(name) => {
            matched.extend(snapshot.get(name).filter(|e| qualifies(e)));
        }
        ReferencePatterns::Names(names) => {
            for name in names {
                matched.extend(snapshot.get(name).filter(|e| qualifies(e)));
            }
            matched.sort_by_key(|e| e.seq);
            matched.dedup_by_key(|e| e.seq);
        }
        ReferencePatterns::Query(query) => {
            matched.extend(snapshot.find(query).into_iter().filter(|e| qualifies(e)));
        }
    }

    if matched.is_empty() {
        if info.required {
            return Err(missing(describe(patterns)));
        }
        return Ok(Vec::new());
    }

    if info.cardinality == Cardinality::Single && matched.len() > 1 {
        let chosen = matched.iter().map(|e| &e.name).min().cloned();
        log::debug!(
            "Reference '{}' of {} matched {} components; using {}",
            info.name,
            owner,
            matched.len(),
            chosen.as_ref().map(ToString::to_string).unwrap_or_default()
        );
        return Ok(chosen.into_iter().collect());
    }

    Ok(matched.into_iter().map(|e| e.name.clone()).collect())
}

/// Resolve every declared reference and explicit dependency of a component.
pub fn resolve_all(
    snapshot: &RegistrySnapshot,
    component_type: &ComponentType,
    data: &ComponentData,
) -> Result<BTreeMap<String, Vec<ComponentName>>, DependencyError> {
    let mut resolved = BTreeMap::new();
    for info in component_type.references() {
        let targets = resolve_reference(snapshot, &data.name, info, data.references.get(&info.name))?;
        resolved.insert(info.name.clone(), targets);
    }

    for query in &data.dependencies {
        let satisfied = snapshot
            .find_running(query)
            .iter()
            .any(|e| e.name != data.name);
        if !satisfied {
            return Err(DependencyError::MissingComponent {
                component: data.name.to_string(),
                query: query.to_string(),
            });
        }
    }

    Ok(resolved)
}

fn describe(patterns: &ReferencePatterns) -> String {
    match patterns {
        ReferencePatterns::Name(name) => name.to_string(),
        ReferencePatterns::Names(names) => names.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
        ReferencePatterns::Query(query) => query.to_string(),
    }
}
