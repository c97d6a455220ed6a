use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::config::error::StorageError;
use crate::kernel::error::Result;
use crate::kernel::settings::ConfigFormat;
use crate::registry::component::ComponentData;
use crate::registry::name::{Artifact, ComponentName};
use crate::registry::query::ReferencePatterns;

/// Records changes made to the components of loaded configurations so they
/// survive an unload and a restart.
///
/// The kernel records every attribute and reference change made to a
/// component a configuration owns. When the configuration loads again the
/// configuration manager passes its components through
/// [`AttributeStore::apply_overrides`] before registering them.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Apply the recorded overrides of configuration `id`. Components
    /// marked not to load are dropped.
    async fn apply_overrides(&self, id: &Artifact, components: Vec<ComponentData>) -> Vec<ComponentData>;

    async fn set_value(&self, id: &Artifact, component: &ComponentName, attribute: &str, value: Value) -> Result<()>;

    async fn set_reference_patterns(
        &self,
        id: &Artifact,
        component: &ComponentName,
        reference: &str,
        patterns: ReferencePatterns,
    ) -> Result<()>;

    /// Whether the component loads with its configuration (default: yes)
    async fn set_should_load(&self, id: &Artifact, component: &ComponentName, load: bool) -> Result<()>;

    /// Whether anything is recorded for configuration `id`
    async fn has_overrides(&self, id: &Artifact) -> bool;

    /// Forget everything recorded for configuration `id`
    async fn clear(&self, id: &Artifact) -> Result<()>;
}

/// Overrides of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentOverrides {
    #[serde(default = "default_load")]
    pub load: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, ReferencePatterns>,
}

fn default_load() -> bool {
    true
}

impl Default for ComponentOverrides {
    fn default() -> Self {
        Self {
            load: true,
            attributes: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }
}

/// Configuration id -> component name -> overrides, keyed by display form
/// so the file stays readable in every format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    configurations: BTreeMap<String, BTreeMap<String, ComponentOverrides>>,
}

impl StoreState {
    fn overrides_mut(&mut self, id: &Artifact, component: &ComponentName) -> &mut ComponentOverrides {
        self.configurations
            .entry(id.to_string())
            .or_default()
            .entry(component.to_string())
            .or_default()
    }

    fn apply(&self, id: &Artifact, components: Vec<ComponentData>) -> Vec<ComponentData> {
        let Some(recorded) = self.configurations.get(&id.to_string()) else {
            return components;
        };
        components
            .into_iter()
            .filter_map(|mut component| {
                let Some(overrides) = recorded.get(&component.name.to_string()) else {
                    return Some(component);
                };
                if !overrides.load {
                    log::info!("Not loading {}: disabled in the attribute store", component.name);
                    return None;
                }
                component
                    .attributes
                    .extend(overrides.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
                component
                    .references
                    .extend(overrides.references.iter().map(|(k, v)| (k.clone(), v.clone())));
                Some(component)
            })
            .collect()
    }

    /// Each mutator returns whether anything changed.
    fn set_value(&mut self, id: &Artifact, component: &ComponentName, attribute: &str, value: Value) -> bool {
        let attributes = &mut self.overrides_mut(id, component).attributes;
        attributes.insert(attribute.to_string(), value.clone()) != Some(value)
    }

    fn set_reference(&mut self, id: &Artifact, component: &ComponentName, reference: &str, patterns: ReferencePatterns) -> bool {
        let references = &mut self.overrides_mut(id, component).references;
        references.insert(reference.to_string(), patterns.clone()) != Some(patterns)
    }

    fn set_should_load(&mut self, id: &Artifact, component: &ComponentName, load: bool) -> bool {
        let overrides = self.overrides_mut(id, component);
        let changed = overrides.load != load;
        overrides.load = load;
        changed
    }

    fn has_overrides(&self, id: &Artifact) -> bool {
        self.configurations.get(&id.to_string()).is_some_and(|c| !c.is_empty())
    }

    fn clear(&mut self, id: &Artifact) -> bool {
        self.configurations.remove(&id.to_string()).is_some()
    }
}

/// Attribute store kept in memory only
#[derive(Debug, Default)]
pub struct InMemoryAttributeStore {
    state: Mutex<StoreState>,
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttributeStore for InMemoryAttributeStore {
    async fn apply_overrides(&self, id: &Artifact, components: Vec<ComponentData>) -> Vec<ComponentData> {
        self.state.lock().await.apply(id, components)
    }

    async fn set_value(&self, id: &Artifact, component: &ComponentName, attribute: &str, value: Value) -> Result<()> {
        self.state.lock().await.set_value(id, component, attribute, value);
        Ok(())
    }

    async fn set_reference_patterns(
        &self,
        id: &Artifact,
        component: &ComponentName,
        reference: &str,
        patterns: ReferencePatterns,
    ) -> Result<()> {
        self.state.lock().await.set_reference(id, component, reference, patterns);
        Ok(())
    }

    async fn set_should_load(&self, id: &Artifact, component: &ComponentName, load: bool) -> Result<()> {
        self.state.lock().await.set_should_load(id, component, load);
        Ok(())
    }

    async fn has_overrides(&self, id: &Artifact) -> bool {
        self.state.lock().await.has_overrides(id)
    }

    async fn clear(&self, id: &Artifact) -> Result<()> {
        self.state.lock().await.clear(id);
        Ok(())
    }
}

/// Attribute store persisted to a JSON, YAML or TOML file after every change.
#[derive(Debug)]
pub struct FileAttributeStore {
    path: PathBuf,
    format: ConfigFormat,
    state: Mutex<StoreState>,
}

impl FileAttributeStore {
    /// Open the store at `path`. A missing file is an empty store; it is
    /// created on the first change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path).ok_or_else(|| StorageError::UnsupportedConfigFormat(path.clone()))?;
        let state = if path.exists() {
            ConfigFormat::read_file::<StoreState>(&path)?
        } else {
            StoreState::default()
        };
        log::debug!(
            "Opened attribute store {} ({} configurations)",
            path.display(),
            state.configurations.len()
        );
        Ok(Self {
            path,
            format,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn update(&self, change: impl FnOnce(&mut StoreState) -> bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if change(&mut state) {
            self.save(&state)?;
        }
        Ok(())
    }

    /// Write a temporary file next to the target, then rename it over.
    fn save(&self, state: &StoreState) -> Result<()> {
        let contents = self.format.serialize(state)?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(e, "create_dir_all", &dir))?;

        let mut temp_file = NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(e, "create_temp_file", &dir))?;
        temp_file
            .write_all(contents.as_bytes())
            .map_err(|e| StorageError::io(e, "write_to_temp_file", temp_file.path()))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| StorageError::io(e.error, "persist_temp_file", &self.path))?;
        Ok(())
    }
}

#[async_trait]
impl AttributeStore for FileAttributeStore {
    async fn apply_overrides(&self, id: &Artifact, components: Vec<ComponentData>) -> Vec<ComponentData> {
        self.state.lock().await.apply(id, components)
    }

    async fn set_value(&self, id: &Artifact, component: &ComponentName, attribute: &str, value: Value) -> Result<()> {
        self.update(|state| state.set_value(id, component, attribute, value)).await
    }

    async fn set_reference_patterns(
        &self,
        id: &Artifact,
        component: &ComponentName,
        reference: &str,
        patterns: ReferencePatterns,
    ) -> Result<()> {
        self.update(|state| state.set_reference(id, component, reference, patterns)).await
    }

    async fn set_should_load(&self, id: &Artifact, component: &ComponentName, load: bool) -> Result<()> {
        self.update(|state| state.set_should_load(id, component, load)).await
    }

    async fn has_overrides(&self, id: &Artifact) -> bool {
        self.state.lock().await.has_overrides(id)
    }

    async fn clear(&self, id: &Artifact) -> Result<()> {
        self.update(|state| state.clear(id)).await
    }
}
