use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::data::ConfigurationData;
use crate::config::error::StorageError;
use crate::kernel::error::{Error, Result};
use crate::kernel::settings::ConfigFormat;
use crate::registry::name::Artifact;

/// Source of configuration descriptors
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &str;

    /// Ids of every top-level configuration in the store
    async fn list(&self) -> Result<Vec<Artifact>>;

    /// Load a descriptor. Fails with `NoSuchConfig` when the store does not
    /// hold `id`.
    async fn load(&self, id: &Artifact) -> Result<ConfigurationData>;

    async fn contains(&self, id: &Artifact) -> bool {
        self.list().await.map(|ids| ids.contains(id)).unwrap_or(false)
    }
}

/// Source of plain (non-configuration) artifacts such as libraries
pub trait ListableRepository: Send + Sync {
    fn contains(&self, artifact: &Artifact) -> bool;

    /// Every artifact matching `pattern`
    fn list(&self, pattern: &Artifact) -> Vec<Artifact>;
}

/// Store backed by a map, filled through [`InMemoryConfigurationStore::install`].
#[derive(Debug, Default)]
pub struct InMemoryConfigurationStore {
    configurations: RwLock<BTreeMap<Artifact, ConfigurationData>>,
}

impl InMemoryConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a descriptor
    pub async fn install(&self, data: ConfigurationData) {
        self.configurations.write().await.insert(data.id().clone(), data);
    }

    pub async fn uninstall(&self, id: &Artifact) -> Result<()> {
        self.configurations
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NoSuchConfig(id.to_string()))
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigurationStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<Artifact>> {
        Ok(self.configurations.read().await.keys().cloned().collect())
    }

    async fn load(&self, id: &Artifact) -> Result<ConfigurationData> {
        self.configurations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NoSuchConfig(id.to_string()))
    }
}

/// Store reading every `.json`, `.yaml`/`.yml` or `.toml` descriptor in one
/// directory. The directory is rescanned on each call.
#[derive(Debug, Clone)]
pub struct DirectoryConfigurationStore {
    name: String,
    root: PathBuf,
}

impl DirectoryConfigurationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("dir:{}", root.display()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn scan(&self) -> Result<Vec<ConfigurationData>> {
        if !self.root.is_dir() {
            return Err(StorageError::DirectoryNotFound(self.root.clone()).into());
        }
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io(e, "read_dir", &self.root))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(e, "read_dir", &self.root))?
        {
            let path = entry.path();
            if path.is_file() && ConfigFormat::from_path(&path).is_some() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut descriptors = Vec::with_capacity(paths.len());
        for path in paths {
            let format = ConfigFormat::from_path(&path).ok_or_else(|| StorageError::UnsupportedConfigFormat(path.clone()))?;
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StorageError::io(e, "read", &path))?;
            let data: ConfigurationData = format.parse(&contents, &path)?;
            descriptors.push(data);
        }
        Ok(descriptors)
    }
}

#[async_trait]
impl ConfigurationStore for DirectoryConfigurationStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<Artifact>> {
        Ok(self.scan().await?.iter().map(|d| d.id().clone()).collect())
    }

    async fn load(&self, id: &Artifact) -> Result<ConfigurationData> {
        self.scan()
            .await?
            .into_iter()
            .find(|d| d.id() == id)
            .ok_or_else(|| Error::NoSuchConfig(id.to_string()))
    }
}

/// Repository listing a fixed set of artifacts
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    artifacts: BTreeSet<Artifact>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.insert(artifact);
        self
    }
}

impl ListableRepository for InMemoryRepository {
    fn contains(&self, artifact: &Artifact) -> bool {
        self.artifacts.contains(artifact)
    }

    fn list(&self, pattern: &Artifact) -> Vec<Artifact> {
        self.artifacts.iter().filter(|a| pattern.matches(a)).cloned().collect()
    }
}
