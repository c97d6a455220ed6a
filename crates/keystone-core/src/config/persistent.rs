use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::config::error::StorageError;
use crate::kernel::error::Result;
use crate::kernel::settings::ConfigFormat;
use crate::registry::name::Artifact;

/// Records which configurations should start automatically.
///
/// The configuration manager adds a configuration when it loads, marks it
/// when a start succeeds and the descriptor asks for automatic start, and
/// unmarks it when a user stops it. Shutdown does not touch the list, so
/// the set of started configurations survives a restart.
#[async_trait]
pub trait PersistentConfigurationList: Send + Sync {
    /// Whether the kernel finished restoring the list after boot
    async fn is_kernel_fully_started(&self) -> bool;

    async fn set_kernel_fully_started(&self, started: bool);

    /// Record a configuration (not marked for automatic start)
    async fn add_configuration(&self, id: &Artifact) -> Result<()>;

    async fn remove_configuration(&self, id: &Artifact) -> Result<()>;

    /// Mark a configuration for automatic start
    async fn start_configuration(&self, id: &Artifact) -> Result<()>;

    /// Clear the automatic-start mark
    async fn stop_configuration(&self, id: &Artifact) -> Result<()>;

    /// Configurations marked for automatic start, in the order they were added
    async fn restore(&self) -> Result<Vec<Artifact>>;

    /// Every recorded configuration, in the order they were added
    async fn list(&self) -> Vec<ListEntry>;
}

/// One configuration in the list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: Artifact,
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ListState {
    #[serde(default)]
    configurations: Vec<ListEntry>,
    /// Not persisted: every process starts out not fully started
    #[serde(skip)]
    fully_started: bool,
}

impl ListState {
    fn entry_mut(&mut self, id: &Artifact) -> &mut ListEntry {
        match self.configurations.iter().position(|e| &e.id == id) {
            Some(pos) => &mut self.configurations[pos],
            None => {
                self.configurations.push(ListEntry {
                    id: id.clone(),
                    auto_start: false,
                });
                let last = self.configurations.len() - 1;
                &mut self.configurations[last]
            }
        }
    }

    /// Each mutator returns whether anything changed.
    fn add(&mut self, id: &Artifact) -> bool {
        let before = self.configurations.len();
        self.entry_mut(id);
        self.configurations.len() != before
    }

    fn remove(&mut self, id: &Artifact) -> bool {
        let before = self.configurations.len();
        self.configurations.retain(|e| &e.id != id);
        self.configurations.len() != before
    }

    fn set_auto_start(&mut self, id: &Artifact, auto_start: bool) -> bool {
        let entry = self.entry_mut(id);
        let changed = entry.auto_start != auto_start;
        entry.auto_start = auto_start;
        changed
    }

    fn restore(&self) -> Vec<Artifact> {
        self.configurations
            .iter()
            .filter(|e| e.auto_start)
            .map(|e| e.id.clone())
            .collect()
    }
}

/// List kept in memory only
#[derive(Debug, Default)]
pub struct InMemoryConfigurationList {
    state: Mutex<ListState>,
}

impl InMemoryConfigurationList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentConfigurationList for InMemoryConfigurationList {
    async fn is_kernel_fully_started(&self) -> bool {
        self.state.lock().await.fully_started
    }

    async fn set_kernel_fully_started(&self, started: bool) {
        self.state.lock().await.fully_started = started;
    }

    async fn add_configuration(&self, id: &Artifact) -> Result<()> {
        self.state.lock().await.add(id);
        Ok(())
    }

    async fn remove_configuration(&self, id: &Artifact) -> Result<()> {
        self.state.lock().await.remove(id);
        Ok(())
    }

    async fn start_configuration(&self, id: &Artifact) -> Result<()> {
        self.state.lock().await.set_auto_start(id, true);
        Ok(())
    }

    async fn stop_configuration(&self, id: &Artifact) -> Result<()> {
        self.state.lock().await.set_auto_start(id, false);
        Ok(())
    }

    async fn restore(&self) -> Result<Vec<Artifact>> {
        Ok(self.state.lock().await.restore())
    }

    async fn list(&self) -> Vec<ListEntry> {
        self.state.lock().await.configurations.clone()
    }
}

/// List persisted to a JSON, YAML or TOML file after every change.
#[derive(Debug)]
pub struct FileConfigurationList {
    path: PathBuf,
    format: ConfigFormat,
    state: Mutex<ListState>,
}

impl FileConfigurationList {
    /// Open the list at `path`. A missing file is an empty list; it is
    /// created on the first change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path).ok_or_else(|| StorageError::UnsupportedConfigFormat(path.clone()))?;
        let state = if path.exists() {
            ConfigFormat::read_file::<ListState>(&path)?
        } else {
            ListState::default()
        };
        log::debug!(
            "Opened configuration list {} ({} entries)",
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

    /// Apply `change` and write the file if it reports a change.
    async fn update(&self, change: impl FnOnce(&mut ListState) -> bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if change(&mut state) {
            self.save(&state)?;
        }
        Ok(())
    }

    /// Atomically replace the file: write a temporary file next to it, then
    /// rename it over the target.
    fn save(&self, state: &ListState) -> Result<()> {
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
impl PersistentConfigurationList for FileConfigurationList {
    async fn is_kernel_fully_started(&self) -> bool {
        self.state.lock().await.fully_started
    }

    async fn set_kernel_fully_started(&self, started: bool) {
        self.state.lock().await.fully_started = started;
    }

    async fn add_configuration(&self, id: &Artifact) -> Result<()> {
        self.update(|state| state.add(id)).await
    }

    async fn remove_configuration(&self, id: &Artifact) -> Result<()> {
        self.update(|state| state.remove(id)).await
    }

    async fn start_configuration(&self, id: &Artifact) -> Result<()> {
        self.update(|state| state.set_auto_start(id, true)).await
    }

    async fn stop_configuration(&self, id: &Artifact) -> Result<()> {
        self.update(|state| state.set_auto_start(id, false)).await
    }

    async fn restore(&self) -> Result<Vec<Artifact>> {
        Ok(self.state.lock().await.restore())
    }

    async fn list(&self) -> Vec<ListEntry> {
        self.state.lock().await.configurations.clone()
    }
}
