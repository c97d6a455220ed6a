//! Kernel settings and the file formats they (and configuration descriptors)
//! can be written in.
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::error::StorageError;
use crate::config::manager::ChildFailurePolicy;
use crate::kernel::constants;
use crate::kernel::error::Result;

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Every format compiled in, JSON first
    pub fn all() -> Vec<ConfigFormat> {
        let mut formats = vec![ConfigFormat::Json];
        #[cfg(feature = "yaml-config")]
        formats.push(ConfigFormat::Yaml);
        #[cfg(feature = "toml-config")]
        formats.push(ConfigFormat::Toml);
        formats
    }

    /// Deserialize `contents`; `path` is only used for error reporting.
    pub fn parse<T: DeserializeOwned>(&self, contents: &str, path: &Path) -> std::result::Result<T, StorageError> {
        let error = |source: Box<dyn std::error::Error + Send + Sync>| StorageError::DeserializationError {
            path: path.to_path_buf(),
            format: self.extension().to_string(),
            source,
        };
        match self {
            ConfigFormat::Json => serde_json::from_str(contents).map_err(|e| error(Box::new(e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| error(Box::new(e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(contents).map_err(|e| error(Box::new(e))),
        }
    }

    /// Serialize to string based on format
    pub fn serialize<T: Serialize>(&self, value: &T) -> std::result::Result<String, StorageError> {
        let error = |source: Box<dyn std::error::Error + Send + Sync>| StorageError::SerializationError {
            format: self.extension().to_string(),
            source,
        };
        match self {
            ConfigFormat::Json => serde_json::to_string_pretty(value).map_err(|e| error(Box::new(e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(value).map_err(|e| error(Box::new(e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(value).map_err(|e| error(Box::new(e))),
        }
    }

    /// Read and deserialize a file, picking the format from its extension.
    pub fn read_file<T: DeserializeOwned>(path: &Path) -> std::result::Result<T, StorageError> {
        let format = Self::from_path(path).ok_or_else(|| StorageError::UnsupportedConfigFormat(path.to_path_buf()))?;
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|e| StorageError::io(e, "read", path))?;
        format.parse(&contents, path)
    }
}

/// Settings for one kernel process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSettings {
    pub kernel_name: String,
    /// Whether starting a configuration also starts its components
    pub online: bool,
    pub child_failure_policy: ChildFailurePolicy,
    /// Directories searched for configuration descriptors
    pub store_dirs: Vec<PathBuf>,
    /// File recording which configurations start automatically
    pub persistent_list: Option<PathBuf>,
    /// File recording attribute and reference overrides
    pub attribute_store: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            kernel_name: constants::DEFAULT_KERNEL_NAME.to_string(),
            online: true,
            child_failure_policy: ChildFailurePolicy::default(),
            store_dirs: Vec::new(),
            persistent_list: None,
            attribute_store: None,
            log_level: None,
        }
    }
}

impl KernelSettings {
    /// Load settings from a JSON, YAML or TOML file.
    ///
    /// Relative store, list and attribute store paths are resolved against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings: KernelSettings = ConfigFormat::read_file(path)?;
        if let Some(base) = path.parent() {
            for dir in &mut settings.store_dirs {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
            for file in [settings.persistent_list.as_mut(), settings.attribute_store.as_mut()]
                .into_iter()
                .flatten()
            {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        log::debug!("Loaded kernel settings from {}", path.display());
        Ok(settings)
    }
}
