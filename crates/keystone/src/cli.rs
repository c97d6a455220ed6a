use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keystone_core::kernel::error::Result;
use keystone_core::kernel::settings::KernelSettings;

/// Keystone: a component kernel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Kernel settings file (JSON, YAML or TOML)
    #[arg(long, short)]
    pub settings: Option<PathBuf>,

    /// Configuration store directory; may be given several times
    #[arg(long = "store", value_name = "DIR")]
    pub stores: Vec<PathBuf>,

    /// File recording which configurations start automatically
    #[arg(long, value_name = "FILE")]
    pub list_file: Option<PathBuf>,

    /// File recording attribute and reference changes across restarts
    #[arg(long, value_name = "FILE")]
    pub attribute_file: Option<PathBuf>,

    /// Start configurations without starting their components
    #[arg(long)]
    pub offline: bool,

    /// Log filter, e.g. "info" or "keystone_core=debug"
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the configurations found in the stores
    List,
    /// Print the order in which a configuration and its parents load
    Order {
        /// Configuration id, e.g. "acme/web/1.0/car"
        id: String,
    },
    /// Restore saved configurations, start the given ones and run until Ctrl-C
    Run {
        /// Configuration ids to load and start
        ids: Vec<String>,
        /// Shut down right after starting instead of waiting for Ctrl-C
        #[arg(long)]
        once: bool,
    },
}

impl CliArgs {
    /// Settings from the settings file, if any, overridden by flags.
    pub fn kernel_settings(&self) -> Result<KernelSettings> {
        let mut settings = match self.settings {
            Some(ref path) => KernelSettings::load(path)?,
            None => KernelSettings::default(),
        };
        settings.store_dirs.extend(self.stores.iter().cloned());
        if self.list_file.is_some() {
            settings.persistent_list = self.list_file.clone();
        }
        if self.attribute_file.is_some() {
            settings.attribute_store = self.attribute_file.clone();
        }
        if self.offline {
            settings.online = false;
        }
        if self.log_level.is_some() {
            settings.log_level = self.log_level.clone();
        }
        Ok(settings)
    }
}
