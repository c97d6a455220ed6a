use std::sync::Weak;

use async_trait::async_trait;

use crate::config::manager::{ConfigurationManager, ManagerInner};
use crate::kernel::bootstrap::{Kernel, ShutdownHook};

/// Stops and unloads every configuration when the kernel shuts down.
///
/// Holds the manager weakly so that a dropped manager does not stay alive
/// through the kernel's hook list.
pub struct ConfigurationShutdownHook {
    manager: Weak<ManagerInner>,
}

impl ConfigurationShutdownHook {
    pub(crate) fn new(manager: Weak<ManagerInner>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ShutdownHook for ConfigurationShutdownHook {
    fn name(&self) -> &str {
        "configuration-manager"
    }

    async fn run(&self, _kernel: &Kernel) {
        match self.manager.upgrade() {
            Some(inner) => ConfigurationManager::from_inner(inner).shutdown().await,
            None => log::debug!("Configuration manager already dropped; nothing to shut down"),
        }
    }
}
