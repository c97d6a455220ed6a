use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::config::attributes::AttributeStore;
use crate::config::manager::configuration_type;
use crate::kernel::constants;
use crate::kernel::error::{Error, Result};
use crate::lifecycle::monitor::LifecycleMonitor;
use crate::proxy::manager::{ProxyHandle, ProxyManager, ProxyTarget, ScopedProxy};
use crate::registry::component::{ComponentData, ComponentType, ManagedComponent};
use crate::registry::name::{Artifact, ComponentName};
use crate::registry::query::{NameQuery, ReferencePatterns};
use crate::registry::registry::ComponentRegistry;

/// Type for shutdown hook identifiers
pub type HookId = u64;

/// Work to run when the kernel shuts down
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    /// Hook name for logging
    fn name(&self) -> &str;

    async fn run(&self, kernel: &Kernel);
}

struct KernelInner {
    name: String,
    registry: Arc<ComponentRegistry>,
    types: RwLock<HashMap<String, Arc<ComponentType>>>,
    proxies: ProxyManager,
    monitor: LifecycleMonitor,
    hooks: Mutex<Vec<(HookId, Arc<dyn ShutdownHook>)>>,
    next_hook_id: AtomicU64,
    /// Where changes to configuration-owned components are recorded
    attribute_store: RwLock<Option<Arc<dyn AttributeStore>>>,
    shut_down: AtomicBool,
}

/// Handle to one kernel instance.
///
/// Cloning is cheap and every clone refers to the same kernel; there is no
/// process-wide kernel, callers pass the handle explicitly.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Creates a kernel with the built-in configuration component type registered.
    pub fn new(name: &str) -> Self {
        log::info!("Initializing {} kernel '{}' v{}", constants::APP_NAME, name, constants::APP_VERSION);
        let registry = Arc::new(ComponentRegistry::new());
        let configuration = Arc::new(configuration_type());
        let mut types = HashMap::new();
        types.insert(configuration.name().to_string(), configuration);

        Self {
            inner: Arc::new(KernelInner {
                name: name.to_string(),
                proxies: ProxyManager::new(registry.clone()),
                registry,
                types: RwLock::new(types),
                monitor: LifecycleMonitor::new(),
                hooks: Mutex::new(Vec::new()),
                next_hook_id: AtomicU64::new(1),
                attribute_store: RwLock::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    pub fn monitor(&self) -> &LifecycleMonitor {
        &self.inner.monitor
    }

    pub fn proxies(&self) -> &ProxyManager {
        &self.inner.proxies
    }

    /// Whether [`Kernel::shutdown`] has run
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Register a component type. Type names are unique.
    pub async fn register_type(&self, component_type: ComponentType) -> Result<()> {
        let mut types = self.inner.types.write().await;
        if types.contains_key(component_type.name()) {
            return Err(Error::AlreadyExists {
                name: format!("component type '{}'", component_type.name()),
            });
        }
        log::debug!("Registered component type '{}'", component_type.name());
        types.insert(component_type.name().to_string(), Arc::new(component_type));
        Ok(())
    }

    pub async fn component_type(&self, type_name: &str) -> Result<Arc<ComponentType>> {
        self.inner
            .types
            .read()
            .await
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::UnknownComponentType { type_name: type_name.to_string() })
    }

    /// Register a component that belongs to no configuration.
    pub async fn load_component(&self, data: ComponentData) -> Result<()> {
        self.load_owned(data, None).await
    }

    pub(crate) async fn load_owned(&self, data: ComponentData, owner: Option<Artifact>) -> Result<()> {
        self.ensure_not_shut_down()?;
        let component_type = self.component_type(&data.type_name).await?;
        self.registry().register(data, component_type, owner).await
    }

    pub async fn is_loaded(&self, name: &ComponentName) -> bool {
        self.registry().is_loaded(name).await
    }

    /// Names matching `query`, in registration order.
    pub async fn find(&self, query: &NameQuery) -> Vec<ComponentName> {
        self.registry().find(query).await
    }

    pub async fn component_data(&self, name: &ComponentName) -> Result<ComponentData> {
        self.registry().component_data(name).await
    }

    pub async fn get_attribute(&self, name: &ComponentName, key: &str) -> Result<Value> {
        self.registry().get_attribute(name, key).await
    }

    /// Set an attribute. A change to a component owned by a configuration
    /// is also recorded in the attribute store, if one is installed.
    pub async fn set_attribute(&self, name: &ComponentName, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.registry().set_attribute(name, key, value.clone()).await?;
        if let Some((owner, store)) = self.recording_for(name).await {
            if let Err(e) = store.set_value(&owner, name, key, value).await {
                log::warn!("Failed to record attribute {} of {}: {}", key, name, e);
            }
        }
        Ok(())
    }

    /// Replace a reference's patterns; recorded like [`Kernel::set_attribute`].
    pub async fn set_reference(
        &self,
        name: &ComponentName,
        key: &str,
        patterns: impl Into<ReferencePatterns>,
    ) -> Result<()> {
        let patterns = patterns.into();
        self.registry().set_reference(name, key, patterns.clone()).await?;
        if let Some((owner, store)) = self.recording_for(name).await {
            if let Err(e) = store.set_reference_patterns(&owner, name, key, patterns).await {
                log::warn!("Failed to record reference {} of {}: {}", key, name, e);
            }
        }
        Ok(())
    }

    /// Install (or remove) the store that records changes to
    /// configuration-owned components.
    pub async fn set_attribute_store(&self, store: Option<Arc<dyn AttributeStore>>) {
        *self.inner.attribute_store.write().await = store;
    }

    pub async fn attribute_store(&self) -> Option<Arc<dyn AttributeStore>> {
        self.inner.attribute_store.read().await.clone()
    }

    async fn recording_for(&self, name: &ComponentName) -> Option<(Artifact, Arc<dyn AttributeStore>)> {
        let store = self.attribute_store().await?;
        let owner = self.registry().owner(name).await.ok()??;
        Some((owner, store))
    }

    /// Live instance of a RUNNING component; `None` in any other state.
    pub async fn instance(&self, name: &ComponentName) -> Result<Option<Arc<dyn ManagedComponent>>> {
        self.registry().instance(name).await
    }

    pub async fn create_proxy(&self, target: impl Into<ProxyTarget>, interfaces: BTreeSet<String>) -> Result<ProxyHandle> {
        self.proxies().create_proxy(target, interfaces).await
    }

    pub async fn create_scoped_proxy(
        &self,
        target: impl Into<ProxyTarget>,
        interfaces: BTreeSet<String>,
    ) -> Result<ScopedProxy> {
        self.proxies().create_scoped(target, interfaces).await
    }

    pub fn destroy_proxy(&self, proxy: &ProxyHandle) -> Result<()> {
        self.proxies().destroy_proxy(proxy)
    }

    /// Register a hook to run on [`Kernel::shutdown`]. Hooks run in
    /// registration order.
    pub async fn register_shutdown_hook(&self, hook: Arc<dyn ShutdownHook>) -> HookId {
        let id = self.inner.next_hook_id.fetch_add(1, Ordering::SeqCst);
        log::debug!("Registered shutdown hook '{}' (#{})", hook.name(), id);
        self.inner.hooks.lock().await.push((id, hook));
        id
    }

    pub async fn unregister_shutdown_hook(&self, id: HookId) -> bool {
        let mut hooks = self.inner.hooks.lock().await;
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Shut the kernel down.
    ///
    /// Runs every shutdown hook, then force-stops and unregisters whatever
    /// is still loaded, newest first, and destroys any proxies left live.
    /// Never fails; a second call does nothing.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Shutting down kernel '{}'", self.name());

        let hooks: Vec<Arc<dyn ShutdownHook>> = self.inner.hooks.lock().await.drain(..).map(|(_, h)| h).collect();
        for hook in hooks {
            log::info!("Running shutdown hook '{}'", hook.name());
            hook.run(self).await;
        }

        let remaining = self.find(&NameQuery::any()).await;
        for name in remaining.iter().rev() {
            log::warn!("Component {} still loaded at shutdown; forcing it down", name);
            match self.unload_component(name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => log::warn!("Failed to unload {}: {}", name, e),
            }
        }

        let leaked = self.proxies().destroy_all();
        if leaked > 0 {
            log::warn!("{} proxies were still live at shutdown", leaked);
        }
        log::info!("Kernel '{}' shut down", self.name());
    }

    fn ensure_not_shut_down(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::IllegalState(format!("Kernel '{}' has been shut down", self.name())));
        }
        Ok(())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.inner.name)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
