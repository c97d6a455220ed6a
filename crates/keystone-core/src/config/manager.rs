use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::attributes::{AttributeStore, FileAttributeStore};
use crate::config::data::ConfigurationData;
use crate::config::persistent::{FileConfigurationList, PersistentConfigurationList};
use crate::config::shutdown::ConfigurationShutdownHook;
use crate::config::store::{ConfigurationStore, DirectoryConfigurationStore, ListableRepository};
use crate::dependency::error::DependencyError;
use crate::dependency::graph::DependencyGraph;
use crate::dependency::node::{DependencyNode, ImportType, ResolvedParent};
use crate::kernel::bootstrap::{HookId, Kernel};
use crate::kernel::constants;
use crate::kernel::error::{Error, Result};
use crate::kernel::settings::KernelSettings;
use crate::lifecycle::State;
use crate::registry::component::{
    AttributeInfo, AttributeKind, ComponentContext, ComponentData, ComponentType, ManagedComponent,
};
use crate::registry::name::{Artifact, ComponentName};
use crate::registry::query::NameQuery;

/// What happens to a parent configuration when one of its children fails to start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildFailurePolicy {
    /// Stop everything started so far, parent included, and return the error
    #[default]
    Propagate,
    /// Record the failure in the results and keep the parent running
    Continue,
}

/// State of a loaded configuration. A configuration that is not loaded has no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfigurationState {
    Loaded,
    Running,
}

impl fmt::Display for ConfigurationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationState::Loaded => f.write_str("LOADED"),
            ConfigurationState::Running => f.write_str("RUNNING"),
        }
    }
}

/// Everything one configuration operation did, in the order it happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleResults {
    pub loaded: Vec<Artifact>,
    pub started: Vec<Artifact>,
    pub stopped: Vec<Artifact>,
    pub unloaded: Vec<Artifact>,
    /// Configurations that failed, with the reason
    pub failed: BTreeMap<Artifact, String>,
}

impl LifecycleResults {
    pub fn was_loaded(&self, id: &Artifact) -> bool {
        self.loaded.contains(id)
    }

    pub fn was_started(&self, id: &Artifact) -> bool {
        self.started.contains(id)
    }

    pub fn was_stopped(&self, id: &Artifact) -> bool {
        self.stopped.contains(id)
    }

    pub fn was_unloaded(&self, id: &Artifact) -> bool {
        self.unloaded.contains(id)
    }

    pub fn failure(&self, id: &Artifact) -> Option<&str> {
        self.failed.get(id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
            && self.started.is_empty()
            && self.stopped.is_empty()
            && self.unloaded.is_empty()
            && self.failed.is_empty()
    }

    fn merge(&mut self, other: LifecycleResults) {
        self.loaded.extend(other.loaded);
        self.started.extend(other.started);
        self.stopped.extend(other.stopped);
        self.unloaded.extend(other.unloaded);
        self.failed.extend(other.failed);
    }
}

/// Live instance of a configuration's representative component
#[derive(Debug)]
pub struct ConfigurationComponent {
    id: Artifact,
}

impl ConfigurationComponent {
    pub fn id(&self) -> &Artifact {
        &self.id
    }
}

impl ManagedComponent for ConfigurationComponent {}

fn create_configuration_component(context: ComponentContext) -> Result<Arc<dyn ManagedComponent>> {
    let id = context
        .attribute::<String>("id")
        .and_then(|id| id.parse().ok())
        .unwrap_or_else(|| context.name.artifact.clone());
    Ok(Arc::new(ConfigurationComponent { id }))
}

/// The built-in type of configuration representatives.
pub fn configuration_type() -> ComponentType {
    ComponentType::builder(constants::CONFIGURATION_TYPE, create_configuration_component)
        .interface(constants::CONFIGURATION_INTERFACE)
        .attribute(AttributeInfo::new("id", AttributeKind::String))
        .build()
}

/// One entry of the configuration arena
#[derive(Debug, Clone)]
struct LoadedConfiguration {
    data: ConfigurationData,
    node: DependencyNode,
    children: Vec<Artifact>,
    representative: ComponentName,
    /// Contained components in start order
    components: Vec<ComponentName>,
    state: ConfigurationState,
    load_seq: u64,
}

/// A direct parent found while planning a load
#[derive(Debug, Clone)]
struct PlannedParent {
    artifact: Artifact,
    import: ImportType,
    is_configuration: bool,
}

#[derive(Debug, Clone)]
struct PlannedConfiguration {
    data: ConfigurationData,
    /// The enclosing configuration of a nested child comes first
    parents: Vec<PlannedParent>,
}

pub(crate) struct ManagerInner {
    kernel: Kernel,
    stores: Vec<Arc<dyn ConfigurationStore>>,
    repositories: Vec<Arc<dyn ListableRepository>>,
    persistent: Option<Arc<dyn PersistentConfigurationList>>,
    attributes: Option<Arc<dyn AttributeStore>>,
    online: AtomicBool,
    policy: ChildFailurePolicy,
    configurations: RwLock<BTreeMap<Artifact, LoadedConfiguration>>,
    /// One lock per configuration id, serializing load/start/stop/unload of it
    locks: StdMutex<HashMap<Artifact, Arc<Mutex<()>>>>,
    next_load_seq: AtomicU64,
}

/// Loads, starts, stops and unloads configurations.
///
/// Operations on one configuration are serialized; operations on different
/// configurations run in parallel unless a dependency orders them. Each
/// operation first works out which configurations it touches and in which
/// order, then takes their locks one at a time.
#[derive(Clone)]
pub struct ConfigurationManager {
    inner: Arc<ManagerInner>,
}

/// Builder for [`ConfigurationManager`]
pub struct ConfigurationManagerBuilder {
    kernel: Kernel,
    stores: Vec<Arc<dyn ConfigurationStore>>,
    repositories: Vec<Arc<dyn ListableRepository>>,
    persistent: Option<Arc<dyn PersistentConfigurationList>>,
    attributes: Option<Arc<dyn AttributeStore>>,
    online: bool,
    policy: ChildFailurePolicy,
    shutdown_hook: bool,
}

impl ConfigurationManagerBuilder {
    pub fn store(mut self, store: Arc<dyn ConfigurationStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn ListableRepository>) -> Self {
        self.repositories.push(repository);
        self
    }

    pub fn persistent_list(mut self, list: Arc<dyn PersistentConfigurationList>) -> Self {
        self.persistent = Some(list);
        self
    }

    /// Store whose overrides are applied on load. It is also installed in
    /// the kernel, which records component changes there.
    pub fn attribute_store(mut self, store: Arc<dyn AttributeStore>) -> Self {
        self.attributes = Some(store);
        self
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn child_failure_policy(mut self, policy: ChildFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether to register the [`ConfigurationShutdownHook`] with the kernel (default: yes)
    pub fn shutdown_hook(mut self, install: bool) -> Self {
        self.shutdown_hook = install;
        self
    }

    pub async fn build(self) -> ConfigurationManager {
        let manager = ConfigurationManager {
            inner: Arc::new(ManagerInner {
                kernel: self.kernel,
                stores: self.stores,
                repositories: self.repositories,
                persistent: self.persistent,
                attributes: self.attributes.clone(),
                online: AtomicBool::new(self.online),
                policy: self.policy,
                configurations: RwLock::new(BTreeMap::new()),
                locks: StdMutex::new(HashMap::new()),
                next_load_seq: AtomicU64::new(0),
            }),
        };
        if let Some(store) = self.attributes {
            manager.kernel().set_attribute_store(Some(store)).await;
        }
        if self.shutdown_hook {
            manager.install_shutdown_hook().await;
        }
        manager
    }
}

impl ConfigurationManager {
    pub fn builder(kernel: Kernel) -> ConfigurationManagerBuilder {
        ConfigurationManagerBuilder {
            kernel,
            stores: Vec::new(),
            repositories: Vec::new(),
            persistent: None,
            attributes: None,
            online: true,
            policy: ChildFailurePolicy::default(),
            shutdown_hook: true,
        }
    }

    /// Builds a manager with a directory store per configured directory and
    /// the configured persistent list and attribute store, if any.
    pub async fn from_settings(kernel: Kernel, settings: &KernelSettings) -> Result<Self> {
        let mut builder = Self::builder(kernel)
            .online(settings.online)
            .child_failure_policy(settings.child_failure_policy);
        for dir in &settings.store_dirs {
            builder = builder.store(Arc::new(DirectoryConfigurationStore::new(dir)));
        }
        if let Some(ref path) = settings.persistent_list {
            builder = builder.persistent_list(Arc::new(FileConfigurationList::open(path)?));
        }
        if let Some(ref path) = settings.attribute_store {
            builder = builder.attribute_store(Arc::new(FileAttributeStore::open(path)?));
        }
        Ok(builder.build().await)
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.inner.kernel
    }

    pub fn persistent_list(&self) -> Option<&Arc<dyn PersistentConfigurationList>> {
        self.inner.persistent.as_ref()
    }

    pub fn attribute_store(&self) -> Option<&Arc<dyn AttributeStore>> {
        self.inner.attributes.as_ref()
    }

    /// Choose whether a component loads with its configuration. Takes effect
    /// the next time the configuration loads.
    pub async fn set_should_load(&self, id: &Artifact, component: &ComponentName, load: bool) -> Result<()> {
        let store = self
            .inner
            .attributes
            .as_ref()
            .ok_or_else(|| Error::IllegalState("No attribute store configured".to_string()))?;
        store.set_should_load(id, component, load).await
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// When offline, starting a configuration only starts its representative;
    /// starting it again once online starts its components.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn child_failure_policy(&self) -> ChildFailurePolicy {
        self.inner.policy
    }

    /// Register the shutdown hook that stops and unloads every configuration.
    pub async fn install_shutdown_hook(&self) -> HookId {
        let hook = ConfigurationShutdownHook::new(Arc::downgrade(&self.inner));
        self.inner.kernel.register_shutdown_hook(Arc::new(hook)).await
    }

    pub async fn is_loaded(&self, id: &Artifact) -> bool {
        self.inner.configurations.read().await.contains_key(id)
    }

    pub async fn is_running(&self, id: &Artifact) -> bool {
        self.configuration_state(id).await == Some(ConfigurationState::Running)
    }

    /// `None` when the configuration is not loaded.
    pub async fn configuration_state(&self, id: &Artifact) -> Option<ConfigurationState> {
        self.inner.configurations.read().await.get(id).map(|c| c.state)
    }

    /// Loaded configurations in load order
    pub async fn loaded_configurations(&self) -> Vec<Artifact> {
        let configurations = self.inner.configurations.read().await;
        let mut loaded: Vec<&LoadedConfiguration> = configurations.values().collect();
        loaded.sort_by_key(|c| c.load_seq);
        loaded.into_iter().map(|c| c.data.id().clone()).collect()
    }

    pub async fn dependency_node(&self, id: &Artifact) -> Result<DependencyNode> {
        self.with_loaded(id, |c| c.node.clone()).await
    }

    /// Contained components of a loaded configuration, in start order.
    pub async fn components(&self, id: &Artifact) -> Result<Vec<ComponentName>> {
        self.with_loaded(id, |c| c.components.clone()).await
    }

    pub async fn children(&self, id: &Artifact) -> Result<Vec<Artifact>> {
        self.with_loaded(id, |c| c.children.clone()).await
    }

    /// Ids of every configuration in every store
    pub async fn list_stored(&self) -> Result<Vec<Artifact>> {
        let mut ids = BTreeSet::new();
        for store in &self.inner.stores {
            ids.extend(store.list().await?);
        }
        Ok(ids.into_iter().collect())
    }

    /// Configurations a load of `id` would load, in load order, without
    /// loading anything.
    pub async fn load_order(&self, id: &Artifact) -> Result<Vec<Artifact>> {
        if self.is_loaded(id).await {
            return Ok(Vec::new());
        }
        let plan = self.plan_load(id).await?;
        Ok(plan.iter().map(|p| p.data.id().clone()).collect())
    }

    /// Load a configuration, its missing parents and its nested children.
    ///
    /// Parents are loaded before the configurations that depend on them. If
    /// anything fails, every configuration this call loaded is unloaded
    /// again before the error is returned. Loading a loaded configuration
    /// does nothing.
    pub async fn load_configuration(&self, id: &Artifact) -> Result<LifecycleResults> {
        let mut results = LifecycleResults::default();
        if self.is_loaded(id).await {
            return Ok(results);
        }
        log::info!("Loading configuration {}", id);
        let plan = self.plan_load(id).await?;

        let mut loaded_now: Vec<Artifact> = Vec::new();
        for planned in plan {
            let cid = planned.data.id().clone();
            let outcome = {
                let lock = self.inner.lock_for(&cid);
                let _guard = lock.lock().await;
                if self.is_loaded(&cid).await {
                    continue;
                }
                self.load_one(planned).await
            };
            match outcome {
                Ok(()) => {
                    results.loaded.push(cid.clone());
                    loaded_now.push(cid);
                }
                Err(e) => {
                    log::error!("Failed to load configuration {}: {}", cid, e);
                    let mut rollback = LifecycleResults::default();
                    for loaded in loaded_now.iter().rev() {
                        self.inner.unload_one(loaded, &mut rollback).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    /// Start a loaded configuration.
    ///
    /// Parent configurations that are not running start first. Then the
    /// representative starts, then (when online) the contained components in
    /// dependency order, then the nested children. A component failure stops
    /// everything this call started, parents included, and reports the
    /// component and its recorded reason. A child failure is handled per
    /// [`ChildFailurePolicy`].
    ///
    /// Starting a configuration that is already RUNNING starts whichever of
    /// its components are not, so a configuration started offline can be
    /// completed once the manager is back online.
    pub async fn start_configuration(&self, id: &Artifact) -> Result<LifecycleResults> {
        self.ensure_loaded(id, "start").await?;
        let mut results = LifecycleResults::default();

        let subtree = self.inner.subtree(id).await;
        let mut skipped: BTreeSet<Artifact> = BTreeSet::new();

        for (cid, owner) in subtree {
            if owner.as_ref().is_some_and(|o| skipped.contains(o)) {
                skipped.insert(cid);
                continue;
            }
            let before = results.started.len();
            let Err(e) = self.inner.start_with_parents(&cid, &mut results).await else {
                continue;
            };

            if &cid != id && self.inner.policy == ChildFailurePolicy::Continue {
                log::warn!("Child configuration {} of {} failed to start: {}", cid, id, e);
                let attempt = results.started.split_off(before);
                self.inner.roll_back_start(&attempt).await;
                results.failed.insert(cid.clone(), e.to_string());
                skipped.insert(cid);
                continue;
            }
            if &cid != id {
                log::error!("Child configuration {} of {} failed to start: {}", cid, id, e);
            }
            self.inner.roll_back_start(&results.started).await;
            return Err(e);
        }

        self.inner.record_started(&results.started).await;
        Ok(results)
    }

    /// Stop a configuration.
    ///
    /// Running configurations that depend on it (its children among them)
    /// stop first, furthest dependents first. Within each configuration the
    /// components stop in reverse start order and the representative last.
    /// Failures are logged and recorded in the results; stopping continues.
    pub async fn stop_configuration(&self, id: &Artifact) -> Result<LifecycleResults> {
        let mut results = LifecycleResults::default();
        if !self.ensure_known(id).await? {
            return Ok(results);
        }
        for cid in self.inner.stop_order(id).await {
            self.inner.stop_one(&cid, &mut results, true).await;
        }
        Ok(results)
    }

    /// Unload a stopped configuration and its nested children.
    ///
    /// Fails with `IllegalState` while it (or a child) is running, or while
    /// another loaded configuration still depends on it.
    pub async fn unload_configuration(&self, id: &Artifact) -> Result<LifecycleResults> {
        let mut results = LifecycleResults::default();
        if !self.ensure_known(id).await? {
            return Ok(results);
        }

        let subtree: Vec<Artifact> = self.inner.subtree(id).await.into_iter().map(|(cid, _)| cid).collect();
        {
            let configurations = self.inner.configurations.read().await;
            for cid in &subtree {
                if configurations.get(cid).is_some_and(|c| c.state == ConfigurationState::Running) {
                    return Err(Error::IllegalState(format!(
                        "Configuration {} is running; stop it before unloading",
                        cid
                    )));
                }
            }
            let graph = loaded_graph(&configurations, false);
            let dependents: Vec<String> = graph
                .descendants(id)
                .into_iter()
                .filter(|d| !subtree.contains(d))
                .map(|d| d.to_string())
                .collect();
            if !dependents.is_empty() {
                return Err(Error::IllegalState(format!(
                    "Configuration {} is still needed by {}",
                    id,
                    dependents.join(", ")
                )));
            }
        }

        log::info!("Unloading configuration {}", id);
        for cid in subtree.iter().rev() {
            self.inner.unload_one(cid, &mut results).await;
        }
        Ok(results)
    }

    /// Load and start everything the persistent list marks for automatic
    /// start, then flag the kernel as fully started. Failures are recorded
    /// in the results.
    pub async fn restore(&self) -> LifecycleResults {
        let mut results = LifecycleResults::default();
        let Some(list) = self.inner.persistent.clone() else {
            return results;
        };
        let ids = match list.restore().await {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("Failed to read the persistent configuration list: {}", e);
                return results;
            }
        };
        for id in ids {
            log::info!("Restoring configuration {}", id);
            let outcome = match self.load_configuration(&id).await {
                Ok(loaded) => {
                    results.merge(loaded);
                    self.start_configuration(&id).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(started) => results.merge(started),
                Err(e) => {
                    log::error!("Failed to restore configuration {}: {}", id, e);
                    results.failed.insert(id, e.to_string());
                }
            }
        }
        list.set_kernel_fully_started(true).await;
        results
    }

    /// Stop and unload every configuration, dependents first, ignoring errors.
    pub async fn shutdown(&self) {
        self.inner.shutdown_all().await;
    }

    async fn with_loaded<T>(&self, id: &Artifact, f: impl FnOnce(&LoadedConfiguration) -> T) -> Result<T> {
        self.inner
            .configurations
            .read()
            .await
            .get(id)
            .map(f)
            .ok_or_else(|| Error::NoSuchConfig(id.to_string()))
    }

    async fn ensure_loaded(&self, id: &Artifact, action: &str) -> Result<()> {
        if self.is_loaded(id).await {
            return Ok(());
        }
        if self.inner.is_stored(id).await {
            return Err(Error::IllegalState(format!(
                "Cannot {} configuration {}: it is not loaded",
                action, id
            )));
        }
        Err(Error::NoSuchConfig(id.to_string()))
    }

    /// `Ok(true)` when loaded, `Ok(false)` when only stored.
    async fn ensure_known(&self, id: &Artifact) -> Result<bool> {
        if self.is_loaded(id).await {
            return Ok(true);
        }
        if self.inner.is_stored(id).await {
            return Ok(false);
        }
        Err(Error::NoSuchConfig(id.to_string()))
    }

    /// Works out every configuration a load of `id` needs, parents first.
    async fn plan_load(&self, id: &Artifact) -> Result<Vec<PlannedConfiguration>> {
        let mut graph: DependencyGraph<Artifact> = DependencyGraph::new();
        let mut planned: HashMap<Artifact, PlannedConfiguration> = HashMap::new();
        let mut pending: Vec<(ConfigurationData, Option<Artifact>)> = vec![(self.inner.fetch(id).await?, None)];
        graph.add_node(id.clone());

        while let Some((data, owner)) = pending.pop() {
            let cid = data.id().clone();
            if planned.contains_key(&cid) {
                continue;
            }
            graph.add_node(cid.clone());

            let mut parents = Vec::new();
            if let Some(ref owner) = owner {
                graph.add_edge(cid.clone(), owner.clone());
                parents.push(PlannedParent {
                    artifact: owner.clone(),
                    import: ImportType::All,
                    is_configuration: true,
                });
            }

            for dependency in &data.environment.dependencies {
                let known: BTreeSet<&Artifact> = planned
                    .keys()
                    .chain(pending.iter().map(|(d, _)| d.id()))
                    .chain(std::iter::once(&cid))
                    .collect();
                let (artifact, is_configuration) = self.inner.resolve_artifact(&dependency.artifact, &known, &cid).await?;
                if is_configuration {
                    graph.add_edge(cid.clone(), artifact.clone());
                    if !known.contains(&artifact) && !self.is_loaded(&artifact).await {
                        let parent = self.inner.fetch(&artifact).await?;
                        pending.push((parent, None));
                    }
                }
                parents.push(PlannedParent {
                    artifact,
                    import: dependency.import,
                    is_configuration,
                });
            }

            for child in data.children.iter().rev() {
                pending.push((child.clone(), Some(cid.clone())));
            }
            planned.insert(cid.clone(), PlannedConfiguration { data, parents });
        }

        let order = graph.topological_order()?;
        Ok(order.into_iter().filter_map(|a| planned.remove(&a)).collect())
    }

    /// Registers one planned configuration. Caller holds its lock.
    async fn load_one(&self, planned: PlannedConfiguration) -> Result<()> {
        let PlannedConfiguration { data, parents } = planned;
        let id = data.id().clone();

        let node = {
            let configurations = self.inner.configurations.read().await;
            let resolved = parents.iter().map(|p| ResolvedParent {
                artifact: p.artifact.clone(),
                import: p.import,
                node: configurations.get(&p.artifact).map(|c| &c.node),
            });
            DependencyNode::build(id.clone(), resolved)
        };
        for parent in &parents {
            if parent.is_configuration && !self.is_loaded(&parent.artifact).await {
                return Err(DependencyError::MissingArtifact {
                    artifact: parent.artifact.to_string(),
                    required_by: id.to_string(),
                }
                .into());
            }
        }

        let representative = ComponentName::configuration(&id);
        let mut representative_data = ComponentData::new(representative.clone(), constants::CONFIGURATION_TYPE)
            .with_attribute("id", id.to_string());
        for parent in &node.service_parents {
            representative_data
                .dependencies
                .push(NameQuery::exact(&ComponentName::configuration(parent)));
        }
        let kernel = &self.inner.kernel;
        kernel.load_owned(representative_data, Some(id.clone())).await?;

        let ordered = match self.order_components(&id, &representative, &data).await {
            Ok(ordered) => ordered,
            Err(e) => {
                self.inner.discard_components(&id, std::slice::from_ref(&representative)).await;
                return Err(e);
            }
        };

        let mut registered: Vec<ComponentName> = Vec::with_capacity(ordered.len());
        for component in ordered {
            let name = component.name.clone();
            if let Err(e) = kernel.load_owned(component, Some(id.clone())).await {
                registered.insert(0, representative.clone());
                self.inner.discard_components(&id, &registered).await;
                return Err(Error::InvalidConfig {
                    id: id.to_string(),
                    message: format!("component {} could not be registered", name),
                    source: Some(Box::new(e)),
                });
            }
            registered.push(name);
        }

        let entry = LoadedConfiguration {
            children: data.children.iter().map(|c| c.id().clone()).collect(),
            data,
            node,
            representative,
            components: registered,
            state: ConfigurationState::Loaded,
            load_seq: self.inner.next_load_seq.fetch_add(1, Ordering::SeqCst),
        };
        self.inner.configurations.write().await.insert(id.clone(), entry);

        if let Some(ref list) = self.inner.persistent {
            if let Err(e) = list.add_configuration(&id).await {
                log::warn!("Failed to record configuration {}: {}", id, e);
            }
        }
        log::info!("Loaded configuration {}", id);
        Ok(())
    }

    /// Registration requests for the contained components, ordered so that
    /// every component comes after the siblings its references and
    /// dependencies point at. Recorded overrides are applied first. Each
    /// component also depends on the representative.
    async fn order_components(
        &self,
        id: &Artifact,
        representative: &ComponentName,
        data: &ConfigurationData,
    ) -> Result<Vec<ComponentData>> {
        let mut components: Vec<ComponentData> = data.components.iter().map(|d| d.to_component_data(id)).collect();
        if let Some(ref store) = self.inner.attributes {
            components = store.apply_overrides(id, components).await;
        }

        let mut entries: Vec<(ComponentData, Arc<ComponentType>)> = Vec::with_capacity(components.len());
        let mut graph: DependencyGraph<ComponentName> = DependencyGraph::new();
        for mut component in components {
            let component_type = self.inner.kernel.component_type(&component.type_name).await?;
            component.dependencies.push(NameQuery::exact(representative));
            if graph.contains(&component.name) {
                return Err(Error::InvalidConfig {
                    id: id.to_string(),
                    message: format!("component {} is declared twice", component.name),
                    source: None,
                });
            }
            graph.add_node(component.name.clone());
            entries.push((component, component_type));
        }

        for (component, component_type) in &entries {
            let mut queries = component.dependencies.clone();
            for info in component_type.references() {
                let patterns = component.references.get(&info.name).or(info.default_patterns.as_ref());
                if let Some(patterns) = patterns {
                    for mut query in patterns.queries() {
                        if let Some(ref interface) = info.interface {
                            query.interfaces.insert(interface.clone());
                        }
                        queries.push(query);
                    }
                }
            }
            for (other, other_type) in &entries {
                if other.name != component.name
                    && queries.iter().any(|q| q.matches(&other.name, other_type.interfaces()))
                {
                    graph.add_edge(component.name.clone(), other.name.clone());
                }
            }
        }

        let order = graph.topological_order()?;
        let mut by_name: HashMap<ComponentName, ComponentData> =
            entries.into_iter().map(|(c, _)| (c.name.clone(), c)).collect();
        Ok(order.into_iter().filter_map(|name| by_name.remove(&name)).collect())
    }
}

impl fmt::Debug for ConfigurationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationManager")
            .field("stores", &self.inner.stores.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("online", &self.is_online())
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

/// Graph of loaded configurations: each points at its loaded parents.
/// Nodes are added in load order.
fn loaded_graph(configurations: &BTreeMap<Artifact, LoadedConfiguration>, services_only: bool) -> DependencyGraph<Artifact> {
    let mut loaded: Vec<&LoadedConfiguration> = configurations.values().collect();
    loaded.sort_by_key(|c| c.load_seq);

    let mut graph = DependencyGraph::new();
    for configuration in &loaded {
        graph.add_node(configuration.data.id().clone());
    }
    for configuration in &loaded {
        let parents = if services_only {
            configuration.node.service_parents.clone()
        } else {
            configuration.node.all_parents()
        };
        for parent in parents {
            if configurations.contains_key(&parent) {
                graph.add_edge(configuration.data.id().clone(), parent);
            }
        }
    }
    graph
}

impl ManagerInner {
    fn lock_for(&self, id: &Artifact) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone()
    }

    async fn is_stored(&self, id: &Artifact) -> bool {
        for store in &self.stores {
            if store.contains(id).await {
                return true;
            }
        }
        false
    }

    /// Descriptor of `id` from the first store that holds it.
    async fn fetch(&self, id: &Artifact) -> Result<ConfigurationData> {
        for store in &self.stores {
            match store.load(id).await {
                Ok(data) => return Ok(data),
                Err(Error::NoSuchConfig(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NoSuchConfig(id.to_string()))
    }

    /// Resolve a possibly unresolved parent artifact.
    ///
    /// Loaded configurations win, then configurations already part of the
    /// current load, then the highest match in the stores, then the highest
    /// match in the repositories. Returns the artifact and whether it is a
    /// configuration.
    async fn resolve_artifact(
        &self,
        pattern: &Artifact,
        planned: &BTreeSet<&Artifact>,
        required_by: &Artifact,
    ) -> Result<(Artifact, bool)> {
        let loaded = {
            let configurations = self.configurations.read().await;
            configurations.keys().filter(|a| pattern.matches(a)).max().cloned()
        };
        if let Some(artifact) = loaded {
            return Ok((artifact, true));
        }

        if let Some(artifact) = planned.iter().filter(|a| pattern.matches(a)).max() {
            return Ok(((*artifact).clone(), true));
        }

        let mut stored: Option<Artifact> = None;
        for store in &self.stores {
            match store.list().await {
                Ok(ids) => {
                    let best = ids.into_iter().filter(|a| pattern.matches(a)).max();
                    stored = stored.into_iter().chain(best).max();
                }
                Err(e) => log::warn!("Skipping store {} while resolving {}: {}", store.name(), pattern, e),
            }
        }
        if let Some(artifact) = stored {
            return Ok((artifact, true));
        }

        let library = self
            .repositories
            .iter()
            .flat_map(|repository| repository.list(pattern))
            .max();
        if let Some(artifact) = library {
            return Ok((artifact, false));
        }

        Err(DependencyError::MissingArtifact {
            artifact: pattern.to_string(),
            required_by: required_by.to_string(),
        }
        .into())
    }

    /// `id` and its nested children, depth first, each with its owner.
    async fn subtree(&self, id: &Artifact) -> Vec<(Artifact, Option<Artifact>)> {
        let configurations = self.configurations.read().await;
        let mut out = Vec::new();
        let mut stack = vec![(id.clone(), None)];
        while let Some((cid, owner)) = stack.pop() {
            if let Some(configuration) = configurations.get(&cid) {
                for child in configuration.children.iter().rev() {
                    stack.push((child.clone(), Some(cid.clone())));
                }
                out.push((cid, owner));
            }
        }
        out
    }

    /// Loaded service parents of `id` that are not running, parents first.
    async fn start_order(&self, id: &Artifact) -> Vec<Artifact> {
        let configurations = self.configurations.read().await;
        loaded_graph(&configurations, true)
            .ancestors(id)
            .into_iter()
            .filter(|a| configurations.get(a).is_some_and(|c| c.state != ConfigurationState::Running))
            .collect()
    }

    /// Running configurations that depend on `id`, furthest first, then `id`.
    async fn stop_order(&self, id: &Artifact) -> Vec<Artifact> {
        let configurations = self.configurations.read().await;
        let mut order: Vec<Artifact> = loaded_graph(&configurations, true)
            .descendants(id)
            .into_iter()
            .filter(|a| configurations.get(a).is_some_and(|c| c.state == ConfigurationState::Running))
            .collect();
        order.push(id.clone());
        order
    }

    /// Starts the service parents of `id` that are not running, then `id`.
    /// Every configuration moved to RUNNING is appended to `results.started`.
    async fn start_with_parents(&self, id: &Artifact, results: &mut LifecycleResults) -> Result<()> {
        for parent in self.start_order(id).await {
            self.start_one(&parent, results).await?;
        }
        self.start_one(id, results).await
    }

    /// Starts one configuration (not its children). Caller must have started
    /// its service parents. On an already RUNNING configuration only the
    /// components that are not running are started.
    async fn start_one(&self, id: &Artifact, results: &mut LifecycleResults) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let (representative, components, running) = {
            let configurations = self.configurations.read().await;
            let configuration = configurations.get(id).ok_or_else(|| Error::NoSuchConfig(id.to_string()))?;
            (
                configuration.representative.clone(),
                configuration.components.clone(),
                configuration.state == ConfigurationState::Running,
            )
        };
        let online = self.online.load(Ordering::SeqCst);
        let kernel = &self.kernel;

        if running {
            if online {
                self.start_components(id, &components).await?;
            }
            return Ok(());
        }
        log::info!("Starting configuration {}", id);

        if let Err(e) = kernel.start(&representative).await {
            kernel.force_stop(&representative).await;
            return Err(match e {
                Error::MissingDependency { .. } => e,
                other => Error::ConfigurationStartFailed {
                    configuration: id.to_string(),
                    component: representative.to_string(),
                    reason: other.to_string(),
                },
            });
        }

        if online {
            if let Err(e) = self.start_components(id, &components).await {
                kernel.force_stop(&representative).await;
                return Err(e);
            }
        }

        if let Some(configuration) = self.configurations.write().await.get_mut(id) {
            configuration.state = ConfigurationState::Running;
        }
        results.started.push(id.clone());
        log::info!("Started configuration {}", id);
        Ok(())
    }

    /// Starts the components of `id` that are not running, in order. On a
    /// failure the ones started here and the failing one are forced down.
    async fn start_components(&self, id: &Artifact, components: &[ComponentName]) -> Result<()> {
        let kernel = &self.kernel;
        let mut started: Vec<&ComponentName> = Vec::new();
        for component in components {
            if matches!(kernel.state(component).await, Ok(State::Running)) {
                continue;
            }
            if let Err(e) = kernel.start(component).await {
                let reason = match kernel.state_reason(component).await {
                    Ok(Some(reason)) => reason,
                    _ => e.to_string(),
                };
                log::error!("Configuration {} failed to start: component {}: {}", id, component, reason);
                for name in started.iter().rev() {
                    kernel.force_stop(name).await;
                }
                kernel.force_stop(component).await;
                return Err(Error::ConfigurationStartFailed {
                    configuration: id.to_string(),
                    component: component.to_string(),
                    reason,
                });
            }
            started.push(component);
        }
        Ok(())
    }

    /// Stops, newest first, configurations a failed start moved to RUNNING.
    async fn roll_back_start(&self, started: &[Artifact]) {
        let mut ignored = LifecycleResults::default();
        for id in started.iter().rev() {
            log::warn!("Rolling back start of configuration {}", id);
            self.stop_one(id, &mut ignored, false).await;
        }
    }

    /// Marks the auto-start configurations among `started` in the persistent list.
    async fn record_started(&self, started: &[Artifact]) {
        let Some(ref list) = self.persistent else {
            return;
        };
        for id in started {
            let auto_start = self
                .configurations
                .read()
                .await
                .get(id)
                .is_some_and(|c| c.data.auto_start);
            if !auto_start {
                continue;
            }
            if let Err(e) = list.start_configuration(id).await {
                log::warn!("Failed to record automatic start of {}: {}", id, e);
            }
        }
    }

    /// Stops one configuration (not its dependents). Best effort: a failing
    /// component is logged, forced down and recorded in the results.
    async fn stop_one(&self, id: &Artifact, results: &mut LifecycleResults, record: bool) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let (representative, components) = {
            let configurations = self.configurations.read().await;
            match configurations.get(id) {
                Some(c) if c.state == ConfigurationState::Running => (c.representative.clone(), c.components.clone()),
                _ => return,
            }
        };
        log::info!("Stopping configuration {}", id);

        let kernel = &self.kernel;
        for name in components.iter().rev().chain(std::iter::once(&representative)) {
            if let Err(e) = kernel.stop(name).await {
                log::warn!("Error stopping {} in configuration {}: {}", name, id, e);
                results.failed.entry(id.clone()).or_insert_with(|| e.to_string());
                kernel.force_stop(name).await;
            }
        }

        if let Some(configuration) = self.configurations.write().await.get_mut(id) {
            configuration.state = ConfigurationState::Loaded;
        }
        results.stopped.push(id.clone());

        if record {
            if let Some(ref list) = self.persistent {
                if let Err(e) = list.stop_configuration(id).await {
                    log::warn!("Failed to clear automatic start of {}: {}", id, e);
                }
            }
        }
        log::info!("Stopped configuration {}", id);
    }

    /// Unregisters one configuration's components and representative and
    /// drops it from the arena. Never fails.
    async fn unload_one(&self, id: &Artifact, results: &mut LifecycleResults) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(configuration) = self.configurations.write().await.remove(id) else {
            return;
        };
        let mut names = configuration.components;
        names.insert(0, configuration.representative);
        self.discard_components(id, &names).await;
        results.unloaded.push(id.clone());
        log::info!("Unloaded configuration {}", id);
    }

    /// Unloads `names` newest first, logging anything but not-found.
    async fn discard_components(&self, id: &Artifact, names: &[ComponentName]) {
        for name in names.iter().rev() {
            if let Err(e) = self.kernel.unload_component(name).await {
                if !e.is_not_found() {
                    log::warn!("Error unloading {} from configuration {}: {}", name, id, e);
                }
            }
        }
    }

    /// Stops and unloads everything, dependents before the configurations
    /// they depend on. Loops until the registry holds no configuration
    /// representatives or a pass makes no progress. Errors are logged only.
    pub(crate) async fn shutdown_all(&self) {
        if let Some(ref list) = self.persistent {
            list.set_kernel_fully_started(false).await;
        }
        let kernel = &self.kernel;
        let representatives = NameQuery::interface(constants::CONFIGURATION_INTERFACE);

        loop {
            let remaining = kernel.find(&representatives).await;
            if remaining.is_empty() {
                break;
            }

            let order: Vec<Artifact> = {
                let configurations = self.configurations.read().await;
                let mut order = match loaded_graph(&configurations, false).topological_order() {
                    Ok(order) => order,
                    Err(e) => {
                        log::warn!("Shutdown ignoring configuration graph error: {}", e);
                        configurations.keys().cloned().collect()
                    }
                };
                order.reverse();
                order
            };

            let mut progress = false;
            for id in &order {
                log::info!("Shutdown stopping configuration {}", id);
                let mut ignored = LifecycleResults::default();
                self.stop_one(id, &mut ignored, false).await;
                self.unload_one(id, &mut ignored).await;
                progress |= ignored.was_unloaded(id);
            }

            // Representatives registered outside this manager
            for name in &remaining {
                if order.contains(&name.artifact) {
                    continue;
                }
                let owned = kernel.registry().owned_by(&name.artifact).await;
                self.discard_components(&name.artifact, &owned).await;
                self.discard_components(&name.artifact, std::slice::from_ref(name)).await;
                progress |= !kernel.is_loaded(name).await;
            }

            if !progress {
                log::warn!("Shutdown made no progress; {} configurations left loaded", remaining.len());
                break;
            }
        }
        log::info!("All configurations stopped and unloaded");
    }
}
