use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::kernel::error::{Error, Result};
use crate::registry::component::ManagedComponent;
use crate::registry::name::ComponentName;
use crate::registry::query::NameQuery;
use crate::registry::registry::ComponentRegistry;

/// Type for proxy identifiers
pub type ProxyId = u64;

/// What a proxy stands in for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyTarget {
    /// One exact component
    Name(ComponentName),
    /// Whichever RUNNING component matches when the proxy is used
    Query(NameQuery),
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyTarget::Name(name) => write!(f, "{}", name),
            ProxyTarget::Query(query) => write!(f, "{}", query),
        }
    }
}

impl From<ComponentName> for ProxyTarget {
    fn from(name: ComponentName) -> Self {
        ProxyTarget::Name(name)
    }
}

impl From<NameQuery> for ProxyTarget {
    fn from(query: NameQuery) -> Self {
        ProxyTarget::Query(query)
    }
}

struct ProxyShared {
    registry: Arc<ComponentRegistry>,
    /// Live proxies and what they point at
    live: Mutex<HashMap<ProxyId, ProxyTarget>>,
}

impl ProxyShared {
    fn is_live(&self, id: ProxyId) -> bool {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&id)
    }

    fn remove(&self, id: ProxyId) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

/// Hands out proxies and tracks which ones are still live.
pub struct ProxyManager {
    shared: Arc<ProxyShared>,
    next_id: AtomicU64,
}

impl ProxyManager {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            shared: Arc::new(ProxyShared {
                registry,
                live: Mutex::new(HashMap::new()),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a proxy for `target`, restricted to components exposing every
    /// interface in `interfaces`.
    ///
    /// The target must resolve now (to a registered component for a name, to
    /// at least one registered component for a query) or `NotFound` is
    /// returned. Every proxy must later be passed to
    /// [`ProxyManager::destroy_proxy`]; [`ProxyManager::create_scoped`] does
    /// that on drop.
    pub async fn create_proxy(&self, target: impl Into<ProxyTarget>, interfaces: BTreeSet<String>) -> Result<ProxyHandle> {
        let target = target.into();
        let candidates = self.candidates(&target, &interfaces).await;
        if candidates.is_empty() {
            return Err(Error::NotFound { name: target.to_string() });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, target.clone());
        log::debug!("Created proxy #{} for {}", id, target);

        Ok(ProxyHandle {
            id,
            target,
            interfaces,
            shared: self.shared.clone(),
        })
    }

    /// Create a proxy that is destroyed when the returned guard drops.
    pub async fn create_scoped(&self, target: impl Into<ProxyTarget>, interfaces: BTreeSet<String>) -> Result<ScopedProxy> {
        Ok(ScopedProxy {
            handle: self.create_proxy(target, interfaces).await?,
        })
    }

    /// Destroy a proxy. Destroying the same proxy twice is an `IllegalState`.
    pub fn destroy_proxy(&self, proxy: &ProxyHandle) -> Result<()> {
        if !self.shared.remove(proxy.id) {
            return Err(Error::IllegalState(format!("Proxy #{} was already destroyed", proxy.id)));
        }
        log::debug!("Destroyed proxy #{} for {}", proxy.id, proxy.target);
        Ok(())
    }

    /// Destroy every live proxy. Returns how many were destroyed.
    pub fn destroy_all(&self) -> usize {
        let mut live = self.shared.live.lock().unwrap_or_else(PoisonError::into_inner);
        let count = live.len();
        live.clear();
        count
    }

    /// Number of proxies not yet destroyed
    pub fn live_count(&self) -> usize {
        self.shared.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn candidates(&self, target: &ProxyTarget, interfaces: &BTreeSet<String>) -> Vec<ComponentName> {
        let query = match target {
            ProxyTarget::Name(name) => {
                return match self.shared.registry.interfaces(name).await {
                    Ok(exposed) if interfaces.is_subset(&exposed) => vec![name.clone()],
                    _ => Vec::new(),
                };
            }
            ProxyTarget::Query(query) => query,
        };
        let mut query = query.clone();
        query.interfaces.extend(interfaces.iter().cloned());
        self.shared.registry.find(&query).await
    }
}

impl fmt::Debug for ProxyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyManager")
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

/// Stable stand-in for whatever instance currently backs its target.
///
/// The handle never caches an instance: every [`ProxyHandle::get`] resolves
/// the target again, so the proxy keeps working across restarts of the
/// target and fails cleanly while the target is down.
#[derive(Clone)]
pub struct ProxyHandle {
    id: ProxyId,
    target: ProxyTarget,
    interfaces: BTreeSet<String>,
    shared: Arc<ProxyShared>,
}

impl ProxyHandle {
    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    pub fn is_destroyed(&self) -> bool {
        !self.shared.is_live(self.id)
    }

    /// Name of the component the proxy forwards to right now.
    ///
    /// For a query target this is the lowest RUNNING match.
    pub async fn current_target(&self) -> Result<ComponentName> {
        self.ensure_live()?;
        match &self.target {
            ProxyTarget::Name(name) => Ok(name.clone()),
            ProxyTarget::Query(query) => {
                let mut query = query.clone();
                query.interfaces.extend(self.interfaces.iter().cloned());
                let snapshot = self.shared.registry.snapshot().await;
                snapshot
                    .find_running(&query)
                    .into_iter()
                    .map(|entry| entry.name.clone())
                    .min()
                    .ok_or_else(|| Error::IllegalState(format!("No running component matches proxy target {}", query)))
            }
        }
    }

    /// The live instance behind the proxy, as its concrete type.
    pub async fn get<T: ManagedComponent>(&self) -> Result<Arc<T>> {
        let name = self.current_target().await?;
        let instance = self
            .shared
            .registry
            .instance(&name)
            .await?
            .ok_or_else(|| Error::IllegalState(format!("Proxy target {} is not running", name)))?;
        let any: Arc<dyn Any + Send + Sync> = instance;
        any.downcast::<T>().map_err(|_| {
            Error::IllegalState(format!(
                "Proxy target {} is not a {}",
                name,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Run `f` against the live instance.
    pub async fn invoke<T, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R>
    where
        T: ManagedComponent,
    {
        let instance = self.get::<T>().await?;
        Ok(f(&instance))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::IllegalState(format!("Proxy #{} has been destroyed", self.id)));
        }
        Ok(())
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("interfaces", &self.interfaces)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ProxyHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for ProxyHandle {}

/// A proxy destroyed when the guard goes out of scope.
#[derive(Debug)]
pub struct ScopedProxy {
    handle: ProxyHandle,
}

impl Deref for ScopedProxy {
    type Target = ProxyHandle;

    fn deref(&self) -> &ProxyHandle {
        &self.handle
    }
}

impl Drop for ScopedProxy {
    fn drop(&mut self) {
        if self.handle.shared.remove(self.handle.id) {
            log::debug!("Destroyed scoped proxy #{}", self.handle.id);
        }
    }
}
