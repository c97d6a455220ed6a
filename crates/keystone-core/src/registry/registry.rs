use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::dependency::resolver::{RegistrySnapshot, SnapshotEntry};
use crate::kernel::error::{Error, Result};
use crate::lifecycle::State;
use crate::registry::component::{ComponentData, ComponentType, ManagedComponent};
use crate::registry::name::{Artifact, ComponentName};
use crate::registry::query::{NameQuery, ReferencePatterns};

/// Mutable part of a registered component
pub(crate) struct ComponentRecord {
    pub data: ComponentData,
    pub component_type: Arc<ComponentType>,
    pub state: State,
    pub state_reason: Option<String>,
    pub instance: Option<Arc<dyn ManagedComponent>>,
    /// Number of instances created so far
    pub generation: u64,
}

/// One registry entry. Identity, interfaces and owner never change after
/// registration; everything else lives behind `record`.
pub(crate) struct ComponentSlot {
    pub seq: u64,
    pub name: ComponentName,
    pub interfaces: BTreeSet<String>,
    pub owner: Option<Artifact>,
    /// Held for the whole of a lifecycle transition, attribute write or removal
    pub transition: Mutex<()>,
    /// Set once the slot is out of the name map; written under `transition`
    removed: AtomicBool,
    pub record: RwLock<ComponentRecord>,
}

impl ComponentSlot {
    /// A caller that looked the slot up before it was unregistered must not
    /// act on it. Check after taking `transition`.
    pub(crate) fn ensure_registered(&self) -> Result<()> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(Error::NotFound { name: self.name.to_string() });
        }
        Ok(())
    }
}

/// Registry of every loaded component, keyed by name.
///
/// The name map is only locked for the duration of a lookup, insert or
/// removal; operations on a single component are serialized by that
/// component's own `transition` lock so unrelated components never block
/// each other.
pub struct ComponentRegistry {
    slots: RwLock<HashMap<ComponentName, Arc<ComponentSlot>>>,
    next_seq: AtomicU64,
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a component. The request is validated against its type's
    /// schema and the component starts out STOPPED.
    pub async fn register(
        &self,
        mut data: ComponentData,
        component_type: Arc<ComponentType>,
        owner: Option<Artifact>,
    ) -> Result<()> {
        component_type.validate(&mut data)?;

        let mut slots = self.slots.write().await;
        if slots.contains_key(&data.name) {
            return Err(Error::AlreadyExists { name: data.name.to_string() });
        }
        let name = data.name.clone();
        let slot = ComponentSlot {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            name: name.clone(),
            interfaces: component_type.interfaces().clone(),
            owner,
            transition: Mutex::new(()),
            removed: AtomicBool::new(false),
            record: RwLock::new(ComponentRecord {
                data,
                component_type,
                state: State::Stopped,
                state_reason: None,
                instance: None,
                generation: 0,
            }),
        };
        slots.insert(name.clone(), Arc::new(slot));
        log::debug!("Registered component {}", name);
        Ok(())
    }

    /// Remove a STOPPED or FAILED component, returning its registration data.
    pub async fn unregister(&self, name: &ComponentName) -> Result<ComponentData> {
        let slot = self.slot(name).await?;
        let _guard = slot.transition.lock().await;
        slot.ensure_registered()?;

        let state = slot.record.read().await.state;
        if !matches!(state, State::Stopped | State::Failed) {
            return Err(Error::InvalidTransition {
                name: name.to_string(),
                action: "unregister",
                state,
            });
        }
        Ok(self.remove_locked(&slot).await)
    }

    /// Takes `slot` out of the name map. The caller holds its `transition`
    /// lock, so no transition can start on it afterwards.
    pub(crate) async fn remove_locked(&self, slot: &ComponentSlot) -> ComponentData {
        slot.removed.store(true, Ordering::SeqCst);
        self.slots.write().await.remove(&slot.name);
        log::debug!("Unregistered component {}", slot.name);
        slot.record.read().await.data.clone()
    }

    /// Check if a component is registered
    pub async fn is_loaded(&self, name: &ComponentName) -> bool {
        self.slots.read().await.contains_key(name)
    }

    /// Names matching `query`, in registration order.
    pub async fn find(&self, query: &NameQuery) -> Vec<ComponentName> {
        let slots = self.slots.read().await;
        let mut matching: Vec<&Arc<ComponentSlot>> = slots
            .values()
            .filter(|slot| query.matches(&slot.name, &slot.interfaces))
            .collect();
        matching.sort_by_key(|slot| slot.seq);
        matching.into_iter().map(|slot| slot.name.clone()).collect()
    }

    /// Names of the components owned by configuration `owner`, in registration order.
    pub async fn owned_by(&self, owner: &Artifact) -> Vec<ComponentName> {
        let slots = self.slots.read().await;
        let mut owned: Vec<&Arc<ComponentSlot>> = slots
            .values()
            .filter(|slot| slot.owner.as_ref() == Some(owner))
            .collect();
        owned.sort_by_key(|slot| slot.seq);
        owned.into_iter().map(|slot| slot.name.clone()).collect()
    }

    /// Get the number of registered components
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// Point-in-time view of every component with its state, in registration order.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let slots: Vec<Arc<ComponentSlot>> = self.slots.read().await.values().cloned().collect();
        let mut entries = Vec::with_capacity(slots.len());
        for slot in slots {
            let state = slot.record.read().await.state;
            entries.push(SnapshotEntry {
                seq: slot.seq,
                name: slot.name.clone(),
                interfaces: slot.interfaces.clone(),
                state,
            });
        }
        RegistrySnapshot::new(entries)
    }

    pub async fn state(&self, name: &ComponentName) -> Result<State> {
        let slot = self.slot(name).await?;
        let state = slot.record.read().await.state;
        Ok(state)
    }

    /// Human-readable explanation recorded by the last failed transition.
    pub async fn state_reason(&self, name: &ComponentName) -> Result<Option<String>> {
        let slot = self.slot(name).await?;
        let reason = slot.record.read().await.state_reason.clone();
        Ok(reason)
    }

    /// Current registration data, including attribute and reference changes.
    pub async fn component_data(&self, name: &ComponentName) -> Result<ComponentData> {
        let slot = self.slot(name).await?;
        let data = slot.record.read().await.data.clone();
        Ok(data)
    }

    /// Number of instances created for the component since it was registered.
    pub async fn generation(&self, name: &ComponentName) -> Result<u64> {
        let slot = self.slot(name).await?;
        let generation = slot.record.read().await.generation;
        Ok(generation)
    }

    pub async fn owner(&self, name: &ComponentName) -> Result<Option<Artifact>> {
        Ok(self.slot(name).await?.owner.clone())
    }

    pub async fn interfaces(&self, name: &ComponentName) -> Result<BTreeSet<String>> {
        Ok(self.slot(name).await?.interfaces.clone())
    }

    pub async fn get_attribute(&self, name: &ComponentName, key: &str) -> Result<Value> {
        let slot = self.slot(name).await?;
        let record = slot.record.read().await;
        if let Some(value) = record.data.attributes.get(key) {
            return Ok(value.clone());
        }
        if record.component_type.attribute(key).is_some() {
            return Ok(Value::Null);
        }
        Err(Error::InvalidAttribute {
            name: name.to_string(),
            attribute: key.to_string(),
            message: format!("not declared by type '{}'", record.component_type.name()),
        })
    }

    /// Set an attribute value.
    ///
    /// While the component is anything but STOPPED only attributes declared
    /// mutable-while-running may change, and the live instance is told about
    /// the change if it is `AttributeAware`. The instance is notified with
    /// no record lock held, so it may read the component back through the
    /// kernel; it sees the previous value until the notification returns.
    pub async fn set_attribute(&self, name: &ComponentName, key: &str, value: Value) -> Result<()> {
        let slot = self.slot(name).await?;
        let _guard = slot.transition.lock().await;
        slot.ensure_registered()?;

        let instance = {
            let record = slot.record.read().await;
            let info = record.component_type.validate_attribute(name, key, &value)?;
            if record.state == State::Stopped {
                None
            } else if !info.mutable_while_running {
                return Err(Error::AttributeNotMutable {
                    name: name.to_string(),
                    attribute: key.to_string(),
                    state: record.state,
                });
            } else {
                record.instance.clone()
            }
        };
        if let Some(instance) = instance {
            if let Some(aware) = instance.attribute_aware() {
                aware.attribute_changed(key, &value)?;
            }
        }
        slot.record.write().await.data.attributes.insert(key.to_string(), value);
        Ok(())
    }

    /// Replace the patterns of a reference. Only allowed while STOPPED or FAILED.
    pub async fn set_reference(&self, name: &ComponentName, key: &str, patterns: ReferencePatterns) -> Result<()> {
        let slot = self.slot(name).await?;
        let _guard = slot.transition.lock().await;
        slot.ensure_registered()?;
        let mut record = slot.record.write().await;
        if !matches!(record.state, State::Stopped | State::Failed) {
            return Err(Error::InvalidTransition {
                name: name.to_string(),
                action: "change references of",
                state: record.state,
            });
        }
        if !record.component_type.references().any(|r| r.name == key) {
            return Err(Error::InvalidAttribute {
                name: name.to_string(),
                attribute: key.to_string(),
                message: format!("reference not declared by type '{}'", record.component_type.name()),
            });
        }
        record.data.references.insert(key.to_string(), patterns);
        Ok(())
    }

    pub(crate) async fn slot(&self, name: &ComponentName) -> Result<Arc<ComponentSlot>> {
        self.slots
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound { name: name.to_string() })
    }

    /// Live instance of a RUNNING component.
    pub(crate) async fn instance(&self, name: &ComponentName) -> Result<Option<Arc<dyn ManagedComponent>>> {
        let slot = self.slot(name).await?;
        let record = slot.record.read().await;
        Ok(match record.state {
            State::Running => record.instance.clone(),
            _ => None,
        })
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
