#![cfg(test)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::data::{ComponentDescriptor, ConfigurationData};
use crate::config::manager::ConfigurationManager;
use crate::config::store::InMemoryConfigurationStore;
use crate::kernel::Kernel;
use crate::kernel::error::{Error, Result};
use crate::lifecycle::monitor::{LifecycleEvent, LifecycleListener};
use crate::registry::component::{
    AttributeAware, AttributeInfo, AttributeKind, ComponentContext, ComponentType, ManagedComponent, ReferenceInfo,
    Startable, Stoppable,
};
use crate::registry::name::{Artifact, ComponentName};

// ===== PROBE COMPONENT =====

pub const PROBE_TYPE: &str = "test.Probe";
pub const PROBE_INTERFACE: &str = "test.Probe";

/// Shared, ordered record of hook calls: "start:a", "stop:a", "fail:a", ...
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Index of `entry` in the log; panics if it is missing.
pub fn position(log: &EventLog, entry: &str) -> usize {
    entries(log)
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("'{}' not in log {:?}", entry, entries(log)))
}

/// Test component that records its hooks and can be told to fail them.
#[derive(Debug)]
pub struct Probe {
    name: String,
    log: EventLog,
    fail_start: bool,
    fail_stop: bool,
    greeting: Mutex<String>,
    peer: Option<ComponentName>,
}

impl Probe {
    pub fn greeting(&self) -> String {
        self.greeting.lock().unwrap().clone()
    }

    pub fn peer(&self) -> Option<&ComponentName> {
        self.peer.as_ref()
    }
}

impl ManagedComponent for Probe {
    fn startable(&self) -> Option<&dyn Startable> {
        Some(self)
    }

    fn stoppable(&self) -> Option<&dyn Stoppable> {
        Some(self)
    }

    fn attribute_aware(&self) -> Option<&dyn AttributeAware> {
        Some(self)
    }

    fn on_fail(&self, _reason: &str) {
        self.log.lock().unwrap().push(format!("fail:{}", self.name));
    }
}

#[async_trait]
impl Startable for Probe {
    async fn start(&self) -> Result<()> {
        self.log.lock().unwrap().push(format!("start:{}", self.name));
        if self.fail_start {
            return Err(Error::Other(format!("{} refused to start", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Stoppable for Probe {
    async fn stop(&self) -> Result<()> {
        self.log.lock().unwrap().push(format!("stop:{}", self.name));
        if self.fail_stop {
            return Err(Error::Other(format!("{} refused to stop", self.name)));
        }
        Ok(())
    }
}

impl AttributeAware for Probe {
    fn attribute_changed(&self, name: &str, value: &Value) -> Result<()> {
        if name == "greeting" {
            *self.greeting.lock().unwrap() = value.as_str().unwrap_or_default().to_string();
        }
        self.log.lock().unwrap().push(format!("attr:{}={}", self.name, value));
        Ok(())
    }
}

/// Probe type: attributes `failStart`, `failStop`, `greeting` (mutable while
/// running) and an optional single-valued reference `peer`.
pub fn probe_type(log: EventLog) -> ComponentType {
    let factory = move |context: ComponentContext| -> Result<Arc<dyn ManagedComponent>> {
        Ok(Arc::new(Probe {
            name: context.name.short_name().unwrap_or("?").to_string(),
            log: log.clone(),
            fail_start: context.attribute::<bool>("failStart").unwrap_or(false),
            fail_stop: context.attribute::<bool>("failStop").unwrap_or(false),
            greeting: Mutex::new(context.attribute::<String>("greeting").unwrap_or_default()),
            peer: context.reference("peer").cloned(),
        }))
    };
    ComponentType::builder(PROBE_TYPE, factory)
        .interface(PROBE_INTERFACE)
        .attribute(AttributeInfo::new("failStart", AttributeKind::Boolean).with_default(false))
        .attribute(AttributeInfo::new("failStop", AttributeKind::Boolean))
        .attribute(AttributeInfo::new("greeting", AttributeKind::String).mutable())
        .reference(ReferenceInfo::single("peer").optional().with_interface(PROBE_INTERFACE))
        .build()
}

// ===== LISTENER =====

pub type EventSink = Arc<Mutex<Vec<LifecycleEvent>>>;

pub fn recording_listener() -> (EventSink, Arc<dyn LifecycleListener>) {
    let events: EventSink = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener: Arc<dyn LifecycleListener> = Arc::new(move |event: &LifecycleEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    (events, listener)
}

// ===== SETUP =====

pub fn artifact(id: &str) -> Artifact {
    Artifact::new("test", id, "1.0", "car").expect("valid artifact")
}

/// Name of a probe `name` inside configuration `config`
pub fn probe(config: &Artifact, name: &str) -> ComponentName {
    ComponentName::new(config.clone(), name, "Service")
}

pub fn interfaces(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// A kernel with the probe type registered.
pub async fn setup_kernel() -> (Kernel, EventLog) {
    let kernel = Kernel::new("test");
    let log = new_log();
    kernel
        .register_type(probe_type(log.clone()))
        .await
        .expect("Failed to register probe type");
    (kernel, log)
}

/// A kernel plus a configuration manager over a fresh in-memory store.
pub async fn setup_manager() -> (ConfigurationManager, Arc<InMemoryConfigurationStore>, EventLog) {
    let (kernel, log) = setup_kernel().await;
    let store = Arc::new(InMemoryConfigurationStore::new());
    let manager = ConfigurationManager::builder(kernel).store(store.clone()).build().await;
    (manager, store, log)
}

/// A configuration holding one probe per name.
pub fn probe_configuration(id: &Artifact, probes: &[&str]) -> ConfigurationData {
    probes.iter().fold(ConfigurationData::new(id.clone()), |data, name| {
        data.with_component(ComponentDescriptor::new(name, PROBE_TYPE))
    })
}
