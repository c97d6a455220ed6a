use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use keystone_core::kernel::error::Result;
use keystone_core::registry::component::{
    AttributeAware, AttributeInfo, AttributeKind, ComponentContext, ComponentType, ManagedComponent, ReferenceInfo,
    Startable, Stoppable,
};
use keystone_core::registry::name::ComponentName;
use serde_json::Value;

pub const SERVICE_TYPE: &str = "keystone.Service";
pub const SERVICE_INTERFACE: &str = "keystone.Service";

/// Component that only reports its own lifecycle through the log.
#[derive(Debug)]
pub struct LoggingService {
    name: ComponentName,
    message: RwLock<String>,
    uses: Vec<ComponentName>,
}

impl ManagedComponent for LoggingService {
    fn startable(&self) -> Option<&dyn Startable> {
        Some(self)
    }

    fn stoppable(&self) -> Option<&dyn Stoppable> {
        Some(self)
    }

    fn attribute_aware(&self) -> Option<&dyn AttributeAware> {
        Some(self)
    }

    fn on_fail(&self, reason: &str) {
        tracing::error!(component = %self.name, %reason, "service failed");
    }
}

#[async_trait]
impl Startable for LoggingService {
    async fn start(&self) -> Result<()> {
        let message = self.message.read().map(|m| m.clone()).unwrap_or_default();
        tracing::info!(component = %self.name, uses = self.uses.len(), "service started: {}", message);
        for target in &self.uses {
            tracing::debug!(component = %self.name, %target, "using");
        }
        Ok(())
    }
}

#[async_trait]
impl Stoppable for LoggingService {
    async fn stop(&self) -> Result<()> {
        tracing::info!(component = %self.name, "service stopped");
        Ok(())
    }
}

impl AttributeAware for LoggingService {
    fn attribute_changed(&self, name: &str, value: &Value) -> Result<()> {
        if name == "message" {
            if let Ok(mut message) = self.message.write() {
                *message = value.as_str().unwrap_or_default().to_string();
            }
        }
        tracing::info!(component = %self.name, attribute = name, %value, "attribute changed");
        Ok(())
    }
}

/// `keystone.Service`: a mutable `message` attribute and an optional
/// collection reference `uses` to other services.
pub fn service_type() -> ComponentType {
    let factory = |context: ComponentContext| -> Result<Arc<dyn ManagedComponent>> {
        Ok(Arc::new(LoggingService {
            message: RwLock::new(context.attribute::<String>("message").unwrap_or_default()),
            uses: context.references.get("uses").cloned().unwrap_or_default(),
            name: context.name,
        }))
    };
    ComponentType::builder(SERVICE_TYPE, factory)
        .interface(SERVICE_INTERFACE)
        .attribute(AttributeInfo::new("message", AttributeKind::String).mutable().with_default(""))
        .reference(ReferenceInfo::collection("uses").with_interface(SERVICE_INTERFACE))
        .build()
}
