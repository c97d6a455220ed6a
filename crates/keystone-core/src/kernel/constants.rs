/// Application name
pub const APP_NAME: &str = "Keystone";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default kernel name used when the settings do not provide one
pub const DEFAULT_KERNEL_NAME: &str = "keystone";

/// Interface tag carried by every configuration-representative component
pub const CONFIGURATION_INTERFACE: &str = "keystone.Configuration";

/// Component type name of the configuration-representative component
pub const CONFIGURATION_TYPE: &str = "keystone.Configuration";

/// Name property holding a component's short name
pub const NAME_KEY: &str = "name";

/// Name property holding a component's kind (e.g. "Configuration", "Service")
pub const KIND_KEY: &str = "kind";

/// Name property holding the owning configuration's artifact on a representative
pub const CONFIGURATION_NAME_KEY: &str = "configurationName";

/// Kind value of configuration-representative components
pub const CONFIGURATION_KIND: &str = "Configuration";

