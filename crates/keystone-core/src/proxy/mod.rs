//! # Keystone Proxies
//!
//! Indirect references to components. A [`ProxyHandle`] names its target
//! (an exact [`ComponentName`](crate::registry::ComponentName) or a
//! [`NameQuery`](crate::registry::NameQuery)) and looks up the live instance
//! on every use, so holders are unaffected when the target restarts.
//! Proxies are tracked by the [`ProxyManager`] until destroyed;
//! [`ScopedProxy`] destroys its proxy on drop.
pub mod manager;

pub use manager::{ProxyHandle, ProxyId, ProxyManager, ProxyTarget, ScopedProxy};
