//! Component state transitions.
//!
//! Each transition holds the component's `transition` lock from the first
//! state check until the last state write, so for any one name at most one
//! start, stop, attribute write or unload is in flight. Hooks run with only
//! that lock held: a hook may start or stop other components.
use std::sync::Arc;

use crate::dependency::resolver::resolve_all;
use crate::kernel::Kernel;
use crate::kernel::error::{Error, Result};
use crate::lifecycle::monitor::LifecycleEvent;
use crate::lifecycle::State;
use crate::registry::component::{ComponentContext, ManagedComponent};
use crate::registry::name::ComponentName;
use crate::registry::registry::ComponentSlot;

impl Kernel {
    /// Start a component.
    ///
    /// Starting a STARTING or RUNNING component is a no-op. A FAILED
    /// component must be restarted with [`Kernel::retry`]. When a required
    /// reference or dependency is not RUNNING the component stays STOPPED,
    /// the reason is recorded and `MissingDependency` is returned.
    pub async fn start(&self, name: &ComponentName) -> Result<()> {
        let slot = self.registry().slot(name).await?;
        let _guard = slot.transition.lock().await;
        slot.ensure_registered()?;

        let state = slot.record.read().await.state;
        match state {
            State::Stopped => self.start_locked(&slot).await,
            State::Starting | State::Running => Ok(()),
            State::Failed | State::Stopping => Err(Error::InvalidTransition {
                name: name.to_string(),
                action: "start",
                state,
            }),
        }
    }

    /// Explicitly restart a FAILED component.
    pub async fn retry(&self, name: &ComponentName) -> Result<()> {
        let slot = self.registry().slot(name).await?;
        let _guard = slot.transition.lock().await;
        slot.ensure_registered()?;

        let state = slot.record.read().await.state;
        if state != State::Failed {
            return Err(Error::InvalidTransition {
                name: name.to_string(),
                action: "retry",
                state,
            });
        }
        log::info!("Retrying failed component {}", name);
        self.start_locked(&slot).await
    }

    /// Stop a component.
    ///
    /// Stopping a STOPPED component is a no-op; a FAILED component moves
    /// straight to STOPPED. If the stop hook fails the component ends up
    /// FAILED with its instance released.
    pub async fn stop(&self, name: &ComponentName) -> Result<()> {
        let slot = self.registry().slot(name).await?;
        let _guard = slot.transition.lock().await;
        slot.ensure_registered()?;

        let state = slot.record.read().await.state;
        match state {
            State::Running => self.stop_locked(&slot).await,
            State::Failed => {
                self.set_state(&slot, State::Stopped, None).await;
                Ok(())
            }
            State::Stopped | State::Starting | State::Stopping => Ok(()),
        }
    }

    /// Best-effort stop. Never fails: a missing component is ignored and a
    /// failing stop hook is logged and the component still ends up STOPPED.
    pub async fn force_stop(&self, name: &ComponentName) {
        let slot = match self.registry().slot(name).await {
            Ok(slot) => slot,
            Err(_) => return,
        };
        let _guard = slot.transition.lock().await;
        if slot.ensure_registered().is_ok() {
            self.force_stop_locked(&slot).await;
        }
    }

    /// Stop (best effort) and unregister a component within a single
    /// transition.
    pub async fn unload_component(&self, name: &ComponentName) -> Result<()> {
        let slot = self.registry().slot(name).await?;
        let _guard = slot.transition.lock().await;
        slot.ensure_registered()?;

        self.force_stop_locked(&slot).await;
        self.registry().remove_locked(&slot).await;
        Ok(())
    }

    pub async fn state(&self, name: &ComponentName) -> Result<State> {
        self.registry().state(name).await
    }

    pub async fn state_reason(&self, name: &ComponentName) -> Result<Option<String>> {
        self.registry().state_reason(name).await
    }

    /// How many times the component has been started successfully.
    pub async fn generation(&self, name: &ComponentName) -> Result<u64> {
        self.registry().generation(name).await
    }

    async fn start_locked(&self, slot: &ComponentSlot) -> Result<()> {
        let (component_type, data) = {
            let record = slot.record.read().await;
            (record.component_type.clone(), record.data.clone())
        };

        let snapshot = self.registry().snapshot().await;
        let references = match resolve_all(&snapshot, &component_type, &data) {
            Ok(references) => references,
            Err(e) => {
                log::warn!("Cannot start {}: {}", slot.name, e);
                slot.record.write().await.state_reason = Some(e.to_string());
                return Err(e.into());
            }
        };

        self.set_state(slot, State::Starting, None).await;

        let context = ComponentContext {
            name: slot.name.clone(),
            attributes: data.attributes,
            references,
            kernel: self.clone(),
        };
        let instance = match component_type.factory().create(context) {
            Ok(instance) => instance,
            Err(e) => return Err(self.fail(slot, None, e).await),
        };
        if let Err(e) = run_start_hook(&instance).await {
            return Err(self.fail(slot, Some(instance), e).await);
        }

        {
            let mut record = slot.record.write().await;
            record.instance = Some(instance);
            record.generation += 1;
        }
        self.set_state(slot, State::Running, None).await;
        Ok(())
    }

    async fn force_stop_locked(&self, slot: &ComponentSlot) {
        let state = slot.record.read().await.state;
        match state {
            State::Running => {
                self.set_state(slot, State::Stopping, None).await;
                let instance = slot.record.write().await.instance.take();
                if let Some(instance) = instance {
                    if let Err(e) = run_stop_hook(&instance).await {
                        log::warn!("Ignoring stop failure of {} during forced stop: {}", slot.name, e);
                    }
                }
                self.set_state(slot, State::Stopped, None).await;
            }
            State::Failed => self.set_state(slot, State::Stopped, None).await,
            State::Stopped | State::Starting | State::Stopping => {}
        }
    }

    async fn stop_locked(&self, slot: &ComponentSlot) -> Result<()> {
        self.set_state(slot, State::Stopping, None).await;
        let instance = slot.record.write().await.instance.take();
        if let Some(instance) = instance {
            if let Err(e) = run_stop_hook(&instance).await {
                return Err(self.fail(slot, Some(instance), e).await);
            }
        }
        self.set_state(slot, State::Stopped, None).await;
        Ok(())
    }

    /// Moves a component to FAILED, runs its fail hook and builds the error
    /// to return. The instance is released.
    async fn fail(&self, slot: &ComponentSlot, instance: Option<Arc<dyn ManagedComponent>>, cause: Error) -> Error {
        let reason = cause.to_string();
        log::error!("Component {} failed: {}", slot.name, reason);
        if let Some(instance) = instance {
            instance.on_fail(&reason);
        }
        slot.record.write().await.instance = None;
        self.set_state(slot, State::Failed, Some(reason)).await;
        Error::lifecycle(slot.name.to_string(), cause)
    }

    /// Writes the new state and reports it. A `reason` replaces the recorded
    /// one; reaching RUNNING clears it.
    async fn set_state(&self, slot: &ComponentSlot, to: State, reason: Option<String>) {
        let event = {
            let mut record = slot.record.write().await;
            let from = record.state;
            debug_assert!(from.can_transition_to(to), "invalid transition {} -> {}", from, to);
            record.state = to;
            if reason.is_some() || to == State::Running {
                record.state_reason = reason;
            }
            LifecycleEvent {
                name: slot.name.clone(),
                from,
                to,
                sequence: self.monitor().next_sequence(),
            }
        };
        self.monitor().notify(&event, &slot.interfaces).await;
    }
}

async fn run_start_hook(instance: &Arc<dyn ManagedComponent>) -> Result<()> {
    match instance.startable() {
        Some(startable) => startable.start().await,
        None => Ok(()),
    }
}

async fn run_stop_hook(instance: &Arc<dyn ManagedComponent>) -> Result<()> {
    match instance.stoppable() {
        Some(stoppable) => stoppable.stop().await,
        None => Ok(()),
    }
}
