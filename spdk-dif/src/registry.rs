//! Registry of attached controllers and their namespaces.
//!
//! Populated once while discovery runs, then only read. Controllers and
//! namespaces are kept in attach order. Dropping the registry detaches every
//! controller.

use crate::device::{AttachEvent, ControllerInfo, Discovery, ProbeFilter};
use crate::error::{Error, Result};
use crate::profile::NamespaceEntry;

/// An attached controller.
pub struct Controller<C> {
    pub info: ControllerInfo,
    /// Display name (model and serial)
    pub name: String,
    /// Backend handle; dropping it detaches the controller
    pub handle: C,
}

/// Controllers and active namespaces found by discovery.
pub struct DeviceRegistry<C> {
    controllers: Vec<Controller<C>>,
    namespaces: Vec<NamespaceEntry>,
}

impl<C> DeviceRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            controllers: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Probe through `discovery` and register every attached controller.
    ///
    /// Fails if the probe fails or nothing was attached.
    pub fn probe<D>(discovery: &mut D, filter: &ProbeFilter) -> Result<Self>
    where
        D: Discovery<Controller = C>,
    {
        let mut registry = Self::new();
        discovery.probe(filter, &mut |event| registry.attach(event))?;

        if registry.controllers.is_empty() {
            return Err(Error::NoControllers);
        }
        Ok(registry)
    }

    /// Register one attached controller and its active namespaces.
    pub fn attach(&mut self, event: AttachEvent<C>) {
        let AttachEvent {
            info,
            controller,
            namespaces,
        } = event;

        log::info!("Attached to {}", info.traddr);
        let name = info.name();
        let index = self.controllers.len();

        log::info!(
            "Using controller {} with {} namespaces.",
            name,
            namespaces.len()
        );
        self.namespaces.extend(
            namespaces
                .iter()
                .filter_map(|caps| NamespaceEntry::from_capabilities(index, &name, caps)),
        );

        self.controllers.push(Controller {
            info,
            name,
            handle: controller,
        });
    }

    pub fn controllers(&self) -> &[Controller<C>] {
        &self.controllers
    }

    /// Active namespaces in attach order.
    pub fn namespaces(&self) -> &[NamespaceEntry] {
        &self.namespaces
    }

    /// Controller owning `entry`.
    pub fn controller_of(&self, entry: &NamespaceEntry) -> &Controller<C> {
        &self.controllers[entry.ctrlr]
    }

    #[cfg(test)]
    pub(crate) fn namespaces_mut(&mut self) -> &mut [NamespaceEntry] {
        &mut self.namespaces
    }

    /// Forget all namespaces and detach all controllers.
    fn detach_all(&mut self) {
        self.namespaces.clear();
        for ctrlr in self.controllers.drain(..) {
            log::debug!("Detaching {} at {}", ctrlr.name, ctrlr.info.traddr);
        }
    }
}

impl<C> Default for DeviceRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Drop for DeviceRegistry<C> {
    fn drop(&mut self) {
        self.detach_all();
    }
}
