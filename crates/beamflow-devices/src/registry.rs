/*!
 * Beamline registry and lookup facade.
 *
 * The wiring process attaches one controller per role. Adapters are built
 * lazily on first resolution, together with the bridge that republishes the
 * controller's change signal, and cached until the role's controller is
 * replaced or detached.
 */
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use beamflow_core::config::{Config, SharedConfig};

use crate::adapters::adapter_for;
use crate::attribute::{AdapterOptions, Attribute, AttributeAdapter, AttributeError, Result, Role};
use crate::bridge::{Bridge, NotificationBus, NotificationSink};
use crate::controller::{
    ActuatorController, ControllerHandle, EnergyController, ResolutionController,
    TransmissionController,
};
use crate::devices::lock;

/// Registry lifecycle events
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A controller was attached to a role
    Attached {
        /// Role name
        role: String,
        /// Controller kind
        kind: &'static str,
    },
    /// A controller replaced the one attached to a role
    Replaced {
        /// Role name
        role: String,
        /// Controller kind
        kind: &'static str,
    },
    /// A role was removed
    Detached {
        /// Role name
        role: String,
    },
}

/// What a role name resolves to
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A mediated attribute
    Attribute(Arc<dyn AttributeAdapter>),
    /// A controller with no adapter kind, handed over as is
    Raw(Arc<dyn Any + Send + Sync>),
}

impl Resolved {
    /// The adapter, if the role is mediated
    pub fn attribute(&self) -> Option<&Arc<dyn AttributeAdapter>> {
        match self {
            Resolved::Attribute(adapter) => Some(adapter),
            Resolved::Raw(_) => None,
        }
    }

    /// The raw controller downcast to `T`
    pub fn raw<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Resolved::Raw(controller) => Arc::clone(controller).downcast::<T>().ok(),
            Resolved::Attribute(_) => None,
        }
    }

    /// Whether the role is mediated
    pub fn is_attribute(&self) -> bool {
        matches!(self, Resolved::Attribute(_))
    }
}

#[derive(Debug)]
struct Mediator {
    adapter: Arc<dyn AttributeAdapter>,
    // Held for its drop: disconnects the device handler.
    _bridge: Bridge,
}

#[derive(Debug)]
struct RoleEntry {
    name: String,
    controller: ControllerHandle,
    mediator: Option<Mediator>,
    // Serializes adapter construction; replaced along with the controller.
    install: Arc<Mutex<()>>,
}

enum Lookup {
    Done(Resolved),
    Unbuilt(ControllerHandle, Arc<Mutex<()>>),
}

/// Role registry and lookup facade
#[derive(Debug)]
pub struct BeamlineRegistry {
    config: SharedConfig,
    sink: Arc<dyn NotificationSink>,
    roles: RwLock<HashMap<String, RoleEntry>>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

fn role_key(name: &str) -> String {
    match Role::parse(name) {
        Some(role) => role.as_str().to_ascii_lowercase(),
        None => name.trim().to_ascii_lowercase(),
    }
}

fn serves(role: Role, controller: &ControllerHandle) -> bool {
    matches!(
        (role, controller),
        (Role::Energy, ControllerHandle::Energy(_))
            | (Role::Transmission, ControllerHandle::Transmission(_))
            | (Role::Resolution, ControllerHandle::Resolution(_))
            | (Role::FastShutter, ControllerHandle::Actuator(_))
    )
}

impl BeamlineRegistry {
    /// Registry publishing change notifications to `sink`
    pub fn new(config: SharedConfig, sink: Arc<dyn NotificationSink>) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            config,
            sink,
            roles: RwLock::new(HashMap::new()),
            event_sender,
        }
    }

    /// Registry publishing to a fresh in-process bus sized from `config`
    pub fn with_bus(config: Config) -> (Self, NotificationBus) {
        let bus = NotificationBus::with_capacity(config.mediator.channel_capacity);
        let registry = Self::new(SharedConfig::new(config), Arc::new(bus.clone()));
        (registry, bus)
    }

    /// Effective configuration
    pub fn config(&self) -> &Config {
        self.config.get()
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Attach `controller` to `role`, replacing whatever was attached.
    ///
    /// Known roles only accept the controller kind their adapter wraps; any
    /// other name only accepts [`ControllerHandle::Raw`].
    pub fn attach(&self, role: &str, controller: ControllerHandle) -> Result<()> {
        let (name, key) = match Role::parse(role) {
            Some(known) => {
                if !serves(known, &controller) {
                    return Err(AttributeError::Registry(format!(
                        "A {} controller cannot serve role {}",
                        controller.kind(),
                        known
                    )));
                }
                (known.as_str().to_string(), role_key(role))
            }
            None => {
                if !matches!(controller, ControllerHandle::Raw(_)) {
                    return Err(AttributeError::Registry(format!(
                        "Role {} has no adapter; attach its controller as raw",
                        role
                    )));
                }
                (role.trim().to_string(), role_key(role))
            }
        };

        let kind = controller.kind();
        let previous = {
            let mut roles = self.roles.write().map_err(|_| {
                AttributeError::Registry("Failed to acquire write lock on beamline registry".to_string())
            })?;
            roles.insert(
                key,
                RoleEntry {
                    name: name.clone(),
                    controller,
                    mediator: None,
                    install: Arc::new(Mutex::new(())),
                },
            )
        };

        // The displaced adapter and bridge are dropped here, outside the lock.
        let event = if previous.is_some() {
            info!(role = %name, kind, "Replaced controller");
            RegistryEvent::Replaced { role: name, kind }
        } else {
            debug!(role = %name, kind, "Attached controller");
            RegistryEvent::Attached { role: name, kind }
        };
        drop(previous);
        self.notify(event);

        Ok(())
    }

    /// Attach the energy controller
    pub fn attach_energy(&self, controller: Arc<dyn EnergyController>) -> Result<()> {
        self.attach(Role::Energy.as_str(), ControllerHandle::Energy(controller))
    }

    /// Attach the attenuator controller
    pub fn attach_transmission(&self, controller: Arc<dyn TransmissionController>) -> Result<()> {
        self.attach(Role::Transmission.as_str(), ControllerHandle::Transmission(controller))
    }

    /// Attach the resolution controller
    pub fn attach_resolution(&self, controller: Arc<dyn ResolutionController>) -> Result<()> {
        self.attach(Role::Resolution.as_str(), ControllerHandle::Resolution(controller))
    }

    /// Attach the fast shutter controller
    pub fn attach_fast_shutter(&self, controller: Arc<dyn ActuatorController>) -> Result<()> {
        self.attach(Role::FastShutter.as_str(), ControllerHandle::Actuator(controller))
    }

    /// Attach a controller that is passed through unmediated
    pub fn attach_raw(&self, name: &str, controller: Arc<dyn Any + Send + Sync>) -> Result<()> {
        self.attach(name, ControllerHandle::Raw(controller))
    }

    /// Remove a role; returns whether it was attached
    pub fn detach(&self, role: &str) -> Result<bool> {
        let removed = {
            let mut roles = self.roles.write().map_err(|_| {
                AttributeError::Registry("Failed to acquire write lock on beamline registry".to_string())
            })?;
            roles.remove(&role_key(role))
        };

        match removed {
            Some(entry) => {
                debug!(role = %entry.name, "Detached controller");
                self.notify(RegistryEvent::Detached { role: entry.name.clone() });
                drop(entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Registered role names, sorted
    pub fn roles(&self) -> Result<Vec<String>> {
        let roles = self.roles.read().map_err(|_| {
            AttributeError::Registry("Failed to acquire read lock on beamline registry".to_string())
        })?;

        let mut names: Vec<String> = roles.values().map(|entry| entry.name.clone()).collect();
        names.sort();
        Ok(names)
    }

    /// Resolve a role name, case-insensitively.
    ///
    /// The first resolution of a mediated role builds its adapter and
    /// installs its bridge, which needs a tokio runtime. Concurrent first
    /// resolutions of one role connect a single device handler.
    pub fn resolve(&self, role: &str) -> Result<Resolved> {
        let key = role_key(role);

        let (controller, install) = match self.lookup(&key, role)? {
            Lookup::Done(resolved) => return Ok(resolved),
            Lookup::Unbuilt(controller, install) => (controller, install),
        };

        let _installing = lock(&install);

        // Whoever held the install lock before us may have finished the job
        match self.lookup(&key, role)? {
            Lookup::Done(resolved) => return Ok(resolved),
            Lookup::Unbuilt(current, _) if !current.same_controller(&controller) => {
                return Err(AttributeError::Registry(format!(
                    "Controller for role {} was replaced while resolving",
                    role
                )));
            }
            Lookup::Unbuilt(..) => {}
        }

        let known = Role::parse(role).ok_or_else(|| AttributeError::UnknownRole(role.to_string()))?;
        let adapter = adapter_for(known, &controller, AdapterOptions::from_config(known, self.config()))
            .ok_or_else(|| {
                AttributeError::Registry(format!("A {} controller cannot serve role {}", controller.kind(), known))
            })?;
        let bridge = Bridge::install(Arc::clone(&adapter), Arc::clone(&self.sink))?;

        // The role may have been replaced or detached meanwhile; a bridge
        // that loses is dropped after the lock is released.
        let (resolved, _unused) = {
            let mut roles = self.roles.write().map_err(|_| {
                AttributeError::Registry("Failed to acquire write lock on beamline registry".to_string())
            })?;

            match roles.get_mut(&key) {
                Some(entry) if entry.controller.same_controller(&controller) => match &entry.mediator {
                    Some(existing) => (Ok(Arc::clone(&existing.adapter)), Some(bridge)),
                    None => {
                        entry.mediator = Some(Mediator {
                            adapter: Arc::clone(&adapter),
                            _bridge: bridge,
                        });
                        debug!(role = %known, namespace = adapter.namespace(), "Created attribute adapter");
                        (Ok(adapter), None)
                    }
                },
                Some(_) => (
                    Err(AttributeError::Registry(format!(
                        "Controller for role {} was replaced while resolving",
                        known
                    ))),
                    Some(bridge),
                ),
                None => (Err(AttributeError::RoleNotFound(role.to_string())), Some(bridge)),
            }
        };

        resolved.map(Resolved::Attribute)
    }

    fn notify(&self, event: RegistryEvent) {
        if let Err(e) = self.event_sender.send(event) {
            debug!(event = ?e.0, "No subscribers for registry event");
        }
    }

    fn lookup(&self, key: &str, role: &str) -> Result<Lookup> {
        let roles = self.roles.read().map_err(|_| {
            AttributeError::Registry("Failed to acquire read lock on beamline registry".to_string())
        })?;
        let entry = roles
            .get(key)
            .ok_or_else(|| AttributeError::RoleNotFound(role.to_string()))?;

        Ok(match (&entry.controller, &entry.mediator) {
            (ControllerHandle::Raw(controller), _) => Lookup::Done(Resolved::Raw(Arc::clone(controller))),
            (_, Some(mediator)) => Lookup::Done(Resolved::Attribute(Arc::clone(&mediator.adapter))),
            (controller, None) => Lookup::Unbuilt(controller.clone(), Arc::clone(&entry.install)),
        })
    }

    /// Resolve a role that must be mediated
    pub fn resolve_attribute(&self, role: &str) -> Result<Arc<dyn AttributeAdapter>> {
        match self.resolve(role)? {
            Resolved::Attribute(adapter) => Ok(adapter),
            Resolved::Raw(_) => Err(AttributeError::UnknownRole(role.to_string())),
        }
    }

    /// Adapter for a known role
    pub fn attribute(&self, role: Role) -> Result<Arc<dyn AttributeAdapter>> {
        self.resolve_attribute(role.as_str())
    }

    /// Describe every known role at once.
    ///
    /// Never fails as a whole: a role that cannot be resolved still gets an
    /// entry with a null value and the reason in its message.
    pub async fn snapshot(&self) -> BTreeMap<String, Attribute> {
        let config = self.config();
        let entries = Role::ALL.iter().map(|&role| async move {
            match self.attribute(role) {
                Ok(adapter) => adapter.describe().await,
                Err(AttributeError::RoleNotFound(_)) => Attribute::unavailable(
                    role,
                    role.configured_limits(config),
                    format!("{} is not configured", role),
                ),
                Err(e) => {
                    warn!(role = %role, error = %e, "Could not resolve role for snapshot");
                    Attribute::unavailable(role, role.configured_limits(config), e.to_string())
                }
            }
        });

        join_all(entries)
            .await
            .into_iter()
            .map(|attribute| (attribute.name.clone(), attribute))
            .collect()
    }
}
