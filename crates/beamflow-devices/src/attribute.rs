/*!
 * Uniform attribute contract.
 *
 * Every beamline attribute, whatever controller sits behind it, is read,
 * written and described through [`AttributeAdapter`]. Values handed out are
 * always normalized: rounded to the attribute's precision, booleans for
 * two-position actuators, never the controller's raw representation.
 */
use std::any::Any;
use std::fmt::{self, Debug};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use beamflow_core::config::{Config, GetFailurePolicy};
use beamflow_core::types::Value;
use beamflow_core::utils::with_deadline;

use crate::bridge::ChangeNotification;
use crate::controller::{ControllerError, ControllerResult, HandlerId, SignalHandler};

/// Error type for attribute operations
#[derive(Error, Debug)]
pub enum AttributeError {
    /// The controller could not produce a value
    #[error("Could not get value of {attribute}: {reason}")]
    ValueUnavailable {
        /// Attribute name
        attribute: String,
        /// Why no value could be produced
        reason: String,
    },

    /// The requested value is outside the attribute's domain
    #[error("Invalid value {value} for {attribute}: {reason}")]
    InvalidValue {
        /// Attribute name
        attribute: String,
        /// The value as requested
        value: Value,
        /// Why it was refused
        reason: String,
    },

    /// The controller failed while writing or moving
    #[error("Can't set {attribute} to {requested}: {source}")]
    SetFailed {
        /// Attribute name
        attribute: String,
        /// The value as requested
        requested: Value,
        /// Controller failure
        source: ControllerError,
    },

    /// Another actor aborted the move before it completed
    #[error("Setting {attribute} to {requested} was interrupted")]
    Interrupted {
        /// Attribute name
        attribute: String,
        /// The value as requested
        requested: Value,
    },

    /// The move did not finish within the configured timeout
    #[error("Setting {attribute} to {requested} timed out: {reason}")]
    Timeout {
        /// Attribute name
        attribute: String,
        /// The value as requested
        requested: Value,
        /// Timeout details
        reason: String,
    },

    /// The controller refused the change-signal subscription
    #[error("Could not subscribe to {signal} for {attribute}: {source}")]
    SignalUnavailable {
        /// Attribute name
        attribute: String,
        /// Native signal name
        signal: String,
        /// Controller failure
        source: ControllerError,
    },

    /// The name does not denote a known attribute role
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// No controller is registered for the role
    #[error("No controller registered for role {0}")]
    RoleNotFound(String),

    /// The notification bridge needs a tokio runtime
    #[error("No async runtime available: {0}")]
    RuntimeUnavailable(String),

    /// Registry bookkeeping failure
    #[error("Registry error: {0}")]
    Registry(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] beamflow_core::Error),
}

/// Result type for attribute operations
pub type Result<T> = std::result::Result<T, AttributeError>;

/// Logical attribute roles with a dedicated adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Beam energy (keV)
    #[serde(rename = "energy")]
    Energy,
    /// Beam transmission (%)
    #[serde(rename = "transmission")]
    Transmission,
    /// Resolution at the detector edge (Å)
    #[serde(rename = "resolution")]
    Resolution,
    /// Fast shutter, open when in
    #[serde(rename = "fastShutter")]
    FastShutter,
}

impl Role {
    /// Every role, in snapshot order
    pub const ALL: [Role; 4] = [
        Role::Energy,
        Role::Transmission,
        Role::Resolution,
        Role::FastShutter,
    ];

    /// Attribute name as used in payloads and namespaces
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Energy => "energy",
            Role::Transmission => "transmission",
            Role::Resolution => "resolution",
            Role::FastShutter => "fastShutter",
        }
    }

    /// Case-insensitive role lookup
    pub fn parse(name: &str) -> Option<Role> {
        match name.trim().to_ascii_lowercase().as_str() {
            "energy" => Some(Role::Energy),
            "transmission" => Some(Role::Transmission),
            "resolution" => Some(Role::Resolution),
            "fast_shutter" | "fastshutter" => Some(Role::FastShutter),
            _ => None,
        }
    }

    /// Signal the controller emits when the attribute changes
    pub fn change_signal(&self) -> &'static str {
        match self {
            Role::Energy => "energyChanged",
            Role::Transmission => "attFactorChanged",
            Role::Resolution => "positionChanged",
            Role::FastShutter => "actuatorStateChanged",
        }
    }

    /// Decimal places of the normalized value, `None` for booleans
    pub fn precision(&self) -> Option<u32> {
        match self {
            Role::Energy => Some(4),
            Role::Transmission => Some(2),
            Role::Resolution => Some(3),
            Role::FastShutter => None,
        }
    }

    /// Configured limits for this role
    pub fn configured_limits(&self, config: &Config) -> Limits {
        let triple = match self {
            Role::Energy => config.limits.energy,
            Role::Transmission => config.limits.transmission,
            Role::Resolution => config.limits.resolution,
            Role::FastShutter => config.limits.fast_shutter,
        };
        Limits::from(triple)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AttributeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Role::parse(s).ok_or_else(|| AttributeError::UnknownRole(s.to_string()))
    }
}

/// Coarse operating state of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeState {
    /// Ready for a new request
    #[default]
    Idle,
    /// A move is in progress
    Busy,
    /// The last move was aborted
    Aborted,
}

impl AttributeState {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeState::Idle => "IDLE",
            AttributeState::Busy => "BUSY",
            AttributeState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for AttributeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute limits, serialized as `[min, max, step]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Limits {
    /// Lowest accepted value
    pub min: f64,
    /// Highest accepted value
    pub max: f64,
    /// Smallest meaningful increment
    pub step: f64,
}

impl Limits {
    /// Create limits
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Whether `value` lies within `[min, max]`
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl From<[f64; 3]> for Limits {
    fn from([min, max, step]: [f64; 3]) -> Self {
        Self { min, max, step }
    }
}

impl From<Limits> for [f64; 3] {
    fn from(limits: Limits) -> Self {
        [limits.min, limits.max, limits.step]
    }
}

/// Uniform description of one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Normalized value, null when it could not be read
    pub value: Value,
    /// Limits as `[min, max, step]`
    pub limits: Limits,
    /// Operating state
    pub state: AttributeState,
    /// Free text, empty unless there is something to report
    pub message: String,
}

impl Attribute {
    /// Entry for an attribute whose value cannot be reported
    pub fn unavailable(role: Role, limits: Limits, message: impl Into<String>) -> Self {
        Self {
            name: role.as_str().to_string(),
            value: Value::Null,
            limits,
            state: AttributeState::Idle,
            message: message.into(),
        }
    }
}

/// Per-adapter settings, derived from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterOptions {
    /// Limits used when the controller cannot report its own
    pub limits: Limits,
    /// Read failure policy
    pub policy: GetFailurePolicy,
    /// Upper bound for a single move
    pub move_timeout: Option<Duration>,
    /// Notification namespace
    pub namespace: String,
}

impl AdapterOptions {
    /// Options for `role` taken from `config`
    pub fn from_config(role: Role, config: &Config) -> Self {
        Self {
            limits: role.configured_limits(config),
            policy: config.mediator.get_failure_policy,
            move_timeout: config.mediator.move_timeout(),
            namespace: format!(
                "{}/{}",
                config.mediator.namespace_prefix.trim_end_matches('/'),
                role.as_str()
            ),
        }
    }

    /// Options for `role` under the default configuration
    pub fn defaults(role: Role) -> Self {
        Self::from_config(role, &Config::default())
    }
}

/// The uniform contract every attribute adapter implements
#[async_trait]
pub trait AttributeAdapter: Send + Sync + Debug {
    /// Role this adapter serves
    fn role(&self) -> Role;

    /// Adapter settings
    fn options(&self) -> &AdapterOptions;

    /// Attribute name
    fn name(&self) -> &'static str {
        self.role().as_str()
    }

    /// Namespace change notifications are published on
    fn namespace(&self) -> &str {
        &self.options().namespace
    }

    /// Read the current normalized value from the controller
    async fn get(&self) -> Result<Value>;

    /// Request a new value; resolves to the value read back afterwards
    async fn set(&self, requested: Value) -> Result<Value>;

    /// Coarse operating state
    async fn state(&self) -> AttributeState {
        AttributeState::Idle
    }

    /// Limits, from the controller when it reports them
    async fn limits(&self) -> Limits {
        self.options().limits
    }

    /// Message attached to a successful description
    async fn message(&self) -> String {
        String::new()
    }

    /// Uniform composite of value, limits, state and message
    async fn describe(&self) -> Attribute {
        let (value, message) = match self.get().await {
            Ok(value) => (value, self.message().await),
            Err(e) => (Value::Null, e.to_string()),
        };

        Attribute {
            name: self.name().to_string(),
            value,
            limits: self.limits().await,
            state: self.state().await,
            message,
        }
    }

    /// Register `handler` on the controller's change signal
    fn connect_device(&self, handler: SignalHandler) -> ControllerResult<HandlerId>;

    /// Remove a handler registered through [`AttributeAdapter::connect_device`]
    fn disconnect_device(&self, id: HandlerId) -> bool;

    /// Build the notification for one device change event.
    ///
    /// Numeric attributes report the value the event carried as its first
    /// argument; a missing or non-numeric argument falls back to a live read.
    async fn on_device_event(&self, args: &[Value]) -> ChangeNotification {
        let role = self.role();
        let reported = args
            .first()
            .cloned()
            .ok_or_else(|| ControllerError::Unavailable(format!("{} event carried no value", role)));

        let outcome = match normalize_reading(role, reported) {
            Ok(value) => Ok(Value::Float(value)),
            Err(_) => self.get().await,
        };
        let (value, message) = match outcome {
            Ok(value) => (value, self.message().await),
            Err(e) => (Value::Null, e.to_string()),
        };

        ChangeNotification::from_attribute(
            Attribute {
                name: self.name().to_string(),
                value,
                limits: self.limits().await,
                state: self.state().await,
                message,
            },
            false,
        )
    }

    /// Access to the concrete adapter type
    fn as_any(&self) -> &dyn Any;
}

/// Round `value` to `decimals` places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Normalize a raw numeric reading for `role`
pub(crate) fn normalize_reading(role: Role, reading: ControllerResult<Value>) -> Result<f64> {
    let unavailable = |reason: String| AttributeError::ValueUnavailable {
        attribute: role.as_str().to_string(),
        reason,
    };

    let raw = reading.map_err(|e| unavailable(e.to_string()))?;
    let number = raw
        .to_number()
        .filter(|n| n.is_finite())
        .ok_or_else(|| unavailable(format!("controller reported {}", raw)))?;

    Ok(match role.precision() {
        Some(decimals) => round_to(number, decimals),
        None => number,
    })
}

/// Apply the read failure policy to the outcome of a read
pub(crate) fn apply_policy(
    role: Role,
    options: &AdapterOptions,
    outcome: Result<Value>,
    fallback: Value,
) -> Result<Value> {
    match (outcome, options.policy) {
        (Ok(value), _) => Ok(value),
        (Err(e), GetFailurePolicy::DefaultZero) => {
            warn!(attribute = %role, error = %e, "Reporting default value for unreadable attribute");
            Ok(fallback)
        }
        (Err(e), GetFailurePolicy::Propagate) => Err(e),
    }
}

/// Read a numeric attribute: normalize, then apply the failure policy
pub(crate) fn read_numeric(
    role: Role,
    options: &AdapterOptions,
    reading: ControllerResult<Value>,
) -> Result<Value> {
    let outcome = normalize_reading(role, reading).map(Value::Float);
    apply_policy(role, options, outcome, Value::Float(0.0))
}

/// Coerce a requested value into the numeric domain of `role`
pub(crate) fn coerce_requested(role: Role, limits: &Limits, requested: &Value) -> Result<f64> {
    let invalid = |reason: &str| AttributeError::InvalidValue {
        attribute: role.as_str().to_string(),
        value: requested.clone(),
        reason: reason.to_string(),
    };

    let number = requested
        .to_number()
        .ok_or_else(|| invalid("not a number"))?;

    if !number.is_finite() {
        return Err(invalid("not a finite number"));
    }

    if !limits.contains(number) {
        return Err(invalid(&format!(
            "outside limits [{}, {}]",
            limits.min, limits.max
        )));
    }

    Ok(number)
}

/// Run a controller move under the configured timeout and map its failure
pub(crate) async fn run_move<F>(
    role: Role,
    options: &AdapterOptions,
    requested: &Value,
    command: F,
) -> Result<()>
where
    F: Future<Output = ControllerResult<()>> + Send,
{
    match with_deadline(options.move_timeout, command).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(ControllerError::Aborted(_))) => Err(AttributeError::Interrupted {
            attribute: role.as_str().to_string(),
            requested: requested.clone(),
        }),
        Ok(Err(source)) => Err(AttributeError::SetFailed {
            attribute: role.as_str().to_string(),
            requested: requested.clone(),
            source,
        }),
        Err(e) => Err(AttributeError::Timeout {
            attribute: role.as_str().to_string(),
            requested: requested.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_lookup_is_case_insensitive() {
        assert_eq!(Role::parse("ENERGY"), Some(Role::Energy));
        assert_eq!(Role::parse("energy"), Some(Role::Energy));
        assert_eq!(Role::parse("Transmission"), Some(Role::Transmission));
        assert_eq!(Role::parse("fast_shutter"), Some(Role::FastShutter));
        assert_eq!(Role::parse("fastShutter"), Some(Role::FastShutter));
        assert_eq!(Role::parse("beamstop"), None);
        assert!(matches!("zoom".parse::<Role>(), Err(AttributeError::UnknownRole(_))));
    }

    #[test]
    fn test_role_metadata() {
        assert_eq!(Role::FastShutter.as_str(), "fastShutter");
        assert_eq!(Role::Energy.change_signal(), "energyChanged");
        assert_eq!(Role::Transmission.precision(), Some(2));
        assert_eq!(Role::FastShutter.precision(), None);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to(12.34567, 4), 12.3457);
        assert_eq!(round_to(45.678, 2), 45.68);
        assert_eq!(round_to(2.00049, 3), 2.0);
    }

    #[test]
    fn test_normalize_reading() {
        assert_eq!(normalize_reading(Role::Energy, Ok(Value::from(12.34567))).unwrap(), 12.3457);
        assert_eq!(normalize_reading(Role::Resolution, Ok(Value::from("2.12345"))).unwrap(), 2.123);
        assert!(matches!(
            normalize_reading(Role::Transmission, Ok(Value::Null)),
            Err(AttributeError::ValueUnavailable { .. })
        ));
        assert!(matches!(
            normalize_reading(Role::Energy, Err(ControllerError::NotConnected)),
            Err(AttributeError::ValueUnavailable { reason, .. }) if reason == "Device not connected"
        ));
    }

    #[test]
    fn test_read_numeric_follows_policy() {
        let mut options = AdapterOptions::defaults(Role::Transmission);
        assert!(read_numeric(Role::Transmission, &options, Ok(Value::Null)).is_err());

        options.policy = GetFailurePolicy::DefaultZero;
        assert_eq!(
            read_numeric(Role::Transmission, &options, Ok(Value::Null)).unwrap(),
            Value::Float(0.0)
        );
        assert_eq!(
            read_numeric(Role::Transmission, &options, Ok(Value::from(33.333))).unwrap(),
            Value::Float(33.33)
        );
    }

    #[test]
    fn test_coerce_requested() {
        let limits = Limits::new(0.0, 100.0, 0.1);
        assert_eq!(coerce_requested(Role::Transmission, &limits, &Value::from(50)).unwrap(), 50.0);
        assert_eq!(coerce_requested(Role::Transmission, &limits, &Value::from("12.5")).unwrap(), 12.5);

        for bad in [
            Value::from("lots"),
            Value::Bool(true),
            Value::Null,
            Value::from(f64::NAN),
            Value::from(150.0),
        ] {
            assert!(matches!(
                coerce_requested(Role::Transmission, &limits, &bad),
                Err(AttributeError::InvalidValue { .. })
            ));
        }
    }

    #[test]
    fn test_limits_serialize_as_triple() {
        let limits = Limits::new(0.0, 1000.0, 0.1);
        assert_eq!(serde_json::to_string(&limits).unwrap(), "[0.0,1000.0,0.1]");
        let parsed: Limits = serde_json::from_str("[1.0, 2.0, 0.5]").unwrap();
        assert_eq!(parsed, Limits::new(1.0, 2.0, 0.5));
    }

    #[test]
    fn test_attribute_payload_shape() {
        let attribute = Attribute {
            name: "energy".to_string(),
            value: Value::Float(12.3457),
            limits: Limits::new(0.0, 1000.0, 0.1),
            state: AttributeState::Busy,
            message: String::new(),
        };

        let json = serde_json::to_value(&attribute).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "energy",
                "value": 12.3457,
                "limits": [0.0, 1000.0, 0.1],
                "state": "BUSY",
                "message": ""
            })
        );
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.mediator.namespace_prefix = "id23/".to_string();
        config.mediator.move_timeout_ms = 2000;

        let options = AdapterOptions::from_config(Role::FastShutter, &config);
        assert_eq!(options.namespace, "id23/fastShutter");
        assert_eq!(options.move_timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.limits, Limits::new(0.0, 1.0, 1.0));
    }

    #[tokio::test]
    async fn test_run_move_maps_failures() {
        let options = AdapterOptions {
            move_timeout: Some(Duration::from_millis(10)),
            ..AdapterOptions::defaults(Role::Energy)
        };
        let requested = Value::from(12.0);

        assert!(run_move(Role::Energy, &options, &requested, async { Ok(()) }).await.is_ok());

        let rejected = run_move(Role::Energy, &options, &requested, async {
            Err(ControllerError::Rejected("interlock".into()))
        })
        .await;
        assert!(matches!(rejected, Err(AttributeError::SetFailed { requested, .. }) if requested == Value::from(12.0)));

        let aborted = run_move(Role::Energy, &options, &requested, async {
            Err(ControllerError::Aborted("stop".into()))
        })
        .await;
        assert!(matches!(aborted, Err(AttributeError::Interrupted { .. })));

        let slow = run_move(Role::Energy, &options, &requested, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(slow, Err(AttributeError::Timeout { .. })));
    }
}
