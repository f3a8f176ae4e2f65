// src/config.rs - Device configuration for event reporting

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::{
    error::{EventError, Result},
    event::{enrollment::ObjectPropertyReference, EventConfig},
    notification::NotificationClass,
    object::{ObjectId, ObjectType},
    value::Value,
};

/// Highest valid object instance number
pub const MAX_INSTANCE: u32 = 4_194_302;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Event reporting configuration of one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Device identity
    pub device: DeviceConfig,

    /// Runtime tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Notification classes and their recipient lists
    #[serde(default)]
    pub notification_classes: Vec<NotificationClass>,

    /// Objects reporting on their own present value
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,

    /// Event enrollments monitoring a referenced property
    #[serde(default)]
    pub enrollments: Vec<EnrollmentConfig>,
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent configurations
    pub fn validate(&self) -> Result<()> {
        if self.device.instance > MAX_INSTANCE {
            return Err(EventError::Config(format!(
                "device instance {} exceeds {}",
                self.device.instance, MAX_INSTANCE
            )));
        }
        self.engine.validate()?;

        let mut classes = HashSet::new();
        for class in &self.notification_classes {
            if !classes.insert(class.id) {
                return Err(EventError::Config(format!("duplicate notification class {}", class.id)));
            }
        }

        let mut seen = HashSet::new();
        for object in &self.objects {
            if matches!(
                object.object.object_type,
                ObjectType::Device | ObjectType::EventEnrollment | ObjectType::NotificationClass
            ) {
                return Err(EventError::Config(format!(
                    "{} cannot report intrinsic events",
                    object.object
                )));
            }
            Self::check_event(object.object, &object.event, &classes, &mut seen)?;
            if object.event.algorithm.is_command_failure() && object.feedback_value.is_none() {
                return Err(EventError::Config(format!(
                    "{} uses command-failure but has no feedback_value",
                    object.object
                )));
            }
        }

        for enrollment in &self.enrollments {
            if enrollment.object.object_type != ObjectType::EventEnrollment {
                return Err(EventError::Config(format!(
                    "{} is not an event-enrollment object",
                    enrollment.object
                )));
            }
            Self::check_event(enrollment.object, &enrollment.event, &classes, &mut seen)?;
            if enrollment.event.algorithm.is_command_failure() && enrollment.feedback.is_none() {
                return Err(EventError::Config(format!(
                    "{} uses command-failure but has no feedback reference",
                    enrollment.object
                )));
            }
        }
        Ok(())
    }

    fn check_event(
        object: ObjectId,
        event: &EventConfig,
        classes: &HashSet<u32>,
        seen: &mut HashSet<ObjectId>,
    ) -> Result<()> {
        if object.instance > MAX_INSTANCE {
            return Err(EventError::Config(format!("{} instance out of range", object)));
        }
        if !seen.insert(object) {
            return Err(EventError::Config(format!("duplicate object {}", object)));
        }
        if !classes.contains(&event.notification_class) {
            return Err(EventError::Config(format!(
                "{} refers to unknown notification class {}",
                object, event.notification_class
            )));
        }
        event
            .validate()
            .map_err(|e| EventError::Config(format!("{}: {}", object, e)))
    }

    pub fn device_id(&self) -> ObjectId {
        ObjectId::device(self.device.instance)
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device object instance
    pub instance: u32,

    /// Human readable name
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Event enrollment poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Timeout for one enrollment read in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(EventError::Config("poll_interval_ms must be positive".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(EventError::Config("read_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

/// Object with intrinsic reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub object: ObjectId,

    /// Present value seeded before reporting starts
    #[serde(default)]
    pub present_value: Value,

    /// Feedback value seeded for command-failure reporting
    #[serde(default)]
    pub feedback_value: Option<Value>,

    pub event: EventConfig,
}

/// Event enrollment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    /// Event-enrollment object
    pub object: ObjectId,

    /// Monitored property
    pub reference: ObjectPropertyReference,

    /// Feedback property for command-failure enrollments
    #[serde(default)]
    pub feedback: Option<ObjectPropertyReference>,

    pub event: EventConfig,
}

fn default_device_name() -> String { "bacnet-events".to_string() }
fn default_poll_interval() -> u64 { 1000 }
fn default_read_timeout() -> u64 { 5000 }
