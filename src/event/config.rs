// src/event/config.rs - Per-object event configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{EventAlgorithm, EventState, NotifyType, Transition, TransitionBits};
use crate::{
    error::{EventError, Result},
    object::PropertyId,
    value::Value,
};

/// How reliability-driven transitions into and out of `fault` are timed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultPolicy {
    /// Commit without waiting for the time delay
    #[default]
    Immediate,
    /// Debounce with the configured time delay like any other transition
    Debounced,
}

/// Event configuration of one monitored object
///
/// Values stay fixed until a configuration property is rewritten; a rewrite
/// produces a new, validated configuration through [`EventConfig::with_property`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    pub notification_class: u32,

    #[serde(default)]
    pub event_enable: TransitionBits,

    #[serde(default)]
    pub notify_type: NotifyType,

    /// Seconds a proposed state must persist before it commits
    #[serde(default)]
    pub time_delay: u32,

    /// Seconds used instead of `time_delay` for returns to normal
    #[serde(default)]
    pub time_delay_normal: Option<u32>,

    #[serde(default)]
    pub fault_policy: FaultPolicy,

    #[serde(default = "default_true")]
    pub event_detection_enable: bool,

    #[serde(default)]
    pub event_algorithm_inhibit: bool,

    /// Message texts for to-offnormal, to-fault and to-normal
    #[serde(default)]
    pub message_texts: [Option<String>; 3],

    pub algorithm: EventAlgorithm,
}

impl EventConfig {
    pub fn new(notification_class: u32, algorithm: EventAlgorithm) -> Self {
        Self {
            notification_class,
            event_enable: TransitionBits::all(),
            notify_type: NotifyType::Alarm,
            time_delay: 0,
            time_delay_normal: None,
            fault_policy: FaultPolicy::Immediate,
            event_detection_enable: true,
            event_algorithm_inhibit: false,
            message_texts: Default::default(),
            algorithm,
        }
    }

    pub fn with_time_delay(mut self, seconds: u32) -> Self {
        self.time_delay = seconds;
        self
    }

    pub fn with_time_delay_normal(mut self, seconds: u32) -> Self {
        self.time_delay_normal = Some(seconds);
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    pub fn with_event_enable(mut self, bits: TransitionBits) -> Self {
        self.event_enable = bits;
        self
    }

    pub fn with_message_text(mut self, transition: Transition, text: impl Into<String>) -> Self {
        self.message_texts[transition.index()] = Some(text.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.notify_type == NotifyType::AckNotification {
            return Err(EventError::InvalidProperty {
                property: PropertyId::NotifyType,
                reason: "ack-notification is not a valid notify type for an object".into(),
            });
        }
        self.algorithm.validate()
    }

    /// Debounce interval for a proposal targeting `target`
    pub fn delay_for(&self, target: EventState) -> Duration {
        let seconds = match (target, self.time_delay_normal) {
            (EventState::Normal, Some(normal)) => normal,
            _ => self.time_delay,
        };
        Duration::from_secs(u64::from(seconds))
    }

    pub fn message_text(&self, transition: Transition) -> Option<String> {
        self.message_texts[transition.index()].clone()
    }

    /// Every configuration property with its current value
    pub fn properties(&self) -> Vec<(PropertyId, Value)> {
        let mut props = vec![
            (PropertyId::NotificationClass, Value::Unsigned(u64::from(self.notification_class))),
            (PropertyId::EventEnable, self.event_enable.to_value()),
            (PropertyId::NotifyType, Value::Enumerated(self.notify_type.code())),
            (PropertyId::TimeDelay, Value::Unsigned(u64::from(self.time_delay))),
            (
                PropertyId::TimeDelayNormal,
                self.time_delay_normal
                    .map(|s| Value::Unsigned(u64::from(s)))
                    .unwrap_or(Value::Null),
            ),
            (PropertyId::EventDetectionEnable, Value::Bool(self.event_detection_enable)),
            (PropertyId::EventAlgorithmInhibit, Value::Bool(self.event_algorithm_inhibit)),
            (
                PropertyId::EventMessageTexts,
                Value::Array(
                    self.message_texts
                        .iter()
                        .map(|text| text.clone().map(Value::String).unwrap_or(Value::Null))
                        .collect(),
                ),
            ),
        ];
        props.extend(self.algorithm.properties());
        props
    }

    /// Copy of this configuration with one property rewritten
    ///
    /// Returns `Ok(None)` when `property` is not part of the configuration and
    /// an error when the new value is malformed or yields an invalid
    /// combination.
    pub fn with_property(&self, property: PropertyId, value: &Value) -> Result<Option<Self>> {
        let mut next = self.clone();
        match property {
            PropertyId::NotificationClass => {
                next.notification_class = u32_property(property, value)?;
            }
            PropertyId::EventEnable => {
                next.event_enable = TransitionBits::from_value(property, value)?;
            }
            PropertyId::NotifyType => {
                next.notify_type = NotifyType::from_value(value)?;
            }
            PropertyId::TimeDelay => {
                next.time_delay = u32_property(property, value)?;
            }
            PropertyId::TimeDelayNormal => {
                next.time_delay_normal = if value.is_null() {
                    None
                } else {
                    Some(u32_property(property, value)?)
                };
            }
            PropertyId::EventDetectionEnable => {
                next.event_detection_enable = bool_property(property, value)?;
            }
            PropertyId::EventAlgorithmInhibit => {
                next.event_algorithm_inhibit = bool_property(property, value)?;
            }
            PropertyId::EventMessageTexts => {
                next.message_texts = message_texts(value)?;
            }
            _ => match self.algorithm.with_property(property, value)? {
                Some(algorithm) => next.algorithm = algorithm,
                None => return Ok(None),
            },
        }
        next.validate()?;
        Ok(Some(next))
    }
}

fn u32_property(property: PropertyId, value: &Value) -> Result<u32> {
    value
        .as_unsigned()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(EventError::InvalidProperty {
            property,
            reason: format!("expected an unsigned 32-bit value, got {}", value),
        })
}

fn bool_property(property: PropertyId, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(EventError::InvalidProperty {
            property,
            reason: format!("expected bool, got {}", other.type_name()),
        }),
    }
}

fn message_texts(value: &Value) -> Result<[Option<String>; 3]> {
    let invalid = |reason: String| EventError::InvalidProperty {
        property: PropertyId::EventMessageTexts,
        reason,
    };
    let Value::Array(items) = value else {
        return Err(invalid(format!("expected array, got {}", value.type_name())));
    };
    if items.len() != 3 {
        return Err(invalid(format!("expected 3 texts, got {}", items.len())));
    }
    let mut texts: [Option<String>; 3] = Default::default();
    for (slot, item) in texts.iter_mut().zip(items) {
        *slot = match item {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => return Err(invalid(format!("expected string, got {}", other.type_name()))),
        };
    }
    Ok(texts)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EventConfig {
        EventConfig::new(1, EventAlgorithm::out_of_range(100.0, 20.0, 5.0)).with_time_delay(60)
    }

    #[test]
    fn test_delay_for_normal_uses_distinct_value() {
        let cfg = config();
        assert_eq!(cfg.delay_for(EventState::Normal), Duration::from_secs(60));

        let cfg = cfg.with_time_delay_normal(10);
        assert_eq!(cfg.delay_for(EventState::Normal), Duration::from_secs(10));
        assert_eq!(cfg.delay_for(EventState::HighLimit), Duration::from_secs(60));
    }

    #[test]
    fn test_with_property() {
        let cfg = config();
        let next = cfg
            .with_property(PropertyId::TimeDelay, &Value::Unsigned(5))
            .unwrap()
            .unwrap();
        assert_eq!(next.time_delay, 5);
        // The original is untouched
        assert_eq!(cfg.time_delay, 60);

        let next = cfg
            .with_property(PropertyId::HighLimit, &Value::Float(90.0))
            .unwrap()
            .unwrap();
        assert_eq!(next.algorithm, EventAlgorithm::out_of_range(90.0, 20.0, 5.0));

        assert!(cfg.with_property(PropertyId::TimeDelay, &Value::Int(-1)).is_err());
        assert!(cfg.with_property(PropertyId::NotifyType, &Value::Enumerated(2)).is_err());
        assert!(cfg.with_property(PropertyId::LowLimit, &Value::Float(150.0)).is_err());
        assert!(cfg.with_property(PropertyId::PresentValue, &Value::Float(1.0)).unwrap().is_none());
    }

    #[test]
    fn test_message_texts_property() {
        let cfg = config();
        let texts = Value::Array(vec![Value::String("too hot".into()), Value::Null, Value::String("ok".into())]);
        let next = cfg.with_property(PropertyId::EventMessageTexts, &texts).unwrap().unwrap();
        assert_eq!(next.message_text(Transition::ToOffnormal).as_deref(), Some("too hot"));
        assert_eq!(next.message_text(Transition::ToFault), None);

        let short = Value::Array(vec![Value::Null]);
        assert!(cfg.with_property(PropertyId::EventMessageTexts, &short).is_err());
    }

    #[test]
    fn test_config_yaml_defaults() {
        let yaml = r#"
notification_class: 7
time_delay: 30
algorithm:
  type: change-of-state
  alarm_values:
    - type: enumerated
      value: 1
"#;
        let cfg: EventConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.notification_class, 7);
        assert_eq!(cfg.event_enable, TransitionBits::all());
        assert_eq!(cfg.fault_policy, FaultPolicy::Immediate);
        assert!(cfg.event_detection_enable);
        assert!(cfg.validate().is_ok());
    }
}
