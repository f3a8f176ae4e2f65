// src/object.rs - Object and property identifiers
use serde::{Deserialize, Serialize};
use std::fmt;

/// Object types that can take part in event reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
    Device,
    EventEnrollment,
    NotificationClass,
}

impl ObjectType {
    /// Protocol name of the object type
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::AnalogInput => "analog-input",
            ObjectType::AnalogOutput => "analog-output",
            ObjectType::AnalogValue => "analog-value",
            ObjectType::BinaryInput => "binary-input",
            ObjectType::BinaryOutput => "binary-output",
            ObjectType::BinaryValue => "binary-value",
            ObjectType::MultiStateInput => "multi-state-input",
            ObjectType::MultiStateOutput => "multi-state-output",
            ObjectType::MultiStateValue => "multi-state-value",
            ObjectType::Device => "device",
            ObjectType::EventEnrollment => "event-enrollment",
            ObjectType::NotificationClass => "notification-class",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object identifier: type plus instance number
///
/// ```rust
/// use bacnet_events::{ObjectId, ObjectType};
///
/// let ai = ObjectId::new(ObjectType::AnalogInput, 1);
/// assert_eq!(ai.to_string(), "analog-input,1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectId {
    pub const fn new(object_type: ObjectType, instance: u32) -> Self {
        Self { object_type, instance }
    }

    pub const fn device(instance: u32) -> Self {
        Self::new(ObjectType::Device, instance)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.object_type, self.instance)
    }
}

/// Property identifiers used by the event subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyId {
    PresentValue,
    StatusFlags,
    Reliability,
    OutOfService,
    EventState,
    EventEnable,
    AckedTransitions,
    NotifyType,
    EventTimeStamps,
    EventMessageTexts,
    EventDetectionEnable,
    EventAlgorithmInhibit,
    NotificationClass,
    TimeDelay,
    TimeDelayNormal,
    HighLimit,
    LowLimit,
    Deadband,
    LimitEnable,
    AlarmValues,
    FeedbackValue,
    ObjectPropertyReference,
    Priority,
    AckRequired,
    RecipientList,
}

impl PropertyId {
    /// Protocol name of the property
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyId::PresentValue => "present-value",
            PropertyId::StatusFlags => "status-flags",
            PropertyId::Reliability => "reliability",
            PropertyId::OutOfService => "out-of-service",
            PropertyId::EventState => "event-state",
            PropertyId::EventEnable => "event-enable",
            PropertyId::AckedTransitions => "acked-transitions",
            PropertyId::NotifyType => "notify-type",
            PropertyId::EventTimeStamps => "event-time-stamps",
            PropertyId::EventMessageTexts => "event-message-texts",
            PropertyId::EventDetectionEnable => "event-detection-enable",
            PropertyId::EventAlgorithmInhibit => "event-algorithm-inhibit",
            PropertyId::NotificationClass => "notification-class",
            PropertyId::TimeDelay => "time-delay",
            PropertyId::TimeDelayNormal => "time-delay-normal",
            PropertyId::HighLimit => "high-limit",
            PropertyId::LowLimit => "low-limit",
            PropertyId::Deadband => "deadband",
            PropertyId::LimitEnable => "limit-enable",
            PropertyId::AlarmValues => "alarm-values",
            PropertyId::FeedbackValue => "feedback-value",
            PropertyId::ObjectPropertyReference => "object-property-reference",
            PropertyId::Priority => "priority",
            PropertyId::AckRequired => "ack-required",
            PropertyId::RecipientList => "recipient-list",
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_display() {
        let mv = ObjectId::new(ObjectType::MultiStateValue, 12);
        assert_eq!(mv.to_string(), "multi-state-value,12");
        assert_eq!(ObjectId::device(1001).to_string(), "device,1001");
    }

    #[test]
    fn test_object_id_yaml() {
        let id: ObjectId = serde_yaml::from_str("type: analog-value\ninstance: 3\n").unwrap();
        assert_eq!(id, ObjectId::new(ObjectType::AnalogValue, 3));
    }
}
