//! Event detection for monitored objects
//!
//! This module holds the vocabulary shared by the event algorithms, the
//! per-object state machine and the enrollment poller:
//! - [`EventState`] and the [`Transition`] slot each state maps to
//! - [`TransitionBits`] used for event-enable, ack-required, acked-transitions
//!   and recipient filters
//! - [`StatusFlags`], [`Reliability`], [`NotifyType`] and [`EventType`]

use crate::{
    error::{EventError, Result},
    object::PropertyId,
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod algorithm;
pub mod config;
pub mod enrollment;
pub mod machine;

pub use algorithm::{
    ChangeOfReliability, ChangeOfState, CommandFailure, EventAlgorithm, Evaluation, LimitEnable, OutOfRange, Sample,
};
pub use config::{EventConfig, FaultPolicy};
pub use enrollment::{
    EnrollmentPoller, ObjectPropertyReference, PollOutcome, PollStats, PropertyReader, StoreReader,
};
pub use machine::{AckStatus, EventStateMachine, NotificationSink, TransitionRecord};

// ============================================================================
// EVENT STATE
// ============================================================================

/// Current alarm status of a monitored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventState {
    Normal,
    Fault,
    Offnormal,
    HighLimit,
    LowLimit,
}

impl EventState {
    /// Transition slot used to index per-transition metadata
    pub fn transition(&self) -> Transition {
        match self {
            EventState::Normal => Transition::ToNormal,
            EventState::Fault => Transition::ToFault,
            EventState::Offnormal | EventState::HighLimit | EventState::LowLimit => {
                Transition::ToOffnormal
            }
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, EventState::Normal)
    }

    /// Protocol enumeration value
    pub fn code(&self) -> u32 {
        match self {
            EventState::Normal => 0,
            EventState::Fault => 1,
            EventState::Offnormal => 2,
            EventState::HighLimit => 3,
            EventState::LowLimit => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Normal => "normal",
            EventState::Fault => "fault",
            EventState::Offnormal => "offnormal",
            EventState::HighLimit => "high-limit",
            EventState::LowLimit => "low-limit",
        }
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition direction; its discriminant is the slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
    ToOffnormal = 0,
    ToFault = 1,
    ToNormal = 2,
}

impl Transition {
    pub const ALL: [Transition; 3] = [Transition::ToOffnormal, Transition::ToFault, Transition::ToNormal];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::ToOffnormal => "to-offnormal",
            Transition::ToFault => "to-fault",
            Transition::ToNormal => "to-normal",
        })
    }
}

// ============================================================================
// BIT SETS
// ============================================================================

/// One flag per transition direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionBits {
    #[serde(default)]
    pub to_offnormal: bool,
    #[serde(default)]
    pub to_fault: bool,
    #[serde(default)]
    pub to_normal: bool,
}

impl TransitionBits {
    pub const fn all() -> Self {
        Self { to_offnormal: true, to_fault: true, to_normal: true }
    }

    pub const fn none() -> Self {
        Self { to_offnormal: false, to_fault: false, to_normal: false }
    }

    pub fn contains(&self, transition: Transition) -> bool {
        match transition {
            Transition::ToOffnormal => self.to_offnormal,
            Transition::ToFault => self.to_fault,
            Transition::ToNormal => self.to_normal,
        }
    }

    pub fn set(&mut self, transition: Transition, on: bool) {
        match transition {
            Transition::ToOffnormal => self.to_offnormal = on,
            Transition::ToFault => self.to_fault = on,
            Transition::ToNormal => self.to_normal = on,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::BitString(vec![self.to_offnormal, self.to_fault, self.to_normal])
    }

    /// Parse a three-bit string written to `property`
    pub fn from_value(property: PropertyId, value: &Value) -> Result<Self> {
        match value.as_bit_string() {
            Some([to_offnormal, to_fault, to_normal]) => Ok(Self {
                to_offnormal: *to_offnormal,
                to_fault: *to_fault,
                to_normal: *to_normal,
            }),
            Some(bits) => Err(EventError::InvalidProperty {
                property,
                reason: format!("expected 3 bits, got {}", bits.len()),
            }),
            None => Err(EventError::InvalidProperty {
                property,
                reason: format!("expected bit-string, got {}", value.type_name()),
            }),
        }
    }
}

impl Default for TransitionBits {
    fn default() -> Self {
        Self::all()
    }
}

/// Status flags published on every monitored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusFlags {
    pub in_alarm: bool,
    pub fault: bool,
    pub overridden: bool,
    pub out_of_service: bool,
}

impl StatusFlags {
    pub fn to_value(&self) -> Value {
        Value::BitString(vec![self.in_alarm, self.fault, self.overridden, self.out_of_service])
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_bit_string()? {
            [in_alarm, fault, overridden, out_of_service] => Some(Self {
                in_alarm: *in_alarm,
                fault: *fault,
                overridden: *overridden,
                out_of_service: *out_of_service,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// ENUMERATIONS
// ============================================================================

/// Reliability of a monitored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reliability {
    NoFaultDetected,
    NoSensor,
    OverRange,
    UnderRange,
    OpenLoop,
    ShortedLoop,
    NoOutput,
    UnreliableOther,
    ProcessError,
    MultiStateFault,
    ConfigurationError,
    CommunicationFailure,
    MemberFault,
    MonitoredObjectFault,
}

impl Reliability {
    const TABLE: [(Reliability, u32); 14] = [
        (Reliability::NoFaultDetected, 0),
        (Reliability::NoSensor, 1),
        (Reliability::OverRange, 2),
        (Reliability::UnderRange, 3),
        (Reliability::OpenLoop, 4),
        (Reliability::ShortedLoop, 5),
        (Reliability::NoOutput, 6),
        (Reliability::UnreliableOther, 7),
        (Reliability::ProcessError, 8),
        (Reliability::MultiStateFault, 9),
        (Reliability::ConfigurationError, 10),
        (Reliability::CommunicationFailure, 12),
        (Reliability::MemberFault, 13),
        (Reliability::MonitoredObjectFault, 14),
    ];

    pub fn code(&self) -> u32 {
        Self::TABLE
            .iter()
            .find(|(r, _)| r == self)
            .map(|(_, code)| *code)
            .unwrap_or(7)
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::TABLE.iter().find(|(_, c)| *c == code).map(|(r, _)| *r)
    }

    /// Read a reliability from a stored property value; unknown codes are
    /// reported as `unreliable-other`
    pub fn from_value(value: &Value) -> Self {
        value
            .as_unsigned()
            .and_then(|code| u32::try_from(code).ok())
            .map(|code| Self::from_code(code).unwrap_or(Reliability::UnreliableOther))
            .unwrap_or(Reliability::UnreliableOther)
    }

    pub fn to_value(&self) -> Value {
        Value::Enumerated(self.code())
    }

    pub fn is_fault(&self) -> bool {
        !matches!(self, Reliability::NoFaultDetected)
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::NoFaultDetected
    }
}

/// Whether transitions are reported as alarms or events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyType {
    Alarm,
    Event,
    AckNotification,
}

impl NotifyType {
    pub fn code(&self) -> u32 {
        match self {
            NotifyType::Alarm => 0,
            NotifyType::Event => 1,
            NotifyType::AckNotification => 2,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        match value.as_unsigned() {
            Some(0) => Ok(NotifyType::Alarm),
            Some(1) => Ok(NotifyType::Event),
            _ => Err(EventError::InvalidProperty {
                property: PropertyId::NotifyType,
                reason: format!("expected alarm (0) or event (1), got {}", value),
            }),
        }
    }
}

impl Default for NotifyType {
    fn default() -> Self {
        NotifyType::Alarm
    }
}

/// Detection type carried in every notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ChangeOfState,
    CommandFailure,
    OutOfRange,
    ChangeOfReliability,
}

impl EventType {
    pub fn code(&self) -> u32 {
        match self {
            EventType::ChangeOfState => 1,
            EventType::CommandFailure => 3,
            EventType::OutOfRange => 5,
            EventType::ChangeOfReliability => 22,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventType::ChangeOfState => "change-of-state",
            EventType::CommandFailure => "command-failure",
            EventType::OutOfRange => "out-of-range",
            EventType::ChangeOfReliability => "change-of-reliability",
        })
    }
}
