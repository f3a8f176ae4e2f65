// src/event/algorithm.rs - Pure event algorithms
//
// An algorithm maps (sample, current state) to a proposal. It owns no timers
// and no history; debouncing lives in the state machine.

use serde::{Deserialize, Serialize};

use super::{machine::PUBLISHED_PROPERTIES, EventState, EventType, Reliability, StatusFlags};
use crate::{
    error::{EventError, Result},
    notification::NotificationParameters,
    object::PropertyId,
    value::Value,
};

/// Monitored inputs captured at one trigger
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Monitored value (present value, or the commanded value for command failure)
    pub value: Value,
    /// Reliability of the monitored value
    pub reliability: Reliability,
    /// Feedback value for command failure
    pub feedback: Option<Value>,
    /// Status flags of the monitored object at sampling time
    pub status_flags: StatusFlags,
}

impl Sample {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            reliability: Reliability::NoFaultDetected,
            feedback: None,
            status_flags: StatusFlags::default(),
        }
    }

    /// A sample that could not be read; the reliability carries the cause
    pub fn unreliable(reliability: Reliability) -> Self {
        Self {
            value: Value::Null,
            reliability,
            feedback: None,
            status_flags: StatusFlags { fault: true, ..StatusFlags::default() },
        }
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_feedback(mut self, feedback: Value) -> Self {
        self.feedback = Some(feedback);
        self
    }
}

/// Result of one algorithm evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The current state stands
    Stay,
    /// Move to `state`; `forced` transitions skip the time delay
    Propose { state: EventState, forced: bool },
}

impl Evaluation {
    fn to(state: EventState) -> Self {
        Evaluation::Propose { state, forced: false }
    }

    /// State this evaluation asks for, given the current one
    pub fn target(&self, current: EventState) -> EventState {
        match self {
            Evaluation::Stay => current,
            Evaluation::Propose { state, .. } => *state,
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, Evaluation::Propose { forced: true, .. })
    }
}

/// Per-direction enables for range checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitEnable {
    #[serde(default = "default_true")]
    pub low: bool,
    #[serde(default = "default_true")]
    pub high: bool,
}

impl LimitEnable {
    pub fn to_value(&self) -> Value {
        Value::BitString(vec![self.low, self.high])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        match value.as_bit_string() {
            Some([low, high]) => Ok(Self { low: *low, high: *high }),
            _ => Err(EventError::InvalidProperty {
                property: PropertyId::LimitEnable,
                reason: format!("expected 2-bit string, got {}", value),
            }),
        }
    }
}

impl Default for LimitEnable {
    fn default() -> Self {
        Self { low: true, high: true }
    }
}

/// Parameters of the out-of-range algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfRange {
    pub high_limit: f64,
    pub low_limit: f64,
    #[serde(default)]
    pub deadband: f64,
    #[serde(default)]
    pub limit_enable: LimitEnable,
}

/// Parameters of the command-failure algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFailure {
    /// Property on the monitored object holding the feedback value
    #[serde(default = "default_feedback_property")]
    pub feedback_property: PropertyId,
}

/// Parameters of the change-of-state algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOfState {
    pub alarm_values: Vec<Value>,
}

/// Parameters of the change-of-reliability algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOfReliability {
    #[serde(default = "default_normal_reliabilities")]
    pub normal: Vec<Reliability>,
}

/// Closed set of detection algorithms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventAlgorithm {
    OutOfRange(OutOfRange),
    CommandFailure(CommandFailure),
    ChangeOfState(ChangeOfState),
    ChangeOfReliability(ChangeOfReliability),
}

impl EventAlgorithm {
    pub fn out_of_range(high_limit: f64, low_limit: f64, deadband: f64) -> Self {
        EventAlgorithm::OutOfRange(OutOfRange {
            high_limit,
            low_limit,
            deadband,
            limit_enable: LimitEnable::default(),
        })
    }

    pub fn command_failure() -> Self {
        EventAlgorithm::CommandFailure(CommandFailure { feedback_property: default_feedback_property() })
    }

    pub fn change_of_state(alarm_values: Vec<Value>) -> Self {
        EventAlgorithm::ChangeOfState(ChangeOfState { alarm_values })
    }

    pub fn change_of_reliability() -> Self {
        EventAlgorithm::ChangeOfReliability(ChangeOfReliability { normal: default_normal_reliabilities() })
    }

    pub fn is_command_failure(&self) -> bool {
        matches!(self, EventAlgorithm::CommandFailure(_))
    }

    /// Event type reported for non-fault transitions
    pub fn event_type(&self) -> EventType {
        match self {
            EventAlgorithm::OutOfRange(_) => EventType::OutOfRange,
            EventAlgorithm::CommandFailure(_) => EventType::CommandFailure,
            EventAlgorithm::ChangeOfState(_) => EventType::ChangeOfState,
            EventAlgorithm::ChangeOfReliability(_) => EventType::ChangeOfReliability,
        }
    }

    /// Propose the next state for `sample` while in `current`
    ///
    /// A faulty reliability proposes `fault` ahead of any algorithm output.
    /// Once reliability recovers, an object in `fault` is proposed back to
    /// `normal` before range or state checks resume.
    pub fn evaluate(&self, sample: &Sample, current: EventState) -> Evaluation {
        match self.propose(sample, current) {
            Evaluation::Propose { state, .. } if state == current => Evaluation::Stay,
            other => other,
        }
    }

    fn propose(&self, sample: &Sample, current: EventState) -> Evaluation {
        if let EventAlgorithm::ChangeOfReliability(params) = self {
            return params.evaluate(sample);
        }
        if sample.reliability.is_fault() {
            return Evaluation::to(EventState::Fault);
        }
        if current == EventState::Fault {
            // Leave fault only when the value itself is usable again
            return match self.check(sample, EventState::Normal) {
                Evaluation::Propose { state: EventState::Fault, .. } => Evaluation::to(EventState::Fault),
                _ => Evaluation::to(EventState::Normal),
            };
        }
        self.check(sample, current)
    }

    fn check(&self, sample: &Sample, current: EventState) -> Evaluation {
        match self {
            EventAlgorithm::OutOfRange(params) => params.evaluate(sample, current),
            EventAlgorithm::CommandFailure(_) => evaluate_command_failure(sample),
            EventAlgorithm::ChangeOfState(params) => params.evaluate(sample),
            EventAlgorithm::ChangeOfReliability(_) => Evaluation::Stay,
        }
    }

    /// Reject parameter combinations that cannot be evaluated
    pub fn validate(&self) -> Result<()> {
        match self {
            EventAlgorithm::OutOfRange(p) => {
                for (property, v) in [
                    (PropertyId::HighLimit, p.high_limit),
                    (PropertyId::LowLimit, p.low_limit),
                    (PropertyId::Deadband, p.deadband),
                ] {
                    if !v.is_finite() {
                        return Err(EventError::InvalidProperty { property, reason: format!("{} is not finite", v) });
                    }
                }
                if p.deadband < 0.0 {
                    return Err(EventError::InvalidProperty {
                        property: PropertyId::Deadband,
                        reason: format!("deadband {} is negative", p.deadband),
                    });
                }
                if p.limit_enable.low && p.limit_enable.high && p.low_limit > p.high_limit {
                    return Err(EventError::Config(format!(
                        "low limit {} exceeds high limit {}",
                        p.low_limit, p.high_limit
                    )));
                }
                Ok(())
            }
            EventAlgorithm::CommandFailure(p) => {
                let property = p.feedback_property;
                if property == PropertyId::PresentValue || PUBLISHED_PROPERTIES.contains(&property) {
                    return Err(EventError::InvalidProperty {
                        property,
                        reason: "cannot serve as the feedback property".into(),
                    });
                }
                Ok(())
            }
            EventAlgorithm::ChangeOfState(p) => {
                if p.alarm_values.is_empty() {
                    return Err(EventError::InvalidProperty {
                        property: PropertyId::AlarmValues,
                        reason: "at least one alarm value is required".into(),
                    });
                }
                Ok(())
            }
            EventAlgorithm::ChangeOfReliability(p) => {
                if p.normal.is_empty() {
                    return Err(EventError::Config("change-of-reliability needs a non-empty normal set".into()));
                }
                Ok(())
            }
        }
    }

    /// Algorithm parameters exposed as properties
    pub fn properties(&self) -> Vec<(PropertyId, Value)> {
        match self {
            EventAlgorithm::OutOfRange(p) => vec![
                (PropertyId::HighLimit, Value::Float(p.high_limit)),
                (PropertyId::LowLimit, Value::Float(p.low_limit)),
                (PropertyId::Deadband, Value::Float(p.deadband)),
                (PropertyId::LimitEnable, p.limit_enable.to_value()),
            ],
            EventAlgorithm::ChangeOfState(p) => {
                vec![(PropertyId::AlarmValues, Value::Array(p.alarm_values.clone()))]
            }
            EventAlgorithm::CommandFailure(_) | EventAlgorithm::ChangeOfReliability(_) => Vec::new(),
        }
    }

    /// Copy of the algorithm with `property` replaced; `Ok(None)` when the
    /// property is not one of its parameters
    pub fn with_property(&self, property: PropertyId, value: &Value) -> Result<Option<Self>> {
        let mut next = self.clone();
        let handled = match (&mut next, property) {
            (EventAlgorithm::OutOfRange(p), PropertyId::HighLimit) => {
                p.high_limit = float_property(property, value)?;
                true
            }
            (EventAlgorithm::OutOfRange(p), PropertyId::LowLimit) => {
                p.low_limit = float_property(property, value)?;
                true
            }
            (EventAlgorithm::OutOfRange(p), PropertyId::Deadband) => {
                p.deadband = float_property(property, value)?;
                true
            }
            (EventAlgorithm::OutOfRange(p), PropertyId::LimitEnable) => {
                p.limit_enable = LimitEnable::from_value(value)?;
                true
            }
            (EventAlgorithm::ChangeOfState(p), PropertyId::AlarmValues) => {
                p.alarm_values = match value {
                    Value::Array(items) => items.clone(),
                    single => vec![single.clone()],
                };
                true
            }
            _ => false,
        };
        if !handled {
            return Ok(None);
        }
        next.validate()?;
        Ok(Some(next))
    }

    /// Algorithm-specific payload for a committed transition
    pub fn parameters(&self, sample: &Sample, from: EventState, to: EventState) -> NotificationParameters {
        if from == EventState::Fault || to == EventState::Fault {
            return NotificationParameters::ChangeOfReliability {
                reliability: sample.reliability,
                status_flags: sample.status_flags,
            };
        }
        match self {
            EventAlgorithm::OutOfRange(p) => {
                let exceeded_limit = match (from, to) {
                    (_, EventState::LowLimit) | (EventState::LowLimit, _) => p.low_limit,
                    _ => p.high_limit,
                };
                NotificationParameters::OutOfRange {
                    exceeding_value: sample.value.as_float().unwrap_or(f64::NAN),
                    status_flags: sample.status_flags,
                    deadband: p.deadband,
                    exceeded_limit,
                }
            }
            EventAlgorithm::CommandFailure(_) => NotificationParameters::CommandFailure {
                command_value: sample.value.clone(),
                status_flags: sample.status_flags,
                feedback_value: sample.feedback.clone().unwrap_or(Value::Null),
            },
            EventAlgorithm::ChangeOfState(_) => NotificationParameters::ChangeOfState {
                new_state: sample.value.clone(),
                status_flags: sample.status_flags,
            },
            EventAlgorithm::ChangeOfReliability(_) => NotificationParameters::ChangeOfReliability {
                reliability: sample.reliability,
                status_flags: sample.status_flags,
            },
        }
    }
}

impl OutOfRange {
    fn evaluate(&self, sample: &Sample, current: EventState) -> Evaluation {
        let Some(value) = sample.value.as_float().filter(|v| !v.is_nan()) else {
            return Evaluation::to(EventState::Fault);
        };
        let enable = self.limit_enable;
        let above = enable.high && value > self.high_limit;
        let below = enable.low && value < self.low_limit;

        match current {
            EventState::HighLimit => {
                if !enable.high {
                    Evaluation::Propose { state: EventState::Normal, forced: true }
                } else if below {
                    Evaluation::to(EventState::LowLimit)
                } else if value <= self.high_limit - self.deadband {
                    Evaluation::to(EventState::Normal)
                } else {
                    Evaluation::Stay
                }
            }
            EventState::LowLimit => {
                if !enable.low {
                    Evaluation::Propose { state: EventState::Normal, forced: true }
                } else if above {
                    Evaluation::to(EventState::HighLimit)
                } else if value >= self.low_limit + self.deadband {
                    Evaluation::to(EventState::Normal)
                } else {
                    Evaluation::Stay
                }
            }
            _ if above => Evaluation::to(EventState::HighLimit),
            _ if below => Evaluation::to(EventState::LowLimit),
            _ => Evaluation::to(EventState::Normal),
        }
    }
}

fn evaluate_command_failure(sample: &Sample) -> Evaluation {
    match &sample.feedback {
        None => Evaluation::to(EventState::Fault),
        Some(feedback) if feedback.loosely_equals(&sample.value) => Evaluation::to(EventState::Normal),
        Some(_) => Evaluation::to(EventState::Offnormal),
    }
}

impl ChangeOfState {
    fn evaluate(&self, sample: &Sample) -> Evaluation {
        if self.alarm_values.iter().any(|alarm| alarm.loosely_equals(&sample.value)) {
            Evaluation::to(EventState::Offnormal)
        } else {
            Evaluation::to(EventState::Normal)
        }
    }
}

impl ChangeOfReliability {
    fn evaluate(&self, sample: &Sample) -> Evaluation {
        if self.normal.contains(&sample.reliability) {
            Evaluation::to(EventState::Normal)
        } else {
            Evaluation::to(EventState::Fault)
        }
    }
}

fn float_property(property: PropertyId, value: &Value) -> Result<f64> {
    value.as_float().ok_or(EventError::InvalidProperty {
        property,
        reason: format!("expected a number, got {}", value.type_name()),
    })
}

fn default_true() -> bool { true }
fn default_feedback_property() -> PropertyId { PropertyId::FeedbackValue }
fn default_normal_reliabilities() -> Vec<Reliability> { vec![Reliability::NoFaultDetected] }

#[cfg(test)]
mod tests {
    use super::*;

    fn analog(high: f64, low: f64, deadband: f64) -> EventAlgorithm {
        EventAlgorithm::out_of_range(high, low, deadband)
    }

    fn propose(state: EventState) -> Evaluation {
        Evaluation::Propose { state, forced: false }
    }

    #[test]
    fn test_out_of_range_limits() {
        let alg = analog(100.0, 20.0, 5.0);
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(50.0)), EventState::Normal), Evaluation::Stay);
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(101.0)), EventState::Normal), propose(EventState::HighLimit));
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(19.0)), EventState::Normal), propose(EventState::LowLimit));
        // Exactly at the limit is not beyond it
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(100.0)), EventState::Normal), Evaluation::Stay);
    }

    #[test]
    fn test_out_of_range_deadband() {
        let alg = analog(100.0, 20.0, 5.0);
        let high = EventState::HighLimit;
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(97.0)), high), Evaluation::Stay);
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(95.0)), high), propose(EventState::Normal));
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(10.0)), high), propose(EventState::LowLimit));

        let low = EventState::LowLimit;
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(24.0)), low), Evaluation::Stay);
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(25.0)), low), propose(EventState::Normal));
    }

    #[test]
    fn test_disabled_limit_forces_normal() {
        let mut alg = analog(100.0, 20.0, 5.0);
        if let EventAlgorithm::OutOfRange(p) = &mut alg {
            p.limit_enable.high = false;
        }
        let result = alg.evaluate(&Sample::new(Value::Float(150.0)), EventState::HighLimit);
        assert_eq!(result, Evaluation::Propose { state: EventState::Normal, forced: true });
        assert_eq!(alg.evaluate(&Sample::new(Value::Float(150.0)), EventState::Normal), Evaluation::Stay);
    }

    #[test]
    fn test_reliability_overrides_algorithm() {
        let alg = analog(100.0, 20.0, 5.0);
        let faulty = Sample::new(Value::Float(150.0)).with_reliability(Reliability::OverRange);
        assert_eq!(alg.evaluate(&faulty, EventState::HighLimit), propose(EventState::Fault));
        assert_eq!(alg.evaluate(&faulty, EventState::Fault), Evaluation::Stay);

        // Recovery goes through normal first
        let healthy = Sample::new(Value::Float(150.0));
        assert_eq!(alg.evaluate(&healthy, EventState::Fault), propose(EventState::Normal));

        // An unusable value keeps the fault even with good reliability
        assert_eq!(alg.evaluate(&Sample::new(Value::Null), EventState::Fault), Evaluation::Stay);

        let cor = EventAlgorithm::change_of_reliability();
        let broken = Sample::new(Value::Null).with_reliability(Reliability::NoSensor);
        assert_eq!(cor.evaluate(&broken, EventState::Fault), Evaluation::Stay);
    }

    #[test]
    fn test_non_numeric_value_is_fault() {
        let alg = analog(100.0, 20.0, 5.0);
        assert_eq!(alg.evaluate(&Sample::new(Value::Null), EventState::Normal), propose(EventState::Fault));
    }

    #[test]
    fn test_command_failure_uses_loose_comparison() {
        let alg = EventAlgorithm::command_failure();
        let matched = Sample::new(Value::Enumerated(1)).with_feedback(Value::Bool(true));
        let mismatched = Sample::new(Value::Enumerated(1)).with_feedback(Value::Bool(false));
        assert_eq!(alg.evaluate(&matched, EventState::Normal), Evaluation::Stay);
        assert_eq!(alg.evaluate(&mismatched, EventState::Normal), propose(EventState::Offnormal));
        assert_eq!(alg.evaluate(&matched, EventState::Offnormal), propose(EventState::Normal));
        assert_eq!(alg.evaluate(&Sample::new(Value::Int(1)), EventState::Normal), propose(EventState::Fault));
    }

    #[test]
    fn test_feedback_property_must_be_independent() {
        assert!(EventAlgorithm::command_failure().validate().is_ok());
        for property in [PropertyId::StatusFlags, PropertyId::EventState, PropertyId::PresentValue] {
            let alg = EventAlgorithm::CommandFailure(CommandFailure { feedback_property: property });
            assert!(matches!(
                alg.validate(),
                Err(EventError::InvalidProperty { property: p, .. }) if p == property
            ));
        }
    }

    #[test]
    fn test_change_of_state() {
        let alg = EventAlgorithm::change_of_state(vec![Value::Unsigned(3), Value::Unsigned(4)]);
        assert_eq!(alg.evaluate(&Sample::new(Value::Unsigned(4)), EventState::Normal), propose(EventState::Offnormal));
        assert_eq!(alg.evaluate(&Sample::new(Value::Unsigned(1)), EventState::Normal), Evaluation::Stay);
        assert!(EventAlgorithm::change_of_state(Vec::new()).validate().is_err());
    }

    #[test]
    fn test_change_of_reliability_normal_set() {
        let alg = EventAlgorithm::ChangeOfReliability(ChangeOfReliability {
            normal: vec![Reliability::NoFaultDetected, Reliability::UnreliableOther],
        });
        let other = Sample::new(Value::Null).with_reliability(Reliability::UnreliableOther);
        let broken = Sample::new(Value::Null).with_reliability(Reliability::NoSensor);
        assert_eq!(alg.evaluate(&other, EventState::Normal), Evaluation::Stay);
        assert_eq!(alg.evaluate(&broken, EventState::Normal), propose(EventState::Fault));
        assert_eq!(alg.evaluate(&other, EventState::Fault), propose(EventState::Normal));
    }

    #[test]
    fn test_validation_and_property_updates() {
        assert!(analog(10.0, 20.0, 1.0).validate().is_err());
        assert!(analog(100.0, 20.0, -1.0).validate().is_err());
        assert!(analog(f64::NAN, 20.0, 1.0).validate().is_err());

        let alg = analog(100.0, 20.0, 5.0);
        let updated = alg
            .with_property(PropertyId::HighLimit, &Value::Float(120.0))
            .unwrap()
            .unwrap();
        assert_eq!(updated.properties()[0], (PropertyId::HighLimit, Value::Float(120.0)));
        assert!(alg.with_property(PropertyId::Deadband, &Value::Float(-3.0)).is_err());
        assert!(alg.with_property(PropertyId::AlarmValues, &Value::Int(1)).unwrap().is_none());
    }

    #[test]
    fn test_algorithm_yaml() {
        let yaml = "type: out-of-range\nhigh_limit: 100.0\nlow_limit: 20.0\ndeadband: 5.0\n";
        let alg: EventAlgorithm = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(alg, analog(100.0, 20.0, 5.0));
    }
}
