//! Notification requests and their distribution
//!
//! A committed transition produces one [`NotificationRequest`]. The
//! [`dispatcher`] resolves it against a notification class from the
//! [`class`] registry and hands one [`EventNotification`] per matching
//! destination to the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    event::{EventState, EventType, NotifyType, Reliability, StatusFlags, Transition},
    object::ObjectId,
    value::Value,
};

pub mod class;
pub mod dispatcher;

pub use class::{ActiveWindow, Destination, NotificationClass, NotificationClassRegistry, Resolution};
pub use dispatcher::{DispatchSummary, NotificationDispatcher};

/// Event values carried with a notification, one shape per event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NotificationParameters {
    OutOfRange {
        exceeding_value: f64,
        status_flags: StatusFlags,
        deadband: f64,
        exceeded_limit: f64,
    },
    CommandFailure {
        command_value: Value,
        status_flags: StatusFlags,
        feedback_value: Value,
    },
    ChangeOfState {
        new_state: Value,
        status_flags: StatusFlags,
    },
    ChangeOfReliability {
        reliability: Reliability,
        status_flags: StatusFlags,
    },
}

/// Snapshot of one committed transition (or acknowledgment)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub source: ObjectId,
    pub initiating_device: ObjectId,
    pub notification_class: u32,
    pub event_type: EventType,
    pub notify_type: NotifyType,
    pub from_state: EventState,
    pub to_state: EventState,
    pub time_stamp: DateTime<Utc>,
    pub ack_required: bool,
    pub message_text: Option<String>,
    /// Absent on acknowledgment notifications
    pub parameters: Option<NotificationParameters>,
}

impl NotificationRequest {
    /// Direction used for priority lookup and recipient filtering
    pub fn transition(&self) -> Transition {
        self.to_state.transition()
    }

    pub fn is_ack(&self) -> bool {
        self.notify_type == NotifyType::AckNotification
    }
}

/// Per-recipient notification payload handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    pub process_id: u32,
    pub initiating_device: ObjectId,
    pub event_object: ObjectId,
    pub time_stamp: DateTime<Utc>,
    pub notification_class: u32,
    pub priority: u8,
    pub event_type: EventType,
    pub message_text: Option<String>,
    pub notify_type: NotifyType,
    pub ack_required: bool,
    pub from_state: EventState,
    pub to_state: EventState,
    pub parameters: Option<NotificationParameters>,
}

impl EventNotification {
    pub fn new(request: &NotificationRequest, process_id: u32, priority: u8) -> Self {
        Self {
            process_id,
            initiating_device: request.initiating_device,
            event_object: request.source,
            time_stamp: request.time_stamp,
            notification_class: request.notification_class,
            priority,
            event_type: request.event_type,
            message_text: request.message_text.clone(),
            notify_type: request.notify_type,
            ack_required: request.ack_required,
            from_state: request.from_state,
            to_state: request.to_state,
            parameters: request.parameters.clone(),
        }
    }
}
