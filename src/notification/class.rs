// src/notification/class.rs - Notification classes and recipient lists
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::{
    error::{EventError, Result},
    event::{Transition, TransitionBits},
    transport::Recipient,
};

// ============================================================================
// DESTINATION
// ============================================================================

/// Days and time of day during which a destination receives notifications
///
/// Times are compared against the clock in UTC. A window whose `to` is
/// earlier than its `from` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    /// Monday first
    #[serde(default = "all_days")]
    pub days: [bool; 7],
    #[serde(default = "start_of_day")]
    pub from: NaiveTime,
    #[serde(default = "end_of_day")]
    pub to: NaiveTime,
}

impl ActiveWindow {
    pub fn always() -> Self {
        Self {
            days: all_days(),
            from: start_of_day(),
            to: end_of_day(),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.weekday().num_days_from_monday() as usize;
        if !self.days[day] {
            return false;
        }
        let time = at.time();
        if self.from <= self.to {
            self.from <= time && time <= self.to
        } else {
            time >= self.from || time <= self.to
        }
    }
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self::always()
    }
}

/// One entry of a recipient list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Written as a single-key map, `device: {..}` or `address: {..}`
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub recipient: Recipient,
    pub process_id: u32,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub window: ActiveWindow,
    #[serde(default)]
    pub transitions: TransitionBits,
}

impl Destination {
    /// Unconfirmed, always active, all transitions
    pub fn new(recipient: Recipient, process_id: u32) -> Self {
        Self {
            recipient,
            process_id,
            confirmed: false,
            window: ActiveWindow::always(),
            transitions: TransitionBits::all(),
        }
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    pub fn with_window(mut self, window: ActiveWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_transitions(mut self, transitions: TransitionBits) -> Self {
        self.transitions = transitions;
        self
    }
}

// ============================================================================
// NOTIFICATION CLASS
// ============================================================================

/// Priorities, acknowledgment policy and recipients shared by many objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationClass {
    pub id: u32,
    /// Priority for to-offnormal, to-fault and to-normal
    #[serde(default = "default_priority")]
    pub priority: [u8; 3],
    #[serde(default = "TransitionBits::none")]
    pub ack_required: TransitionBits,
    #[serde(default)]
    pub recipients: Vec<Destination>,
}

impl NotificationClass {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            priority: default_priority(),
            ack_required: TransitionBits::none(),
            recipients: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: [u8; 3]) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ack_required(mut self, bits: TransitionBits) -> Self {
        self.ack_required = bits;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<Destination>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn priority_for(&self, transition: Transition) -> u8 {
        self.priority[transition.index()]
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Destinations of one class that receive a given transition right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub priority: u8,
    /// Accepting destinations, in list order
    pub destinations: Vec<Destination>,
    /// Destinations whose transition filter excludes the transition
    pub filtered: usize,
    /// Destinations outside their active window
    pub inactive: usize,
}

/// All notification classes of a device
///
/// Each list operation runs under one write lock and either applies fully or
/// leaves the list untouched, so readers never see a partial mutation.
#[derive(Debug, Default)]
pub struct NotificationClassRegistry {
    classes: RwLock<HashMap<u32, NotificationClass>>,
}

impl NotificationClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a whole class
    pub fn insert(&self, class: NotificationClass) {
        debug!("Registering notification class {} with {} recipients", class.id, class.recipients.len());
        self.classes.write().insert(class.id, class);
    }

    pub fn get(&self, id: u32) -> Option<NotificationClass> {
        self.classes.read().get(&id).cloned()
    }

    /// Current recipient list in insertion order
    pub fn recipients(&self, id: u32) -> Result<Vec<Destination>> {
        self.with_class(id, |class| class.recipients.clone())
    }

    pub fn replace_recipients(&self, id: u32, recipients: Vec<Destination>) -> Result<()> {
        self.with_class_mut(id, |class| {
            class.recipients = recipients;
            Ok(())
        })
    }

    /// Append entries; duplicates of existing entries are kept
    pub fn add_recipients(&self, id: u32, recipients: &[Destination]) -> Result<()> {
        self.with_class_mut(id, |class| {
            class.recipients.extend_from_slice(recipients);
            Ok(())
        })
    }

    /// Delete every entry equal to one of `recipients`
    ///
    /// Fails without changing the list if any of them is not present.
    pub fn remove_recipients(&self, id: u32, recipients: &[Destination]) -> Result<()> {
        self.with_class_mut(id, |class| {
            if let Some(missing) = recipients.iter().find(|r| !class.recipients.contains(r)) {
                return Err(EventError::ListElementNotFound(format!(
                    "{} (process {}) in notification class {}",
                    missing.recipient, missing.process_id, id
                )));
            }
            class.recipients.retain(|entry| !recipients.contains(entry));
            Ok(())
        })
    }

    pub fn priority_for(&self, id: u32, transition: Transition) -> Result<u8> {
        self.with_class(id, |class| class.priority_for(transition))
    }

    pub fn ack_required_for(&self, id: u32, transition: Transition) -> Result<bool> {
        self.with_class(id, |class| class.ack_required.contains(transition))
    }

    /// Priority for `transition` and the destinations that accept it at `at`,
    /// in list order
    pub fn resolve(&self, id: u32, transition: Transition, at: DateTime<Utc>) -> Result<Resolution> {
        self.with_class(id, |class| {
            let mut resolution = Resolution {
                priority: class.priority_for(transition),
                destinations: Vec::new(),
                filtered: 0,
                inactive: 0,
            };
            for destination in &class.recipients {
                if !destination.transitions.contains(transition) {
                    resolution.filtered += 1;
                } else if !destination.window.contains(at) {
                    resolution.inactive += 1;
                } else {
                    resolution.destinations.push(destination.clone());
                }
            }
            resolution
        })
    }

    fn with_class<T>(&self, id: u32, f: impl FnOnce(&NotificationClass) -> T) -> Result<T> {
        let classes = self.classes.read();
        let class = classes.get(&id).ok_or(EventError::NotificationClassNotFound(id))?;
        Ok(f(class))
    }

    fn with_class_mut<T>(&self, id: u32, f: impl FnOnce(&mut NotificationClass) -> Result<T>) -> Result<T> {
        let mut classes = self.classes.write();
        let class = classes.get_mut(&id).ok_or(EventError::NotificationClassNotFound(id))?;
        f(class)
    }
}

fn all_days() -> [bool; 7] {
    [true; 7]
}

fn start_of_day() -> NaiveTime {
    NaiveTime::default()
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or_default()
}

fn default_priority() -> [u8; 3] {
    [255; 3]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;
    use chrono::TimeZone;

    fn dest(instance: u32) -> Destination {
        Destination::new(Recipient::Device(ObjectId::device(instance)), instance)
    }

    fn registry() -> NotificationClassRegistry {
        let registry = NotificationClassRegistry::new();
        registry.insert(NotificationClass::new(1).with_priority([10, 20, 30]));
        registry
    }

    #[test]
    fn test_list_mutation_round_trip() {
        let registry = registry();
        let (a, b, c, d, e) = (dest(1), dest(2), dest(3), dest(4), dest(5));

        registry.add_recipients(1, &[a.clone(), b.clone(), c.clone()]).unwrap();
        registry.add_recipients(1, &[b.clone(), e.clone(), d.clone()]).unwrap();
        assert_eq!(registry.recipients(1).unwrap().len(), 6);

        registry.remove_recipients(1, &[b, e]).unwrap();
        assert_eq!(registry.recipients(1).unwrap(), vec![a, c, d]);
    }

    #[test]
    fn test_remove_missing_element_is_atomic() {
        let registry = registry();
        registry.replace_recipients(1, vec![dest(1), dest(2)]).unwrap();

        let err = registry.remove_recipients(1, &[dest(1), dest(9)]).unwrap_err();
        assert!(matches!(err, EventError::ListElementNotFound(_)));
        assert_eq!(registry.recipients(1).unwrap(), vec![dest(1), dest(2)]);
    }

    #[test]
    fn test_equality_covers_every_field() {
        let registry = registry();
        let plain = dest(1);
        let confirmed = dest(1).confirmed(true);
        registry.replace_recipients(1, vec![plain.clone(), confirmed.clone()]).unwrap();

        registry.remove_recipients(1, &[confirmed]).unwrap();
        assert_eq!(registry.recipients(1).unwrap(), vec![plain]);
    }

    #[test]
    fn test_unknown_class() {
        let registry = registry();
        assert!(matches!(registry.recipients(7), Err(EventError::NotificationClassNotFound(7))));
        assert!(registry.add_recipients(7, &[dest(1)]).is_err());
    }

    #[test]
    fn test_priority_and_resolve() {
        let registry = registry();
        let offnormal_only = TransitionBits { to_offnormal: true, to_fault: false, to_normal: false };
        registry
            .replace_recipients(1, vec![dest(1), dest(2).with_transitions(offnormal_only), dest(3)])
            .unwrap();

        assert_eq!(registry.priority_for(1, Transition::ToFault).unwrap(), 20);
        let now = Utc::now();
        let resolution = registry.resolve(1, Transition::ToNormal, now).unwrap();
        assert_eq!(resolution.priority, 30);
        assert_eq!(resolution.destinations, vec![dest(1), dest(3)]);
        assert_eq!((resolution.filtered, resolution.inactive), (1, 0));

        let resolution = registry.resolve(1, Transition::ToOffnormal, now).unwrap();
        assert_eq!(resolution.destinations, vec![dest(1), dest(2), dest(3)]);
        assert!(matches!(
            registry.resolve(9, Transition::ToOffnormal, now),
            Err(EventError::NotificationClassNotFound(9))
        ));
    }

    #[test]
    fn test_active_window() {
        // 2024-01-01 is a Monday
        let monday_noon = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let monday_night = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        let sunday_noon = Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap();

        let business = ActiveWindow {
            days: [true, true, true, true, true, false, false],
            from: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            to: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        };
        assert!(business.contains(monday_noon));
        assert!(!business.contains(monday_night));
        assert!(!business.contains(sunday_noon));

        let overnight = ActiveWindow {
            from: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            to: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            ..ActiveWindow::always()
        };
        assert!(overnight.contains(monday_night));
        assert!(!overnight.contains(monday_noon));

        assert!(ActiveWindow::always().contains(sunday_noon));
    }

    #[test]
    fn test_class_yaml() {
        let yaml = r#"
id: 3
priority: [1, 2, 3]
recipients:
  - recipient:
      device:
        type: device
        instance: 200
    process_id: 7
    confirmed: true
  - recipient:
      address:
        network: 5
        mac: [10, 0, 1, 255]
    process_id: 8
"#;
        let class: NotificationClass = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(class.ack_required, TransitionBits::none());
        assert_eq!(class.recipients[0].recipient, Recipient::Device(ObjectId::device(200)));
        assert_eq!(class.recipients[0].process_id, 7);
        assert!(class.recipients[0].window.contains(Utc::now()));
        assert_eq!(
            class.recipients[1].recipient,
            Recipient::Address(crate::transport::Address { network: 5, mac: vec![10, 0, 1, 255] })
        );

        let written = serde_yaml::to_string(&class).unwrap();
        assert!(written.contains("device:"));
        let reread: NotificationClass = serde_yaml::from_str(&written).unwrap();
        assert_eq!(reread, class);
    }
}
