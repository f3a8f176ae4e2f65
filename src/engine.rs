// src/engine.rs - Wiring of the event subsystem for one device
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    clock::Clock,
    config::Config,
    error::{EventError, Result},
    event::{
        EnrollmentPoller, EventAlgorithm, EventState, EventStateMachine, NotificationSink, NotifyType,
        PropertyReader, Reliability, StatusFlags, StoreReader, Transition, TransitionBits,
    },
    notification::{NotificationClassRegistry, NotificationDispatcher},
    object::{ObjectId, PropertyId},
    property::PropertyStore,
    transport::Transport,
    value::Value,
};

/// One entry of the device's event information summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventInformation {
    pub object: ObjectId,
    pub event_state: EventState,
    pub acked_transitions: TransitionBits,
    pub time_stamps: [Option<DateTime<Utc>>; 3],
    pub notify_type: NotifyType,
    pub event_enable: TransitionBits,
    pub priorities: [u8; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub objects: usize,
    pub enrollments: usize,
    pub in_alarm: usize,
    pub notifications_sent: u64,
    pub notification_failures: u64,
}

/// Event detection and notification for every configured object of a device
pub struct EventEngine {
    device: ObjectId,
    store: PropertyStore,
    clock: Arc<dyn Clock>,
    registry: Arc<NotificationClassRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    machines: BTreeMap<ObjectId, Arc<EventStateMachine>>,
    enrollments: usize,
    poller: Arc<EnrollmentPoller>,
    running: AtomicBool,
}

impl EventEngine {
    /// Build the engine; enrollments read from the local property store
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: Config, clock: Arc<dyn Clock>, transport: Arc<dyn Transport>) -> Result<Self> {
        let store = PropertyStore::new();
        let reader = Arc::new(StoreReader::new(store.clone()));
        Self::with_reader(config, store, clock, transport, reader)
    }

    /// Build the engine on an existing store with a custom enrollment reader
    pub fn with_reader(
        config: Config,
        store: PropertyStore,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        reader: Arc<dyn PropertyReader>,
    ) -> Result<Self> {
        config.validate()?;
        let device = config.device_id();

        let registry = Arc::new(NotificationClassRegistry::new());
        for class in &config.notification_classes {
            registry.insert(class.clone());
        }
        let dispatcher = Arc::new(NotificationDispatcher::new(registry.clone(), transport, clock.clone())?);
        let sink: Arc<dyn NotificationSink> = dispatcher.clone();

        let poller = EnrollmentPoller::new(
            clock.clone(),
            reader,
            store.clone(),
            config.engine.poll_interval(),
            config.engine.read_timeout(),
        )?;

        let mut machines = BTreeMap::new();
        for object in &config.objects {
            let id = object.object;
            store.initialize(id, PropertyId::PresentValue, object.present_value.clone());
            store.initialize(id, PropertyId::Reliability, Reliability::NoFaultDetected.to_value());
            store.initialize(id, PropertyId::StatusFlags, StatusFlags::default().to_value());
            store.initialize(id, PropertyId::OutOfService, Value::Bool(false));
            if let Some(feedback) = &object.feedback_value {
                let property = match &object.event.algorithm {
                    EventAlgorithm::CommandFailure(p) => p.feedback_property,
                    _ => PropertyId::FeedbackValue,
                };
                store.initialize(id, property, feedback.clone());
            }

            let machine = EventStateMachine::intrinsic(
                id,
                device,
                object.event.clone(),
                store.clone(),
                clock.clone(),
                sink.clone(),
            )?;
            machine.attach()?;
            machines.insert(id, machine);
        }

        for enrollment in &config.enrollments {
            let id = enrollment.object;
            store.initialize(id, PropertyId::Reliability, Reliability::NoFaultDetected.to_value());
            store.initialize(id, PropertyId::StatusFlags, StatusFlags::default().to_value());

            let machine = EventStateMachine::enrollment(
                id,
                device,
                enrollment.event.clone(),
                store.clone(),
                clock.clone(),
                sink.clone(),
            )?;
            machine.attach()?;
            poller.add(id, enrollment.reference.clone(), enrollment.feedback.clone(), machine.clone());
            machines.insert(id, machine);
        }

        info!(
            "Event engine for {} ({}): {} objects, {} enrollments, {} notification classes",
            device,
            config.device.name,
            config.objects.len(),
            config.enrollments.len(),
            config.notification_classes.len()
        );

        Ok(Self {
            device,
            store,
            clock,
            registry,
            dispatcher,
            machines,
            enrollments: config.enrollments.len(),
            poller,
            running: AtomicBool::new(false),
        })
    }

    /// Activate reporting on every object and start enrollment polling
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        for machine in self.machines.values() {
            machine.activate();
        }
        self.poller.start();
        info!("Event engine started for {}", self.device);
    }

    /// Stop polling; committed states and pending transitions are kept
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.poller.stop();
        info!("Event engine stopped for {}", self.device);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wait until queued notifications have been handed to the transport
    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }

    pub fn device(&self) -> ObjectId {
        self.device
    }

    pub fn store(&self) -> &PropertyStore {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<NotificationClassRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn poller(&self) -> &Arc<EnrollmentPoller> {
        &self.poller
    }

    pub fn machine(&self, object: ObjectId) -> Option<&Arc<EventStateMachine>> {
        self.machines.get(&object)
    }

    pub fn event_state(&self, object: ObjectId) -> Result<EventState> {
        self.require(object).map(|m| m.event_state())
    }

    /// Acknowledge a transition of one object
    pub fn acknowledge(&self, object: ObjectId, transition: Transition, time_stamp: DateTime<Utc>) -> Result<()> {
        self.require(object)?.acknowledge(transition, time_stamp)
    }

    /// Objects that are off-normal or hold unacknowledged transitions
    pub fn event_information(&self) -> Vec<EventInformation> {
        self.machines
            .values()
            .filter_map(|machine| {
                let event_state = machine.event_state();
                let acked_transitions = machine.acked_transitions();
                if event_state.is_normal() && acked_transitions == TransitionBits::all() {
                    return None;
                }
                let config = machine.config();
                let records = machine.transition_records();
                let priorities = self
                    .registry
                    .get(config.notification_class)
                    .map(|class| class.priority)
                    .unwrap_or([255; 3]);
                Some(EventInformation {
                    object: machine.object(),
                    event_state,
                    acked_transitions,
                    time_stamps: [records[0].time_stamp, records[1].time_stamp, records[2].time_stamp],
                    notify_type: config.notify_type,
                    event_enable: config.event_enable,
                    priorities,
                })
            })
            .collect()
    }

    pub fn stats(&self) -> EngineStats {
        let in_alarm = self.machines.values().filter(|m| !m.event_state().is_normal()).count();
        EngineStats {
            running: self.is_running(),
            objects: self.machines.len() - self.enrollments,
            enrollments: self.enrollments,
            in_alarm,
            notifications_sent: self.dispatcher.sent(),
            notification_failures: self.dispatcher.failed(),
        }
    }

    fn require(&self, object: ObjectId) -> Result<&Arc<EventStateMachine>> {
        self.machines.get(&object).ok_or(EventError::ObjectNotFound(object))
    }
}

impl Drop for EventEngine {
    fn drop(&mut self) {
        self.poller.stop();
        for machine in self.machines.values() {
            machine.detach();
        }
        debug!("Event engine for {} dropped", self.device);
    }
}
