// Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bacnet_events::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One send handed to the transport
#[derive(Debug, Clone)]
pub struct Sent {
    pub recipient: Recipient,
    pub process_id: u32,
    pub confirmed: bool,
    pub notification: EventNotification,
}

/// Transport that records every send and can be told to fail for one recipient
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    unreachable: Mutex<Option<Recipient>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn fail_for(&self, recipient: Recipient) {
        *self.unreachable.lock() = Some(recipient);
    }

    fn record(&self, recipient: &Recipient, process_id: u32, confirmed: bool, n: &EventNotification) -> Result<()> {
        if self.unreachable.lock().as_ref() == Some(recipient) {
            return Err(EventError::Transport(format!("{} unreachable", recipient)));
        }
        self.sent.lock().push(Sent {
            recipient: recipient.clone(),
            process_id,
            confirmed,
            notification: n.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_confirmed(&self, recipient: &Recipient, process_id: u32, n: &EventNotification) -> Result<()> {
        self.record(recipient, process_id, true, n)
    }

    async fn send_unconfirmed(&self, recipient: &Recipient, process_id: u32, n: &EventNotification) -> Result<()> {
        self.record(recipient, process_id, false, n)
    }
}

pub const DEVICE: ObjectId = ObjectId::device(1001);
pub const AI1: ObjectId = ObjectId::new(ObjectType::AnalogInput, 1);
pub const CLASS: u32 = 1;
pub const PRIORITIES: [u8; 3] = [10, 20, 30];

pub fn r1() -> Recipient {
    Recipient::Device(ObjectId::device(201))
}

pub fn r2() -> Recipient {
    Recipient::Device(ObjectId::device(202))
}

pub fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

/// Store, clock, registry and dispatcher wired together; class 1 has
/// recipients R1 (process 1, unconfirmed) and R2 (process 2, confirmed)
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: PropertyStore,
    pub registry: Arc<NotificationClassRegistry>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub transport: Arc<RecordingTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_class(
            NotificationClass::new(CLASS)
                .with_priority(PRIORITIES)
                .with_recipients(vec![Destination::new(r1(), 1), Destination::new(r2(), 2).confirmed(true)]),
        )
    }

    pub fn with_class(class: NotificationClass) -> Self {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(NotificationClassRegistry::new());
        registry.insert(class);
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(
            NotificationDispatcher::new(registry.clone(), transport.clone(), clock.clone())
                .expect("dispatcher inside runtime"),
        );
        Self {
            clock,
            store: PropertyStore::new(),
            registry,
            dispatcher,
            transport,
        }
    }

    /// Intrinsic machine for `object`, seeded with `present_value` and activated
    pub fn object(&self, object: ObjectId, present_value: Value, config: EventConfig) -> Arc<EventStateMachine> {
        self.store.initialize(object, PropertyId::PresentValue, present_value);
        self.store.initialize(object, PropertyId::Reliability, Reliability::NoFaultDetected.to_value());
        let machine = EventStateMachine::intrinsic(
            object,
            DEVICE,
            config,
            self.store.clone(),
            self.clock.clone(),
            self.dispatcher.clone(),
        )
        .expect("valid event config");
        machine.attach().expect("attach");
        machine.activate();
        machine
    }

    pub fn write(&self, object: ObjectId, value: f64) {
        self.store
            .write(object, PropertyId::PresentValue, Value::Float(value))
            .expect("present value write");
    }

    pub fn set_reliability(&self, object: ObjectId, reliability: Reliability) {
        self.store
            .write(object, PropertyId::Reliability, reliability.to_value())
            .expect("reliability write");
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Every send so far, after queued deliveries have completed
    pub async fn sent(&self) -> Vec<Sent> {
        self.dispatcher.flush().await;
        self.transport.sent()
    }

    /// Sends that reached one recipient, in delivery order
    pub async fn sent_to(&self, recipient: &Recipient) -> Vec<EventNotification> {
        self.sent()
            .await
            .into_iter()
            .filter(|s| &s.recipient == recipient)
            .map(|s| s.notification)
            .collect()
    }
}

/// Out-of-range configuration: high 100, low 20, deadband 5
pub fn out_of_range(time_delay: u32) -> EventConfig {
    EventConfig::new(CLASS, EventAlgorithm::out_of_range(100.0, 20.0, 5.0)).with_time_delay(time_delay)
}
