// src/event/enrollment.rs - Polling of monitored properties for event enrollments
//
// Each enrollment samples one referenced property at a fixed interval and
// feeds the result into its state machine. A failed or timed-out read becomes
// a `communication-failure` sample instead of an error. At most one read per
// enrollment is outstanding; ticks that arrive during a read are skipped.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use super::{machine::EventStateMachine, Reliability, Sample};
use crate::{
    clock::{Clock, TimerId},
    error::{EventError, Result},
    object::{ObjectId, PropertyId},
    property::PropertyStore,
    value::Value,
};

/// Property on a local or remote object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPropertyReference {
    /// Remote device hosting the object; `None` for this device
    #[serde(default)]
    pub device: Option<ObjectId>,
    pub object: ObjectId,
    #[serde(default = "default_property")]
    pub property: PropertyId,
}

impl ObjectPropertyReference {
    pub fn local(object: ObjectId, property: PropertyId) -> Self {
        Self { device: None, object, property }
    }
}

impl std::fmt::Display for ObjectPropertyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}/{}.{}", device, self.object, self.property),
            None => write!(f, "{}.{}", self.object, self.property),
        }
    }
}

/// Read access to monitored properties
#[async_trait]
pub trait PropertyReader: Send + Sync {
    async fn read_property(&self, reference: &ObjectPropertyReference) -> Result<Value>;
}

/// Reader for properties of this device's own objects
#[derive(Debug, Clone)]
pub struct StoreReader {
    store: PropertyStore,
}

impl StoreReader {
    pub fn new(store: PropertyStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PropertyReader for StoreReader {
    async fn read_property(&self, reference: &ObjectPropertyReference) -> Result<Value> {
        if let Some(device) = reference.device {
            return Err(EventError::Remote(format!("{} is not reachable from the local store", device)));
        }
        self.store.require(reference.object, reference.property)
    }
}

/// Result of one poll attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A sample was fed to the state machine
    Sampled(Reliability),
    /// A previous poll was still outstanding
    Skipped,
}

/// Counters for one enrollment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub polls: u64,
    pub skipped: u64,
    pub failures: u64,
}

struct Enrollment {
    reference: ObjectPropertyReference,
    feedback: Option<ObjectPropertyReference>,
    machine: Arc<EventStateMachine>,
    in_flight: AtomicBool,
    timer: Mutex<Option<TimerId>>,
    polls: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
}

/// Clears the in-flight flag when a poll ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic sampler for all event enrollments of a device
pub struct EnrollmentPoller {
    clock: Arc<dyn Clock>,
    handle: Handle,
    reader: Arc<dyn PropertyReader>,
    store: PropertyStore,
    interval: Duration,
    read_timeout: Duration,
    enrollments: RwLock<HashMap<ObjectId, Arc<Enrollment>>>,
    running: AtomicBool,
    this: Weak<EnrollmentPoller>,
}

impl EnrollmentPoller {
    pub fn new(
        clock: Arc<dyn Clock>,
        reader: Arc<dyn PropertyReader>,
        store: PropertyStore,
        interval: Duration,
        read_timeout: Duration,
    ) -> Result<Arc<Self>> {
        if interval.is_zero() {
            return Err(EventError::Config("poll interval must be positive".into()));
        }
        if read_timeout.is_zero() {
            return Err(EventError::Config("read timeout must be positive".into()));
        }
        let handle = Handle::try_current()
            .map_err(|e| EventError::Runtime(format!("poller needs a tokio runtime: {}", e)))?;
        Ok(Arc::new_cyclic(|this| Self {
            clock,
            handle,
            reader,
            store,
            interval,
            read_timeout,
            enrollments: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    /// Register an enrollment object and the machine its samples feed
    pub fn add(
        &self,
        object: ObjectId,
        reference: ObjectPropertyReference,
        feedback: Option<ObjectPropertyReference>,
        machine: Arc<EventStateMachine>,
    ) {
        debug!("Enrollment {} monitors {}", object, reference);
        self.store
            .initialize(object, PropertyId::ObjectPropertyReference, Value::String(reference.to_string()));
        let enrollment = Arc::new(Enrollment {
            reference,
            feedback,
            machine,
            in_flight: AtomicBool::new(false),
            timer: Mutex::new(None),
            polls: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        self.enrollments.write().insert(object, enrollment.clone());
        if self.running.load(Ordering::Acquire) {
            self.schedule(object, &enrollment);
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin periodic polling of every enrollment
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let enrollments: Vec<(ObjectId, Arc<Enrollment>)> =
            self.enrollments.read().iter().map(|(id, e)| (*id, e.clone())).collect();
        info!("Polling {} enrollments every {:?}", enrollments.len(), self.interval);
        for (object, enrollment) in enrollments {
            self.schedule(object, &enrollment);
        }
    }

    /// Cancel every pending tick; reads already in flight complete normally
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for enrollment in self.enrollments.read().values() {
            if let Some(timer) = enrollment.timer.lock().take() {
                self.clock.cancel(timer);
            }
        }
        info!("Enrollment polling stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self, object: ObjectId) -> Option<PollStats> {
        self.enrollments.read().get(&object).map(|e| PollStats {
            polls: e.polls.load(Ordering::Relaxed),
            skipped: e.skipped.load(Ordering::Relaxed),
            failures: e.failures.load(Ordering::Relaxed),
        })
    }

    /// Sample one enrollment immediately
    pub async fn poll_now(&self, object: ObjectId) -> Result<PollOutcome> {
        let enrollment = self
            .enrollments
            .read()
            .get(&object)
            .cloned()
            .ok_or(EventError::ObjectNotFound(object))?;

        if enrollment.in_flight.swap(true, Ordering::AcqRel) {
            enrollment.skipped.fetch_add(1, Ordering::Relaxed);
            trace!("Poll of {} skipped, previous read outstanding", object);
            return Ok(PollOutcome::Skipped);
        }
        let _guard = InFlight(&enrollment.in_flight);
        enrollment.polls.fetch_add(1, Ordering::Relaxed);

        let sample = match self.read(&enrollment.reference).await {
            Ok(value) => {
                let mut sample = Sample::new(value);
                if let Some(feedback) = &enrollment.feedback {
                    match self.read(feedback).await {
                        Ok(value) => sample.feedback = Some(value),
                        Err(e) => sample = self.failed(object, &enrollment, feedback, e),
                    }
                }
                sample
            }
            Err(e) => self.failed(object, &enrollment, &enrollment.reference, e),
        };

        let reliability = sample.reliability;
        let recorded = self.store.get(object, PropertyId::Reliability).map(|v| Reliability::from_value(&v));
        if recorded != Some(reliability) {
            if let Err(e) = self.store.write(object, PropertyId::Reliability, reliability.to_value()) {
                warn!("Failed to record reliability of {}: {}", object, e);
            }
        }
        enrollment.machine.feed(sample);
        Ok(PollOutcome::Sampled(reliability))
    }

    /// Read one property, giving up once the clock passes the read timeout
    async fn read(&self, reference: &ObjectPropertyReference) -> Result<Value> {
        let (expire, expired) = oneshot::channel::<()>();
        let timer = self.clock.schedule_after(
            self.read_timeout,
            Box::new(move || {
                let _ = expire.send(());
            }),
        );
        let result = tokio::select! {
            result = self.reader.read_property(reference) => result,
            _ = expired => Err(EventError::Timeout(self.read_timeout.as_millis() as u64)),
        };
        self.clock.cancel(timer);
        result
    }

    fn failed(
        &self,
        object: ObjectId,
        enrollment: &Enrollment,
        reference: &ObjectPropertyReference,
        error: EventError,
    ) -> Sample {
        enrollment.failures.fetch_add(1, Ordering::Relaxed);
        warn!("Enrollment {} failed to read {}: {}", object, reference, error);
        #[cfg(feature = "metrics")]
        metrics::counter!("bacnet_events_poll_failures_total").increment(1);
        Sample::unreliable(Reliability::CommunicationFailure)
    }

    fn schedule(&self, object: ObjectId, enrollment: &Enrollment) {
        let this = self.this.clone();
        let timer = self.clock.schedule_after(
            self.interval,
            Box::new(move || {
                if let Some(poller) = this.upgrade() {
                    poller.tick(object);
                }
            }),
        );
        if let Some(previous) = enrollment.timer.lock().replace(timer) {
            self.clock.cancel(previous);
        }
    }

    fn tick(&self, object: ObjectId) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let Some(enrollment) = self.enrollments.read().get(&object).cloned() else {
            return;
        };
        self.schedule(object, &enrollment);

        let Some(poller) = self.this.upgrade() else {
            return;
        };
        self.handle.spawn(async move {
            if let Err(e) = poller.poll_now(object).await {
                warn!("Poll of {} failed: {}", object, e);
            }
        });
    }
}

impl std::fmt::Debug for EnrollmentPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentPoller")
            .field("interval", &self.interval)
            .field("enrollments", &self.enrollments.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}

fn default_property() -> PropertyId {
    PropertyId::PresentValue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        event::{EventAlgorithm, EventConfig, EventState, NotificationSink, Transition},
        notification::NotificationRequest,
        object::ObjectType,
    };
    use tokio::sync::Notify;

    const EE: ObjectId = ObjectId::new(ObjectType::EventEnrollment, 1);
    const AV: ObjectId = ObjectId::new(ObjectType::AnalogValue, 4);

    #[derive(Default)]
    struct Requests(Mutex<Vec<NotificationRequest>>);

    impl NotificationSink for Requests {
        fn ack_required(&self, _: u32, _: Transition) -> bool {
            false
        }

        fn notify(&self, request: NotificationRequest) {
            self.0.lock().push(request);
        }
    }

    #[derive(Default)]
    struct GatedReader {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl PropertyReader for GatedReader {
        async fn read_property(&self, _: &ObjectPropertyReference) -> Result<Value> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Value::Float(50.0))
        }
    }

    struct HangingReader;

    #[async_trait]
    impl PropertyReader for HangingReader {
        async fn read_property(&self, _: &ObjectPropertyReference) -> Result<Value> {
            std::future::pending::<Result<Value>>().await
        }
    }

    /// Let spawned poll tasks run until they block
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn setup(
        reader: Arc<dyn PropertyReader>,
        store: PropertyStore,
    ) -> (Arc<ManualClock>, Arc<EnrollmentPoller>, Arc<EventStateMachine>, Arc<Requests>) {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(Requests::default());
        let config = EventConfig::new(1, EventAlgorithm::out_of_range(100.0, 20.0, 5.0));
        let machine = EventStateMachine::enrollment(
            EE,
            ObjectId::device(1),
            config,
            store.clone(),
            clock.clone(),
            sink.clone(),
        )
        .unwrap();
        machine.attach().unwrap();
        machine.activate();

        let poller = EnrollmentPoller::new(
            clock.clone(),
            reader,
            store,
            Duration::from_secs(1),
            Duration::from_millis(50),
        )
        .unwrap();
        poller.add(EE, ObjectPropertyReference::local(AV, PropertyId::PresentValue), None, machine.clone());
        (clock, poller, machine, sink)
    }

    #[tokio::test]
    async fn test_poll_feeds_machine() {
        let store = PropertyStore::new();
        store.initialize(AV, PropertyId::PresentValue, Value::Float(150.0));
        let (_, poller, machine, sink) = setup(Arc::new(StoreReader::new(store.clone())), store.clone());

        assert_eq!(machine.event_state(), EventState::Normal);
        let outcome = poller.poll_now(EE).await.unwrap();
        assert_eq!(outcome, PollOutcome::Sampled(Reliability::NoFaultDetected));
        assert_eq!(machine.event_state(), EventState::HighLimit);
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_maps_to_communication_failure() {
        let store = PropertyStore::new();
        // Referenced property never written
        let (_, poller, machine, sink) = setup(Arc::new(StoreReader::new(store.clone())), store.clone());

        let outcome = poller.poll_now(EE).await.unwrap();
        assert_eq!(outcome, PollOutcome::Sampled(Reliability::CommunicationFailure));
        assert_eq!(machine.event_state(), EventState::Fault);
        assert_eq!(store.get(EE, PropertyId::Reliability), Some(Value::Enumerated(12)));
        assert_eq!(sink.0.lock()[0].to_state, EventState::Fault);
        assert_eq!(poller.stats(EE).unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_timeout_follows_the_injected_clock() {
        let store = PropertyStore::new();
        let (clock, poller, machine, _) = setup(Arc::new(HangingReader), store);

        let poll = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.poll_now(EE).await })
        };
        settle().await;
        // Only the read timeout is scheduled; no real time passes
        assert_eq!(clock.pending_timers(), 1);
        assert!(!poll.is_finished());

        clock.advance(Duration::from_millis(50));
        let outcome = poll.await.unwrap().unwrap();
        assert_eq!(outcome, PollOutcome::Sampled(Reliability::CommunicationFailure));
        assert_eq!(machine.event_state(), EventState::Fault);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_hung_reads_do_not_starve_later_ticks() {
        let store = PropertyStore::new();
        let (clock, poller, machine, _) = setup(Arc::new(HangingReader), store);
        poller.start();
        clock.advance(Duration::from_millis(50));

        for round in 1..=3 {
            // Reach the next tick
            clock.advance(Duration::from_millis(950));
            settle().await;
            assert_eq!(clock.pending_timers(), 2);

            // Its read times out
            clock.advance(Duration::from_millis(50));
            settle().await;
            assert_eq!(
                poller.stats(EE).unwrap(),
                PollStats { polls: round, skipped: 0, failures: round }
            );
        }
        assert_eq!(machine.event_state(), EventState::Fault);
        poller.stop();
        assert_eq!(clock.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_poll_is_skipped() {
        let store = PropertyStore::new();
        let reader = Arc::new(GatedReader::default());
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(Requests::default());
        let machine = EventStateMachine::enrollment(
            EE,
            ObjectId::device(1),
            EventConfig::new(1, EventAlgorithm::out_of_range(100.0, 20.0, 5.0)),
            store.clone(),
            clock.clone(),
            sink,
        )
        .unwrap();
        let poller = EnrollmentPoller::new(
            clock,
            reader.clone(),
            store,
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
        .unwrap();
        poller.add(EE, ObjectPropertyReference::local(AV, PropertyId::PresentValue), None, machine);

        let first = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.poll_now(EE).await })
        };
        reader.entered.notified().await;

        assert_eq!(poller.poll_now(EE).await.unwrap(), PollOutcome::Skipped);
        reader.release.notify_one();
        assert_eq!(
            first.await.unwrap().unwrap(),
            PollOutcome::Sampled(Reliability::NoFaultDetected)
        );

        let stats = poller.stats(EE).unwrap();
        assert_eq!(stats, PollStats { polls: 1, skipped: 1, failures: 0 });
    }

    #[tokio::test]
    async fn test_ticks_follow_the_clock() {
        let store = PropertyStore::new();
        store.initialize(AV, PropertyId::PresentValue, Value::Float(50.0));
        let (clock, poller, _, _) = setup(Arc::new(StoreReader::new(store.clone())), store);

        poller.start();
        clock.advance(Duration::from_millis(3500));
        // Let the spawned polls run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(poller.stats(EE).unwrap().polls, 3);

        poller.stop();
        assert_eq!(clock.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_unknown_enrollment() {
        let store = PropertyStore::new();
        let (_, poller, _, _) = setup(Arc::new(StoreReader::new(store.clone())), store);
        let other = ObjectId::new(ObjectType::EventEnrollment, 9);
        assert!(matches!(poller.poll_now(other).await, Err(EventError::ObjectNotFound(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _enter = runtime.enter();
        let result = EnrollmentPoller::new(
            Arc::new(ManualClock::new()),
            Arc::new(HangingReader),
            PropertyStore::new(),
            Duration::ZERO,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(EventError::Config(_))));
    }
}
