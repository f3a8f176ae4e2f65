// src/event/machine.rs - Per-object event state machine
//
// One machine per monitored object. Every trigger, timer expiry, configuration
// change and acknowledgment runs under the machine's own mutex, so a commit is
// never observed half applied. Notifications leave through a
// `NotificationSink` while that mutex is held, which keeps per-object commit
// order intact downstream.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use super::{
    algorithm::{EventAlgorithm, Evaluation, Sample},
    config::{EventConfig, FaultPolicy},
    EventState, Reliability, StatusFlags, Transition, TransitionBits,
};
use crate::{
    clock::{add_duration, Clock, TimerId},
    error::{EventError, Result},
    notification::NotificationRequest,
    object::{ObjectId, PropertyId},
    property::{PropertyChange, PropertyStore, SubscriptionId},
    value::Value,
};

/// Properties the machine writes on its own object after every commit
pub(crate) const PUBLISHED_PROPERTIES: [PropertyId; 4] = [
    PropertyId::EventState,
    PropertyId::StatusFlags,
    PropertyId::EventTimeStamps,
    PropertyId::AckedTransitions,
];

/// Receiver of committed transitions
pub trait NotificationSink: Send + Sync {
    /// Whether the notification class requires acknowledgment of `transition`
    fn ack_required(&self, notification_class: u32, transition: Transition) -> bool;

    /// Hand off a request; must not block
    fn notify(&self, request: NotificationRequest);
}

/// Acknowledgment status of one transition slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckStatus {
    Acked,
    NotRequired,
    Unacked,
}

/// History of the last transition into one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// `None` until the slot's first commit
    pub time_stamp: Option<DateTime<Utc>>,
    pub ack: AckStatus,
    pub from: Option<EventState>,
    pub to: Option<EventState>,
}

impl Default for TransitionRecord {
    fn default() -> Self {
        Self {
            time_stamp: None,
            ack: AckStatus::Acked,
            from: None,
            to: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleSource {
    /// Present value and reliability of the object itself, read from the store
    Intrinsic,
    /// Samples pushed by an enrollment poller
    Enrollment,
}

struct Pending {
    target: EventState,
    deadline: DateTime<Utc>,
    timer: TimerId,
    generation: u64,
    sample: Sample,
}

struct MachineState {
    config: EventConfig,
    started: bool,
    current: EventState,
    pending: Option<Pending>,
    records: [TransitionRecord; 3],
    last_sample: Option<Sample>,
    generation: u64,
}

impl MachineState {
    fn active(&self) -> bool {
        self.started && self.config.event_detection_enable
    }
}

/// Event state machine of one monitored object
pub struct EventStateMachine {
    object: ObjectId,
    device: ObjectId,
    source: SampleSource,
    store: PropertyStore,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    state: Mutex<MachineState>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    this: Weak<EventStateMachine>,
}

impl EventStateMachine {
    /// Machine for an object reporting on its own present value
    pub fn intrinsic(
        object: ObjectId,
        device: ObjectId,
        config: EventConfig,
        store: PropertyStore,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Arc<Self>> {
        Self::build(object, device, SampleSource::Intrinsic, config, store, clock, sink)
    }

    /// Machine for an event enrollment fed through [`EventStateMachine::feed`]
    pub fn enrollment(
        object: ObjectId,
        device: ObjectId,
        config: EventConfig,
        store: PropertyStore,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Arc<Self>> {
        Self::build(object, device, SampleSource::Enrollment, config, store, clock, sink)
    }

    fn build(
        object: ObjectId,
        device: ObjectId,
        source: SampleSource,
        config: EventConfig,
        store: PropertyStore,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new_cyclic(|this| Self {
            object,
            device,
            source,
            store,
            clock,
            sink,
            state: Mutex::new(MachineState {
                config,
                started: false,
                current: EventState::Normal,
                pending: None,
                records: Default::default(),
                last_sample: None,
                generation: 0,
            }),
            subscriptions: Mutex::new(Vec::new()),
            this: this.clone(),
        }))
    }

    // ========================================================================
    // WIRING
    // ========================================================================

    /// Publish configuration and status into the store and subscribe to the
    /// properties that trigger evaluation
    pub fn attach(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return Ok(());
        }

        let (config_props, monitored) = {
            let state = self.state.lock();
            self.publish(&state);
            (state.config.properties(), self.monitored_properties(&state.config))
        };

        for (property, value) in config_props {
            self.store.initialize(self.object, property, value);

            let this = self.this.clone();
            subscriptions.push(self.store.add_validator(
                self.object,
                property,
                Arc::new(move |value: &Value| match this.upgrade() {
                    Some(machine) => machine.state.lock().config.with_property(property, value).map(|_| ()),
                    None => Ok(()),
                }),
            ));

            let this = self.this.clone();
            subscriptions.push(self.store.subscribe(
                self.object,
                property,
                Arc::new(move |change: &PropertyChange| {
                    if let Some(machine) = this.upgrade() {
                        machine.reconfigure(change.property, &change.new);
                    }
                }),
            ));
        }

        for property in monitored {
            let this = self.this.clone();
            subscriptions.push(self.store.subscribe(
                self.object,
                property,
                Arc::new(move |_: &PropertyChange| {
                    if let Some(machine) = this.upgrade() {
                        machine.trigger();
                    }
                }),
            ));
        }

        debug!("Attached event state machine for {} ({} subscriptions)", self.object, subscriptions.len());
        Ok(())
    }

    /// Remove every store subscription and cancel any pending transition
    pub fn detach(&self) {
        for id in self.subscriptions.lock().drain(..) {
            self.store.unsubscribe(id);
        }
        let mut state = self.state.lock();
        self.cancel_pending(&mut state);
        state.started = false;
    }

    /// Enable reporting, seeding the current state from one evaluation
    ///
    /// An object that is already in alarm enters that state directly; no
    /// notification is sent and no transition record is written.
    pub fn activate(&self) {
        let mut state = self.state.lock();
        state.started = true;
        self.seed(&mut state);
    }

    // ========================================================================
    // TRIGGERS
    // ========================================================================

    /// Evaluate the current sample of an intrinsic object
    pub fn trigger(&self) {
        let mut state = self.state.lock();
        if !state.active() {
            return;
        }
        if let Some(sample) = self.sample(&state) {
            self.step(&mut state, sample);
        }
    }

    /// Evaluate a sample delivered by a poller
    pub fn feed(&self, sample: Sample) {
        let mut state = self.state.lock();
        state.last_sample = Some(sample.clone());
        if !state.active() {
            return;
        }
        self.step(&mut state, sample);
    }

    fn reconfigure(&self, property: PropertyId, value: &Value) {
        let mut state = self.state.lock();
        let next = match state.config.with_property(property, value) {
            Ok(Some(next)) => next,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring {} write on {}: {}", property, self.object, e);
                return;
            }
        };
        let was_active = state.active();
        state.config = next;
        debug!("{} {} set to {}", self.object, property, value);

        match (was_active, state.active()) {
            (true, false) => {
                self.cancel_pending(&mut state);
                state.current = EventState::Normal;
                self.publish(&state);
                info!("Event detection disabled for {}", self.object);
            }
            (false, true) => self.seed(&mut state),
            (true, true) => {
                if let Some(sample) = self.sample(&state) {
                    self.step(&mut state, sample);
                }
            }
            (false, false) => {}
        }
    }

    fn expire(&self, generation: u64) {
        let mut state = self.state.lock();
        if !state.pending.as_ref().is_some_and(|p| p.generation == generation) {
            trace!("Superseded timer for {} ignored", self.object);
            return;
        }
        let Some(pending) = state.pending.take() else {
            return;
        };
        if !state.active() {
            return;
        }
        let sample = self.sample(&state).unwrap_or(pending.sample);
        if propose(&state.config, &sample, state.current).target(state.current) == pending.target {
            self.commit(&mut state, pending.target, sample.clone());
        }
        self.step(&mut state, sample);
    }

    // ========================================================================
    // TRANSITION LOGIC
    // ========================================================================

    fn seed(&self, state: &mut MachineState) {
        self.cancel_pending(state);
        if state.active() {
            state.current = self
                .sample(state)
                .map(|s| propose(&state.config, &s, EventState::Normal).target(EventState::Normal))
                .unwrap_or(EventState::Normal);
        }
        self.publish(state);
        info!("Event reporting for {} starts in {}", self.object, state.current);
    }

    fn step(&self, state: &mut MachineState, sample: Sample) {
        // A commit can expose a follow-up proposal (fault -> normal -> high-limit),
        // so keep going while transitions commit without delay
        for _ in 0..3 {
            let evaluation = propose(&state.config, &sample, state.current);
            let target = evaluation.target(state.current);

            if target == state.current {
                if let Some(pending) = state.pending.as_ref() {
                    debug!("{} back in {}, cancelling pending {}", self.object, state.current, pending.target);
                    self.cancel_pending(state);
                }
                return;
            }

            let fault_related = target == EventState::Fault || state.current == EventState::Fault;
            let delay = state.config.delay_for(target);
            let immediate = evaluation.is_forced()
                || delay.is_zero()
                || (fault_related && state.config.fault_policy == FaultPolicy::Immediate);

            if !immediate {
                if state.pending.as_ref().is_some_and(|p| p.target == target) {
                    return;
                }
                self.cancel_pending(state);
                state.generation += 1;
                let generation = state.generation;
                let deadline = add_duration(self.clock.now(), delay);
                let this = self.this.clone();
                let timer = self.clock.schedule_at(
                    deadline,
                    Box::new(move || {
                        if let Some(machine) = this.upgrade() {
                            machine.expire(generation);
                        }
                    }),
                );
                debug!("{} pending {} -> {} at {}", self.object, state.current, target, deadline);
                state.pending = Some(Pending { target, deadline, timer, generation, sample });
                return;
            }

            self.cancel_pending(state);
            self.commit(state, target, sample.clone());
        }
    }

    fn commit(&self, state: &mut MachineState, to: EventState, mut sample: Sample) {
        let from = state.current;
        let now = self.clock.now();
        let transition = to.transition();
        let notify = state.config.event_enable.contains(transition);
        let ack_required = notify && self.sink.ack_required(state.config.notification_class, transition);

        state.current = to;
        state.records[transition.index()] = TransitionRecord {
            time_stamp: Some(now),
            ack: if ack_required { AckStatus::Unacked } else { AckStatus::NotRequired },
            from: Some(from),
            to: Some(to),
        };
        info!("{} event state {} -> {}", self.object, from, to);

        #[cfg(feature = "metrics")]
        metrics::counter!("bacnet_events_transitions_total", "to" => to.as_str()).increment(1);

        sample.status_flags = self.publish(state);
        if notify {
            let request = NotificationRequest {
                source: self.object,
                initiating_device: self.device,
                notification_class: state.config.notification_class,
                event_type: event_type_for(&state.config.algorithm, from, to),
                notify_type: state.config.notify_type,
                from_state: from,
                to_state: to,
                time_stamp: now,
                ack_required,
                message_text: state.config.message_text(transition),
                parameters: Some(state.config.algorithm.parameters(&sample, from, to)),
            };
            self.sink.notify(request);
        } else {
            debug!("{} {} not enabled, no notification", self.object, transition);
        }
    }

    fn cancel_pending(&self, state: &mut MachineState) {
        if let Some(pending) = state.pending.take() {
            self.clock.cancel(pending.timer);
        }
    }

    // ========================================================================
    // ACKNOWLEDGMENT
    // ========================================================================

    /// Acknowledge the last transition into `transition`'s slot
    ///
    /// `time_stamp` must match the slot's recorded commit time. An ack
    /// notification goes out on success.
    pub fn acknowledge(&self, transition: Transition, time_stamp: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        let record = &state.records[transition.index()];
        if record.time_stamp != Some(time_stamp) {
            return Err(EventError::AckMismatch {
                object: self.object,
                reason: format!("time stamp {} does not match the last {} transition", time_stamp, transition),
            });
        }
        if record.ack != AckStatus::Unacked {
            return Err(EventError::AckMismatch {
                object: self.object,
                reason: format!("{} transition is not awaiting acknowledgment", transition),
            });
        }
        let (from, to) = (record.from.unwrap_or(EventState::Normal), record.to.unwrap_or(state.current));

        state.records[transition.index()].ack = AckStatus::Acked;
        self.publish(&state);
        info!("{} {} transition acknowledged", self.object, transition);

        self.sink.notify(NotificationRequest {
            source: self.object,
            initiating_device: self.device,
            notification_class: state.config.notification_class,
            event_type: event_type_for(&state.config.algorithm, from, to),
            notify_type: super::NotifyType::AckNotification,
            from_state: from,
            to_state: to,
            time_stamp: self.clock.now(),
            ack_required: false,
            message_text: None,
            parameters: None,
        });
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn event_state(&self) -> EventState {
        self.state.lock().current
    }

    /// Target of the outstanding pending transition, if any
    pub fn pending_target(&self) -> Option<EventState> {
        self.state.lock().pending.as_ref().map(|p| p.target)
    }

    pub fn pending_deadline(&self) -> Option<DateTime<Utc>> {
        self.state.lock().pending.as_ref().map(|p| p.deadline)
    }

    pub fn transition_records(&self) -> [TransitionRecord; 3] {
        self.state.lock().records.clone()
    }

    pub fn acked_transitions(&self) -> TransitionBits {
        acked_bits(&self.state.lock().records)
    }

    pub fn config(&self) -> EventConfig {
        self.state.lock().config.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active()
    }

    // ========================================================================
    // STORE ACCESS
    // ========================================================================

    fn monitored_properties(&self, config: &EventConfig) -> Vec<PropertyId> {
        match self.source {
            SampleSource::Enrollment => Vec::new(),
            SampleSource::Intrinsic => {
                let mut props = vec![PropertyId::PresentValue, PropertyId::Reliability];
                if let EventAlgorithm::CommandFailure(p) = &config.algorithm {
                    props.push(p.feedback_property);
                }
                props
            }
        }
    }

    /// Latest inputs; an enrollment has none until its first poll
    fn sample(&self, state: &MachineState) -> Option<Sample> {
        if self.source == SampleSource::Enrollment {
            return state.last_sample.clone();
        }
        let value = self.store.get(self.object, PropertyId::PresentValue).unwrap_or(Value::Null);
        let reliability = self
            .store
            .get(self.object, PropertyId::Reliability)
            .map(|v| Reliability::from_value(&v))
            .unwrap_or_default();
        let feedback = match &state.config.algorithm {
            EventAlgorithm::CommandFailure(p) => self.store.get(self.object, p.feedback_property),
            _ => None,
        };
        let status_flags = self.current_flags();
        Some(Sample { value, reliability, feedback, status_flags })
    }

    fn current_flags(&self) -> StatusFlags {
        self.store
            .get(self.object, PropertyId::StatusFlags)
            .and_then(|v| StatusFlags::from_value(&v))
            .unwrap_or_default()
    }

    /// Write event state, status flags, time stamps and acked transitions
    fn publish(&self, state: &MachineState) -> StatusFlags {
        let mut flags = self.current_flags();
        flags.in_alarm = !state.current.is_normal();
        flags.fault = state.current == EventState::Fault;

        let time_stamps = state
            .records
            .iter()
            .map(|r| r.time_stamp.map(Value::Timestamp).unwrap_or(Value::Null))
            .collect();

        let writes = [
            (PropertyId::EventState, Value::Enumerated(state.current.code())),
            (PropertyId::StatusFlags, flags.to_value()),
            (PropertyId::EventTimeStamps, Value::Array(time_stamps)),
            (PropertyId::AckedTransitions, acked_bits(&state.records).to_value()),
        ];
        for (property, value) in writes {
            if let Err(e) = self.store.write(self.object, property, value) {
                warn!("Failed to publish {} on {}: {}", property, self.object, e);
            }
        }
        flags
    }
}

impl std::fmt::Debug for EventStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStateMachine")
            .field("object", &self.object)
            .field("source", &self.source)
            .finish()
    }
}

/// Algorithm proposal with detection inhibit applied
fn propose(config: &EventConfig, sample: &Sample, current: EventState) -> Evaluation {
    let evaluation = config.algorithm.evaluate(sample, current);
    if !config.event_algorithm_inhibit || evaluation.target(current) == EventState::Fault {
        return evaluation;
    }
    if current.is_normal() {
        Evaluation::Stay
    } else {
        Evaluation::Propose { state: EventState::Normal, forced: true }
    }
}

fn event_type_for(algorithm: &EventAlgorithm, from: EventState, to: EventState) -> super::EventType {
    if from == EventState::Fault || to == EventState::Fault {
        super::EventType::ChangeOfReliability
    } else {
        algorithm.event_type()
    }
}

fn acked_bits(records: &[TransitionRecord; 3]) -> TransitionBits {
    let mut bits = TransitionBits::all();
    for transition in Transition::ALL {
        bits.set(transition, records[transition.index()].ack != AckStatus::Unacked);
    }
    bits
}
