// src/clock.rs - Injectable time source and timer scheduling
//
// Every timer in the event subsystem (pending transitions, poll ticks) is
// scheduled through a `Clock`. Production code runs on `SystemClock`; tests
// drive a `ManualClock` forward in discrete jumps.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::{EventError, Result};

/// Work to run when a timer expires
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle for a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Source of time and timers shared by all state machines and the poller
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Run `task` once the clock reaches `deadline`
    fn schedule_at(&self, deadline: DateTime<Utc>, task: TimerTask) -> TimerId;

    /// Cancel a timer; returns false when it already fired or never existed
    fn cancel(&self, id: TimerId) -> bool;

    /// Run `task` after `delay` has elapsed
    fn schedule_after(&self, delay: Duration, task: TimerTask) -> TimerId {
        let deadline = add_duration(self.now(), delay);
        self.schedule_at(deadline, task)
    }
}

/// Saturating `DateTime + std::time::Duration`
pub fn add_duration(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

struct ManualState {
    now: DateTime<Utc>,
    timers: BTreeMap<(DateTime<Utc>, TimerId), TimerTask>,
    deadlines: HashMap<TimerId, DateTime<Utc>>,
    next_id: u64,
}

/// Programmatically advanced clock
///
/// [`ManualClock::advance`] fires every timer due within the jump, in
/// deadline order (ties in scheduling order), before it returns. While a
/// timer runs, `now()` reports that timer's deadline. Timers scheduled by a
/// running timer are honoured within the same jump.
///
/// ```rust
/// use bacnet_events::{Clock, ManualClock};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
/// clock.schedule_after(Duration::from_secs(60), Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// clock.advance(Duration::from_secs(59));
/// assert!(!fired.load(Ordering::SeqCst));
/// clock.advance(Duration::from_secs(1));
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// Start at a fixed, arbitrary epoch (2024-01-01T00:00:00Z, a Monday)
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::starting_at(start)
    }

    /// Start at the given instant
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                timers: BTreeMap::new(),
                deadlines: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Move time forward, firing every timer that comes due on the way
    pub fn advance(&self, by: Duration) {
        let target = add_duration(self.now(), by);
        loop {
            let task = {
                let mut state = self.state.lock();
                let due = state
                    .timers
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(deadline, _)| *deadline <= target);
                match due {
                    Some(key) => {
                        let (deadline, id) = key;
                        state.deadlines.remove(&id);
                        if deadline > state.now {
                            state.now = deadline;
                        }
                        state.timers.remove(&key)
                    }
                    None => None,
                }
            };
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        let mut state = self.state.lock();
        if target > state.now {
            state.now = target;
        }
    }

    /// Number of timers not yet fired or cancelled
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    fn schedule_at(&self, deadline: DateTime<Utc>, task: TimerTask) -> TimerId {
        let mut state = self.state.lock();
        let id = TimerId(state.next_id);
        state.next_id += 1;
        state.timers.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        trace!("Scheduled manual timer {:?} at {}", id, deadline);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.lock();
        match state.deadlines.remove(&id) {
            Some(deadline) => state.timers.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }
}

// ============================================================================
// SYSTEM CLOCK
// ============================================================================

/// Wall-clock time with timers on the tokio runtime
pub struct SystemClock {
    handle: Handle,
    timers: Arc<DashMap<TimerId, AbortHandle>>,
    next_id: AtomicU64,
}

impl SystemClock {
    /// Bind to the tokio runtime of the calling context
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| EventError::Runtime(format!("SystemClock needs a tokio runtime: {}", e)))?;
        Ok(Self::with_handle(handle))
    }

    /// Bind to an explicit runtime handle
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            timers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule_at(&self, deadline: DateTime<Utc>, task: TimerTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let timers = self.timers.clone();
        // Hold the slot until the abort handle is stored so an immediate
        // expiry cannot miss its own registration
        let slot = self.timers.entry(id);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if timers.remove(&id).is_some() {
                task();
            }
        });
        slot.or_insert(join.abort_handle());
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<(u32, DateTime<Utc>)>>>, impl Fn(u32, Arc<ManualClock>) -> TimerTask) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: u32, clock: Arc<ManualClock>| -> TimerTask {
            let sink = sink.clone();
            Box::new(move || sink.lock().push((tag, clock.now())))
        };
        (log, make)
    }

    #[test]
    fn test_timers_fire_in_deadline_order_within_one_jump() {
        let clock = Arc::new(ManualClock::new());
        let start = clock.now();
        let (log, make) = recorder();

        clock.schedule_after(Duration::from_secs(30), make(3, clock.clone()));
        clock.schedule_after(Duration::from_secs(10), make(1, clock.clone()));
        clock.schedule_after(Duration::from_secs(20), make(2, clock.clone()));
        clock.schedule_after(Duration::from_secs(90), make(4, clock.clone()));

        clock.advance(Duration::from_secs(60));

        let log = log.lock();
        let tags: Vec<u32> = log.iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        // now() inside each task is that task's deadline
        assert_eq!(log[0].1, start + chrono::Duration::seconds(10));
        assert_eq!(log[2].1, start + chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(60));
        assert_eq!(clock.pending_timers(), 1);
    }

    #[test]
    fn test_cancelled_timer_is_silent() {
        let clock = Arc::new(ManualClock::new());
        let (log, make) = recorder();

        let id = clock.schedule_after(Duration::from_secs(5), make(1, clock.clone()));
        assert!(clock.cancel(id));
        assert!(!clock.cancel(id));
        clock.advance(Duration::from_secs(10));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_timer_scheduled_by_timer_fires_in_same_jump() {
        let clock = Arc::new(ManualClock::new());
        let (log, make) = recorder();

        let inner_clock = clock.clone();
        let follow_up = make(2, clock.clone());
        let sink = log.clone();
        clock.schedule_after(
            Duration::from_secs(1),
            Box::new(move || {
                sink.lock().push((1, inner_clock.now()));
                inner_clock.schedule_after(Duration::from_secs(1), follow_up);
            }),
        );

        clock.advance(Duration::from_secs(5));
        let tags: Vec<u32> = log.lock().iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_system_clock_cancel() {
        let clock = SystemClock::new().unwrap();
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let id = clock.schedule_after(
            Duration::from_millis(50),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(clock.cancel(id));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
