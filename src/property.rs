// src/property.rs - Property store with write interception
use crate::{
    error::{EventError, Result},
    object::{ObjectId, PropertyId},
    value::Value,
};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A committed property write, handed to observers
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub object: ObjectId,
    pub property: PropertyId,
    pub old: Option<Value>,
    pub new: Value,
}

/// Callback invoked after a value is committed
pub type Observer = Arc<dyn Fn(&PropertyChange) + Send + Sync>;

/// Callback invoked before a value is committed; an error rejects the write
pub type Validator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Handle returned by [`PropertyStore::subscribe`] and [`PropertyStore::add_validator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Key = (ObjectId, PropertyId);

/// Thread-safe per-object property storage
///
/// The store is the exchange point between the object model and the event
/// subsystem. Writes pass through registered validators, are committed, and
/// then fan out to observers synchronously and in registration order.
///
/// # Examples
///
/// ```rust
/// use bacnet_events::{ObjectId, ObjectType, PropertyId, PropertyStore, Value};
///
/// let store = PropertyStore::new();
/// let ai = ObjectId::new(ObjectType::AnalogInput, 1);
///
/// store.write(ai, PropertyId::PresentValue, Value::Float(23.5))?;
/// assert_eq!(store.get_float(ai, PropertyId::PresentValue)?, 23.5);
/// # Ok::<(), bacnet_events::EventError>(())
/// ```
#[derive(Clone)]
pub struct PropertyStore {
    values: Arc<DashMap<Key, Value>>,
    validators: Arc<DashMap<Key, Vec<(SubscriptionId, Validator)>>>,
    observers: Arc<DashMap<Key, Vec<(SubscriptionId, Observer)>>>,
    next_id: Arc<AtomicU64>,
}

impl PropertyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            values: Arc::new(DashMap::new()),
            validators: Arc::new(DashMap::new()),
            observers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Seed a value without running validators or observers
    pub fn initialize(&self, object: ObjectId, property: PropertyId, value: Value) {
        trace!("Initializing {} {} = {}", object, property, value);
        self.values.insert((object, property), value);
    }

    /// Validate, commit and announce a property value
    ///
    /// Observers run after the value is visible to readers. The store holds no
    /// internal lock while they run, so an observer may read the store freely.
    pub fn write(&self, object: ObjectId, property: PropertyId, value: Value) -> Result<()> {
        let key = (object, property);

        let validators: Vec<Validator> = self
            .validators
            .get(&key)
            .map(|entry| entry.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default();
        for validator in validators {
            validator(&value)?;
        }

        trace!("Writing {} {} = {}", object, property, value);
        let old = self.values.insert(key, value.clone());

        let observers: Vec<Observer> = self
            .observers
            .get(&key)
            .map(|entry| entry.iter().map(|(_, o)| o.clone()).collect())
            .unwrap_or_default();
        if !observers.is_empty() {
            let change = PropertyChange { object, property, old, new: value };
            for observer in observers {
                observer(&change);
            }
        }
        Ok(())
    }

    /// Get a property value
    ///
    /// Returns `None` if the property has never been set.
    pub fn get(&self, object: ObjectId, property: PropertyId) -> Option<Value> {
        self.values.get(&(object, property)).map(|entry| entry.value().clone())
    }

    /// Get a property value, failing when it is missing
    pub fn require(&self, object: ObjectId, property: PropertyId) -> Result<Value> {
        self.get(object, property)
            .ok_or(EventError::PropertyNotFound { object, property })
    }

    /// Get a numeric property value
    ///
    /// Performs type conversion where appropriate.
    pub fn get_float(&self, object: ObjectId, property: PropertyId) -> Result<f64> {
        let value = self.require(object, property)?;
        value.as_float().ok_or(EventError::TypeMismatch {
            expected: "float",
            actual: value.type_name(),
        })
    }

    /// Register an observer for committed writes of one property
    pub fn subscribe(&self, object: ObjectId, property: PropertyId, observer: Observer) -> SubscriptionId {
        let id = self.next_subscription();
        self.observers.entry((object, property)).or_default().push((id, observer));
        id
    }

    /// Register a validator that runs before writes of one property commit
    pub fn add_validator(&self, object: ObjectId, property: PropertyId, validator: Validator) -> SubscriptionId {
        let id = self.next_subscription();
        self.validators.entry((object, property)).or_default().push((id, validator));
        id
    }

    /// Remove an observer or validator by handle
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.observers.iter_mut() {
            let before = entry.len();
            entry.retain(|(sid, _)| *sid != id);
            removed |= entry.len() != before;
        }
        for mut entry in self.validators.iter_mut() {
            let before = entry.len();
            entry.retain(|(sid, _)| *sid != id);
            removed |= entry.len() != before;
        }
        removed
    }

    fn next_subscription(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStore")
            .field("values", &self.values.len())
            .field("observed", &self.observers.len())
            .finish()
    }
}
