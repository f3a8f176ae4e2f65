// src/notification/dispatcher.rs - Fan-out of notification requests
//
// Each (recipient, process id) pair gets its own delivery queue drained by a
// dedicated task, so sends to one destination leave in commit order while a
// slow or failing destination never holds up the others.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use super::{EventNotification, NotificationClassRegistry, NotificationRequest};
use crate::{
    clock::Clock,
    error::{EventError, Result},
    event::{NotificationSink, Transition},
    transport::{Recipient, Transport},
};

type QueueKey = (Recipient, u32);

struct Delivery {
    recipient: Recipient,
    confirmed: bool,
    notification: EventNotification,
}

/// Outcome of resolving one request against its notification class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Destinations a send was queued for
    pub queued: usize,
    /// Destinations whose transition filter excluded the request
    pub filtered: usize,
    /// Destinations outside their active window
    pub inactive: usize,
}

/// Delivery counters since creation
#[derive(Debug, Default)]
struct DeliveryStats {
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Resolves notification requests into per-recipient sends
pub struct NotificationDispatcher {
    registry: Arc<NotificationClassRegistry>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    handle: Handle,
    queues: Mutex<HashMap<QueueKey, mpsc::UnboundedSender<Delivery>>>,
    outstanding: Arc<watch::Sender<usize>>,
    stats: Arc<DeliveryStats>,
}

impl NotificationDispatcher {
    /// Create a dispatcher whose delivery tasks run on the current tokio runtime
    pub fn new(
        registry: Arc<NotificationClassRegistry>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| EventError::Runtime(format!("dispatcher needs a tokio runtime: {}", e)))?;
        Ok(Self::with_handle(registry, transport, clock, handle))
    }

    pub fn with_handle(
        registry: Arc<NotificationClassRegistry>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        handle: Handle,
    ) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            registry,
            transport,
            clock,
            handle,
            queues: Mutex::new(HashMap::new()),
            outstanding: Arc::new(outstanding),
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<NotificationClassRegistry> {
        &self.registry
    }

    /// Queue one send per destination that accepts the request right now
    ///
    /// Returns once every send is queued; delivery happens in the background.
    pub fn dispatch(&self, request: &NotificationRequest) -> Result<DispatchSummary> {
        let transition = request.transition();
        let resolution = self
            .registry
            .resolve(request.notification_class, transition, self.clock.now())?;

        let mut summary = DispatchSummary {
            queued: 0,
            filtered: resolution.filtered,
            inactive: resolution.inactive,
        };
        for destination in resolution.destinations {
            self.enqueue(Delivery {
                notification: EventNotification::new(request, destination.process_id, resolution.priority),
                recipient: destination.recipient,
                confirmed: destination.confirmed,
            });
            summary.queued += 1;
        }

        debug!(
            "{} {} -> {} via class {}: {} queued, {} filtered, {} inactive",
            request.source,
            request.from_state,
            request.to_state,
            request.notification_class,
            summary.queued,
            summary.filtered,
            summary.inactive
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("bacnet_events_notifications_queued_total").increment(summary.queued as u64);

        Ok(summary)
    }

    /// Wait until every queued send has completed
    pub async fn flush(&self) {
        let mut outstanding = self.outstanding.subscribe();
        // The sender lives as long as `self`, so this only ends at zero
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// Sends completed successfully
    pub fn sent(&self) -> u64 {
        self.stats.sent.load(Ordering::Relaxed)
    }

    /// Sends the transport reported as failed
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    fn enqueue(&self, delivery: Delivery) {
        let key = (delivery.recipient.clone(), delivery.notification.process_id);
        self.outstanding.send_modify(|n| *n += 1);

        let mut queues = self.queues.lock();
        let delivery = match queues.get(&key) {
            Some(tx) => match tx.send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(delivery)) => delivery,
            },
            None => delivery,
        };

        trace!("Starting delivery queue for {} (process {})", key.0, key.1);
        let (tx, rx) = mpsc::unbounded_channel();
        // A fresh receiver is alive until the task below drops it
        let _ = tx.send(delivery);
        self.handle.spawn(deliver(
            rx,
            self.transport.clone(),
            self.stats.clone(),
            self.outstanding.clone(),
        ));
        queues.insert(key, tx);
    }
}

async fn deliver(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    transport: Arc<dyn Transport>,
    stats: Arc<DeliveryStats>,
    outstanding: Arc<watch::Sender<usize>>,
) {
    while let Some(delivery) = rx.recv().await {
        let Delivery { recipient, confirmed, notification } = delivery;
        let process_id = notification.process_id;
        let result = if confirmed {
            transport.send_confirmed(&recipient, process_id, &notification).await
        } else {
            transport.send_unconfirmed(&recipient, process_id, &notification).await
        };
        match result {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Notification of {} {} -> {} to {} (process {}) failed: {}",
                    notification.event_object,
                    notification.from_state,
                    notification.to_state,
                    recipient,
                    process_id,
                    e
                );
                #[cfg(feature = "metrics")]
                metrics::counter!("bacnet_events_delivery_failures_total").increment(1);
            }
        }
        outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl NotificationSink for NotificationDispatcher {
    fn ack_required(&self, notification_class: u32, transition: Transition) -> bool {
        self.registry
            .ack_required_for(notification_class, transition)
            .unwrap_or(false)
    }

    fn notify(&self, request: NotificationRequest) {
        if let Err(e) = self.dispatch(&request) {
            warn!("Dropping notification from {}: {}", request.source, e);
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("queues", &self.queues.lock().len())
            .field("sent", &self.sent())
            .field("failed", &self.failed())
            .finish()
    }
}
