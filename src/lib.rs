//! BACNET-EVENTS - Intrinsic and Algorithmic Event Reporting
//!
//! The alarm and event subsystem of a BACnet device. Monitored properties are
//! evaluated against an event algorithm, transitions are debounced with the
//! configured time delays, and every committed transition is fanned out to
//! the recipients of its notification class.
//!
//! # Feature Flags
//!
//! - **metrics**: counters for transitions, queued notifications, delivery
//!   failures and enrollment poll failures
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bacnet_events::{Config, EventEngine, LoggingTransport, SystemClock};
//!
//! # async fn run() -> bacnet_events::Result<()> {
//! bacnet_events::init()?;
//!
//! let config = Config::from_file("bacnet-events.yaml")?;
//! let engine = EventEngine::new(
//!     config,
//!     Arc::new(SystemClock::new()?),
//!     Arc::new(LoggingTransport::new()),
//! )?;
//! engine.start();
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type shared by every module
pub mod error;

/// Property values
pub mod value;

/// Object and property identifiers
pub mod object;

/// Property store with write validation and change observers
pub mod property;

/// Injectable time source and timer scheduling
pub mod clock;

// ============================================================================
// EVENT REPORTING
// ============================================================================

/// Event algorithms, per-object state machines and event enrollments
pub mod event;

/// Notification classes and per-recipient dispatch
pub mod notification;

/// Outbound send interface
pub mod transport;

// ============================================================================
// RUNTIME
// ============================================================================

/// YAML device configuration
pub mod config;

/// Wiring of all objects of one device
pub mod engine;

// ============================================================================
// PUBLIC RE-EXPORTS
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock, TimerId};
pub use config::Config;
pub use engine::{EngineStats, EventEngine, EventInformation};
pub use error::{EventError, Result};
pub use event::{
    AckStatus, EnrollmentPoller, EventAlgorithm, EventConfig, EventState, EventStateMachine, EventType, Evaluation,
    FaultPolicy, NotificationSink, NotifyType, ObjectPropertyReference, PollOutcome, PollStats, PropertyReader,
    Reliability, Sample, StatusFlags, Transition, TransitionBits, TransitionRecord,
};
pub use notification::{
    ActiveWindow, Destination, EventNotification, NotificationClass, NotificationClassRegistry,
    NotificationDispatcher, NotificationParameters, NotificationRequest, Resolution,
};
pub use object::{ObjectId, ObjectType, PropertyId};
pub use property::{PropertyChange, PropertyStore};
pub use transport::{Address, LoggingTransport, Recipient, Transport};
pub use value::Value;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate authors
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Build information
pub mod build_info {
    /// Git commit hash (if available)
    pub const GIT_HASH: Option<&str> = option_env!("BACNET_EVENTS_GIT_HASH");

    /// Build timestamp
    pub const BUILD_TIMESTAMP: &str = env!("BACNET_EVENTS_BUILD_TIMESTAMP");

    /// Rust compiler version
    pub const RUSTC_VERSION: &str = env!("BACNET_EVENTS_RUSTC_VERSION");

    /// Target triple
    pub const TARGET: &str = env!("BACNET_EVENTS_TARGET");

    /// Build profile
    pub const PROFILE: &str = env!("BACNET_EVENTS_PROFILE");
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize logging and, with the `metrics` feature, metric descriptions
///
/// Safe to call more than once; a subscriber that is already installed is
/// left in place.
pub fn init() -> Result<()> {
    #[cfg(not(test))]
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "bacnet_events=info");
    }

    #[cfg(not(test))]
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().with_target(false));

        // Already initialized
        let _ = subscriber.try_init();
    }

    #[cfg(feature = "metrics")]
    init_metrics_registry();

    tracing::info!("bacnet-events {} initialized", VERSION);
    Ok(())
}

#[cfg(feature = "metrics")]
fn init_metrics_registry() {
    use metrics::describe_counter;

    describe_counter!("bacnet_events_transitions_total", "Committed event state transitions");
    describe_counter!("bacnet_events_notifications_queued_total", "Notifications queued for delivery");
    describe_counter!("bacnet_events_delivery_failures_total", "Notification sends the transport rejected");
    describe_counter!("bacnet_events_poll_failures_total", "Event enrollment reads that failed or timed out");

    tracing::debug!("Metrics registry initialized");
}

/// Print version and build information
pub fn print_system_info() {
    println!("bacnet-events {}", VERSION);
    println!("Authors: {}", AUTHORS);
    if let Some(git_hash) = build_info::GIT_HASH {
        println!("Git Hash: {}", git_hash);
    }
    println!("Built: {}", build_info::BUILD_TIMESTAMP);
    println!("Build Target: {}", build_info::TARGET);
    println!("Build Profile: {}", build_info::PROFILE);
    println!("Rust Version: {}", build_info::RUSTC_VERSION);
}
