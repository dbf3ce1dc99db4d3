//! # Treffly Core
//!
//! Event lifecycle and subscription engine for Treffly.
//!
//! This crate keeps an event, its image reference, its tag set and its
//! participant roster consistent under concurrent access. It provides:
//!
//! - **Types**: identifiers, capacity, coordinates, stored records and
//!   viewer-relative views
//! - **Repository**: the [`EventRepository`] contract a transactional store
//!   must satisfy (create-with-image, update-with-image-swap,
//!   subscribe-with-capacity-check, premium completion)
//! - **Service**: [`EventService`], which enforces ownership and business
//!   rules on top of the repository and shapes responses
//! - **Feed**: the home feed assembler combining premium, recommended, latest
//!   and popular events
//!
//! ## Architecture Principles
//!
//! - Storage coordination lives in repository transactions, never in
//!   process-local state
//! - Dependencies (repository, clock, configuration) are injected at
//!   construction
//! - Viewer-relative flags (`is_owner`, `is_participant`) are derived per
//!   request and never stored
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use treffly_core::{EventService, ServiceConfig, environment::SystemClock};
//!
//! let service = EventService::new(
//!     Arc::new(repository),
//!     Arc::new(SystemClock),
//!     ServiceConfig::default(),
//! );
//!
//! let view = service.get_event(event_id, Some(viewer), None).await?;
//! assert!(!view.is_owner || !view.is_participant);
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod image;
pub mod repository;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use config::{Config, DatabaseConfig, ServiceConfig};
pub use error::{ErrorKind, EventError, OwnershipMismatch, Result};
pub use feed::{HomeFeed, RecommendationSource};
pub use image::{ImageChange, ImageId, ImageRef, ImageTransition};
pub use repository::{Admission, BoxFuture, EventRepository, OwnedLookup};
pub use service::EventService;

/// Environment module - injected capabilities
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use treffly_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
