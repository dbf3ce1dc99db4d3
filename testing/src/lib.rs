//! # Treffly Testing
//!
//! Testing utilities for the Treffly event engine.
//!
//! This crate provides:
//! - Deterministic [`Clock`] implementations
//! - [`InMemoryEventRepository`], a transactional in-memory store
//! - Request builders and property-test strategies
//! - [`init_test_tracing`] for readable logs in test output
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use treffly_core::{EventService, ServiceConfig};
//! use treffly_core::types::UserId;
//! use treffly_testing::{InMemoryEventRepository, test_clock};
//!
//! let repository = InMemoryEventRepository::new().with_user(UserId::new(1), "alice");
//! let service = EventService::new(
//!     Arc::new(repository.clone()),
//!     Arc::new(test_clock()),
//!     ServiceConfig::default(),
//! );
//! # let _ = service;
//! ```

use chrono::{DateTime, Utc};
use treffly_core::environment::Clock;

pub mod fixtures;
mod in_memory;

pub use in_memory::InMemoryEventRepository;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use treffly_testing::mocks::FixedClock;
    /// use treffly_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep a handle and advance
    /// the clock the service sees.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        ///
        /// # Panics
        ///
        /// Panics if the clock mutex is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing strategies for domain values.
pub mod properties {
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use treffly_core::types::{Capacity, Coordinates};

    /// Any valid capacity, unlimited included.
    pub fn arb_capacity() -> impl Strategy<Value = Capacity> {
        prop_oneof![
            Just(Capacity::Unlimited),
            (1i32..500).prop_filter_map("positive capacity", |raw| Capacity::from_raw(raw).ok()),
        ]
    }

    /// Any valid coordinates with six fractional digits.
    pub fn arb_coordinates() -> impl Strategy<Value = Coordinates> {
        (-90_000_000i64..=90_000_000, -180_000_000i64..=180_000_000).prop_filter_map(
            "coordinates in range",
            |(latitude, longitude)| {
                Coordinates::new(Decimal::new(latitude, 6), Decimal::new(longitude, 6)).ok()
            },
        )
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_manual_clock_advances_all_handles() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();
        handle.advance(chrono::Duration::hours(2));

        assert_eq!(clock.now(), test_clock().now() + chrono::Duration::hours(2));
    }

    proptest! {
        #[test]
        fn prop_arb_capacity_round_trips_raw(capacity in properties::arb_capacity()) {
            let raw = capacity.as_raw();
            prop_assert!(raw.is_ok());
            let raw = raw.unwrap_or_default();
            prop_assert!(raw >= 0);
            prop_assert_eq!(treffly_core::types::Capacity::from_raw(raw), Ok(capacity));
        }

        #[test]
        fn prop_arb_coordinates_distance_to_self_is_zero(point in properties::arb_coordinates()) {
            prop_assert!(point.distance_km(&point).abs() < 1e-6);
        }
    }
}
