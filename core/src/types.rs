//! Domain types for events, participants, tags and premium orders.
//!
//! Stored records ([`EventRecord`]) and viewer-relative responses
//! ([`EventView`]) are kept apart: the `is_owner` and `is_participant` flags
//! exist only on the view and are computed per request.

use crate::error::{EventError, Result};
use crate::image::{ImageChange, ImageRef};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            #[doc = concat!("Create a `", stringify!($name), "` from its database value")]
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Get the database value
            #[must_use]
            pub const fn get(self) -> i32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

integer_id!(
    /// Unique identifier for an event
    EventId
);
integer_id!(
    /// Unique identifier for a user (issued by the authentication service)
    UserId
);
integer_id!(
    /// Unique identifier for a tag in the fixed vocabulary
    TagId
);
integer_id!(
    /// Unique identifier for a premium order
    OrderId
);

// ============================================================================
// Value Objects
// ============================================================================

/// Maximum number of participants an event admits.
///
/// A stored capacity of `0` means the event has no limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i64")]
pub enum Capacity {
    /// Any number of participants may join
    Unlimited,
    /// At most this many participants may join
    Limited(NonZeroU32),
}

impl Capacity {
    /// Build a capacity from its stored value (`0` = unlimited).
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidCapacity`] for negative values.
    pub fn from_raw(raw: i32) -> Result<Self> {
        let value = u32::try_from(raw).map_err(|_| EventError::InvalidCapacity(i64::from(raw)))?;
        Ok(NonZeroU32::new(value).map_or(Self::Unlimited, Self::Limited))
    }

    /// Stored value of this capacity (`0` = unlimited).
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidCapacity`] if the limit does not fit the
    /// stored column.
    pub fn as_raw(self) -> Result<i32> {
        match self {
            Self::Unlimited => Ok(0),
            Self::Limited(limit) => i32::try_from(limit.get())
                .map_err(|_| EventError::InvalidCapacity(i64::from(limit.get()))),
        }
    }

    /// Whether one more participant fits given the current roster size.
    ///
    /// # Examples
    ///
    /// ```
    /// use treffly_core::types::Capacity;
    ///
    /// let one = Capacity::from_raw(1).unwrap();
    /// assert!(one.admits(0));
    /// assert!(!one.admits(1));
    /// assert!(Capacity::Unlimited.admits(u32::MAX));
    /// ```
    #[must_use]
    pub const fn admits(self, participants: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(limit) => participants < limit.get(),
        }
    }
}

impl TryFrom<i32> for Capacity {
    type Error = EventError;

    fn try_from(raw: i32) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl From<Capacity> for i64 {
    fn from(capacity: Capacity) -> Self {
        match capacity {
            Capacity::Unlimited => 0,
            Capacity::Limited(limit) => Self::from(limit.get()),
        }
    }
}

/// Geographic position stored with six fractional digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinates")]
pub struct Coordinates {
    latitude: Decimal,
    longitude: Decimal,
}

/// Unchecked wire form of [`Coordinates`].
#[derive(Deserialize)]
struct RawCoordinates {
    latitude: Decimal,
    longitude: Decimal,
}

impl TryFrom<RawCoordinates> for Coordinates {
    type Error = EventError;

    fn try_from(raw: RawCoordinates) -> Result<Self> {
        Self::new(raw.latitude, raw.longitude)
    }
}

const EARTH_RADIUS_KM: f64 = 6371.0;
const COORDINATE_SCALE: u32 = 6;

impl Coordinates {
    /// Create coordinates, rounding to the stored precision.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidCoordinates`] if latitude is outside
    /// `[-90, 90]` or longitude is outside `[-180, 180]`.
    pub fn new(latitude: Decimal, longitude: Decimal) -> Result<Self> {
        if latitude < Decimal::from(-90) || latitude > Decimal::from(90) {
            return Err(EventError::InvalidCoordinates {
                reason: format!("latitude {latitude} out of range"),
            });
        }
        if longitude < Decimal::from(-180) || longitude > Decimal::from(180) {
            return Err(EventError::InvalidCoordinates {
                reason: format!("longitude {longitude} out of range"),
            });
        }
        Ok(Self {
            latitude: latitude.round_dp(COORDINATE_SCALE),
            longitude: longitude.round_dp(COORDINATE_SCALE),
        })
    }

    /// Latitude in degrees.
    #[must_use]
    pub const fn latitude(&self) -> Decimal {
        self.latitude
    }

    /// Longitude in degrees.
    #[must_use]
    pub const fn longitude(&self) -> Decimal {
        self.longitude
    }

    /// Latitude and longitude as floating point degrees.
    #[must_use]
    pub fn as_f64(&self) -> (f64, f64) {
        (
            self.latitude.to_f64().unwrap_or_default(),
            self.longitude.to_f64().unwrap_or_default(),
        )
    }

    /// Great-circle distance in kilometres (haversine).
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let (lat1, lon1) = self.as_f64();
        let (lat2, lon2) = other.as_f64();
        let d_lat = (lat2 - lat1).to_radians();
        let d_lon = (lon2 - lon1).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
    }
}

/// Opaque invitation token granting access to a private event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteToken(String);

impl InviteToken {
    /// Mint a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap a token presented by a caller or read from storage.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Entry of the fixed tag vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag identifier
    pub id: TagId,
    /// Display name
    pub name: String,
}

/// Owner reference carried by an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owner identity
    pub id: UserId,
    /// Owner display name
    pub username: String,
}

// ============================================================================
// Events
// ============================================================================

/// Editable scalar attributes of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    /// Event name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Participant limit
    pub capacity: Capacity,
    /// Where the event takes place
    pub location: Coordinates,
    /// Human-readable address
    pub address: String,
    /// When the event takes place
    pub date: DateTime<Utc>,
    /// Hidden from listings and guarded by an invitation token
    pub is_private: bool,
}

/// Input to the create-event-with-image transaction.
#[derive(Clone, Debug)]
pub struct NewEvent {
    /// Scalar attributes
    pub details: EventDetails,
    /// Tag set (no duplicates)
    pub tags: BTreeSet<TagId>,
    /// Creator and owner
    pub owner: UserId,
    /// Image record inserted with the event
    pub image: ImageRef,
    /// Invitation token (private events only)
    pub invite_token: Option<InviteToken>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Input to the update-event-with-image-swap transaction.
#[derive(Clone, Debug)]
pub struct EventRewrite {
    /// Event being rewritten
    pub event_id: EventId,
    /// New scalar attributes
    pub details: EventDetails,
    /// Replacement tag set
    pub tags: BTreeSet<TagId>,
    /// Requested image change, resolved against the locked row
    pub image: ImageChange,
    /// Invitation token after the update (`None` for public events)
    pub invite_token: Option<InviteToken>,
}

/// Event as stored, joined with owner, image, tags and participant count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    /// Event identifier
    pub id: EventId,
    /// Scalar attributes
    pub details: EventDetails,
    /// Featured placement unlocked by a completed premium order
    pub is_premium: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Owner reference
    pub owner: Owner,
    /// Associated image, if any
    pub image: Option<ImageRef>,
    /// Tags ordered by id
    pub tags: Vec<Tag>,
    /// Number of participants (never counts the owner)
    pub participant_count: u32,
    /// Invitation token of a private event
    pub invite_token: Option<InviteToken>,
}

impl EventRecord {
    /// Whether `user` is the recorded owner.
    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner.id == user
    }
}

/// Event as returned to a specific viewer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventView {
    /// Event identifier
    pub id: EventId,
    /// Scalar attributes
    #[serde(flatten)]
    pub details: EventDetails,
    /// Featured placement
    pub is_premium: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Owner reference
    pub owner: Owner,
    /// Storage path of the associated image
    pub image_path: Option<String>,
    /// Tags ordered by id
    pub tags: Vec<Tag>,
    /// Number of participants
    pub participant_count: u32,
    /// Invitation token, only revealed to the owner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<InviteToken>,
    /// Viewer owns the event
    pub is_owner: bool,
    /// Viewer is in the participant roster
    pub is_participant: bool,
}

impl EventView {
    /// Shape a stored record for a viewer with freshly derived flags.
    #[must_use]
    pub fn new(record: EventRecord, is_owner: bool, is_participant: bool) -> Self {
        Self {
            id: record.id,
            details: record.details,
            is_premium: record.is_premium,
            created_at: record.created_at,
            owner: record.owner,
            image_path: record.image.map(|image| image.path),
            tags: record.tags,
            participant_count: record.participant_count,
            invite_token: if is_owner { record.invite_token } else { None },
            is_owner,
            is_participant,
        }
    }

    /// Shape a listing entry. Ownership is derived from the viewer; membership
    /// is only set where the listing itself implies it.
    #[must_use]
    pub fn listed(record: EventRecord, viewer: Option<UserId>, is_participant: bool) -> Self {
        let is_owner = viewer.is_some_and(|viewer| record.is_owned_by(viewer));
        Self::new(record, is_owner, is_participant)
    }
}

// ============================================================================
// Service Inputs
// ============================================================================

/// Request to create an event.
#[derive(Clone, Debug)]
pub struct CreateEvent {
    /// Scalar attributes
    pub details: EventDetails,
    /// Tag set
    pub tags: BTreeSet<TagId>,
    /// Creator
    pub owner: UserId,
    /// Image already uploaded to the image collaborator
    pub image: ImageRef,
}

/// Request to update an event.
#[derive(Clone, Debug)]
pub struct UpdateEvent {
    /// Event to update
    pub event_id: EventId,
    /// Caller; must be the owner
    pub editor: UserId,
    /// New scalar attributes
    pub details: EventDetails,
    /// Replacement tag set
    pub tags: BTreeSet<TagId>,
    /// Replacement image, if one was uploaded
    pub new_image: Option<ImageRef>,
    /// Remove the image; wins over `new_image`
    pub delete_image: bool,
}

// ============================================================================
// Listing
// ============================================================================

/// Date window filter for listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    /// No date restriction
    #[default]
    Any,
    /// Today (UTC)
    Today,
    /// Tomorrow (UTC)
    Tomorrow,
    /// Next 7 days
    Week,
    /// Next 30 days
    Month,
}

impl DateRange {
    /// Half-open `[start, end)` window relative to `now`.
    #[must_use]
    pub fn bounds(self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let midnight = now.date_naive().and_time(NaiveTime::default()).and_utc();
        match self {
            Self::Any => None,
            Self::Today => Some((midnight, midnight + Duration::days(1))),
            Self::Tomorrow => Some((midnight + Duration::days(1), midnight + Duration::days(2))),
            Self::Week => Some((now, now + Duration::days(7))),
            Self::Month => Some((now, now + Duration::days(30))),
        }
    }
}

impl FromStr for DateRange {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "any" => Ok(Self::Any),
            "today" => Ok(Self::Today),
            "tomorrow" => Ok(Self::Tomorrow),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(EventError::InvalidDateRange(other.to_string())),
        }
    }
}

/// Filters for event listings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Order by distance from this point
    pub near: Option<Coordinates>,
    /// Case-insensitive match on name or description
    pub search: Option<String>,
    /// Events carrying any of these tags
    pub tags: BTreeSet<TagId>,
    /// Date window
    pub date_range: DateRange,
}

impl ListFilter {
    /// Whether a record passes the search, tag and date filters.
    #[must_use]
    pub fn matches(&self, record: &EventRecord, now: DateTime<Utc>) -> bool {
        let search_ok = self.search.as_deref().is_none_or(|term| {
            let term = term.to_lowercase();
            record.details.name.to_lowercase().contains(&term)
                || record.details.description.to_lowercase().contains(&term)
        });
        let tags_ok =
            self.tags.is_empty() || record.tags.iter().any(|tag| self.tags.contains(&tag.id));
        let date_ok = self
            .date_range
            .bounds(now)
            .is_none_or(|(start, end)| record.details.date >= start && record.details.date < end);
        search_ok && tags_ok && date_ok
    }
}

// ============================================================================
// Premium Orders
// ============================================================================

/// Lifecycle of a premium order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Purchase intent recorded, payment not confirmed
    Pending,
    /// Payment confirmed; the event is premium
    Completed,
}

impl OrderStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            _ => Err(EventError::InvalidOrderStatus(s.to_string())),
        }
    }
}

/// Recorded purchase intent for featured placement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumOrder {
    /// Order identifier
    pub id: OrderId,
    /// Buyer
    pub user_id: UserId,
    /// Event to feature
    pub event_id: EventId,
    /// Shop or sales channel
    pub shop: String,
    /// Price paid
    pub price: Decimal,
    /// Current status
    pub status: OrderStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Input for creating a premium order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPremiumOrder {
    /// Buyer
    pub user_id: UserId,
    /// Event to feature
    pub event_id: EventId,
    /// Shop or sales channel
    pub shop: String,
    /// Price
    pub price: Decimal,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn coords(lat: i64, lon: i64) -> Coordinates {
        Coordinates::new(Decimal::from(lat), Decimal::from(lon)).unwrap()
    }

    #[test]
    fn test_capacity_zero_is_unlimited() {
        assert_eq!(Capacity::from_raw(0).unwrap(), Capacity::Unlimited);
        assert_eq!(Capacity::Unlimited.as_raw(), Ok(0));
        assert!(Capacity::Unlimited.admits(10_000));
    }

    #[test]
    fn test_capacity_rejects_negative() {
        assert_eq!(Capacity::from_raw(-1), Err(EventError::InvalidCapacity(-1)));
    }

    #[test]
    fn test_capacity_beyond_column_range_is_rejected() {
        let huge = Capacity::Limited(NonZeroU32::new(u32::MAX).unwrap());
        assert_eq!(huge.as_raw(), Err(EventError::InvalidCapacity(i64::from(u32::MAX))));
    }

    #[test]
    fn test_capacity_boundary() {
        let capacity = Capacity::from_raw(3).unwrap();
        assert_eq!(capacity.as_raw(), Ok(3));
        assert!(capacity.admits(2));
        assert!(!capacity.admits(3));
        assert!(!capacity.admits(4));
    }

    proptest! {
        #[test]
        fn prop_limited_capacity_admits_below_limit(limit in 1i32..10_000, count in 0u32..20_000) {
            let capacity = Capacity::from_raw(limit).unwrap();
            prop_assert_eq!(capacity.admits(count), count < limit.unsigned_abs());
        }
    }

    #[test]
    fn test_coordinates_round_to_six_digits() {
        let c = Coordinates::new(Decimal::new(516_683_123, 7), Decimal::new(391_919, 4)).unwrap();
        assert_eq!(c.latitude(), Decimal::new(51_668_312, 6));
        assert_eq!(c.longitude(), Decimal::new(391_919, 4));
    }

    #[test]
    fn test_coordinates_out_of_range() {
        assert!(Coordinates::new(Decimal::from(91), Decimal::ZERO).is_err());
        assert!(Coordinates::new(Decimal::ZERO, Decimal::from(-181)).is_err());
    }

    #[test]
    fn test_deserialized_coordinates_are_validated_and_rounded() {
        let out_of_range =
            serde_json::from_str::<Coordinates>(r#"{"latitude":"95.1234567","longitude":"500"}"#);
        assert!(out_of_range.is_err());

        let c: Coordinates =
            serde_json::from_str(r#"{"latitude":"51.6683123","longitude":"39.1919"}"#).unwrap();
        assert_eq!(c.latitude(), Decimal::new(51_668_312, 6));
        assert_eq!(c.longitude(), Decimal::new(391_919, 4));
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_self() {
        let a = coords(51, 39);
        let b = coords(55, 37);
        assert!(a.distance_km(&a).abs() < 1e-9);
        assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-9);
        // One degree of latitude is roughly 111 km.
        let c = coords(52, 39);
        assert!((a.distance_km(&c) - 111.19).abs() < 0.5);
    }

    #[test]
    fn test_date_range_parse() {
        assert_eq!("".parse::<DateRange>().unwrap(), DateRange::Any);
        assert_eq!("week".parse::<DateRange>().unwrap(), DateRange::Week);
        assert!(matches!(
            "fortnight".parse::<DateRange>(),
            Err(EventError::InvalidDateRange(s)) if s == "fortnight"
        ));
    }

    #[test]
    fn test_date_range_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 30, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();

        assert_eq!(DateRange::Any.bounds(now), None);
        assert_eq!(
            DateRange::Today.bounds(now),
            Some((midnight, midnight + Duration::days(1)))
        );
        assert_eq!(
            DateRange::Tomorrow.bounds(now),
            Some((midnight + Duration::days(1), midnight + Duration::days(2)))
        );
        assert_eq!(DateRange::Week.bounds(now), Some((now, now + Duration::days(7))));
    }

    #[test]
    fn test_order_status_round_trip_strings() {
        assert_eq!(OrderStatus::parse("pending").unwrap(), OrderStatus::Pending);
        assert_eq!(OrderStatus::Completed.as_str(), "completed");
        assert!(OrderStatus::parse("refunded").is_err());
    }

    #[test]
    fn test_invite_token_generated_tokens_differ() {
        assert_ne!(InviteToken::generate(), InviteToken::generate());
        assert_eq!(InviteToken::generate().as_str().len(), 32);
    }
}
