//! Row types decoded from queries and their conversion into domain records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use treffly_core::error::{EventError, Result};
use treffly_core::image::{ImageId, ImageRef};
use treffly_core::types::{
    Capacity, Coordinates, EventDetails, EventId, EventRecord, InviteToken, OrderId, OrderStatus,
    Owner, PremiumOrder, Tag, TagId, UserId,
};
use uuid::Uuid;

/// Columns selected for every event query, joined with owner, image, tags and
/// participant count. Expects `events e`, `users u` and `images i` aliases.
pub const EVENT_COLUMNS: &str = r"
    e.id, e.name, e.description, e.capacity, e.latitude, e.longitude, e.address,
    e.date, e.is_private, e.is_premium, e.invite_token, e.created_at,
    e.owner_id, u.username AS owner_username,
    e.image_id, i.path AS image_path,
    (SELECT COUNT(*) FROM event_participants ep WHERE ep.event_id = e.id) AS participant_count,
    ARRAY(
        SELECT t.id FROM event_tags et JOIN tags t ON t.id = et.tag_id
        WHERE et.event_id = e.id ORDER BY t.id
    ) AS tag_ids,
    ARRAY(
        SELECT t.name FROM event_tags et JOIN tags t ON t.id = et.tag_id
        WHERE et.event_id = e.id ORDER BY t.id
    ) AS tag_names
";

/// Joins matching [`EVENT_COLUMNS`].
pub const EVENT_SOURCE: &str = r"
    FROM events e
    JOIN users u ON u.id = e.owner_id
    LEFT JOIN images i ON i.id = e.image_id
";

#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    id: i32,
    name: String,
    description: String,
    capacity: i32,
    latitude: Decimal,
    longitude: Decimal,
    address: String,
    date: DateTime<Utc>,
    is_private: bool,
    is_premium: bool,
    invite_token: Option<String>,
    created_at: DateTime<Utc>,
    owner_id: i32,
    owner_username: String,
    image_id: Option<Uuid>,
    image_path: Option<String>,
    participant_count: i64,
    tag_ids: Vec<i32>,
    tag_names: Vec<String>,
}

impl TryFrom<EventRow> for EventRecord {
    type Error = EventError;

    fn try_from(row: EventRow) -> Result<Self> {
        let image = match (row.image_id, row.image_path) {
            (Some(id), Some(path)) => Some(ImageRef::new(ImageId::from_uuid(id), path)),
            _ => None,
        };
        let tags = row
            .tag_ids
            .into_iter()
            .zip(row.tag_names)
            .map(|(id, name)| Tag {
                id: TagId::new(id),
                name,
            })
            .collect();

        Ok(Self {
            id: EventId::new(row.id),
            details: EventDetails {
                name: row.name,
                description: row.description,
                capacity: Capacity::from_raw(row.capacity)?,
                location: Coordinates::new(row.latitude, row.longitude)?,
                address: row.address,
                date: row.date,
                is_private: row.is_private,
            },
            is_premium: row.is_premium,
            created_at: row.created_at,
            owner: Owner {
                id: UserId::new(row.owner_id),
                username: row.owner_username,
            },
            image,
            tags,
            participant_count: u32::try_from(row.participant_count).unwrap_or(u32::MAX),
            invite_token: row.invite_token.map(InviteToken::new),
        })
    }
}

/// Convert a batch of rows, failing on the first malformed one.
pub fn into_records(rows: Vec<EventRow>) -> Result<Vec<EventRecord>> {
    rows.into_iter().map(EventRecord::try_from).collect()
}

#[derive(Debug, sqlx::FromRow)]
pub struct PremiumOrderRow {
    id: i32,
    user_id: i32,
    event_id: i32,
    shop: String,
    price: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PremiumOrderRow> for PremiumOrder {
    type Error = EventError;

    fn try_from(row: PremiumOrderRow) -> Result<Self> {
        Ok(Self {
            id: OrderId::new(row.id),
            user_id: UserId::new(row.user_id),
            event_id: EventId::new(row.event_id),
            shop: row.shop,
            price: row.price,
            status: OrderStatus::parse(&row.status)?,
            created_at: row.created_at,
        })
    }
}

/// Great-circle distance in kilometres between the event and the point bound
/// at placeholders `$lat` / `$lon` (as `float8`).
pub fn distance_sql(lat: usize, lon: usize) -> String {
    format!(
        "(6371.0 * 2 * ASIN(LEAST(1.0, SQRT(\
            POWER(SIN(RADIANS(e.latitude::float8 - ${lat}) / 2), 2) \
            + COS(RADIANS(${lat})) * COS(RADIANS(e.latitude::float8)) \
            * POWER(SIN(RADIANS(e.longitude::float8 - ${lon}) / 2), 2)))))"
    )
}

/// Search, tag and date-range predicate with parameters starting at `first`:
/// search text, tag ids, window start, window end.
pub fn filter_sql(first: usize) -> String {
    let (search, tags, start, end) = (first, first + 1, first + 2, first + 3);
    format!(
        "(${search}::text IS NULL \
            OR strpos(lower(e.name), lower(${search})) > 0 \
            OR strpos(lower(e.description), lower(${search})) > 0) \
        AND (cardinality(${tags}::int4[]) = 0 OR EXISTS (\
            SELECT 1 FROM event_tags ft WHERE ft.event_id = e.id AND ft.tag_id = ANY(${tags}))) \
        AND (${start}::timestamptz IS NULL OR (e.date >= ${start} AND e.date < ${end}::timestamptz))"
    )
}
