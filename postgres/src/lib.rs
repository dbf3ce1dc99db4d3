//! `PostgreSQL` event repository for Treffly.
//!
//! This crate implements the [`EventRepository`] contract from `treffly-core`
//! on top of sqlx:
//!
//! - Create-event-with-image, update-with-image-swap, delete and premium
//!   completion as single transactions
//! - Capacity-checked subscription serialized per event with
//!   `SELECT ... FOR UPDATE`
//! - Feed and listing queries ordered in SQL (haversine distance, tag affinity)
//! - Connection pooling with a server-side `statement_timeout`
//!
//! # Example
//!
//! ```ignore
//! use treffly_core::Config;
//! use treffly_postgres::{PostgresEventRepository, connect};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let repository = PostgresEventRepository::new(connect(&config.database).await?);
//!     repository.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use chrono::{DateTime, Utc};
use rows::{EVENT_COLUMNS, EVENT_SOURCE, EventRow, PremiumOrderRow, distance_sql, filter_sql, into_records};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use treffly_core::config::DatabaseConfig;
use treffly_core::error::{EventError, Result};
use treffly_core::image::{ImageId, ImageRef, ImageTransition};
use treffly_core::repository::{Admission, BoxFuture, EventRepository, OwnedLookup};
use treffly_core::types::{
    Capacity, Coordinates, EventId, EventRecord, EventRewrite, InviteToken, ListFilter, NewEvent,
    NewPremiumOrder, OrderId, OrderStatus, PremiumOrder, Tag, TagId, UserId,
};

/// Build a connection pool from configuration.
///
/// Every connection carries the configured `statement_timeout`.
///
/// # Errors
///
/// Returns [`EventError::Storage`] if the URL is invalid or the initial
/// connections cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| EventError::Storage(format!("Invalid database URL: {e}")))?
        .options([("statement_timeout", format!("{}s", config.statement_timeout))]);

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect_with(options)
        .await
        .map_err(|e| EventError::Storage(format!("Failed to connect: {e}")))
}

fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> EventError {
    move |e| EventError::Storage(format!("{context}: {e}"))
}

/// Roll back an abandoned transaction, logging a failed rollback.
async fn rollback(tx: sqlx::Transaction<'_, sqlx::Postgres>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Failed to roll back transaction");
    }
}

fn tag_ids(tags: impl IntoIterator<Item = TagId>) -> Vec<i32> {
    tags.into_iter().map(TagId::get).collect()
}

fn limit(limit: u32) -> i64 {
    i64::from(limit)
}

/// `PostgreSQL` implementation of [`EventRepository`].
#[derive(Clone, Debug)]
pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    /// Create a repository over an existing pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - `PostgreSQL` connection pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Storage`] if migrations fail.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn fetch_event(&self, event_id: EventId) -> Result<Option<EventRecord>> {
        let sql = format!("SELECT {EVENT_COLUMNS} {EVENT_SOURCE} WHERE e.id = $1");
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Failed to load event"))?
            .map(EventRecord::try_from)
            .transpose()
    }

    async fn fetch_participant(&self, event_id: EventId, user: UserId) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM event_participants WHERE event_id = $1 AND user_id = $2)",
        )
        .bind(event_id.get())
        .bind(user.get())
        .fetch_one(&self.pool)
        .await
        .map_err(storage("Failed to check participation"))
    }

    /// Upcoming public events, ordered and truncated by the caller's clause.
    async fn upcoming(&self, clause: &str, now: DateTime<Utc>, limit_to: u32) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} {EVENT_SOURCE} \
             WHERE e.is_private = false AND e.date > $1 {clause} LIMIT $2"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(now)
            .bind(limit(limit_to))
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Failed to load feed"))?;
        into_records(rows)
    }

    #[tracing::instrument(skip(self, event), fields(owner = %event.owner))]
    async fn create_event(&self, event: NewEvent) -> Result<EventRecord> {
        let capacity = event.details.capacity.as_raw()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to start transaction"))?;

        sqlx::query("INSERT INTO images (id, path) VALUES ($1, $2)")
            .bind(*event.image.id.as_uuid())
            .bind(&event.image.path)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to insert image"))?;

        let details = &event.details;
        let event_id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO events (
                name, description, capacity, latitude, longitude, address, date,
                is_private, invite_token, owner_id, image_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            ",
        )
        .bind(&details.name)
        .bind(&details.description)
        .bind(capacity)
        .bind(details.location.latitude())
        .bind(details.location.longitude())
        .bind(&details.address)
        .bind(details.date)
        .bind(details.is_private)
        .bind(event.invite_token.as_ref().map(InviteToken::as_str))
        .bind(event.owner.get())
        .bind(*event.image.id.as_uuid())
        .bind(event.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage("Failed to insert event"))?;

        sqlx::query("INSERT INTO event_tags (event_id, tag_id) SELECT $1, UNNEST($2::int4[])")
            .bind(event_id)
            .bind(tag_ids(event.tags.iter().copied()))
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to link tags"))?;

        let sql = format!("SELECT {EVENT_COLUMNS} {EVENT_SOURCE} WHERE e.id = $1");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage("Failed to load created event"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        metrics::counter!("events.created").increment(1);
        EventRecord::try_from(row)
    }

    #[tracing::instrument(skip(self, rewrite), fields(event_id = %rewrite.event_id))]
    async fn update_event(&self, rewrite: EventRewrite) -> Result<ImageTransition> {
        let event_id = rewrite.event_id.get();
        let capacity = rewrite.details.capacity.as_raw()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to start transaction"))?;

        // The image is read under the row lock so the change resolves against
        // what concurrent rewrites committed before us.
        let locked: Option<(Option<uuid::Uuid>, Option<String>)> = sqlx::query_as(
            r"
            SELECT e.image_id, i.path
            FROM events e LEFT JOIN images i ON i.id = e.image_id
            WHERE e.id = $1
            FOR UPDATE OF e
            ",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("Failed to lock event"))?;
        let Some((image_id, image_path)) = locked else {
            rollback(tx).await;
            return Err(EventError::EventNotFound(rewrite.event_id));
        };
        let current = match (image_id, image_path) {
            (Some(id), Some(path)) => Some(ImageRef::new(ImageId::from_uuid(id), path)),
            _ => None,
        };
        let transition = rewrite.image.resolve(current);

        if let Some(image) = &transition.inserted {
            sqlx::query("INSERT INTO images (id, path) VALUES ($1, $2)")
                .bind(*image.id.as_uuid())
                .bind(&image.path)
                .execute(&mut *tx)
                .await
                .map_err(storage("Failed to insert image"))?;
        }

        let details = &rewrite.details;
        sqlx::query(
            r"
            UPDATE events
            SET name = $2, description = $3, capacity = $4, latitude = $5, longitude = $6,
                address = $7, date = $8, is_private = $9, invite_token = $10, image_id = $11
            WHERE id = $1
            ",
        )
        .bind(event_id)
        .bind(&details.name)
        .bind(&details.description)
        .bind(capacity)
        .bind(details.location.latitude())
        .bind(details.location.longitude())
        .bind(&details.address)
        .bind(details.date)
        .bind(details.is_private)
        .bind(rewrite.invite_token.as_ref().map(InviteToken::as_str))
        .bind(transition.effective.as_ref().map(|image| *image.id.as_uuid()))
        .execute(&mut *tx)
        .await
        .map_err(storage("Failed to update event"))?;

        sqlx::query("DELETE FROM event_tags WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to unlink tags"))?;
        sqlx::query("INSERT INTO event_tags (event_id, tag_id) SELECT $1, UNNEST($2::int4[])")
            .bind(event_id)
            .bind(tag_ids(rewrite.tags.iter().copied()))
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to link tags"))?;

        if let Some(image) = &transition.released {
            sqlx::query("DELETE FROM images WHERE id = $1")
                .bind(*image.id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(storage("Failed to delete released image"))?;
        }

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;
        Ok(transition)
    }

    #[tracing::instrument(skip(self))]
    async fn remove_event(&self, event_id: EventId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to start transaction"))?;

        // Participant edges, tag links and orders cascade with the event row.
        let deleted: Option<Option<uuid::Uuid>> =
            sqlx::query_scalar("DELETE FROM events WHERE id = $1 RETURNING image_id")
                .bind(event_id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage("Failed to delete event"))?;
        let Some(image_id) = deleted else {
            rollback(tx).await;
            return Err(EventError::EventNotFound(event_id));
        };

        if let Some(image_id) = image_id {
            sqlx::query("DELETE FROM images WHERE id = $1")
                .bind(image_id)
                .execute(&mut *tx)
                .await
                .map_err(storage("Failed to delete image"))?;
        }

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, token))]
    async fn join(&self, event_id: EventId, user: UserId, token: Option<&InviteToken>) -> Result<Admission> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to start transaction"))?;

        // Row lock serializes subscribers of the same event until commit.
        let locked: Option<(i32, i32, bool, Option<String>)> = sqlx::query_as(
            "SELECT owner_id, capacity, is_private, invite_token FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(event_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("Failed to lock event"))?;
        let Some((owner_id, capacity, is_private, invite_token)) = locked else {
            rollback(tx).await;
            return Err(EventError::EventNotFound(event_id));
        };

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM event_participants WHERE event_id = $1 AND user_id = $2)",
        )
        .bind(event_id.get())
        .bind(user.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage("Failed to check participation"))?;
        if already {
            rollback(tx).await;
            return Ok(Admission::AlreadyParticipant);
        }

        let token_matches = token.is_some_and(|token| invite_token.as_deref() == Some(token.as_str()));
        if is_private && owner_id != user.get() && !token_matches {
            rollback(tx).await;
            return Err(EventError::InviteTokenMismatch(event_id));
        }

        let participants: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_participants WHERE event_id = $1")
                .bind(event_id.get())
                .fetch_one(&mut *tx)
                .await
                .map_err(storage("Failed to count participants"))?;
        let participants = u32::try_from(participants).unwrap_or(u32::MAX);

        if !Capacity::from_raw(capacity)?.admits(participants) {
            rollback(tx).await;
            metrics::counter!("subscriptions.rejected", "reason" => "full").increment(1);
            tracing::warn!(participants, capacity, "Event is full");
            return Ok(Admission::Full);
        }

        sqlx::query("INSERT INTO event_participants (event_id, user_id) VALUES ($1, $2)")
            .bind(event_id.get())
            .bind(user.get())
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to insert participant"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        metrics::counter!("subscriptions.admitted").increment(1);
        Ok(Admission::Admitted)
    }

    #[tracing::instrument(skip(self))]
    async fn complete_order(&self, order_id: OrderId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to start transaction"))?;

        let locked: Option<(i32, String)> =
            sqlx::query_as("SELECT event_id, status FROM premium_orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage("Failed to lock premium order"))?;
        let Some((event_id, status)) = locked else {
            rollback(tx).await;
            return Err(EventError::OrderNotFound(order_id));
        };
        if OrderStatus::parse(&status)? == OrderStatus::Completed {
            rollback(tx).await;
            return Ok(());
        }

        sqlx::query("UPDATE events SET is_premium = true WHERE id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to mark event premium"))?;
        sqlx::query("UPDATE premium_orders SET status = $2 WHERE id = $1")
            .bind(order_id.get())
            .bind(OrderStatus::Completed.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to complete premium order"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        metrics::counter!("premium_orders.completed").increment(1);
        Ok(())
    }
}

impl EventRepository for PostgresEventRepository {
    fn create_event_tx(&self, event: NewEvent) -> BoxFuture<'_, EventRecord> {
        Box::pin(self.create_event(event))
    }

    fn update_event_tx(&self, rewrite: EventRewrite) -> BoxFuture<'_, ImageTransition> {
        Box::pin(self.update_event(rewrite))
    }

    fn get_event<'a>(
        &'a self,
        event_id: EventId,
        viewer: Option<UserId>,
        token: Option<&'a InviteToken>,
    ) -> BoxFuture<'a, EventRecord> {
        Box::pin(async move {
            let record = self
                .fetch_event(event_id)
                .await?
                .ok_or(EventError::EventNotFound(event_id))?;
            if !record.details.is_private {
                return Ok(record);
            }

            let token_matches = token.is_some() && token == record.invite_token.as_ref();
            let visible = match viewer {
                _ if token_matches => true,
                Some(user) if record.is_owned_by(user) => true,
                Some(user) => self.fetch_participant(event_id, user).await?,
                None => false,
            };
            if visible {
                Ok(record)
            } else {
                Err(EventError::InviteTokenMismatch(event_id))
            }
        })
    }

    fn find_owned_event(&self, event_id: EventId, owner: UserId) -> BoxFuture<'_, OwnedLookup> {
        Box::pin(async move {
            let sql = format!("SELECT {EVENT_COLUMNS} {EVENT_SOURCE} WHERE e.id = $1 AND e.owner_id = $2");
            let row = sqlx::query_as::<_, EventRow>(&sql)
                .bind(event_id.get())
                .bind(owner.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("Failed to load owned event"))?;
            match row {
                Some(row) => Ok(OwnedLookup::Found(EventRecord::try_from(row)?)),
                None => Ok(OwnedLookup::NotFoundOrUnauthorized),
            }
        })
    }

    fn delete_event(&self, event_id: EventId) -> BoxFuture<'_, ()> {
        Box::pin(self.remove_event(event_id))
    }

    fn list_events<'a>(
        &'a self,
        filter: &'a ListFilter,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Vec<EventRecord>> {
        Box::pin(async move {
            let order = if filter.near.is_some() {
                format!("{}, e.id", distance_sql(6, 7))
            } else {
                "e.date, e.id".to_string()
            };
            let sql = format!(
                "SELECT {EVENT_COLUMNS} {EVENT_SOURCE} \
                 WHERE e.is_private = false AND e.date > $1 AND {} ORDER BY {order}",
                filter_sql(2)
            );
            let window = filter.date_range.bounds(now);

            let mut query = sqlx::query_as::<_, EventRow>(&sql)
                .bind(now)
                .bind(filter.search.as_deref())
                .bind(tag_ids(filter.tags.iter().copied()))
                .bind(window.map(|(start, _)| start))
                .bind(window.map(|(_, end)| end));
            if let Some(near) = filter.near {
                let (latitude, longitude) = near.as_f64();
                query = query.bind(latitude).bind(longitude);
            }

            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to list events"))?;
            into_records(rows)
        })
    }

    fn list_all_events<'a>(
        &'a self,
        filter: &'a ListFilter,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Vec<EventRecord>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} {EVENT_SOURCE} WHERE {} \
                 ORDER BY e.created_at DESC, e.id DESC",
                filter_sql(1)
            );
            let window = filter.date_range.bounds(now);
            let rows = sqlx::query_as::<_, EventRow>(&sql)
                .bind(filter.search.as_deref())
                .bind(tag_ids(filter.tags.iter().copied()))
                .bind(window.map(|(start, _)| start))
                .bind(window.map(|(_, end)| end))
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to list all events"))?;
            into_records(rows)
        })
    }

    fn subscribe<'a>(
        &'a self,
        event_id: EventId,
        user: UserId,
        token: Option<&'a InviteToken>,
    ) -> BoxFuture<'a, Admission> {
        Box::pin(self.join(event_id, user, token))
    }

    fn unsubscribe(&self, event_id: EventId, user: UserId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM event_participants WHERE event_id = $1 AND user_id = $2")
                .bind(event_id.get())
                .bind(user.get())
                .execute(&self.pool)
                .await
                .map_err(storage("Failed to remove participant"))?;
            Ok(())
        })
    }

    fn is_participant(&self, event_id: EventId, user: UserId) -> BoxFuture<'_, bool> {
        Box::pin(self.fetch_participant(event_id, user))
    }

    fn joined_events<'a>(
        &'a self,
        user: UserId,
        events: &'a [EventId],
    ) -> BoxFuture<'a, BTreeSet<EventId>> {
        Box::pin(async move {
            let joined: Vec<i32> = sqlx::query_scalar(
                "SELECT event_id FROM event_participants WHERE user_id = $1 AND event_id = ANY($2)",
            )
            .bind(user.get())
            .bind(events.iter().copied().map(EventId::get).collect::<Vec<_>>())
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Failed to check participation"))?;
            Ok(joined.into_iter().map(EventId::new).collect())
        })
    }

    fn premium_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(self.upcoming("AND e.is_premium ORDER BY e.date, e.id", now, limit))
    }

    fn latest_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(self.upcoming("ORDER BY e.created_at DESC, e.id DESC", now, limit))
    }

    fn popular_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(self.upcoming("ORDER BY participant_count DESC, e.date, e.id", now, limit))
    }

    fn user_recommended_events(
        &self,
        user: UserId,
        near: Coordinates,
        now: DateTime<Utc>,
        limit_to: u32,
    ) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            let sql = format!(
                r"
                WITH affinity AS (
                    SELECT DISTINCT known.tag_id
                    FROM event_tags known
                    JOIN events a ON a.id = known.event_id
                    WHERE a.owner_id = $2
                       OR EXISTS (
                           SELECT 1 FROM event_participants ap
                           WHERE ap.event_id = a.id AND ap.user_id = $2
                       )
                )
                SELECT {EVENT_COLUMNS} {EVENT_SOURCE}
                WHERE e.is_private = false
                  AND e.date > $1
                  AND e.owner_id <> $2
                  AND NOT EXISTS (
                      SELECT 1 FROM event_participants mp
                      WHERE mp.event_id = e.id AND mp.user_id = $2
                  )
                ORDER BY (
                    SELECT COUNT(*) FROM event_tags rt
                    WHERE rt.event_id = e.id AND rt.tag_id IN (SELECT tag_id FROM affinity)
                ) DESC, {distance}, e.id
                LIMIT $5
                ",
                distance = distance_sql(3, 4),
            );
            let (latitude, longitude) = near.as_f64();
            let rows = sqlx::query_as::<_, EventRow>(&sql)
                .bind(now)
                .bind(user.get())
                .bind(latitude)
                .bind(longitude)
                .bind(limit(limit_to))
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to load recommendations"))?;
            into_records(rows)
        })
    }

    fn guest_recommended_events(
        &self,
        near: Coordinates,
        now: DateTime<Utc>,
        limit_to: u32,
    ) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} {EVENT_SOURCE} \
                 WHERE e.is_private = false AND e.date > $1 \
                 ORDER BY {}, e.id LIMIT $2",
                distance_sql(3, 4)
            );
            let (latitude, longitude) = near.as_f64();
            let rows = sqlx::query_as::<_, EventRow>(&sql)
                .bind(now)
                .bind(limit(limit_to))
                .bind(latitude)
                .bind(longitude)
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to load recommendations"))?;
            into_records(rows)
        })
    }

    fn upcoming_user_events(&self, user: UserId, now: DateTime<Utc>) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} {EVENT_SOURCE} \
                 JOIN event_participants p ON p.event_id = e.id AND p.user_id = $1 \
                 WHERE e.date > $2 ORDER BY e.date, e.id"
            );
            let rows = sqlx::query_as::<_, EventRow>(&sql)
                .bind(user.get())
                .bind(now)
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to load upcoming events"))?;
            into_records(rows)
        })
    }

    fn past_user_events(&self, user: UserId, now: DateTime<Utc>) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} {EVENT_SOURCE} \
                 JOIN event_participants p ON p.event_id = e.id AND p.user_id = $1 \
                 WHERE e.date <= $2 ORDER BY e.date DESC, e.id DESC"
            );
            let rows = sqlx::query_as::<_, EventRow>(&sql)
                .bind(user.get())
                .bind(now)
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to load past events"))?;
            into_records(rows)
        })
    }

    fn owned_user_events(&self, user: UserId) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} {EVENT_SOURCE} WHERE e.owner_id = $1 ORDER BY e.date, e.id"
            );
            let rows = sqlx::query_as::<_, EventRow>(&sql)
                .bind(user.get())
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to load owned events"))?;
            into_records(rows)
        })
    }

    fn create_premium_order(
        &self,
        order: NewPremiumOrder,
        created_at: DateTime<Utc>,
    ) -> BoxFuture<'_, PremiumOrder> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, PremiumOrderRow>(
                r"
                INSERT INTO premium_orders (user_id, event_id, shop, price, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, user_id, event_id, shop, price, status, created_at
                ",
            )
            .bind(order.user_id.get())
            .bind(order.event_id.get())
            .bind(&order.shop)
            .bind(order.price)
            .bind(OrderStatus::Pending.as_str())
            .bind(created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let missing_event = e
                    .as_database_error()
                    .and_then(|db| db.constraint())
                    .is_some_and(|constraint| constraint == "premium_orders_event_id_fkey");
                if missing_event {
                    EventError::EventNotFound(order.event_id)
                } else {
                    EventError::Storage(format!("Failed to create premium order: {e}"))
                }
            })?;
            PremiumOrder::try_from(row)
        })
    }

    fn get_premium_order(&self, order_id: OrderId) -> BoxFuture<'_, PremiumOrder> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, PremiumOrderRow>(
                "SELECT id, user_id, event_id, shop, price, status, created_at FROM premium_orders WHERE id = $1",
            )
            .bind(order_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Failed to load premium order"))?
            .ok_or(EventError::OrderNotFound(order_id))?;
            PremiumOrder::try_from(row)
        })
    }

    fn complete_premium_order(&self, order_id: OrderId) -> BoxFuture<'_, ()> {
        Box::pin(self.complete_order(order_id))
    }

    fn list_tags(&self) -> BoxFuture<'_, Vec<Tag>> {
        Box::pin(async move {
            let rows: Vec<(i32, String)> = sqlx::query_as("SELECT id, name FROM tags ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to list tags"))?;
            Ok(rows
                .into_iter()
                .map(|(id, name)| Tag {
                    id: TagId::new(id),
                    name,
                })
                .collect())
        })
    }
}
