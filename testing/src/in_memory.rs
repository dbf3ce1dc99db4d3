//! In-memory event repository.
//!
//! Provides fast, deterministic storage for service tests:
//! - one mutex guards the whole state, so every method is a transaction
//! - foreign keys are emulated (unknown owner, tag or user fails with
//!   `Storage` before anything is written)
//! - query ordering follows the repository contract

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only a poisoned mutex panics

use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use treffly_core::error::{EventError, Result};
use treffly_core::image::{ImageId, ImageRef, ImageTransition};
use treffly_core::repository::{Admission, BoxFuture, EventRepository, OwnedLookup};
use treffly_core::types::{
    Coordinates, EventDetails, EventId, EventRecord, EventRewrite, InviteToken, ListFilter,
    NewEvent, NewPremiumOrder, OrderId, OrderStatus, Owner, PremiumOrder, Tag, TagId, UserId,
};

#[derive(Clone, Debug)]
struct StoredEvent {
    details: EventDetails,
    tags: BTreeSet<TagId>,
    owner: UserId,
    image: Option<ImageId>,
    is_premium: bool,
    created_at: DateTime<Utc>,
    invite_token: Option<InviteToken>,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, String>,
    tags: BTreeMap<TagId, String>,
    images: HashMap<ImageId, ImageRef>,
    events: BTreeMap<EventId, StoredEvent>,
    participants: BTreeMap<EventId, BTreeSet<UserId>>,
    orders: BTreeMap<OrderId, PremiumOrder>,
    last_event_id: i32,
    last_order_id: i32,
}

fn foreign_key(table: &str) -> EventError {
    EventError::Storage(format!(
        "insert or update on table \"{table}\" violates foreign key constraint"
    ))
}

impl State {
    fn participant_count(&self, event_id: EventId) -> u32 {
        self.participants
            .get(&event_id)
            .map_or(0, |roster| u32::try_from(roster.len()).unwrap_or(u32::MAX))
    }

    fn is_participant(&self, event_id: EventId, user: UserId) -> bool {
        self.participants
            .get(&event_id)
            .is_some_and(|roster| roster.contains(&user))
    }

    fn check_tags(&self, tags: &BTreeSet<TagId>) -> Result<()> {
        if tags.iter().all(|tag| self.tags.contains_key(tag)) {
            Ok(())
        } else {
            Err(foreign_key("event_tags"))
        }
    }

    fn can_view(
        &self,
        event_id: EventId,
        event: &StoredEvent,
        viewer: Option<UserId>,
        token: Option<&InviteToken>,
    ) -> bool {
        !event.details.is_private
            || viewer.is_some_and(|user| user == event.owner || self.is_participant(event_id, user))
            || (token.is_some() && token == event.invite_token.as_ref())
    }

    fn record(&self, event_id: EventId) -> Result<EventRecord> {
        let event = self
            .events
            .get(&event_id)
            .ok_or(EventError::EventNotFound(event_id))?;
        let username = self
            .users
            .get(&event.owner)
            .cloned()
            .ok_or_else(|| foreign_key("events"))?;

        Ok(EventRecord {
            id: event_id,
            details: event.details.clone(),
            is_premium: event.is_premium,
            created_at: event.created_at,
            owner: Owner {
                id: event.owner,
                username,
            },
            image: event.image.and_then(|id| self.images.get(&id).cloned()),
            tags: event
                .tags
                .iter()
                .filter_map(|id| {
                    self.tags.get(id).map(|name| Tag {
                        id: *id,
                        name: name.clone(),
                    })
                })
                .collect(),
            participant_count: self.participant_count(event_id),
            invite_token: event.invite_token.clone(),
        })
    }

    fn records(&self, predicate: impl Fn(EventId, &StoredEvent) -> bool) -> Result<Vec<EventRecord>> {
        self.events
            .iter()
            .filter(|(id, event)| predicate(**id, event))
            .map(|(id, _)| self.record(*id))
            .collect()
    }

    fn upcoming_public(&self, now: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        self.records(|_, event| !event.details.is_private && event.details.date > now)
    }

    /// Tags carried by events the user owns or joined.
    fn affinity_tags(&self, user: UserId) -> BTreeSet<TagId> {
        self.events
            .iter()
            .filter(|(id, event)| event.owner == user || self.is_participant(**id, user))
            .flat_map(|(_, event)| event.tags.iter().copied())
            .collect()
    }
}

fn by_distance(near: &Coordinates) -> impl Fn(&EventRecord, &EventRecord) -> Ordering + '_ {
    move |a, b| {
        a.details
            .location
            .distance_km(near)
            .total_cmp(&b.details.location.distance_km(near))
            .then(a.id.cmp(&b.id))
    }
}

fn by_date(a: &EventRecord, b: &EventRecord) -> Ordering {
    a.details.date.cmp(&b.details.date).then(a.id.cmp(&b.id))
}

fn truncated(mut records: Vec<EventRecord>, limit: u32) -> Vec<EventRecord> {
    records.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    records
}

/// In-memory [`EventRepository`].
///
/// Clones share the same state, so a test can keep a handle for assertions
/// after handing one to the service.
///
/// # Example
///
/// ```
/// use treffly_testing::InMemoryEventRepository;
/// use treffly_core::types::{TagId, UserId};
///
/// let repository = InMemoryEventRepository::new()
///     .with_user(UserId::new(1), "alice")
///     .with_tag(TagId::new(1), "music");
/// assert_eq!(repository.event_count(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventRepository {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl InMemoryEventRepository {
    /// Create an empty repository with no users or tags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user (events and subscriptions reference users).
    #[must_use]
    pub fn with_user(self, id: UserId, username: &str) -> Self {
        self.lock().users.insert(id, username.to_string());
        self
    }

    /// Register a tag of the vocabulary.
    #[must_use]
    pub fn with_tag(self, id: TagId, name: &str) -> Self {
        self.lock().tags.insert(id, name.to_string());
        self
    }

    /// Delay every call by `latency` before touching state.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Number of stored events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Number of stored image records.
    #[must_use]
    pub fn image_count(&self) -> usize {
        self.lock().images.len()
    }

    /// Whether an image record exists.
    #[must_use]
    pub fn has_image(&self, id: ImageId) -> bool {
        self.lock().images.contains_key(&id)
    }

    /// Tag links of an event.
    #[must_use]
    pub fn tag_links(&self, event_id: EventId) -> Vec<TagId> {
        self.lock()
            .events
            .get(&event_id)
            .map(|event| event.tags.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Participant roster of an event.
    #[must_use]
    pub fn roster(&self, event_id: EventId) -> Vec<UserId> {
        self.lock()
            .participants
            .get(&event_id)
            .map(|roster| roster.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl EventRepository for InMemoryEventRepository {
    fn create_event_tx(&self, event: NewEvent) -> BoxFuture<'_, EventRecord> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();

            if !state.users.contains_key(&event.owner) {
                return Err(foreign_key("events"));
            }
            state.check_tags(&event.tags)?;
            if state.images.contains_key(&event.image.id) {
                return Err(EventError::Storage(
                    "duplicate key value violates unique constraint \"images_pkey\"".to_string(),
                ));
            }

            state.last_event_id += 1;
            let id = EventId::new(state.last_event_id);
            state.images.insert(event.image.id, event.image.clone());
            state.events.insert(
                id,
                StoredEvent {
                    details: event.details,
                    tags: event.tags,
                    owner: event.owner,
                    image: Some(event.image.id),
                    is_premium: false,
                    created_at: event.created_at,
                    invite_token: event.invite_token,
                },
            );
            state.record(id)
        })
    }

    fn update_event_tx(&self, rewrite: EventRewrite) -> BoxFuture<'_, ImageTransition> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            let event_id = rewrite.event_id;

            let Some(current) = state.events.get(&event_id) else {
                return Err(EventError::EventNotFound(event_id));
            };
            let current = current.image.and_then(|id| state.images.get(&id).cloned());
            let transition = rewrite.image.resolve(current);

            state.check_tags(&rewrite.tags)?;
            let duplicate_image = transition
                .inserted
                .as_ref()
                .is_some_and(|image| state.images.contains_key(&image.id));
            if duplicate_image {
                return Err(EventError::Storage(
                    "duplicate key value violates unique constraint \"images_pkey\"".to_string(),
                ));
            }

            if let Some(image) = &transition.inserted {
                state.images.insert(image.id, image.clone());
            }
            if let Some(event) = state.events.get_mut(&event_id) {
                event.details = rewrite.details;
                event.tags = rewrite.tags;
                event.image = transition.effective.as_ref().map(|image| image.id);
                event.invite_token = rewrite.invite_token;
            }
            if let Some(image) = &transition.released {
                state.images.remove(&image.id);
            }
            Ok(transition)
        })
    }

    fn get_event<'a>(
        &'a self,
        event_id: EventId,
        viewer: Option<UserId>,
        token: Option<&'a InviteToken>,
    ) -> BoxFuture<'a, EventRecord> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            let event = state
                .events
                .get(&event_id)
                .ok_or(EventError::EventNotFound(event_id))?;
            if !state.can_view(event_id, event, viewer, token) {
                return Err(EventError::InviteTokenMismatch(event_id));
            }
            state.record(event_id)
        })
    }

    fn find_owned_event(&self, event_id: EventId, owner: UserId) -> BoxFuture<'_, OwnedLookup> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            match state.events.get(&event_id) {
                Some(event) if event.owner == owner => Ok(OwnedLookup::Found(state.record(event_id)?)),
                _ => Ok(OwnedLookup::NotFoundOrUnauthorized),
            }
        })
    }

    fn delete_event(&self, event_id: EventId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            let event = state
                .events
                .remove(&event_id)
                .ok_or(EventError::EventNotFound(event_id))?;

            state.participants.remove(&event_id);
            state.orders.retain(|_, order| order.event_id != event_id);
            if let Some(image) = event.image {
                state.images.remove(&image);
            }
            Ok(())
        })
    }

    fn list_events<'a>(
        &'a self,
        filter: &'a ListFilter,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            let mut records = state.upcoming_public(now)?;
            records.retain(|record| filter.matches(record, now));
            match &filter.near {
                Some(near) => records.sort_by(by_distance(near)),
                None => records.sort_by(by_date),
            }
            Ok(records)
        })
    }

    fn list_all_events<'a>(
        &'a self,
        filter: &'a ListFilter,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            let mut records = state.records(|_, _| true)?;
            records.retain(|record| filter.matches(record, now));
            records.sort_by_key(|record| (Reverse(record.created_at), Reverse(record.id)));
            Ok(records)
        })
    }

    fn subscribe<'a>(
        &'a self,
        event_id: EventId,
        user: UserId,
        token: Option<&'a InviteToken>,
    ) -> BoxFuture<'a, Admission> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            let event = state
                .events
                .get(&event_id)
                .ok_or(EventError::EventNotFound(event_id))?;

            if state.is_participant(event_id, user) {
                return Ok(Admission::AlreadyParticipant);
            }
            let token_matches = token.is_some() && token == event.invite_token.as_ref();
            if event.details.is_private && event.owner != user && !token_matches {
                return Err(EventError::InviteTokenMismatch(event_id));
            }
            if !state.users.contains_key(&user) {
                return Err(foreign_key("event_participants"));
            }
            if !event.details.capacity.admits(state.participant_count(event_id)) {
                return Ok(Admission::Full);
            }

            state.participants.entry(event_id).or_default().insert(user);
            Ok(Admission::Admitted)
        })
    }

    fn unsubscribe(&self, event_id: EventId, user: UserId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pause().await;
            if let Some(roster) = self.lock().participants.get_mut(&event_id) {
                roster.remove(&user);
            }
            Ok(())
        })
    }

    fn is_participant(&self, event_id: EventId, user: UserId) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.lock().is_participant(event_id, user))
        })
    }

    fn joined_events<'a>(
        &'a self,
        user: UserId,
        events: &'a [EventId],
    ) -> BoxFuture<'a, BTreeSet<EventId>> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            Ok(events
                .iter()
                .copied()
                .filter(|event_id| state.is_participant(*event_id, user))
                .collect())
        })
    }

    fn premium_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let mut records = self.lock().upcoming_public(now)?;
            records.retain(|record| record.is_premium);
            records.sort_by(by_date);
            Ok(truncated(records, limit))
        })
    }

    fn latest_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let mut records = self.lock().upcoming_public(now)?;
            records.sort_by_key(|record| (Reverse(record.created_at), Reverse(record.id)));
            Ok(truncated(records, limit))
        })
    }

    fn popular_events(&self, now: DateTime<Utc>, limit: u32) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let mut records = self.lock().upcoming_public(now)?;
            records.sort_by(|a, b| {
                b.participant_count
                    .cmp(&a.participant_count)
                    .then_with(|| by_date(a, b))
            });
            Ok(truncated(records, limit))
        })
    }

    fn user_recommended_events(
        &self,
        user: UserId,
        near: Coordinates,
        now: DateTime<Utc>,
        limit: u32,
    ) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            let affinity = state.affinity_tags(user);
            let mut records = state.records(|id, event| {
                !event.details.is_private
                    && event.details.date > now
                    && event.owner != user
                    && !state.is_participant(id, user)
            })?;

            let score = |record: &EventRecord| {
                record
                    .tags
                    .iter()
                    .filter(|tag| affinity.contains(&tag.id))
                    .count()
            };
            let distance = by_distance(&near);
            records.sort_by(|a, b| score(b).cmp(&score(a)).then_with(|| distance(a, b)));
            Ok(truncated(records, limit))
        })
    }

    fn guest_recommended_events(
        &self,
        near: Coordinates,
        now: DateTime<Utc>,
        limit: u32,
    ) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let mut records = self.lock().upcoming_public(now)?;
            records.sort_by(by_distance(&near));
            Ok(truncated(records, limit))
        })
    }

    fn upcoming_user_events(&self, user: UserId, now: DateTime<Utc>) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            let mut records = state
                .records(|id, event| event.details.date > now && state.is_participant(id, user))?;
            records.sort_by(by_date);
            Ok(records)
        })
    }

    fn past_user_events(&self, user: UserId, now: DateTime<Utc>) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let state = self.lock();
            let mut records = state
                .records(|id, event| event.details.date <= now && state.is_participant(id, user))?;
            records.sort_by(|a, b| by_date(b, a));
            Ok(records)
        })
    }

    fn owned_user_events(&self, user: UserId) -> BoxFuture<'_, Vec<EventRecord>> {
        Box::pin(async move {
            self.pause().await;
            let mut records = self.lock().records(|_, event| event.owner == user)?;
            records.sort_by(by_date);
            Ok(records)
        })
    }

    fn create_premium_order(
        &self,
        order: NewPremiumOrder,
        created_at: DateTime<Utc>,
    ) -> BoxFuture<'_, PremiumOrder> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            if !state.events.contains_key(&order.event_id) {
                return Err(EventError::EventNotFound(order.event_id));
            }
            if !state.users.contains_key(&order.user_id) {
                return Err(foreign_key("premium_orders"));
            }

            state.last_order_id += 1;
            let stored = PremiumOrder {
                id: OrderId::new(state.last_order_id),
                user_id: order.user_id,
                event_id: order.event_id,
                shop: order.shop,
                price: order.price,
                status: OrderStatus::Pending,
                created_at,
            };
            state.orders.insert(stored.id, stored.clone());
            Ok(stored)
        })
    }

    fn get_premium_order(&self, order_id: OrderId) -> BoxFuture<'_, PremiumOrder> {
        Box::pin(async move {
            self.pause().await;
            self.lock()
                .orders
                .get(&order_id)
                .cloned()
                .ok_or(EventError::OrderNotFound(order_id))
        })
    }

    fn complete_premium_order(&self, order_id: OrderId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            let order = state
                .orders
                .get(&order_id)
                .cloned()
                .ok_or(EventError::OrderNotFound(order_id))?;
            if order.status == OrderStatus::Completed {
                return Ok(());
            }

            let event = state
                .events
                .get_mut(&order.event_id)
                .ok_or(EventError::EventNotFound(order.event_id))?;
            event.is_premium = true;
            if let Some(stored) = state.orders.get_mut(&order_id) {
                stored.status = OrderStatus::Completed;
            }
            Ok(())
        })
    }

    fn list_tags(&self) -> BoxFuture<'_, Vec<Tag>> {
        Box::pin(async move {
            self.pause().await;
            Ok(self
                .lock()
                .tags
                .iter()
                .map(|(id, name)| Tag {
                    id: *id,
                    name: name.clone(),
                })
                .collect())
        })
    }
}
