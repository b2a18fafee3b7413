use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_slots;
use super::conflict::now_ms;
use super::{Engine, EngineError};

fn validate_query_window(from: Ms, to: Ms) -> Result<Span, EngineError> {
    if from >= to {
        return Err(EngineError::InvalidInterval("start must precede end"));
    }
    if to - from > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(Span::new(from, to))
}

impl Engine {
    /// Bookings on a resource overlapping `[from, to)`, ordered by start
    /// time ascending. Cancelled bookings are excluded unless asked for.
    ///
    /// Recomputed per call under the resource read lock: writers apply
    /// events under the write lock, so a partially-written booking is never
    /// visible here.
    pub async fn list_bookings(
        &self,
        resource_id: Ulid,
        from: Ms,
        to: Ms,
        include_cancelled: bool,
    ) -> Result<Vec<BookingRecord>, EngineError> {
        let query = validate_query_window(from, to)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::UnknownResource(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .overlapping(&query)
            .filter(|b| include_cancelled || b.status != BookingStatus::Cancelled)
            .map(|b| BookingRecord::from_booking(resource_id, b))
            .collect())
    }

    /// All of a user's bookings across resources, ordered by start time.
    /// Cancelled bookings are included: this is the audit view.
    pub async fn list_user_bookings(&self, user_id: Ulid) -> Result<Vec<BookingRecord>, EngineError> {
        if !self.directory.contains_user(&user_id) {
            return Err(EngineError::UnknownUser(user_id));
        }
        let resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut records = Vec::new();
        for rid in resource_ids {
            let Some(rs) = self.get_resource(&rid) else { continue };
            let guard = rs.read().await;
            records.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.user_id == user_id)
                    .map(|b| BookingRecord::from_booking(rid, b)),
            );
        }
        records.sort_by_key(|r| r.start);
        Ok(records)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingRecord, EngineError> {
        let resource_id = self
            .resource_for_booking(&id)
            .ok_or(EngineError::UnknownBooking(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::UnknownResource(resource_id))?;
        let guard = rs.read().await;
        let booking = guard.booking(id).ok_or(EngineError::UnknownBooking(id))?;
        Ok(BookingRecord::from_booking(resource_id, booking))
    }

    /// Free sub-intervals of `[from, to)` on a resource, optionally keeping
    /// only slots of at least `min_duration_ms`.
    pub async fn free_slots(
        &self,
        resource_id: Ulid,
        from: Ms,
        to: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let query = validate_query_window(from, to)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::UnknownResource(resource_id))?;
        let guard = rs.read().await;

        let mut free = free_slots(&guard, &query, now_ms());
        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }
        Ok(free)
    }

    pub async fn get_resource_info(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::UnknownResource(id))?;
        let guard = rs.read().await;
        Ok(ResourceInfo {
            id: guard.id,
            name: guard.name.clone(),
            category: guard.category.clone(),
            capacity: guard.capacity,
            window: guard.window,
            active: guard.active,
        })
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut infos = Vec::with_capacity(resource_ids.len());
        for id in resource_ids {
            let Some(rs) = self.get_resource(&id) else { continue };
            let guard = rs.read().await;
            infos.push(ResourceInfo {
                id: guard.id,
                name: guard.name.clone(),
                category: guard.category.clone(),
                capacity: guard.capacity,
                window: guard.window,
                active: guard.active,
            });
        }
        infos
    }

    // ── Directory reads ──────────────────────────────────────

    pub fn get_user(&self, id: Ulid) -> Option<User> {
        self.directory.user(&id)
    }

    pub fn get_group(&self, id: Ulid) -> Option<Group> {
        self.directory.group(&id)
    }

    pub fn groups_of(&self, user_id: Ulid) -> Vec<Ulid> {
        self.directory.groups_of(&user_id)
    }

    pub fn list_users(&self) -> Vec<User> {
        self.directory.list_users()
    }

    pub fn list_groups(&self) -> Vec<Group> {
        self.directory.list_groups()
    }
}
