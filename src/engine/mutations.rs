use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, check_window, now_ms, validate_interval};
use super::{Engine, EngineError, WalCommand};

fn validate_window(window: &Option<Span>) -> Result<(), EngineError> {
    if let Some(w) = window {
        if w.start >= w.end {
            return Err(EngineError::InvalidInterval("window start must precede end"));
        }
        if w.start < MIN_VALID_TIMESTAMP_MS || w.end > MAX_VALID_TIMESTAMP_MS {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
    }
    Ok(())
}

impl Engine {
    // ── Resource catalog ─────────────────────────────────────

    pub async fn create_resource(
        &self,
        id: Ulid,
        name: String,
        category: Option<String>,
        capacity: u32,
        window: Option<Span>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_RESOURCES_PER_ORG {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if let Some(ref c) = category
            && c.len() > MAX_CATEGORY_LEN {
                return Err(EngineError::LimitExceeded("category too long"));
            }
        if capacity == 0 {
            return Err(EngineError::LimitExceeded("capacity must be positive"));
        }
        validate_window(&window)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
            category: category.clone(),
            capacity,
            window,
        };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, name, category, capacity, window);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        Ok(())
    }

    /// Update mutable resource attributes. Setting `active: false` is the
    /// only removal: history stays, new bookings are rejected.
    pub async fn update_resource(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        window: Option<Span>,
        active: bool,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if capacity == 0 {
            return Err(EngineError::LimitExceeded("capacity must be positive"));
        }
        validate_window(&window)?;
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::UnknownResource(id))?;
        let mut guard = rs.write().await;

        let event = Event::ResourceUpdated { id, name, capacity, window, active };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Identity & permissions (admin plane) ─────────────────

    pub async fn register_user(
        &self,
        id: Ulid,
        username: String,
        email: String,
        credential: String,
    ) -> Result<(), EngineError> {
        if username.len() > MAX_NAME_LEN || email.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("username or email too long"));
        }
        if credential.len() > MAX_CREDENTIAL_LEN {
            return Err(EngineError::LimitExceeded("credential too long"));
        }
        let _lock = self.directory_lock.lock().await;
        if self.directory.user_count() >= MAX_USERS_PER_ORG {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.directory.contains_user(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.directory.username_taken(&username) {
            return Err(EngineError::DuplicateName(username));
        }
        if self.directory.email_taken(&email) {
            return Err(EngineError::DuplicateName(email));
        }

        let event = Event::UserRegistered { id, username, email, credential };
        self.persist_directory(&event).await
    }

    /// Soft invalidation: the user stops authenticating and authorizing but
    /// their bookings are retained for audit.
    pub async fn deactivate_user(&self, id: Ulid) -> Result<(), EngineError> {
        let _lock = self.directory_lock.lock().await;
        let user = self
            .directory
            .user(&id)
            .ok_or(EngineError::UnknownUser(id))?;
        if !user.active {
            return Ok(()); // already deactivated
        }
        let event = Event::UserDeactivated { id };
        self.persist_directory(&event).await
    }

    pub async fn create_group(
        &self,
        id: Ulid,
        name: String,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("group name too long"));
        }
        let _lock = self.directory_lock.lock().await;
        if self.directory.group_count() >= MAX_GROUPS_PER_ORG {
            return Err(EngineError::LimitExceeded("too many groups"));
        }
        if self.directory.contains_group(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.directory.group_name_taken(&name) {
            return Err(EngineError::DuplicateName(name));
        }

        let event = Event::GroupCreated { id, name, description };
        self.persist_directory(&event).await
    }

    /// Membership and grant edges die with the group.
    pub async fn delete_group(&self, id: Ulid) -> Result<(), EngineError> {
        let _lock = self.directory_lock.lock().await;
        if !self.directory.contains_group(&id) {
            return Err(EngineError::UnknownGroup(id));
        }
        let event = Event::GroupDeleted { id };
        self.persist_directory(&event).await?;
        self.grant_cache.invalidate(&id);
        Ok(())
    }

    pub async fn add_member(&self, user_id: Ulid, group_id: Ulid) -> Result<(), EngineError> {
        let _lock = self.directory_lock.lock().await;
        if !self.directory.contains_user(&user_id) {
            return Err(EngineError::UnknownUser(user_id));
        }
        if !self.directory.contains_group(&group_id) {
            return Err(EngineError::UnknownGroup(group_id));
        }
        if self.directory.is_member(&user_id, &group_id) {
            return Ok(()); // already a member
        }
        let event = Event::MemberAdded { user_id, group_id };
        self.persist_directory(&event).await
    }

    pub async fn remove_member(&self, user_id: Ulid, group_id: Ulid) -> Result<(), EngineError> {
        let _lock = self.directory_lock.lock().await;
        if !self.directory.contains_user(&user_id) {
            return Err(EngineError::UnknownUser(user_id));
        }
        if !self.directory.contains_group(&group_id) {
            return Err(EngineError::UnknownGroup(group_id));
        }
        if !self.directory.is_member(&user_id, &group_id) {
            return Ok(());
        }
        let event = Event::MemberRemoved { user_id, group_id };
        self.persist_directory(&event).await
    }

    pub async fn define_permission(
        &self,
        id: Ulid,
        action: Action,
        scope: Scope,
    ) -> Result<(), EngineError> {
        match &scope {
            Scope::Resource(rid) => {
                if !self.state.contains_key(rid) {
                    return Err(EngineError::UnknownResource(*rid));
                }
            }
            Scope::Category(c) => {
                if c.len() > MAX_CATEGORY_LEN {
                    return Err(EngineError::LimitExceeded("category too long"));
                }
            }
        }
        let _lock = self.directory_lock.lock().await;
        if self.directory.permission_count() >= MAX_PERMISSIONS_PER_ORG {
            return Err(EngineError::LimitExceeded("too many permissions"));
        }
        if self.directory.contains_permission(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::PermissionDefined { id, action, scope };
        self.persist_directory(&event).await
    }

    pub async fn grant_permission(
        &self,
        group_id: Ulid,
        permission_id: Ulid,
    ) -> Result<(), EngineError> {
        let _lock = self.directory_lock.lock().await;
        if !self.directory.contains_group(&group_id) {
            return Err(EngineError::UnknownGroup(group_id));
        }
        if !self.directory.contains_permission(&permission_id) {
            return Err(EngineError::UnknownPermission(permission_id));
        }
        if self.directory.has_grant(&group_id, &permission_id) {
            return Ok(());
        }
        let event = Event::GrantAdded { group_id, permission_id };
        self.persist_directory(&event).await?;
        self.grant_cache.invalidate(&group_id);
        Ok(())
    }

    pub async fn revoke_permission(
        &self,
        group_id: Ulid,
        permission_id: Ulid,
    ) -> Result<(), EngineError> {
        let _lock = self.directory_lock.lock().await;
        if !self.directory.contains_group(&group_id) {
            return Err(EngineError::UnknownGroup(group_id));
        }
        if !self.directory.has_grant(&group_id, &permission_id) {
            return Ok(());
        }
        let event = Event::GrantRevoked { group_id, permission_id };
        self.persist_directory(&event).await?;
        self.grant_cache.invalidate(&group_id);
        Ok(())
    }

    // ── Booking ledger ───────────────────────────────────────

    /// Create a booking, atomically with respect to concurrent creates on
    /// the same resource: the conflict check and the insert happen under one
    /// write lock, and the WAL acknowledges before the slot becomes visible.
    ///
    /// `confirm: true` books directly into Confirmed (the default flow);
    /// `confirm: false` leaves the booking Pending for approval, blocking
    /// conflicting requests until confirmed, cancelled, or expired.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        start: Ms,
        end: Ms,
        confirm: bool,
        expires_at: Option<Ms>,
    ) -> Result<BookingRecord, EngineError> {
        let span = validate_interval(start, end)?;
        if !self.directory.contains_user(&user_id) {
            return Err(EngineError::UnknownUser(user_id));
        }
        if self.booking_to_resource.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::UnknownResource(resource_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        if !guard.active {
            return Err(EngineError::ResourceInactive(resource_id));
        }
        check_window(&guard, &span)?;
        check_no_conflict(&guard, &span, now_ms(), None)?;

        let status = if confirm {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };
        let expires_at = if confirm { None } else { expires_at };
        let event = Event::BookingCreated {
            id,
            resource_id,
            user_id,
            span,
            status,
            expires_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(BookingRecord {
            id,
            resource_id,
            user_id,
            start: span.start,
            end: span.end,
            status,
        })
    }

    /// Drive a pending booking to Confirmed (approval workflow).
    /// Confirming an already-confirmed booking is a no-op; cancelled and
    /// expired-pending bookings cannot be confirmed.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(id)
            .ok_or(EngineError::UnknownBooking(id))?;
        match booking.status {
            BookingStatus::Confirmed => return Ok(()),
            BookingStatus::Cancelled => {
                return Err(EngineError::InvalidStatus(id, BookingStatus::Cancelled));
            }
            BookingStatus::Pending => {
                // An expired pending booking no longer blocks others, so
                // confirming it could double-book.
                if !booking.is_active(now_ms()) {
                    return Err(EngineError::InvalidStatus(id, BookingStatus::Pending));
                }
            }
        }
        let event = Event::BookingConfirmed { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Move a booking to a new interval on the same resource. The conflict
    /// check excludes the booking itself so it never collides with its own
    /// old slot.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingRecord, EngineError> {
        let span = validate_interval(start, end)?;
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(id)
            .ok_or(EngineError::UnknownBooking(id))?;
        if !booking.is_active(now_ms()) {
            return Err(EngineError::InvalidStatus(id, booking.status));
        }
        if !guard.active {
            return Err(EngineError::ResourceInactive(resource_id));
        }
        check_window(&guard, &span)?;
        check_no_conflict(&guard, &span, now_ms(), Some(id))?;

        let event = Event::BookingRescheduled { id, resource_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard.booking(id).ok_or(EngineError::UnknownBooking(id))?;
        Ok(BookingRecord::from_booking(resource_id, booking))
    }

    /// Cancel a booking. Idempotent: cancelling a cancelled booking returns
    /// Ok without appending an event, so callers can retry safely.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(id)
            .ok_or(EngineError::UnknownBooking(id))?;
        if booking.status == BookingStatus::Cancelled {
            return Ok(());
        }
        let event = Event::BookingCancelled { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Pending bookings whose TTL has passed, as (booking, resource) pairs.
    /// Fed to the reaper, which cancels them.
    pub fn collect_expired_pending(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for booking in &guard.bookings {
                    if booking.status == BookingStatus::Pending
                        && let Some(t) = booking.expires_at
                        && t <= now {
                            expired.push((booking.id, guard.id));
                        }
                }
            }
        }
        expired
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Cancelled bookings are kept (audit).
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        self.directory.compact_events(&mut events);

        let resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in resource_ids {
            let Some(rs) = self.get_resource(&id) else { continue };
            let guard = rs.read().await;
            events.push(Event::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                category: guard.category.clone(),
                capacity: guard.capacity,
                window: guard.window,
            });
            if !guard.active {
                events.push(Event::ResourceUpdated {
                    id: guard.id,
                    name: guard.name.clone(),
                    capacity: guard.capacity,
                    window: guard.window,
                    active: false,
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: booking.id,
                    resource_id: guard.id,
                    user_id: booking.user_id,
                    span: booking.span,
                    status: booking.status,
                    expires_at: booking.expires_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
