use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use ulid::Ulid;

use crate::authz::AuthDecision;
use crate::config::BookingPolicy;
use crate::engine::{Engine, EngineError, now_ms};
use crate::model::*;
use crate::observability;

/// Orchestration facade — the single entry point for external callers.
///
/// Sequences request validation → authorization → ledger mutation, in that
/// order: policy violations are rejected before shared state is touched, and
/// an unauthorized caller never reaches the ledger, so deny and conflict are
/// distinguishable only to callers allowed to book at all.
pub struct BookingService {
    engine: Arc<Engine>,
    policy: BookingPolicy,
}

impl BookingService {
    pub fn new(engine: Arc<Engine>, policy: BookingPolicy) -> Self {
        Self { engine, policy }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Actors must resolve and be active before any mutation runs.
    fn ensure_active_actor(&self, user_id: Ulid) -> Result<(), EngineError> {
        let user = self
            .engine
            .get_user(user_id)
            .ok_or(EngineError::UnknownUser(user_id))?;
        if !user.active {
            return Err(EngineError::Forbidden("user is deactivated"));
        }
        Ok(())
    }

    async fn require(
        &self,
        user_id: Ulid,
        action: Action,
        resource_id: Ulid,
    ) -> Result<(), EngineError> {
        match self.engine.authorize(user_id, action, resource_id).await? {
            AuthDecision::Allow => Ok(()),
            AuthDecision::Deny(reason) => {
                metrics::counter!(observability::AUTHZ_DENIED_TOTAL).increment(1);
                debug!(%user_id, %resource_id, action = %action, reason, "authorization denied");
                Err(EngineError::Forbidden(reason))
            }
        }
    }

    /// Book `[start, end)` on a resource for a user.
    ///
    /// Exactly one booking is created or none: the ledger applies the slot
    /// only after the WAL acknowledged the event, under the resource's write
    /// lock. With `approval_required` the booking lands Pending (blocking
    /// conflicting requests) and must be approved to confirm.
    pub async fn request_booking(
        &self,
        user_id: Ulid,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingRecord, EngineError> {
        let op_start = Instant::now();
        if start >= end {
            return Err(EngineError::InvalidInterval("start must precede end"));
        }
        let now = now_ms();
        self.policy.check_start(start, now)?;

        self.require(user_id, Action::Book, resource_id).await?;

        let confirm = !self.policy.approval_required;
        let expires_at = if confirm {
            None
        } else {
            self.policy.pending_ttl_ms.map(|ttl| now + ttl)
        };
        let result = self
            .engine
            .create_booking(Ulid::new(), resource_id, user_id, start, end, confirm, expires_at)
            .await;

        match &result {
            Ok(record) => {
                let status = if record.status == BookingStatus::Pending {
                    "pending"
                } else {
                    "confirmed"
                };
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL, "status" => status)
                    .increment(1);
            }
            Err(EngineError::Conflict(_)) => {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            Err(_) => {}
        }
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => "request_booking")
            .record(op_start.elapsed().as_secs_f64());
        result
    }

    /// Cancel a booking. The owner may always cancel their own; anyone else
    /// needs the administrative cancel override on the resource. Idempotent:
    /// repeating the cancel returns Ok without changing state.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        acting_user: Ulid,
    ) -> Result<(), EngineError> {
        let op_start = Instant::now();
        self.ensure_active_actor(acting_user)?;
        let record = self.engine.get_booking(booking_id).await?;
        if record.user_id != acting_user {
            self.require(acting_user, Action::CancelAny, record.resource_id)
                .await
                .map_err(|e| match e {
                    EngineError::Forbidden(_) => EngineError::Forbidden("not the booking owner"),
                    other => other,
                })?;
        }
        let already_cancelled = record.status == BookingStatus::Cancelled;
        self.engine.cancel_booking(booking_id).await?;
        if !already_cancelled {
            metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        }
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => "cancel_booking")
            .record(op_start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Approve a pending booking (approval workflow). Requires Manage on the
    /// resource.
    pub async fn approve_booking(
        &self,
        booking_id: Ulid,
        acting_user: Ulid,
    ) -> Result<(), EngineError> {
        self.ensure_active_actor(acting_user)?;
        let record = self.engine.get_booking(booking_id).await?;
        self.require(acting_user, Action::Manage, record.resource_id).await?;
        self.engine.confirm_booking(booking_id).await?;
        metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        Ok(())
    }

    /// Move a booking to a new interval on its resource. The owner may
    /// reschedule their own; anyone else needs Manage.
    pub async fn reschedule_booking(
        &self,
        booking_id: Ulid,
        acting_user: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingRecord, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidInterval("start must precede end"));
        }
        self.policy.check_start(start, now_ms())?;
        self.ensure_active_actor(acting_user)?;
        let record = self.engine.get_booking(booking_id).await?;
        if record.user_id != acting_user {
            self.require(acting_user, Action::Manage, record.resource_id)
                .await
                .map_err(|e| match e {
                    EngineError::Forbidden(_) => EngineError::Forbidden("not the booking owner"),
                    other => other,
                })?;
        }
        let result = self.engine.reschedule_booking(booking_id, start, end).await;
        if let Err(EngineError::Conflict(_)) = &result {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        }
        result
    }

    // ── Read passthroughs ────────────────────────────────────

    pub async fn authorize(
        &self,
        user_id: Ulid,
        action: Action,
        resource_id: Ulid,
    ) -> Result<AuthDecision, EngineError> {
        self.engine.authorize(user_id, action, resource_id).await
    }

    /// Bookings on a resource within `[from, to)`, ordered by start time,
    /// cancelled bookings excluded.
    pub async fn list_bookings(
        &self,
        resource_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<BookingRecord>, EngineError> {
        self.engine.list_bookings(resource_id, from, to, false).await
    }

    pub async fn free_slots(
        &self,
        resource_id: Ulid,
        from: Ms,
        to: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        self.engine.free_slots(resource_id, from, to, min_duration_ms).await
    }
}
