use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Booking lifecycle. Cancelled is terminal; nothing re-enters Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// A single booking slot on a resource.
///
/// Cancelled bookings stay in the list (audit retention) and are skipped by
/// conflict checks and default listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    /// Set only while Pending: the instant this unapproved booking stops
    /// blocking and becomes eligible for reaping.
    pub expires_at: Option<Ms>,
}

impl Booking {
    /// An active booking blocks conflicting allocations. Pending bookings
    /// count until they expire; cancelled bookings never count.
    pub fn is_active(&self, now: Ms) -> bool {
        match self.status {
            BookingStatus::Confirmed => true,
            BookingStatus::Pending => self.expires_at.is_none_or(|t| t > now),
            BookingStatus::Cancelled => false,
        }
    }
}

/// A bookable resource and its ledger of booking slots.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub category: Option<String>,
    /// Max concurrent active bookings (default 1).
    pub capacity: u32,
    /// Optional availability window; bookings must lie inside it.
    pub window: Option<Span>,
    /// Inactive resources reject new bookings but retain history.
    pub active: bool,
    /// All bookings (any status), sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(
        id: Ulid,
        name: String,
        category: Option<String>,
        capacity: u32,
        window: Option<Span>,
    ) -> Self {
        Self {
            id,
            name,
            category,
            capacity,
            window,
            active: true,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Remove a booking by id (reschedule re-inserts it at the new position).
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

// ── Identity & permissions ────────────────────────────────────────

/// A registered user. `credential` is an opaque hash produced by the caller;
/// the engine stores it verbatim and never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub email: String,
    pub credential: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
}

/// What a permission allows a group's members to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    View,
    Book,
    Manage,
    /// Administrative override: cancel anyone's booking.
    CancelAny,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Book => "book",
            Action::Manage => "manage",
            Action::CancelAny => "cancel-any",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a permission applies to: one resource, or every resource in a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Resource(Ulid),
    Category(String),
}

/// An (action, scope) pair. Granted to groups, never directly to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Ulid,
    pub action: Action,
    pub scope: Scope,
}

impl Permission {
    /// Does this permission authorize `action` on the given resource?
    pub fn matches(&self, action: Action, resource_id: Ulid, category: Option<&str>) -> bool {
        if self.action != action {
            return false;
        }
        match &self.scope {
            Scope::Resource(rid) => *rid == resource_id,
            Scope::Category(c) => category == Some(c.as_str()),
        }
    }
}

// ── Events ────────────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        username: String,
        email: String,
        credential: String,
    },
    UserDeactivated {
        id: Ulid,
    },
    GroupCreated {
        id: Ulid,
        name: String,
        description: Option<String>,
    },
    GroupDeleted {
        id: Ulid,
    },
    MemberAdded {
        user_id: Ulid,
        group_id: Ulid,
    },
    MemberRemoved {
        user_id: Ulid,
        group_id: Ulid,
    },
    PermissionDefined {
        id: Ulid,
        action: Action,
        scope: Scope,
    },
    GrantAdded {
        group_id: Ulid,
        permission_id: Ulid,
    },
    GrantRevoked {
        group_id: Ulid,
        permission_id: Ulid,
    },
    ResourceCreated {
        id: Ulid,
        name: String,
        category: Option<String>,
        capacity: u32,
        window: Option<Span>,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        window: Option<Span>,
        active: bool,
    },
    BookingCreated {
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        span: Span,
        status: BookingStatus,
        expires_at: Option<Ms>,
    },
    BookingConfirmed {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingRescheduled {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

impl BookingRecord {
    pub(crate) fn from_booking(resource_id: Ulid, b: &Booking) -> Self {
        Self {
            id: b.id,
            resource_id,
            user_id: b.user_id,
            start: b.span.start,
            end: b.span.end,
            status: b.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub category: Option<String>,
    pub capacity: u32,
    pub window: Option<Span>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_span(&Span::new(100, 200))); // self-containment
        assert!(s.contains_span(&Span::new(150, 180)));
        assert!(!s.contains_span(&Span::new(50, 150)));
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    fn slot(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            expires_at: None,
        }
    }

    #[test]
    fn booking_ordering() {
        let mut rs = ResourceState::new(Ulid::new(), "room".into(), None, 1, None);
        rs.insert_booking(slot(300, 400, BookingStatus::Confirmed));
        rs.insert_booking(slot(100, 200, BookingStatus::Cancelled));
        rs.insert_booking(slot(200, 300, BookingStatus::Pending));
        assert_eq!(rs.bookings[0].span.start, 100);
        assert_eq!(rs.bookings[1].span.start, 200);
        assert_eq!(rs.bookings[2].span.start, 300);
    }

    #[test]
    fn booking_remove_preserves_order() {
        let mut rs = ResourceState::new(Ulid::new(), "room".into(), None, 1, None);
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        for (i, &id) in ids.iter().enumerate() {
            rs.insert_booking(Booking {
                id,
                user_id: Ulid::new(),
                span: Span::new((i as Ms) * 100, (i as Ms) * 100 + 50),
                status: BookingStatus::Confirmed,
                expires_at: None,
            });
        }
        rs.remove_booking(ids[1]); // remove middle
        assert_eq!(rs.bookings.len(), 2);
        assert_eq!(rs.bookings[0].id, ids[0]);
        assert_eq!(rs.bookings[1].id, ids[2]);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut rs = ResourceState::new(Ulid::new(), "room".into(), None, 1, None);
        rs.insert_booking(slot(100, 200, BookingStatus::Confirmed));
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.bookings.len(), 1); // original still there
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = ResourceState::new(Ulid::new(), "room".into(), None, 1, None);
        rs.insert_booking(slot(100, 200, BookingStatus::Confirmed)); // past
        rs.insert_booking(slot(450, 600, BookingStatus::Confirmed)); // overlaps
        rs.insert_booking(slot(1000, 1100, BookingStatus::Confirmed)); // future

        let query = Span::new(500, 800);
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Booking ending exactly at query.start is NOT overlapping (half-open)
        let mut rs = ResourceState::new(Ulid::new(), "room".into(), None, 1, None);
        rs.insert_booking(slot(100, 200, BookingStatus::Confirmed));
        let query = Span::new(200, 300);
        assert_eq!(rs.overlapping(&query).count(), 0);
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        // Booking [100, 201) overlaps query [200, 300) by exactly 1ms
        let mut rs = ResourceState::new(Ulid::new(), "room".into(), None, 1, None);
        rs.insert_booking(slot(100, 201, BookingStatus::Confirmed));
        let query = Span::new(200, 300);
        assert_eq!(rs.overlapping(&query).count(), 1);
    }

    #[test]
    fn active_statuses() {
        let now = 5_000;
        let confirmed = slot(0, 100, BookingStatus::Confirmed);
        assert!(confirmed.is_active(now));

        let cancelled = slot(0, 100, BookingStatus::Cancelled);
        assert!(!cancelled.is_active(now));

        let mut pending = slot(0, 100, BookingStatus::Pending);
        assert!(pending.is_active(now)); // no TTL → blocks indefinitely
        pending.expires_at = Some(now + 1);
        assert!(pending.is_active(now));
        pending.expires_at = Some(now);
        assert!(!pending.is_active(now)); // expiry instant is inclusive
    }

    #[test]
    fn permission_matching() {
        let rid = Ulid::new();
        let by_resource = Permission {
            id: Ulid::new(),
            action: Action::Book,
            scope: Scope::Resource(rid),
        };
        assert!(by_resource.matches(Action::Book, rid, None));
        assert!(!by_resource.matches(Action::Book, Ulid::new(), None));
        assert!(!by_resource.matches(Action::Manage, rid, None));

        let by_category = Permission {
            id: Ulid::new(),
            action: Action::Book,
            scope: Scope::Category("room".into()),
        };
        assert!(by_category.matches(Action::Book, rid, Some("room")));
        assert!(!by_category.matches(Action::Book, rid, Some("gpu")));
        assert!(!by_category.matches(Action::Book, rid, None));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(1000, 2000),
            status: BookingStatus::Confirmed,
            expires_at: None,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
