use ulid::Ulid;

use crate::model::*;

use super::EngineError;
use super::availability::compute_saturated_spans;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate a raw (start, end) pair into a Span.
///
/// Zero-length and inverted intervals are rejected here, before any shared
/// state is touched.
pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidInterval("start must precede end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(span)
}

/// Reject bookings outside the resource's availability window, if it has one.
pub(crate) fn check_window(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    if let Some(window) = rs.window
        && !window.contains_span(span) {
            return Err(EngineError::OutOfWindow { span: *span, window });
        }
    Ok(())
}

/// The central check: may `span` be allocated on this resource right now?
///
/// Caller holds the resource's write lock, so check-then-insert is atomic
/// with respect to concurrent creates on the same resource.
///
/// `exclude` skips one booking id — reschedules must not conflict with
/// themselves.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    now: Ms,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if rs.capacity <= 1 {
        // Fast path: any overlapping active booking is a conflict
        for booking in rs.overlapping(span) {
            if exclude == Some(booking.id) {
                continue;
            }
            if booking.is_active(now) {
                return Err(EngineError::Conflict(booking.id));
            }
        }
    } else {
        // Capacity > 1: count overlapping active bookings using sweep line
        let active = collect_active_spans(rs, span, now, exclude);
        let saturated = compute_saturated_spans(&active, rs.capacity);
        for sat in &saturated {
            if sat.overlaps(span) {
                // Blame one of the bookings occupying the saturated range.
                let blocking = rs
                    .overlapping(sat)
                    .find(|b| b.is_active(now) && exclude != Some(b.id))
                    .map(|b| b.id)
                    .unwrap_or(rs.id);
                return Err(EngineError::Conflict(blocking));
            }
        }
    }
    Ok(())
}

/// Collect spans of active bookings overlapping the query, sorted by start.
pub(crate) fn collect_active_spans(
    rs: &ResourceState,
    query: &Span,
    now: Ms,
    exclude: Option<Ulid>,
) -> Vec<Span> {
    let mut active = Vec::new();
    for booking in rs.overlapping(query) {
        if exclude == Some(booking.id) {
            continue;
        }
        if booking.is_active(now) {
            active.push(booking.span);
        }
    }
    active.sort_by_key(|s| s.start);
    active
}
