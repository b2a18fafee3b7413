use crate::model::*;

use super::conflict::collect_active_spans;

// ── Free-slot Algorithm ───────────────────────────────────────────

/// Compute the free sub-intervals of `query` on a resource.
///
/// Base availability is the resource's window clipped to the query (the whole
/// query when no window is set). Active bookings are subtracted — wholesale
/// for capacity-1 resources, only where the overlap count saturates the
/// capacity otherwise. Inactive resources have no availability.
pub fn free_slots(resource: &ResourceState, query: &Span, now: Ms) -> Vec<Span> {
    if !resource.active {
        return Vec::new();
    }

    let base = match resource.window {
        Some(window) => {
            let start = window.start.max(query.start);
            let end = window.end.min(query.end);
            if start >= end {
                return Vec::new();
            }
            Span::new(start, end)
        }
        None => *query,
    };

    let active = collect_active_spans(resource, &base, now, None);
    if active.is_empty() {
        return vec![base];
    }

    let occupied = if resource.capacity <= 1 {
        merge_overlapping(&active)
    } else {
        compute_saturated_spans(&active, resource.capacity)
    };

    subtract_intervals(&[base], &occupied)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sweep-line algorithm: find time ranges where the booking count >= capacity.
/// Returns sorted, merged spans representing fully-saturated time ranges.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    // Build sweep-line events: +1 at start, -1 at end
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start {
                result.push(Span::new(start, *time));
            }
    }

    result
}
