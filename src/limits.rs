//! Hard bounds on resource consumption. Every externally-supplied quantity
//! is capped so a single org cannot exhaust memory or disk.

use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_CATEGORY_LEN: usize = 120;
pub const MAX_CREDENTIAL_LEN: usize = 512;

pub const MAX_USERS_PER_ORG: usize = 100_000;
pub const MAX_GROUPS_PER_ORG: usize = 10_000;
pub const MAX_PERMISSIONS_PER_ORG: usize = 100_000;
pub const MAX_RESOURCES_PER_ORG: usize = 10_000;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

/// Timestamps must be non-negative unix milliseconds before year 2100.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking may span at most one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Query windows (listings, free-slot scans) may span at most one year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_ORG_NAME_LEN: usize = 256;
pub const MAX_ORGS: usize = 256;
