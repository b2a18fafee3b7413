use crate::engine::EngineError;
use crate::model::Ms;

const DAY_MS: Ms = 24 * 3_600_000;

/// Request-shape policy applied by the booking service before anything else
/// runs: how far into the future or past a booking may start, and whether
/// new bookings need approval before they confirm.
///
/// Confirmation-on-create is the default; the approval workflow is opt-in.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// Latest allowed start, relative to now.
    pub max_lead_ms: Ms,
    /// Earliest allowed start, relative to now (walk-in grace).
    pub max_backdate_ms: Ms,
    /// When set, new bookings are created Pending and must be approved.
    pub approval_required: bool,
    /// TTL for pending bookings; expired ones stop blocking and get reaped.
    /// Ignored unless `approval_required` is set.
    pub pending_ttl_ms: Option<Ms>,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            max_lead_ms: 365 * DAY_MS,
            max_backdate_ms: DAY_MS,
            approval_required: false,
            pending_ttl_ms: None,
        }
    }
}

impl BookingPolicy {
    /// Read the policy from `TIMESHARE_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_lead_ms: lookup("TIMESHARE_MAX_LEAD_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_lead_ms),
            max_backdate_ms: lookup("TIMESHARE_MAX_BACKDATE_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_backdate_ms),
            approval_required: lookup("TIMESHARE_APPROVAL_REQUIRED")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.approval_required),
            pending_ttl_ms: lookup("TIMESHARE_PENDING_TTL_MS").and_then(|s| s.parse().ok()),
        }
    }

    /// Reject starts outside the configured horizon. Runs before the ledger
    /// is consulted, so policy violations never touch shared state.
    pub fn check_start(&self, start: Ms, now: Ms) -> Result<(), EngineError> {
        if start < now - self.max_backdate_ms {
            return Err(EngineError::InvalidInterval("starts too far in the past"));
        }
        if start > now + self.max_lead_ms {
            return Err(EngineError::InvalidInterval("starts too far in the future"));
        }
        Ok(())
    }
}
