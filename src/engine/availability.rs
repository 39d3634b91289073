use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::filter_available;
use super::slots::generate_slots;

// ── Availability Algorithm ────────────────────────────────────────

/// Effective availability of one calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayAvailability {
    Blocked,
    Open(Vec<TimeRange>),
}

/// Merge the weekly rule with any override for `date`.
///
/// Override: a blocking override wins outright; an open override with its
/// own slots REPLACES the weekly slots; an open override without slots
/// falls back to the weekly rule. Dates before `today` are always blocked.
///
/// Ranges were validated when written, so they are taken as sorted and disjoint.
pub fn resolve_day(agent: &AgentState, date: NaiveDate, today: NaiveDate) -> DayAvailability {
    if date < today {
        return DayAvailability::Blocked;
    }

    if let Some(ov) = agent.overrides.get(&date) {
        if !ov.is_available {
            return DayAvailability::Blocked;
        }
        if let Some(slots) = ov.replacement_slots() {
            return DayAvailability::Open(slots.to_vec());
        }
    }

    let rule = agent.weekly.rule_for(date);
    if rule.is_available && !rule.slots.is_empty() {
        DayAvailability::Open(rule.slots.clone())
    } else {
        DayAvailability::Blocked
    }
}

/// Bookable slots on `date`: resolve, expand into slots, drop conflicts.
///
/// On `today` only slots starting after `now_minute` survive. `exclude`
/// removes one appointment from conflict and cap accounting (used when an
/// appointment is moved and must not collide with itself).
pub fn free_slots(
    agent: &AgentState,
    date: NaiveDate,
    duration: Minutes,
    today: NaiveDate,
    now_minute: Minutes,
    exclude: Option<Ulid>,
) -> Vec<Slot> {
    let DayAvailability::Open(windows) = resolve_day(agent, date, today) else {
        return Vec::new();
    };

    let mut candidates = generate_slots(&windows, duration, agent.policy.buffer_time);
    if date == today {
        candidates.retain(|slot| slot.start > now_minute);
    }

    filter_available(agent, date, candidates, exclude)
}

/// Last date an agent accepts bookings for, given their civil `today`.
pub fn booking_horizon(policy: &AvailabilityPolicy, today: NaiveDate) -> NaiveDate {
    today
        .checked_add_days(chrono::Days::new(policy.advance_booking_days as u64))
        .unwrap_or(NaiveDate::MAX)
}
