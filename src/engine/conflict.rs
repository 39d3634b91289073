use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::local_now;
use crate::model::*;

use super::availability::{booking_horizon, free_slots};
use super::error::{ConflictReason, PolicyReason};
use super::EngineError;

/// Drop candidate slots that collide with held appointments on `date`.
///
/// A pending/confirmed appointment `[s, e)` blocks `[s - buffer, e + buffer)`.
/// Once the day holds `max_appointments_per_day` of them nothing is left.
/// `exclude` is skipped entirely (an appointment being moved).
pub fn filter_available(
    agent: &AgentState,
    date: NaiveDate,
    candidates: Vec<Slot>,
    exclude: Option<Ulid>,
) -> Vec<Slot> {
    let buffer = agent.policy.buffer_time;
    let blocked: Vec<TimeRange> = agent
        .active_on(date)
        .filter(|a| Some(a.id) != exclude)
        .map(|a| a.span().expanded(buffer))
        .collect();

    if blocked.len() as u32 >= agent.policy.max_appointments_per_day {
        return Vec::new();
    }

    candidates
        .into_iter()
        .filter(|slot| !blocked.iter().any(|b| b.overlaps(slot)))
        .collect()
}

pub(crate) fn day_cap_reached(agent: &AgentState, date: NaiveDate, exclude: Option<Ulid>) -> bool {
    let held = agent
        .active_on(date)
        .filter(|a| Some(a.id) != exclude)
        .count();
    held as u32 >= agent.policy.max_appointments_per_day
}

/// Commit-time re-check for placing `span` on `date`. Runs under the agent's
/// write lock; first failure wins.
pub(crate) fn check_bookable(
    agent: &AgentState,
    date: NaiveDate,
    span: TimeRange,
    now: Ms,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let (today, now_minute) = local_now(now, agent.utc_offset_minutes);

    if date < today {
        return Err(EngineError::Policy(PolicyReason::PastDate));
    }
    if date > booking_horizon(&agent.policy, today) {
        return Err(EngineError::Policy(PolicyReason::OutOfWindow));
    }
    if day_cap_reached(agent, date, exclude) {
        return Err(EngineError::Policy(PolicyReason::MaxPerDayReached));
    }

    let free = free_slots(agent, date, span.duration(), today, now_minute, exclude);
    if !free.contains(&span) {
        return Err(EngineError::Conflict(ConflictReason::SlotUnavailable));
    }
    Ok(())
}
