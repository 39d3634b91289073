//! Write-time validation. Everything stored has passed through here, which
//! is what lets the resolver trust its input.

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Ranges for one day: bounded count, sorted, non-overlapping.
pub(crate) fn validate_ranges(ranges: &[TimeRange]) -> Result<(), EngineError> {
    if ranges.len() > MAX_RANGES_PER_DAY {
        return Err(EngineError::LimitExceeded("too many time ranges in one day"));
    }
    for r in ranges {
        if r.start >= r.end || r.end > MINUTES_PER_DAY {
            return Err(EngineError::validation(format!("invalid time range {r}")));
        }
    }
    for pair in ranges.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(EngineError::validation(format!(
                "time ranges {} and {} overlap or are out of order",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_weekly_rule(rule: &WeeklyDayRule) -> Result<(), EngineError> {
    if rule.day_of_week > 6 {
        return Err(EngineError::validation(format!(
            "day_of_week {} out of range 0..6",
            rule.day_of_week
        )));
    }
    if rule.is_available == rule.slots.is_empty() {
        return Err(EngineError::validation(format!(
            "day {}: slots must be non-empty exactly when available",
            rule.day_of_week
        )));
    }
    validate_ranges(&rule.slots)
}

pub(crate) fn validate_override(ov: &DateOverride) -> Result<(), EngineError> {
    if let Some(slots) = &ov.slots
        && ov.is_available
    {
        validate_ranges(slots)?;
    }
    validate_text("reason", ov.reason.as_deref(), MAX_REASON_LEN)
}

pub(crate) fn validate_policy(policy: &AvailabilityPolicy) -> Result<(), EngineError> {
    validate_duration(policy.default_duration)?;
    if !(MIN_BUFFER_MIN..=MAX_BUFFER_MIN).contains(&policy.buffer_time) {
        return Err(EngineError::validation(format!(
            "buffer_time {} out of range {MIN_BUFFER_MIN}..={MAX_BUFFER_MIN}",
            policy.buffer_time
        )));
    }
    if !(MIN_APPOINTMENTS_PER_DAY..=MAX_APPOINTMENTS_PER_DAY).contains(&policy.max_appointments_per_day) {
        return Err(EngineError::validation(format!(
            "max_appointments_per_day {} out of range {MIN_APPOINTMENTS_PER_DAY}..={MAX_APPOINTMENTS_PER_DAY}",
            policy.max_appointments_per_day
        )));
    }
    if !(MIN_ADVANCE_BOOKING_DAYS..=MAX_ADVANCE_BOOKING_DAYS).contains(&policy.advance_booking_days) {
        return Err(EngineError::validation(format!(
            "advance_booking_days {} out of range {MIN_ADVANCE_BOOKING_DAYS}..={MAX_ADVANCE_BOOKING_DAYS}",
            policy.advance_booking_days
        )));
    }
    Ok(())
}

pub(crate) fn validate_duration(duration: Minutes) -> Result<(), EngineError> {
    if !(MIN_DURATION_MIN..=MAX_DURATION_MIN).contains(&duration) {
        return Err(EngineError::validation(format!(
            "duration {duration} out of range {MIN_DURATION_MIN}..={MAX_DURATION_MIN}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_time_of_day(time: Minutes) -> Result<(), EngineError> {
    if time >= MINUTES_PER_DAY {
        return Err(EngineError::validation(format!("time {} is not a time of day", format_hhmm(time))));
    }
    Ok(())
}

pub(crate) fn validate_utc_offset(offset: i32) -> Result<(), EngineError> {
    if !(MIN_UTC_OFFSET_MIN..=MAX_UTC_OFFSET_MIN).contains(&offset) {
        return Err(EngineError::validation(format!(
            "utc offset {offset} out of range {MIN_UTC_OFFSET_MIN}..={MAX_UTC_OFFSET_MIN} minutes"
        )));
    }
    Ok(())
}

pub(crate) fn validate_contact(contact: &ContactDetails) -> Result<(), EngineError> {
    if contact.name.trim().is_empty() {
        return Err(EngineError::validation("contact name is required"));
    }
    let email = contact.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(EngineError::validation(format!("invalid contact email '{email}'"))),
    }
    validate_text("contact name", Some(&contact.name), MAX_CONTACT_FIELD_LEN)?;
    validate_text("contact email", Some(&contact.email), MAX_CONTACT_FIELD_LEN)?;
    validate_text("contact phone", contact.phone.as_deref(), MAX_CONTACT_FIELD_LEN)
}

pub(crate) fn validate_text(field: &str, value: Option<&str>, max: usize) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::validation(format!(
            "{field} longer than {max} bytes"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn validate_booking(req: &BookingRequest) -> Result<(), EngineError> {
    validate_time_of_day(req.time)?;
    if let Some(duration) = req.duration {
        validate_duration(duration)?;
    }
    validate_contact(&req.contact)?;
    validate_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)?;
    if let Some(key) = &req.idempotency_key
        && (key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN)
    {
        return Err(EngineError::validation(format!(
            "idempotency key must be 1..={MAX_IDEMPOTENCY_KEY_LEN} bytes"
        )));
    }
    Ok(())
}
