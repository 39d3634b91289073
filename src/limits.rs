//! Input bounds enforced at write time. The resolver and slot generator
//! assume everything stored has already passed these checks.

use crate::model::Minutes;

pub const MIN_DURATION_MIN: Minutes = 15;
pub const MAX_DURATION_MIN: Minutes = 480;

pub const MIN_BUFFER_MIN: Minutes = 0;
pub const MAX_BUFFER_MIN: Minutes = 60;

pub const MIN_APPOINTMENTS_PER_DAY: u32 = 1;
pub const MAX_APPOINTMENTS_PER_DAY: u32 = 20;

pub const MIN_ADVANCE_BOOKING_DAYS: u32 = 1;
pub const MAX_ADVANCE_BOOKING_DAYS: u32 = 365;

/// Agent civil time offsets, UTC-12:00 ..= UTC+14:00.
pub const MIN_UTC_OFFSET_MIN: i32 = -12 * 60;
pub const MAX_UTC_OFFSET_MIN: i32 = 14 * 60;

pub const MAX_RANGES_PER_DAY: usize = 8;
pub const MAX_OVERRIDES_PER_AGENT: usize = 1000;
pub const MAX_OVERRIDE_RANGE_DAYS: i64 = 366;
pub const MAX_QUERY_WINDOW_DAYS: i64 = 93;

pub const MAX_AGENTS_PER_TENANT: usize = 100_000;
pub const MAX_APPOINTMENTS_PER_AGENT: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2000;
pub const MAX_CONTACT_FIELD_LEN: usize = 320;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 63;
