use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for audit timestamps only.
pub type Ms = i64;

/// Minutes since local midnight. All slot arithmetic happens in this unit.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Half-open range `[start, end)` of local civil time on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minutes,
    pub end: Minutes,
}

/// A bookable slot is just a range that the generator emitted.
pub type Slot = TimeRange;

impl TimeRange {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// Parse `HH:MM-HH:MM`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (a, b) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("bad time range '{s}': expected HH:MM-HH:MM"))?;
        let start = parse_hhmm(a).ok_or_else(|| format!("bad start time '{}'", a.trim()))?;
        let end = parse_hhmm(b).ok_or_else(|| format!("bad end time '{}'", b.trim()))?;
        if start >= end {
            return Err(format!("start {} must be before end {}", format_hhmm(start), format_hhmm(end)));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Widen by `buffer` minutes on both sides, clamped at midnight.
    pub fn expanded(&self, buffer: Minutes) -> TimeRange {
        TimeRange {
            start: self.start.saturating_sub(buffer),
            end: (self.end + buffer).min(MINUTES_PER_DAY),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

/// Parse a strict 24-hour `HH:MM`. `24:00` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Option<Minutes> {
    let (h, m) = s.trim().split_once(':')?;
    if h.len() != 2 || m.len() != 2 || !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let h: Minutes = h.parse().ok()?;
    let m: Minutes = m.parse().ok()?;
    if m >= 60 {
        return None;
    }
    match h {
        0..=23 => Some(h * 60 + m),
        24 if m == 0 => Some(MINUTES_PER_DAY),
        _ => None,
    }
}

pub fn format_hhmm(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Parse a comma-separated list of ranges, e.g. `09:00-12:00,13:00-17:00`.
/// An empty string yields an empty list.
pub fn parse_ranges(s: &str) -> Result<Vec<TimeRange>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(TimeRange::parse)
        .collect()
}

pub fn format_ranges(ranges: &[TimeRange]) -> String {
    ranges
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Weekday index with 0 = Sunday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

// ── Availability configuration ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyDayRule {
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub is_available: bool,
    /// Sorted, non-overlapping. Non-empty iff `is_available`.
    pub slots: Vec<TimeRange>,
}

impl WeeklyDayRule {
    pub fn closed(day_of_week: u8) -> Self {
        Self {
            day_of_week,
            is_available: false,
            slots: Vec::new(),
        }
    }

    pub fn open(day_of_week: u8, slots: Vec<TimeRange>) -> Self {
        Self {
            day_of_week,
            is_available: true,
            slots,
        }
    }
}

/// One rule per weekday, indexed by `day_of_week`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    days: [WeeklyDayRule; 7],
}

impl Default for WeeklySchedule {
    /// A new agent has no availability until they configure it.
    fn default() -> Self {
        Self {
            days: std::array::from_fn(|d| WeeklyDayRule::closed(d as u8)),
        }
    }
}

impl WeeklySchedule {
    pub fn rule(&self, day_of_week: u8) -> &WeeklyDayRule {
        &self.days[day_of_week as usize % 7]
    }

    pub fn rule_for(&self, date: NaiveDate) -> &WeeklyDayRule {
        self.rule(day_of_week(date))
    }

    /// Replace the rule for `rule.day_of_week`. Caller validates first.
    pub fn set(&mut self, rule: WeeklyDayRule) {
        let idx = rule.day_of_week as usize;
        self.days[idx] = rule;
    }

    pub fn rules(&self) -> &[WeeklyDayRule] {
        &self.days
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOverride {
    pub date: NaiveDate,
    pub is_available: bool,
    pub slots: Option<Vec<TimeRange>>,
    pub reason: Option<String>,
}

impl DateOverride {
    /// Slots that replace the weekly ones, if any. An empty list means
    /// "available as usual", same as no list at all.
    pub fn replacement_slots(&self) -> Option<&[TimeRange]> {
        match &self.slots {
            Some(slots) if self.is_available && !slots.is_empty() => Some(slots),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPolicy {
    pub default_duration: Minutes,
    pub buffer_time: Minutes,
    pub max_appointments_per_day: u32,
    pub advance_booking_days: u32,
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self {
            default_duration: 60,
            buffer_time: 15,
            max_appointments_per_day: 8,
            advance_booking_days: 30,
        }
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" | "canceled" => Some(AppointmentStatus::Cancelled),
            "rejected" => Some(AppointmentStatus::Rejected),
            _ => None,
        }
    }

    /// Pending and confirmed appointments hold their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentType {
    Viewing,
    Consultation,
    Valuation,
    Other,
}

impl AppointmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Viewing => "viewing",
            AppointmentType::Consultation => "consultation",
            AppointmentType::Valuation => "valuation",
            AppointmentType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewing" | "visit" => Some(AppointmentType::Viewing),
            "consultation" => Some(AppointmentType::Consultation),
            "valuation" => Some(AppointmentType::Valuation),
            "other" => Some(AppointmentType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub agent_id: Ulid,
    pub client_id: Ulid,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Minutes,
    pub duration: Minutes,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub contact: ContactDetails,
    pub notes: Option<String>,
    pub agent_notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Appointment {
    pub fn span(&self) -> TimeRange {
        TimeRange::new(self.scheduled_time, self.scheduled_time + self.duration)
    }

    fn sort_key(&self) -> (NaiveDate, Minutes) {
        (self.scheduled_date, self.scheduled_time)
    }
}

/// Request payload for a booking; the engine assigns status and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub agent_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub time: Minutes,
    /// Falls back to the agent's `default_duration`.
    pub duration: Option<Minutes>,
    pub appointment_type: AppointmentType,
    pub contact: ContactDetails,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Partial settings write. `None` leaves that part untouched; `Some`
/// replaces it (weekly rules replace their own weekday only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub weekly_schedule: Option<Vec<WeeklyDayRule>>,
    pub date_overrides: Option<Vec<DateOverride>>,
    pub policy: Option<AvailabilityPolicy>,
}

/// Caller identity, as resolved by the external identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Trusted backend acting on behalf of anyone.
    Service,
    Agent(Ulid),
    Client(Ulid),
}

// ── Per-agent state ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Offset of the agent's civil time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    pub weekly: WeeklySchedule,
    pub overrides: BTreeMap<NaiveDate, DateOverride>,
    pub policy: AvailabilityPolicy,
    /// All appointments ever booked, sorted by `(scheduled_date, scheduled_time)`.
    pub appointments: Vec<Appointment>,
}

impl AgentState {
    pub fn new(id: Ulid, name: Option<String>, utc_offset_minutes: i32) -> Self {
        Self {
            id,
            name,
            utc_offset_minutes,
            weekly: WeeklySchedule::default(),
            overrides: BTreeMap::new(),
            policy: AvailabilityPolicy::default(),
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by date then time.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let key = appointment.sort_key();
        let pos = self.appointments.partition_point(|a| a.sort_key() <= key);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments of any status on `date`, via binary search.
    pub fn appointments_on(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        let lo = self.appointments.partition_point(|a| a.scheduled_date < date);
        let hi = self.appointments.partition_point(|a| a.scheduled_date <= date);
        self.appointments[lo..hi].iter()
    }

    /// Pending/confirmed appointments on `date`.
    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        self.appointments_on(date).filter(|a| a.status.is_active())
    }

    pub fn find_by_idempotency_key(&self, key: &str) -> Option<&Appointment> {
        self.appointments
            .iter()
            .find(|a| a.idempotency_key.as_deref() == Some(key))
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id,
            name: self.name.clone(),
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }
}

/// The event types. This is the WAL record format and the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AgentCreated {
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    },
    AgentUpdated {
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    },
    SettingsUpdated {
        agent_id: Ulid,
        update: SettingsUpdate,
    },
    OverridesAdded {
        agent_id: Ulid,
        overrides: Vec<DateOverride>,
    },
    OverrideRemoved {
        agent_id: Ulid,
        date: NaiveDate,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentTransitioned {
        id: Ulid,
        agent_id: Ulid,
        status: AppointmentStatus,
        agent_notes: Option<String>,
        at: Ms,
    },
    AppointmentRescheduled {
        id: Ulid,
        agent_id: Ulid,
        date: NaiveDate,
        time: Minutes,
        at: Ms,
    },
}

impl Event {
    pub fn agent_id(&self) -> Ulid {
        match self {
            Event::AgentCreated { id, .. } | Event::AgentUpdated { id, .. } => *id,
            Event::SettingsUpdated { agent_id, .. }
            | Event::OverridesAdded { agent_id, .. }
            | Event::OverrideRemoved { agent_id, .. }
            | Event::AppointmentTransitioned { agent_id, .. }
            | Event::AppointmentRescheduled { agent_id, .. } => *agent_id,
            Event::AppointmentBooked { appointment } => appointment.agent_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub agent_id: Ulid,
    pub weekly: WeeklySchedule,
    pub overrides: Vec<DateOverride>,
    pub policy: AvailabilityPolicy,
}

/// Free slots per date, in date order.
pub type DaySlots = BTreeMap<NaiveDate, Vec<Slot>>;
