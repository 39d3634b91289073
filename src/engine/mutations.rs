use std::sync::Arc;

use chrono::{Days, NaiveDate};
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::clock::local_to_ms;
use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;

use super::conflict::check_bookable;
use super::lifecycle::{
    authorize_agent_edit, authorize_booking, authorize_change, check_reschedule, check_transition,
};
use super::validate::*;
use super::{Engine, EngineError, WalCommand};

/// Outcome label for the booking counter.
fn booking_outcome(result: &Result<Appointment, EngineError>) -> &'static str {
    match result {
        Ok(_) => "booked",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::Policy(_)) => "policy",
        Err(_) => "rejected",
    }
}

impl Engine {
    pub async fn create_agent(
        &self,
        actor: Actor,
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    ) -> Result<(), EngineError> {
        authorize_agent_edit(actor, id)?;
        if self.state.len() >= MAX_AGENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many agents"));
        }
        if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("agent name too long"));
        }
        validate_utc_offset(utc_offset_minutes)?;
        let _commit = self.commit_gate.read().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::AgentCreated {
            id,
            name: name.clone(),
            utc_offset_minutes,
        };
        self.wal_append(&event).await?;
        let agent = AgentState::new(id, name, utc_offset_minutes);
        self.state.insert(id, Arc::new(RwLock::new(agent)));
        self.notify.send(id, &event);
        info!(agent = %id, "agent created");
        Ok(())
    }

    pub async fn update_agent(
        &self,
        actor: Actor,
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    ) -> Result<(), EngineError> {
        authorize_agent_edit(actor, id)?;
        if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("agent name too long"));
        }
        validate_utc_offset(utc_offset_minutes)?;
        let agent = self.get_agent_state(&id).ok_or(EngineError::NotFound(id))?;
        let _commit = self.commit_gate.read().await;
        let mut guard = agent.write().await;

        let event = Event::AgentUpdated {
            id,
            name,
            utc_offset_minutes,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Replace any combination of weekly rules, the override set and the
    /// policy. Weekly rules replace only the weekdays they name; a supplied
    /// override list replaces all overrides.
    pub async fn update_settings(
        &self,
        actor: Actor,
        agent_id: Ulid,
        update: SettingsUpdate,
    ) -> Result<AgentSettings, EngineError> {
        authorize_agent_edit(actor, agent_id)?;

        if let Some(rules) = &update.weekly_schedule {
            let mut seen = [false; 7];
            for rule in rules {
                validate_weekly_rule(rule)?;
                let day = rule.day_of_week as usize;
                if std::mem::replace(&mut seen[day], true) {
                    return Err(EngineError::validation(format!(
                        "day_of_week {day} given more than once"
                    )));
                }
            }
        }
        if let Some(overrides) = &update.date_overrides {
            if overrides.len() > MAX_OVERRIDES_PER_AGENT {
                return Err(EngineError::LimitExceeded("too many date overrides"));
            }
            let mut dates: Vec<NaiveDate> = Vec::with_capacity(overrides.len());
            for ov in overrides {
                validate_override(ov)?;
                dates.push(ov.date);
            }
            dates.sort_unstable();
            if let Some(dup) = dates.windows(2).find(|w| w[0] == w[1]) {
                return Err(EngineError::validation(format!("override for {} given more than once", dup[0])));
            }
        }
        if let Some(policy) = &update.policy {
            validate_policy(policy)?;
        }

        let agent = self.get_agent_state(&agent_id).ok_or(EngineError::NotFound(agent_id))?;
        let _commit = self.commit_gate.read().await;
        let mut guard = agent.write().await;
        let event = Event::SettingsUpdated { agent_id, update };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(agent = %agent_id, "availability settings updated");
        Ok(settings_of(&guard))
    }

    /// Upsert one override per date in `[start, end]`. Returns the number of
    /// dates written.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_date_overrides(
        &self,
        actor: Actor,
        agent_id: Ulid,
        start: NaiveDate,
        end: Option<NaiveDate>,
        is_available: bool,
        slots: Option<Vec<TimeRange>>,
        reason: Option<String>,
    ) -> Result<usize, EngineError> {
        authorize_agent_edit(actor, agent_id)?;
        let end = end.unwrap_or(start);
        if end < start {
            return Err(EngineError::validation(format!("end_date {end} is before date {start}")));
        }
        let days = (end - start).num_days() + 1;
        if days > MAX_OVERRIDE_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("override range too long"));
        }

        let mut overrides = Vec::with_capacity(days as usize);
        let mut date = start;
        while date <= end {
            let ov = DateOverride {
                date,
                is_available,
                slots: slots.clone(),
                reason: reason.clone(),
            };
            validate_override(&ov)?;
            overrides.push(ov);
            date = match date.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }

        let agent = self.get_agent_state(&agent_id).ok_or(EngineError::NotFound(agent_id))?;
        let _commit = self.commit_gate.read().await;
        let mut guard = agent.write().await;
        let new_dates = overrides
            .iter()
            .filter(|o| !guard.overrides.contains_key(&o.date))
            .count();
        if guard.overrides.len() + new_dates > MAX_OVERRIDES_PER_AGENT {
            return Err(EngineError::LimitExceeded("too many date overrides"));
        }

        let written = overrides.len();
        let event = Event::OverridesAdded { agent_id, overrides };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(written)
    }

    /// Returns false when there was no override on `date`.
    pub async fn remove_date_override(
        &self,
        actor: Actor,
        agent_id: Ulid,
        date: NaiveDate,
    ) -> Result<bool, EngineError> {
        authorize_agent_edit(actor, agent_id)?;
        let agent = self.get_agent_state(&agent_id).ok_or(EngineError::NotFound(agent_id))?;
        let _commit = self.commit_gate.read().await;
        let mut guard = agent.write().await;
        if !guard.overrides.contains_key(&date) {
            return Ok(false);
        }
        let event = Event::OverrideRemoved { agent_id, date };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// Book a slot. The re-check and the insert happen under the agent's
    /// write lock, so of two racing requests for one slot only the first wins.
    pub async fn book(&self, actor: Actor, req: BookingRequest) -> Result<Appointment, EngineError> {
        let agent_id = req.agent_id;
        let result = self.book_inner(actor, req).await;
        let outcome = booking_outcome(&result);
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        match &result {
            Ok(appt) => info!(agent = %agent_id, appointment = %appt.id, date = %appt.scheduled_date, "appointment booked"),
            Err(e) => debug!(agent = %agent_id, error = %e, "booking refused"),
        }
        result
    }

    async fn book_inner(&self, actor: Actor, req: BookingRequest) -> Result<Appointment, EngineError> {
        validate_booking(&req)?;
        authorize_booking(actor, req.agent_id, req.client_id)?;

        let agent = self
            .get_agent_state(&req.agent_id)
            .ok_or(EngineError::NotFound(req.agent_id))?;
        let _commit = self.commit_gate.read().await;
        let mut guard = agent.write().await;

        if let Some(key) = &req.idempotency_key
            && let Some(existing) = guard.find_by_idempotency_key(key)
        {
            if existing.client_id == req.client_id {
                return Ok(existing.clone());
            }
            return Err(EngineError::validation("idempotency key already used by another client"));
        }

        // Ids are client-chosen and unique across agents: claim the index
        // entry now, release it if the booking does not commit.
        let id = req.id;
        match self.appointment_to_agent.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(req.agent_id);
            }
        }
        let result = self.insert_booking(&mut guard, req).await;
        if result.is_err() {
            self.appointment_to_agent.remove(&id);
        }
        result
    }

    async fn insert_booking(&self, guard: &mut AgentState, req: BookingRequest) -> Result<Appointment, EngineError> {
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_AGENT {
            return Err(EngineError::LimitExceeded("too many appointments for agent"));
        }

        let duration = req.duration.unwrap_or(guard.policy.default_duration);
        let span = TimeRange {
            start: req.time,
            end: req.time + duration,
        };
        let now = self.now_ms();
        check_bookable(guard, req.date, span, now, None)?;

        let appointment = Appointment {
            id: req.id,
            agent_id: req.agent_id,
            client_id: req.client_id,
            scheduled_date: req.date,
            scheduled_time: req.time,
            duration,
            status: AppointmentStatus::Pending,
            appointment_type: req.appointment_type,
            contact: req.contact,
            notes: req.notes,
            agent_notes: None,
            idempotency_key: req.idempotency_key,
            created_at: now,
            updated_at: now,
        };
        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(guard, &event).await?;
        Ok(appointment)
    }

    /// Move an appointment along the status machine.
    pub async fn transition(
        &self,
        actor: Actor,
        id: Ulid,
        to: AppointmentStatus,
        agent_notes: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_text("agent notes", agent_notes.as_deref(), MAX_NOTES_LEN)?;
        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let appt = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
        authorize_change(actor, appt, to)?;
        check_transition(appt.status, to)?;
        let from = appt.status;

        let event = Event::AppointmentTransitioned {
            id,
            agent_id: guard.id,
            status: to,
            agent_notes,
            at: self.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(appointment = %id, %from, %to, "appointment status changed");
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Move an active appointment to a new date/time, re-validated as a
    /// fresh booking with itself excluded. The result is pending again.
    pub async fn reschedule(
        &self,
        actor: Actor,
        id: Ulid,
        date: NaiveDate,
        time: Minutes,
    ) -> Result<Appointment, EngineError> {
        validate_time_of_day(time)?;
        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let appt = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
        authorize_change(actor, appt, AppointmentStatus::Pending)?;
        check_reschedule(appt.status)?;

        let span = TimeRange {
            start: time,
            end: time + appt.duration,
        };
        let now = self.now_ms();
        check_bookable(&guard, date, span, now, Some(id))?;

        let event = Event::AppointmentRescheduled {
            id,
            agent_id: guard.id,
            date,
            time,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(appointment = %id, %date, time = %format_hhmm(time), "appointment rescheduled");
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Confirmed appointments whose end, in the agent's civil time, is at or
    /// before `now`. Agents under a write lock are skipped until the next pass.
    pub fn collect_elapsed_appointments(&self, now: Ms) -> Vec<Ulid> {
        let mut elapsed = Vec::new();
        for entry in self.state.iter() {
            let agent = entry.value().clone();
            if let Ok(guard) = agent.try_read() {
                for appt in &guard.appointments {
                    if appt.status != AppointmentStatus::Confirmed {
                        continue;
                    }
                    let span = appt.span();
                    let ends_at = local_to_ms(appt.scheduled_date, span.end, guard.utc_offset_minutes);
                    if ends_at <= now {
                        elapsed.push(appt.id);
                    }
                }
            }
        }
        elapsed
    }

    /// Rewrite the WAL with just enough events to rebuild current state.
    /// No mutation commits between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let agents: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();

        for agent in agents {
            let guard = agent.read().await;
            events.push(Event::AgentCreated {
                id: guard.id,
                name: guard.name.clone(),
                utc_offset_minutes: guard.utc_offset_minutes,
            });
            events.push(Event::SettingsUpdated {
                agent_id: guard.id,
                update: SettingsUpdate {
                    weekly_schedule: Some(guard.weekly.rules().to_vec()),
                    date_overrides: Some(guard.overrides.values().cloned().collect()),
                    policy: Some(guard.policy),
                },
            });
            for appt in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    appointment: appt.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

pub(super) fn settings_of(agent: &AgentState) -> AgentSettings {
    AgentSettings {
        agent_id: agent.id,
        weekly: agent.weekly.clone(),
        overrides: agent.overrides.values().cloned().collect(),
        policy: agent.policy,
    }
}
