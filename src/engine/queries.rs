use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::clock::local_now;
use crate::limits::*;
use crate::model::*;

use super::availability::free_slots;
use super::mutations::settings_of;
use super::validate::validate_duration;
use super::{Engine, EngineError};

impl Engine {
    /// Free slots for every date in `[from, to]`, keyed by date. Dates that are
    /// past, blocked or beyond the booking horizon map to an empty list.
    pub async fn availability(
        &self,
        agent_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        duration: Option<Minutes>,
    ) -> Result<DaySlots, EngineError> {
        if to < from {
            return Err(EngineError::validation(format!("date range {from}..{to} is empty")));
        }
        if (to - from).num_days() + 1 > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("availability window too long"));
        }
        if let Some(d) = duration {
            validate_duration(d)?;
        }

        let agent = self.get_agent_state(&agent_id).ok_or(EngineError::NotFound(agent_id))?;
        let guard = agent.read().await;
        let duration = duration.unwrap_or(guard.policy.default_duration);
        let (today, now_minute) = local_now(self.now_ms(), guard.utc_offset_minutes);
        let horizon = super::booking_horizon(&guard.policy, today);

        let mut out = DaySlots::new();
        let mut date = from;
        loop {
            let slots = if date > horizon {
                Vec::new()
            } else {
                free_slots(&guard, date, duration, today, now_minute, None)
            };
            out.insert(date, slots);
            if date == to {
                break;
            }
            date = match date.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(out)
    }

    pub async fn get_agent(&self, id: Ulid) -> Result<AgentInfo, EngineError> {
        let agent = self.get_agent_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = agent.read().await;
        Ok(guard.info())
    }

    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        let agents: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(agents.len());
        for agent in agents {
            out.push(agent.read().await.info());
        }
        out.sort_by_key(|a| a.id);
        out
    }

    pub async fn get_settings(&self, agent_id: Ulid) -> Result<AgentSettings, EngineError> {
        let agent = self.get_agent_state(&agent_id).ok_or(EngineError::NotFound(agent_id))?;
        let guard = agent.read().await;
        Ok(settings_of(&guard))
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let agent_id = self.agent_for_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let agent = self.get_agent_state(&agent_id).ok_or(EngineError::NotFound(agent_id))?;
        let guard = agent.read().await;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Appointments of any status, in schedule order, optionally bounded by date.
    pub async fn list_appointments(
        &self,
        agent_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, EngineError> {
        let agent = self.get_agent_state(&agent_id).ok_or(EngineError::NotFound(agent_id))?;
        let guard = agent.read().await;
        let lo = from.map_or(0, |f| guard.appointments.partition_point(|a| a.scheduled_date < f));
        let hi = to.map_or(guard.appointments.len(), |t| {
            guard.appointments.partition_point(|a| a.scheduled_date <= t)
        });
        if lo >= hi {
            return Ok(Vec::new());
        }
        Ok(guard.appointments[lo..hi].to_vec())
    }
}
