pub mod availability;
pub mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
mod queries;
pub mod slots;
mod validate;

pub use availability::{booking_horizon, free_slots, resolve_day, DayAvailability};
pub use conflict::filter_available;
pub use error::{ConflictReason, EngineError, PolicyReason};
pub use slots::{generate_slots, SlotIter};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedAgentState = Arc<RwLock<AgentState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that arrive while a flush is pending share one
/// fsync: take the first, drain whatever else is queued, flush once, answer all.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so no half-written batch leaks into the next one.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside a batch")));
        }
    }
}

/// The appointment core for one tenant: every agent's state, the WAL
/// writer, and the notification hub.
pub struct Engine {
    pub state: DashMap<Ulid, SharedAgentState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: appointment id → agent id.
    pub(super) appointment_to_agent: DashMap<Ulid, Ulid>,
    pub(super) clock: Arc<dyn Clock>,
    /// Mutations hold this shared from before their WAL append until the
    /// event is applied; compaction holds it exclusively, so its snapshot
    /// and the log it replaces always agree.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an event to an agent (no locking; caller holds the write guard).
fn apply_to_agent(agent: &mut AgentState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AgentUpdated {
            name,
            utc_offset_minutes,
            ..
        } => {
            agent.name = name.clone();
            agent.utc_offset_minutes = *utc_offset_minutes;
        }
        Event::SettingsUpdated { update, .. } => {
            if let Some(rules) = &update.weekly_schedule {
                for rule in rules {
                    agent.weekly.set(rule.clone());
                }
            }
            if let Some(overrides) = &update.date_overrides {
                agent.overrides = overrides.iter().map(|o| (o.date, o.clone())).collect();
            }
            if let Some(policy) = update.policy {
                agent.policy = policy;
            }
        }
        Event::OverridesAdded { overrides, .. } => {
            for o in overrides {
                agent.overrides.insert(o.date, o.clone());
            }
        }
        Event::OverrideRemoved { date, .. } => {
            agent.overrides.remove(date);
        }
        Event::AppointmentBooked { appointment } => {
            index.insert(appointment.id, appointment.agent_id);
            agent.insert_appointment(appointment.clone());
        }
        Event::AppointmentTransitioned {
            id,
            status,
            agent_notes,
            at,
            ..
        } => {
            if let Some(appt) = agent.appointment_mut(*id) {
                appt.status = *status;
                if agent_notes.is_some() {
                    appt.agent_notes = agent_notes.clone();
                }
                appt.updated_at = *at;
            }
        }
        Event::AppointmentRescheduled { id, date, time, at, .. } => {
            // Date changes move the appointment within the sorted list.
            if let Some(mut appt) = agent.remove_appointment(*id) {
                appt.scheduled_date = *date;
                appt.scheduled_time = *time;
                appt.status = AppointmentStatus::Pending;
                appt.updated_at = *at;
                agent.insert_appointment(appt);
            }
        }
        // Creation is handled at the DashMap level.
        Event::AgentCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Arc::new(SystemClock))
    }

    pub fn with_clock(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            appointment_to_agent: DashMap::new(),
            clock,
            commit_gate: RwLock::new(()),
        };

        // Sole owner of every Arc here, so try_write cannot contend. Never
        // blocking_write: this may run inside an async context (lazy tenants).
        for event in &events {
            match event {
                Event::AgentCreated {
                    id,
                    name,
                    utc_offset_minutes,
                } => {
                    let agent = AgentState::new(*id, name.clone(), *utc_offset_minutes);
                    engine.state.insert(*id, Arc::new(RwLock::new(agent)));
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.agent_id()) {
                        let agent = entry.clone();
                        let mut guard = agent.try_write().expect("replay: uncontended write");
                        apply_to_agent(&mut guard, other, &engine.appointment_to_agent);
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_agent_state(&self, id: &Ulid) -> Option<SharedAgentState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn agent_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_to_agent.get(appointment_id).map(|e| *e.value())
    }

    /// WAL-append, then apply, then notify. State only changes once the
    /// event is durable.
    pub(super) async fn persist_and_apply(&self, agent: &mut AgentState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_agent(agent, event, &self.appointment_to_agent);
        self.notify.send(agent.id, event);
        Ok(())
    }

    /// Lookup appointment → agent, then take that agent's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<AgentState>, EngineError> {
        let agent_id = self
            .agent_for_appointment(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let agent = self
            .get_agent_state(&agent_id)
            .ok_or(EngineError::NotFound(agent_id))?;
        Ok(agent.write_owned().await)
    }
}
