//! Appointment status machine and who may drive it.
//!
//! ```text
//! pending   --confirm--> confirmed
//! pending   --reject---> [rejected]
//! confirmed --complete-> [completed]
//! pending/confirmed --cancel--> [cancelled]
//! pending/confirmed --reschedule--> pending
//! ```

use ulid::Ulid;

use crate::model::{Actor, Appointment, AppointmentStatus};

use super::EngineError;

use AppointmentStatus::*;

/// Status changes reachable through `transition`. Rescheduling is separate
/// because it also moves the appointment.
pub fn check_transition(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), EngineError> {
    let allowed = matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Rejected)
            | (Confirmed, Completed)
            | (Pending, Cancelled)
            | (Confirmed, Cancelled)
    );
    if allowed {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

pub fn check_reschedule(from: AppointmentStatus) -> Result<(), EngineError> {
    if from.is_active() {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to: Pending })
    }
}

/// Settings belong to the agent.
pub fn authorize_agent_edit(actor: Actor, agent_id: Ulid) -> Result<(), EngineError> {
    match actor {
        Actor::Service => Ok(()),
        Actor::Agent(id) if id == agent_id => Ok(()),
        _ => Err(EngineError::Forbidden("only the agent may edit their availability")),
    }
}

/// A client books for themselves; the agent may book on a client's behalf.
pub fn authorize_booking(actor: Actor, agent_id: Ulid, client_id: Ulid) -> Result<(), EngineError> {
    match actor {
        Actor::Service => Ok(()),
        Actor::Agent(id) if id == agent_id => Ok(()),
        Actor::Client(id) if id == client_id => Ok(()),
        _ => Err(EngineError::Forbidden("cannot book on behalf of another client")),
    }
}

/// Confirm, reject and complete are agent decisions. Cancelling and
/// rescheduling are open to either party.
pub fn authorize_change(actor: Actor, appointment: &Appointment, to: AppointmentStatus) -> Result<(), EngineError> {
    let either_party = matches!(to, Cancelled | Pending);
    match actor {
        Actor::Service => Ok(()),
        Actor::Agent(id) if id == appointment.agent_id => Ok(()),
        Actor::Client(id) if id == appointment.client_id && either_party => Ok(()),
        Actor::Client(id) if id == appointment.client_id => {
            Err(EngineError::Forbidden("only the agent may confirm, reject or complete"))
        }
        _ => Err(EngineError::Forbidden("not a party to this appointment")),
    }
}
