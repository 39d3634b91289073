use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::{Actor, AppointmentStatus};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Complete every confirmed appointment that has ended. Returns how many
/// were completed on this pass.
pub async fn sweep_once(engine: &Engine) -> usize {
    let elapsed = engine.collect_elapsed_appointments(engine.now_ms());
    let mut completed = 0;
    for id in elapsed {
        match engine
            .transition(Actor::Service, id, AppointmentStatus::Completed, None)
            .await
        {
            Ok(_) => completed += 1,
            // Cancelled between collection and transition.
            Err(EngineError::InvalidTransition { .. }) => debug!(appointment = %id, "sweeper skip"),
            Err(e) => warn!(appointment = %id, error = %e, "sweeper failed to complete appointment"),
        }
    }
    completed
}

/// Background task: marks confirmed appointments completed once they end.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let n = sweep_once(&engine).await;
        if n > 0 {
            info!(completed = n, "sweeper completed elapsed appointments");
        }
    }
}

/// Background task: rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => warn!(error = %e, "WAL compaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{utc_ms, FixedClock};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("agenda_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_completes_ended_confirmed_appointments() {
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let clock = Arc::new(FixedClock::at(monday, 7 * 60));
        let engine = Engine::with_clock(
            test_wal_path("sweeper.wal"),
            Arc::new(NotifyHub::new()),
            clock.clone(),
        )
        .unwrap();

        let agent = Ulid::new();
        engine.create_agent(Actor::Service, agent, None, 0).await.unwrap();
        engine
            .update_settings(
                Actor::Service,
                agent,
                SettingsUpdate {
                    weekly_schedule: Some(vec![WeeklyDayRule::open(1, vec![TimeRange::new(8 * 60, 12 * 60)])]),
                    policy: Some(AvailabilityPolicy {
                        buffer_time: 0,
                        ..AvailabilityPolicy::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut ids = Vec::new();
        for hour in [8, 9] {
            let appt = engine
                .book(
                    Actor::Service,
                    BookingRequest {
                        id: Ulid::new(),
                        agent_id: agent,
                        client_id: Ulid::new(),
                        date: monday,
                        time: hour * 60,
                        duration: None,
                        appointment_type: AppointmentType::Valuation,
                        contact: ContactDetails {
                            name: "Sam".into(),
                            email: "sam@example.com".into(),
                            phone: None,
                        },
                        notes: None,
                        idempotency_key: None,
                    },
                )
                .await
                .unwrap();
            ids.push(appt.id);
        }
        engine
            .transition(Actor::Service, ids[0], AppointmentStatus::Confirmed, None)
            .await
            .unwrap();

        assert_eq!(sweep_once(&engine).await, 0);

        clock.set(utc_ms(monday, 11 * 60));
        assert_eq!(sweep_once(&engine).await, 1);
        assert_eq!(
            engine.get_appointment(ids[0]).await.unwrap().status,
            AppointmentStatus::Completed
        );
        // Pending appointments are left for the agent to decide.
        assert_eq!(
            engine.get_appointment(ids[1]).await.unwrap().status,
            AppointmentStatus::Pending
        );
        assert_eq!(sweep_once(&engine).await, 0);
    }
}
