use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::error::SqlState;
use tokio_postgres::{AsyncMessage, Client, Config, NoTls, Notification, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use agenda::clock::FixedClock;
use agenda::tenant::TenantManager;
use agenda::wire;

const PASSWORD: &str = "agenda";
const NEXT_MONDAY: &str = "2026-03-09";

// ── Test infrastructure ──────────────────────────────────────

/// Server whose clock reads Monday 2026-03-02 08:00 UTC.
async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("agenda_wire_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let tm = Arc::new(TenantManager::with_clock(dir, 1000, Arc::new(FixedClock::at(today, 8 * 60))));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str) -> (Client, mpsc::UnboundedReceiver<Notification>) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("agency")
        .user(user)
        .password(PASSWORD);

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    (client, rx)
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate_of(client: &Client, sql: &str) -> SqlState {
    let err = client.batch_execute(sql).await.expect_err("statement should fail");
    err.code().cloned().expect("server error carries a SQLSTATE")
}

/// Agent open 09:00-12:00 on weekdays with the default policy
/// (60 minute slots, 15 minute buffer).
async fn create_agent(client: &Client) -> Ulid {
    let agent = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO agents (id, name, utc_offset) VALUES ('{agent}', 'Margaux', 0)"
        ))
        .await
        .unwrap();
    let values: Vec<String> = (1..=5)
        .map(|d| format!("('{agent}', {d}, true, '09:00-12:00')"))
        .collect();
    client
        .batch_execute(&format!(
            "INSERT INTO weekly_rules (agent_id, day_of_week, is_available, slots) VALUES {}",
            values.join(", ")
        ))
        .await
        .unwrap();
    agent
}

fn booking_sql(id: Ulid, agent: Ulid, client: Ulid, date: &str, time: &str) -> String {
    format!(
        "INSERT INTO appointments (id, agent_id, client_id, date, time, type, contact_name, contact_email) \
         VALUES ('{id}', '{agent}', '{client}', '{date}', '{time}', 'viewing', 'Noor', 'noor@example.com')"
    )
}

async fn recv_notification(rx: &mut mpsc::UnboundedReceiver<Notification>, timeout: Duration) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn settings_round_trip_and_availability() {
    let addr = start_test_server().await;
    let (service, _rx) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    let agents = rows(&service, "SELECT * FROM agents").await;
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].get("name"), Some("Margaux"));

    let weekly = rows(&service, &format!("SELECT * FROM weekly_rules WHERE agent_id = '{agent}'")).await;
    assert_eq!(weekly.len(), 7);
    let monday = weekly.iter().find(|r| r.get("day_of_week") == Some("1")).unwrap();
    assert_eq!(monday.get("slots"), Some("09:00-12:00"));

    let slots = rows(
        &service,
        &format!("SELECT * FROM availability WHERE agent_id = '{agent}' AND date >= '{NEXT_MONDAY}' AND date <= '{NEXT_MONDAY}'"),
    )
    .await;
    let starts: Vec<_> = slots.iter().map(|r| r.get("start_time").unwrap().to_string()).collect();
    assert_eq!(starts, ["09:00", "10:15"]);
    assert_eq!(slots[0].get("end_time"), Some("10:00"));
}

#[tokio::test]
async fn double_booking_is_a_conflict() {
    let addr = start_test_server().await;
    let (service, _) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    let (alice_id, bob_id) = (Ulid::new(), Ulid::new());
    let (alice, _) = connect(addr, &format!("client_{alice_id}")).await;
    let (bob, _) = connect(addr, &format!("client_{bob_id}")).await;

    alice
        .batch_execute(&booking_sql(Ulid::new(), agent, alice_id, NEXT_MONDAY, "09:00"))
        .await
        .unwrap();
    let state = sqlstate_of(&bob, &booking_sql(Ulid::new(), agent, bob_id, NEXT_MONDAY, "09:00")).await;
    assert_eq!(state.code(), "23P01");

    let free = rows(
        &service,
        &format!("SELECT * FROM availability WHERE agent_id = '{agent}' AND date = '{NEXT_MONDAY}'"),
    )
    .await;
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].get("start_time"), Some("10:15"));
}

#[tokio::test]
async fn clients_cannot_book_for_others_or_in_the_past() {
    let addr = start_test_server().await;
    let (service, _) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    let me = Ulid::new();
    let (client, _) = connect(addr, &format!("client_{me}")).await;

    let state = sqlstate_of(&client, &booking_sql(Ulid::new(), agent, Ulid::new(), NEXT_MONDAY, "09:00")).await;
    assert_eq!(state.code(), "42501");

    let err = client
        .batch_execute(&booking_sql(Ulid::new(), agent, me, "2026-02-27", "09:00"))
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "P0001");
    assert!(db.message().contains("past_date"), "{}", db.message());

    let state = sqlstate_of(&client, &booking_sql(Ulid::new(), agent, me, NEXT_MONDAY, "09:05")).await;
    assert_eq!(state.code(), "23P01");
}

#[tokio::test]
async fn lifecycle_over_the_wire() {
    let addr = start_test_server().await;
    let (service, _) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    let me = Ulid::new();
    let appt = Ulid::new();
    let (client, _) = connect(addr, &format!("client_{me}")).await;
    let (agent_conn, _) = connect(addr, &format!("agent_{agent}")).await;

    client
        .batch_execute(&booking_sql(appt, agent, me, NEXT_MONDAY, "10:15"))
        .await
        .unwrap();

    let state = sqlstate_of(
        &client,
        &format!("INSERT INTO status_changes (appointment_id, status) VALUES ('{appt}', 'confirmed')"),
    )
    .await;
    assert_eq!(state.code(), "42501");

    agent_conn
        .batch_execute(&format!(
            "INSERT INTO status_changes (appointment_id, status, agent_notes) VALUES ('{appt}', 'confirmed', 'bring ID')"
        ))
        .await
        .unwrap();

    let found = rows(&service, &format!("SELECT * FROM appointments WHERE id = '{appt}'")).await;
    assert_eq!(found[0].get("status"), Some("confirmed"));
    assert_eq!(found[0].get("agent_notes"), Some("bring ID"));

    client
        .batch_execute(&format!(
            "INSERT INTO reschedules (appointment_id, date, time) VALUES ('{appt}', '2026-03-10', '09:00')"
        ))
        .await
        .unwrap();
    let moved = rows(&service, &format!("SELECT * FROM appointments WHERE agent_id = '{agent}'")).await;
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].get("date"), Some("2026-03-10"));
    assert_eq!(moved[0].get("status"), Some("pending"));

    client
        .batch_execute(&format!("INSERT INTO status_changes (appointment_id, status) VALUES ('{appt}', 'cancelled')"))
        .await
        .unwrap();
    let state = sqlstate_of(
        &agent_conn,
        &format!("INSERT INTO status_changes (appointment_id, status) VALUES ('{appt}', 'confirmed')"),
    )
    .await;
    assert_eq!(state.code(), "55000");

    let state = sqlstate_of(&service, &format!("DELETE FROM appointments WHERE id = '{appt}'")).await;
    assert_eq!(state.code(), "0A000");
}

#[tokio::test]
async fn overrides_block_days() {
    let addr = start_test_server().await;
    let (service, _) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    service
        .batch_execute(&format!(
            "INSERT INTO date_overrides (agent_id, date, end_date, is_available, reason) \
             VALUES ('{agent}', '2026-03-09', '2026-03-10', false, 'training')"
        ))
        .await
        .unwrap();
    let overrides = rows(&service, &format!("SELECT * FROM date_overrides WHERE agent_id = '{agent}'")).await;
    assert_eq!(overrides.len(), 2);
    assert_eq!(overrides[0].get("reason"), Some("training"));

    let free = rows(
        &service,
        &format!("SELECT * FROM availability WHERE agent_id = '{agent}' AND date >= '2026-03-09' AND date <= '2026-03-11'"),
    )
    .await;
    assert!(free.iter().all(|r| r.get("date") == Some("2026-03-11")));
    assert_eq!(free.len(), 2);

    service
        .batch_execute(&format!("DELETE FROM date_overrides WHERE agent_id = '{agent}' AND date = '2026-03-10'"))
        .await
        .unwrap();
    let free = rows(
        &service,
        &format!("SELECT * FROM availability WHERE agent_id = '{agent}' AND date = '2026-03-10'"),
    )
    .await;
    assert_eq!(free.len(), 2);
}

#[tokio::test]
async fn policy_validation_errors() {
    let addr = start_test_server().await;
    let (service, _) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    let state = sqlstate_of(
        &service,
        &format!("INSERT INTO policies (agent_id, buffer_time) VALUES ('{agent}', 90)"),
    )
    .await;
    assert_eq!(state.code(), "22023");

    service
        .batch_execute(&format!(
            "INSERT INTO policies (agent_id, default_duration, buffer_time) VALUES ('{agent}', 30, 0)"
        ))
        .await
        .unwrap();
    let policy = rows(&service, &format!("SELECT * FROM policies WHERE agent_id = '{agent}'")).await;
    assert_eq!(policy[0].get("default_duration"), Some("30"));
    assert_eq!(policy[0].get("buffer_time"), Some("0"));

    let state = sqlstate_of(&service, "SELECT * FROM rooms").await;
    assert_eq!(state.code(), "42P01");
}

#[tokio::test]
async fn listener_sees_bookings_on_next_query() {
    let addr = start_test_server().await;
    let (service, _) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    let (listener, mut notifications) = connect(addr, "agenda").await;
    listener
        .batch_execute(&format!("LISTEN agent_{agent}"))
        .await
        .unwrap();
    // Listening twice is harmless.
    listener
        .batch_execute(&format!("LISTEN agent_{agent}"))
        .await
        .unwrap();

    let other = create_agent(&service).await;
    let me = Ulid::new();
    let (client, _) = connect(addr, &format!("client_{me}")).await;
    client
        .batch_execute(&booking_sql(Ulid::new(), other, me, NEXT_MONDAY, "09:00"))
        .await
        .unwrap();
    client
        .batch_execute(&booking_sql(Ulid::new(), agent, me, NEXT_MONDAY, "09:00"))
        .await
        .unwrap();

    rows(&listener, "SELECT * FROM agents").await;
    let notif = recv_notification(&mut notifications, Duration::from_secs(5))
        .await
        .expect("expected notification");
    assert_eq!(notif.channel(), format!("agent_{agent}"));
    let payload: serde_json::Value = serde_json::from_str(notif.payload()).unwrap();
    assert_eq!(payload["AppointmentBooked"]["appointment"]["agent_id"], agent.to_string());

    // Nothing queued for the other agent, and nothing twice.
    assert!(recv_notification(&mut notifications, Duration::from_millis(300)).await.is_none());

    listener.batch_execute("UNLISTEN *").await.unwrap();
    client
        .batch_execute(&booking_sql(Ulid::new(), agent, me, NEXT_MONDAY, "10:15"))
        .await
        .unwrap();
    rows(&listener, "SELECT * FROM agents").await;
    assert!(recv_notification(&mut notifications, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let addr = start_test_server().await;
    let (service, _) = connect(addr, "agenda").await;
    let agent = create_agent(&service).await;

    let agent_str = agent.to_string();
    let found = service
        .query(
            "SELECT * FROM availability WHERE agent_id = $1 AND date >= $2 AND date <= $3",
            &[&agent_str, &NEXT_MONDAY, &NEXT_MONDAY],
        )
        .await
        .unwrap();
    let starts: Vec<String> = found.iter().map(|r| r.get("start_time")).collect();
    assert_eq!(starts, ["09:00", "10:15"]);
}
