use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use meetslot::directory::StaticDirectory;
use meetslot::engine::Engine;
use meetslot::model::{DAY_MS, HOUR_MS, MINUTE_MS, Person, Role};
use meetslot::notify::NotifyHub;
use meetslot::policy::SchedulingPolicy;
use meetslot::ports::FixedClock;
use meetslot::scheduler::Scheduler;
use meetslot::wire::{self, MeetslotFactory};

const PASSWORD: &str = "meetslot";
// 2026-01-05T00:00:00Z
const MONDAY: i64 = 1_767_571_200_000;

fn at(h: i64, m: i64) -> i64 {
    MONDAY + h * HOUR_MS + m * MINUTE_MS
}

// ── Test infrastructure ──────────────────────────────────────

struct People {
    admin: Person,
    coach: Person,
    student: Person,
}

fn person(name: &str, role: Role) -> Person {
    Person {
        id: Ulid::new(),
        display_name: name.into(),
        role,
    }
}

async fn start_test_server() -> (SocketAddr, People) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("meetslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("meetslot.wal")).unwrap());

    let people = People {
        admin: person("Ada", Role::Admin),
        coach: person("Cole", Role::Coach),
        student: person("Sam", Role::Student),
    };
    let directory = StaticDirectory::new(vec![
        people.admin.clone(),
        people.coach.clone(),
        people.student.clone(),
    ])
    .unwrap();

    let scheduler = Arc::new(Scheduler::new(
        engine,
        Arc::new(directory),
        Arc::new(FixedClock::new(MONDAY - DAY_MS)),
        Arc::new(NotifyHub::new()),
        SchedulingPolicy::default(),
    ));
    let factory = MeetslotFactory::new(scheduler, PASSWORD.to_string());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    (addr, people)
}

async fn connect(addr: SocketAddr, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("meetslot")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn ms(row: &SimpleQueryRow, column: &str) -> i64 {
    row.get(column).unwrap().parse().unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let (addr, people) = start_test_server().await;
    let admin = connect(addr, &people.admin.id.to_string()).await;
    let coach = connect(addr, &people.coach.id.to_string()).await;

    let aid = Ulid::new();
    assert_ok!(
        admin
            .batch_execute(&format!(
                r#"INSERT INTO availabilities (id, start, "end") VALUES ('{aid}', {}, {})"#,
                at(8, 0),
                at(10, 0)
            ))
            .await
    );

    let listed = rows(&coach, "SELECT * FROM availabilities").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(aid.to_string().as_str()));
    assert_eq!(listed[0].get("owner_id"), Some(people.admin.id.to_string().as_str()));

    let student = people.student.id;
    assert_ok!(
        coach
            .batch_execute(&format!(
                r#"INSERT INTO bookings (availability_id, start, "end", meeting_type, student_id, note)
                   VALUES ('{aid}', {}, {}, 'followup', '{student}', '  first chat  ')"#,
                at(9, 0),
                at(9, 30)
            ))
            .await
    );

    let bookings = rows(
        &coach,
        &format!("SELECT * FROM bookings WHERE availability_id = '{aid}'"),
    )
    .await;
    assert_eq!(bookings.len(), 1);
    let booking_id = bookings[0].get("id").unwrap().to_string();
    assert_eq!(bookings[0].get("status"), Some("pending"));
    assert_eq!(bookings[0].get("note"), Some("first chat"));
    assert_eq!(ms(&bookings[0], "created_at"), MONDAY - DAY_MS);

    // Pending bookings already consume time.
    let free = rows(
        &admin,
        &format!("SELECT * FROM free_segments WHERE availability_id = '{aid}'"),
    )
    .await;
    let windows: Vec<(i64, i64)> = free.iter().map(|r| (ms(r, "start"), ms(r, "end"))).collect();
    assert_eq!(windows, vec![(at(8, 0), at(9, 0)), (at(9, 30), at(10, 0))]);

    assert_ok!(
        admin
            .batch_execute(&format!(
                "INSERT INTO booking_decisions (booking_id, status) VALUES ('{booking_id}', 'accepted')"
            ))
            .await
    );

    let calendar = rows(&coach, "SELECT * FROM calendar").await;
    let own: Vec<&SimpleQueryRow> = calendar
        .iter()
        .filter(|r| r.get("label") == Some("own-booking"))
        .collect();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].get("booking_id"), Some(booking_id.as_str()));
    assert_eq!(own[0].get("status"), Some("accepted"));
    assert_eq!(own[0].get("student_id"), Some(student.to_string().as_str()));

    let admin_calendar = rows(&admin, "SELECT * FROM calendar").await;
    let labels: Vec<&str> = admin_calendar.iter().filter_map(|r| r.get("label")).collect();
    assert_eq!(labels, vec!["available", "booked", "available"]);
    assert_eq!(admin_calendar[0].get("owner_name"), Some("Ada"));
}

#[tokio::test]
async fn role_rules_hold_over_the_wire() {
    let (addr, people) = start_test_server().await;
    let admin = connect(addr, &people.admin.id.to_string()).await;
    let coach = connect(addr, &people.coach.id.to_string()).await;
    let student = connect(addr, &people.student.id.to_string()).await;

    let aid = Ulid::new();
    admin
        .batch_execute(&format!(
            r#"INSERT INTO availabilities (id, start, "end") VALUES ('{aid}', {}, {})"#,
            at(8, 0),
            at(10, 0)
        ))
        .await
        .unwrap();

    // Coaches cannot publish time, admins cannot request it.
    assert_err!(
        coach
            .batch_execute(&format!(
                r#"INSERT INTO availabilities (start, "end") VALUES ({}, {})"#,
                at(11, 0),
                at(12, 0)
            ))
            .await
    );
    assert_err!(
        admin
            .batch_execute(&format!(
                r#"INSERT INTO bookings (availability_id, start, "end", meeting_type) VALUES ('{aid}', {}, {}, 'intro')"#,
                at(8, 0),
                at(8, 30)
            ))
            .await
    );

    // A follow-up without a student is refused.
    let err = coach
        .batch_execute(&format!(
            r#"INSERT INTO bookings (availability_id, start, "end", meeting_type) VALUES ('{aid}', {}, {}, 'followup')"#,
            at(8, 0),
            at(8, 30)
        ))
        .await
        .unwrap_err();
    assert!(err.as_db_error().is_some());

    assert!(rows(&student, "SELECT * FROM calendar").await.is_empty());
    assert!(rows(&student, "SELECT * FROM availabilities").await.is_empty());
}

#[tokio::test]
async fn unknown_user_cannot_query() {
    let (addr, _people) = start_test_server().await;
    let stranger = connect(addr, &Ulid::new().to_string()).await;
    let err = stranger
        .simple_query("SELECT * FROM calendar")
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "28000");

    let nobody = connect(addr, "not-a-person").await;
    assert_err!(nobody.simple_query("SELECT * FROM availabilities").await);
}

#[tokio::test]
async fn bound_parameters_are_stored_verbatim() {
    let (addr, people) = start_test_server().await;
    let admin = connect(addr, &people.admin.id.to_string()).await;
    let coach = connect(addr, &people.coach.id.to_string()).await;

    let aid = Ulid::new();
    admin
        .batch_execute(&format!(
            r#"INSERT INTO availabilities (id, start, "end") VALUES ('{aid}', {}, {})"#,
            at(8, 0),
            at(10, 0)
        ))
        .await
        .unwrap();

    let availability_id = aid.to_string();
    let start = at(9, 0).to_string();
    let end = at(9, 30).to_string();
    let meeting_type = "followup";
    let student = people.student.id.to_string();
    let note = "fee is $1 per session";
    let inserted = coach
        .execute(
            r#"INSERT INTO bookings (availability_id, start, "end", meeting_type, student_id, note)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
            &[&availability_id, &start, &end, &meeting_type, &student, &note],
        )
        .await;
    assert_eq!(assert_ok!(inserted), 1);

    let bookings = rows(
        &coach,
        &format!("SELECT * FROM bookings WHERE availability_id = '{aid}'"),
    )
    .await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].get("note"), Some(note));
    assert_eq!(ms(&bookings[0], "start"), at(9, 0));
}
