//! End-to-end scenarios against a real database (spec S1-S6), driven
//! directly through the domain layer and the HTTP handlers.

mod common;

use axum::extract::{Extension, Json as JsonExtract, Query};
use chrono::{Duration, TimeZone, Utc};
use scheduler_core::domains::schedules::models::{CreateInterval, CreateOnce, Schedule};
use scheduler_core::domains::schedules::next_run_at;
use scheduler_core::kernel::clock::{Clock, SystemClock};
use scheduler_core::kernel::{Dispatcher, Worker};
use scheduler_core::kernel::worker::WorkerConfig;
use scheduler_core::server::app::AppState;
use scheduler_core::server::routes::schedules::{
    create_daily_handler, list_handler, CreateDailyRequest, ListQuery,
};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

// S1: a daily schedule with multiple UTC times fires in ascending order and
// rolls over to the next day once all of today's times have passed.
#[tokio::test]
async fn s1_daily_multi_time_sequence_in_utc() {
    let pool = common::test_pool().await;

    let state = AppState { pool: pool.clone() };
    let req = CreateDailyRequest {
        token: "s1-token".into(),
        user_id: 10,
        scenario_id: 20,
        time_hhmm: None,
        times_hhmm: Some(vec!["09:00".into(), "15:00".into(), "21:00".into()]),
        timezone: "UTC".into(),
    };
    let created = create_daily_handler(Extension(state), JsonExtract(req))
        .await
        .expect("create_daily_handler failed")
        .0;

    let base = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
    let first = next_run_at(&created, base).expect("expected a next run");
    assert_eq!(first, Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap());

    let after_first = next_run_at(&created, first).expect("expected a next run");
    assert_eq!(
        after_first,
        Utc.with_ymd_and_hms(2026, 3, 10, 21, 0, 0).unwrap()
    );

    let after_last_today = next_run_at(&created, after_first).expect("expected a next run");
    assert_eq!(
        after_last_today,
        Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap()
    );
}

// S2: an interval schedule that missed several ticks during downtime
// collapses to a single future fire instead of one per missed slot.
#[tokio::test]
async fn s2_interval_catch_up_collapses_to_one_future_fire() {
    let pool = common::test_pool().await;

    let created = Schedule::create_interval(
        CreateInterval {
            token: "s2-token".into(),
            user_id: 11,
            scenario_id: 21,
            every_minutes: 10,
        },
        &pool,
    )
    .await
    .expect("create_interval failed");

    let base = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
    Schedule::set_next_run_at(created.id, Some(base), &pool)
        .await
        .expect("set_next_run_at failed");
    let with_base = Schedule::get_by_id(created.id, &pool)
        .await
        .unwrap()
        .unwrap();

    // Pretend the worker didn't run for five hours (30 missed ticks).
    let now = base + Duration::hours(5);
    let next = next_run_at(&with_base, now).expect("expected a next run");

    assert!(next > now, "the collapsed fire must be in the future");
    assert_eq!(next, now + Duration::minutes(10));
}

// S3: a once schedule fires exactly once and deactivates itself afterward.
#[tokio::test]
async fn s3_once_schedule_fires_and_deactivates() {
    let pool = common::test_pool().await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let created = Schedule::create_once(
        CreateOnce {
            token: "s3-token".into(),
            user_id: 12,
            scenario_id: 22,
            run_at: Utc::now() - Duration::seconds(5),
        },
        &pool,
    )
    .await
    .expect("create_once failed");
    Schedule::set_next_run_at(created.id, Some(Utc::now() - Duration::seconds(5)), &pool)
        .await
        .expect("set_next_run_at failed");

    run_worker_for_a_moment(pool.clone(), upstream.uri()).await;

    let after = Schedule::get_by_id(created.id, &pool)
        .await
        .unwrap()
        .expect("schedule should still exist");
    assert!(!after.active, "a once schedule must deactivate after firing");
    assert_eq!(after.last_status_code, Some(200));
    assert!(after.next_run_at.is_none());
}

// S4: repeated daily-creation calls for the same (token, user_id) upsert the
// singleton row instead of accumulating duplicates.
#[tokio::test]
async fn s4_daily_singleton_upsert_via_repeated_calls() {
    let pool = common::test_pool().await;

    for time in ["08:00", "08:30", "09:00"] {
        let state = AppState { pool: pool.clone() };
        let req = CreateDailyRequest {
            token: "s4-token".into(),
            user_id: 13,
            scenario_id: 23,
            time_hhmm: Some(time.into()),
            times_hhmm: None,
            timezone: "UTC".into(),
        };
        create_daily_handler(Extension(state), JsonExtract(req))
            .await
            .expect("create_daily_handler failed");
    }

    let state = AppState { pool: pool.clone() };
    let all = list_handler(
        Extension(state),
        Query(ListQuery {
            token: Some("s4-token".into()),
            user_id: Some(13),
            active: None,
        }),
    )
    .await
    .expect("list_handler failed")
    .0;

    assert_eq!(all.len(), 1, "repeated creates must upsert, not accumulate");
    assert_eq!(all[0].time_hhmm.as_deref(), Some("09:00"));
}

// S5: an upstream 5xx response is recorded as a failed fire without
// crashing the worker, and the schedule's next fire is still computed.
#[tokio::test]
async fn s5_upstream_error_is_recorded_without_crashing_worker() {
    let pool = common::test_pool().await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&upstream)
        .await;

    let created = Schedule::create_interval(
        CreateInterval {
            token: "s5-token".into(),
            user_id: 14,
            scenario_id: 24,
            every_minutes: 5,
        },
        &pool,
    )
    .await
    .expect("create_interval failed");
    Schedule::set_next_run_at(created.id, Some(Utc::now() - Duration::seconds(1)), &pool)
        .await
        .expect("set_next_run_at failed");

    run_worker_for_a_moment(pool.clone(), upstream.uri()).await;

    let after = Schedule::get_by_id(created.id, &pool)
        .await
        .unwrap()
        .expect("schedule should still exist");
    assert_eq!(after.last_status_code, Some(500));
    assert!(after.last_error.as_deref().unwrap_or_default().contains("500"));
    assert!(after.active, "an interval schedule stays active after a failed fire");
    assert!(after.next_run_at.is_some());
}

// S6: a transport failure (nothing answering at all) is still recorded as a
// failed fire with no status code, after retries are exhausted.
#[tokio::test]
async fn s6_transport_failure_is_recorded_after_retries_exhausted() {
    let pool = common::test_pool().await;

    let created = Schedule::create_interval(
        CreateInterval {
            token: "s6-token".into(),
            user_id: 15,
            scenario_id: 25,
            every_minutes: 5,
        },
        &pool,
    )
    .await
    .expect("create_interval failed");
    Schedule::set_next_run_at(created.id, Some(Utc::now() - Duration::seconds(1)), &pool)
        .await
        .expect("set_next_run_at failed");

    // Nothing listens on this port: every dispatch attempt fails fast.
    run_worker_for_a_moment(pool.clone(), "http://127.0.0.1:1".to_string()).await;

    let after = Schedule::get_by_id(created.id, &pool)
        .await
        .unwrap()
        .expect("schedule should still exist");
    assert!(after.last_status_code.is_none());
    assert!(after.last_error.is_some());
}

/// Spin up the real worker loop against `base_url` for a single tick, then
/// cancel it. Uses the real system clock; the poll interval is kept short
/// so the test doesn't wait long for the first tick.
async fn run_worker_for_a_moment(pool: sqlx::PgPool, base_url: String) {
    let dispatcher = Arc::new(
        Dispatcher::new(base_url, StdDuration::from_millis(500), 0)
            .expect("failed to build dispatcher"),
    );
    let worker = Arc::new(Worker::new(
        pool,
        dispatcher,
        Arc::new(SystemClock) as Arc<dyn Clock>,
        WorkerConfig {
            poll_interval: StdDuration::from_millis(100),
            batch_size: 10,
            lock_lease_seconds: 30,
            max_concurrent_runs: 4,
        },
    ));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    tokio::time::sleep(StdDuration::from_millis(700)).await;
    shutdown.cancel();
    let _ = handle.await;
}
