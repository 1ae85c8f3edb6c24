use chrono::Utc;
use mission_control::mission::models::QueueStatus;
use mission_control::notify::Notification;
use mission_control::steps::MatchType;
use mission_control::store::MissionStore;
use std::sync::atomic::Ordering;
use std::time::Duration;

mod common;
use common::{
    configure_area, descriptor, descriptor_from, spawn_app, spawn_app_with, spawn_flaky_app, test_config,
};

fn status_changes(events: &[Notification], wanted: QueueStatus) -> usize {
    events
        .iter()
        .filter(|n| matches!(n, Notification::MissionStatusChanged { status, .. } if *status == wanted))
        .count()
}

#[tokio::test]
async fn test_terminal_status_is_archived_exactly_once() {
    let mut app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    let outcome = app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    app.controller.set_job("M-1", "30", Some("R1"));
    app.drain_events();

    let first = app.state.reconciler.tick().await.unwrap();
    let second = app.state.reconciler.tick().await.unwrap();

    assert_eq!(first.finished, 1);
    assert_eq!(second.finished, 0);

    let item = app.store.get_queue_item(outcome.queue_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Complete);
    assert_eq!(item.assigned_robot_id.as_deref(), Some("R1"));
    assert!(item.completed_at.is_some());

    let history = app.store.history_for("M-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].final_status, QueueStatus::Complete);

    assert_eq!(status_changes(&app.drain_events(), QueueStatus::Complete), 1);
    assert_eq!(app.store.slots_in_use("A1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_reconcilers_archive_once() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    app.controller.set_job("M-1", "31", None);

    let (a, b) = tokio::join!(app.state.reconciler.tick(), app.state.reconciler.tick());
    assert_eq!(a.unwrap().finished + b.unwrap().finished, 1);
    assert_eq!(app.store.history_for("M-1").await.unwrap().len(), 1);
    assert_eq!(app.store.slots_in_use("A1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_status_mapping() {
    let app = spawn_app();
    configure_area(&app, "A1", 5, true, 0).await;

    for (code, status) in [("DONE", "35"), ("GONE", "31"), ("BOOM", "60"), ("WARN", "50"), ("ODD", "99")] {
        app.state.admission.enqueue(descriptor(code, "A1", 5)).await.unwrap();
        app.controller.set_job(code, status, None);
    }

    app.state.reconciler.tick().await.unwrap();

    let status_of = |code: &'static str| {
        let store = app.store.clone();
        async move {
            store.history_for(code).await.unwrap().first().map(|h| h.final_status)
        }
    };
    assert_eq!(status_of("DONE").await, Some(QueueStatus::Complete));
    assert_eq!(status_of("GONE").await, Some(QueueStatus::Cancelled));
    assert_eq!(status_of("BOOM").await, Some(QueueStatus::Error));
    assert_eq!(status_of("WARN").await, None);
    assert_eq!(status_of("ODD").await, None);

    let warn = app.store.find_active_by_code("WARN").await.unwrap().unwrap();
    assert_eq!(warn.status, QueueStatus::Executing);
}

#[tokio::test]
async fn test_missing_remote_job_within_grace_is_left_alone() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;
    app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();

    let summary = app.state.reconciler.tick().await.unwrap();
    assert_eq!(summary.stale, 0);
    let item = app.store.find_active_by_code("M-1").await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Executing);
}

#[tokio::test]
async fn test_missing_remote_job_past_grace_becomes_error() {
    let mut config = test_config();
    config.stale_grace = Duration::from_millis(10);
    let app = spawn_app_with(config);
    configure_area(&app, "A1", 1, true, 0).await;

    let outcome = app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let summary = app.state.reconciler.tick().await.unwrap();
    assert_eq!(summary.stale, 1);

    let item = app.store.get_queue_item(outcome.queue_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Error);
    assert!(item
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("ReconciliationStale"));
    assert_eq!(app.store.history_for("M-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_completion_admits_next_waiting_item() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    app.state.admission.enqueue(descriptor("M-2", "A1", 5)).await.unwrap();
    app.controller.set_job("M-1", "30", Some("R1"));
    app.controller.set_robot("R1", "N205");

    app.state.reconciler.tick().await.unwrap();

    let next = app.store.find_active_by_code("M-2").await.unwrap().unwrap();
    assert_eq!(next.status, QueueStatus::Executing);
    assert_eq!(app.controller.submit_count(), 2);
    assert_eq!(app.store.slots_in_use("A1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_progress_notified_when_step_changes() {
    let mut app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    app.state
        .admission
        .enqueue(descriptor_from("M-1", "A1", 5, &["N101", "N205", "N300"]))
        .await
        .unwrap();
    app.controller.set_job("M-1", "20", Some("R1"));
    app.controller.set_robot("R1", "N205");
    app.drain_events();

    app.state.reconciler.tick().await.unwrap();
    app.state.reconciler.tick().await.unwrap();

    let progress: Vec<_> = app
        .drain_events()
        .into_iter()
        .filter_map(|n| match n {
            Notification::MissionProgress { progress, robot_id, .. } => Some((robot_id, progress)),
            _ => None,
        })
        .collect();

    assert_eq!(progress.len(), 1);
    let (robot_id, step) = &progress[0];
    assert_eq!(robot_id, "R1");
    assert_eq!(step.current_step_index, Some(1));
    assert_eq!(step.match_type, MatchType::Exact);
    assert_eq!(step.completed_steps, vec![0]);
    assert!((step.progress_percentage - 33.3).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_spawned_loop_stops_on_shutdown() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;
    app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    app.controller.set_job("M-1", "30", None);

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = app
        .state
        .reconciler
        .clone()
        .spawn(Duration::from_millis(10), rx);

    let deadline = Utc::now() + chrono::Duration::seconds(2);
    while app.store.history_for("M-1").await.unwrap().is_empty() && Utc::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(app.store.history_for("M-1").await.unwrap().len(), 1);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop")
        .unwrap();
}

#[tokio::test]
async fn test_failed_archive_is_retried_without_blocking_other_missions() {
    let (app, flaky) = spawn_flaky_app();
    configure_area(&app, "A1", 1, true, 0).await;
    configure_area(&app, "B1", 1, true, 0).await;

    app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    app.state.admission.enqueue(descriptor("M-2", "A1", 5)).await.unwrap();
    app.state.admission.enqueue(descriptor("M-3", "B1", 5)).await.unwrap();
    app.controller.set_job("M-1", "30", Some("R1"));
    app.controller.set_job("M-3", "30", Some("R3"));
    flaky.finish_failures.store(1, Ordering::SeqCst);

    let first = app.state.reconciler.tick().await.unwrap();
    assert_eq!(first.finished, 1);
    let archived = |code: &'static str| {
        let store = app.store.clone();
        async move { store.history_for(code).await.unwrap().len() }
    };
    assert_eq!(archived("M-1").await + archived("M-3").await, 1);

    app.state.reconciler.tick().await.unwrap();

    assert_eq!(archived("M-1").await, 1);
    assert_eq!(archived("M-3").await, 1);
    let next = app.store.find_active_by_code("M-2").await.unwrap().unwrap();
    assert_eq!(next.status, QueueStatus::Executing);
    assert_eq!(app.store.slots_in_use("A1").await.unwrap(), 1);
    assert_eq!(app.store.slots_in_use("B1").await.unwrap(), 0);
    assert_eq!(
        app.store.count_by_status(None, QueueStatus::Waiting).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_failed_start_does_not_leak_slot() {
    let (app, flaky) = spawn_flaky_app();
    configure_area(&app, "A1", 1, true, 0).await;

    app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    app.state.admission.enqueue(descriptor("M-2", "A1", 5)).await.unwrap();
    app.controller.set_job("M-1", "30", Some("R1"));
    flaky.start_failures.store(2, Ordering::SeqCst);

    assert!(app.state.reconciler.tick().await.is_ok());

    let waiting = app.store.find_active_by_code("M-2").await.unwrap().unwrap();
    assert_eq!(waiting.status, QueueStatus::Waiting);
    assert_eq!(app.store.slots_in_use("A1").await.unwrap(), 0);

    assert_eq!(app.state.admission.process_all().await.unwrap(), 1);
    assert_eq!(app.store.slots_in_use("A1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_progress_forgotten_once_mission_leaves_execution() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    let outcome = app.state.admission.enqueue(descriptor("M-1", "A1", 5)).await.unwrap();
    app.controller.set_job("M-1", "20", Some("R1"));
    app.controller.set_robot("R1", "N205");

    app.state.reconciler.tick().await.unwrap();
    assert_eq!(app.state.reconciler.tracked_progress().await, 1);

    let item = app.store.get_queue_item(outcome.queue_id).await.unwrap().unwrap();
    app.state
        .admission
        .finish(&item, QueueStatus::Cancelled, None)
        .await
        .unwrap()
        .expect("mission should cancel");

    app.state.reconciler.tick().await.unwrap();
    assert_eq!(app.state.reconciler.tracked_progress().await, 0);
}
