//! Integration tests for the control plane poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use workmesh::coordinator::{CoordinatorConfig, WorkflowCoordinator};
use workmesh::engine::{ControlConfig, ControlPlane};
use workmesh::error::Error;
use workmesh::model::*;

fn fast() -> ControlConfig {
    ControlConfig {
        poll_interval: Duration::from_millis(10),
        persist_each_tick: true,
    }
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let coordinator = Arc::new(WorkflowCoordinator::new(&CoordinatorConfig::new("p1")));
    let plane = ControlPlane::new(coordinator, fast());

    let runner = plane.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    plane.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("control plane did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn zero_interval_is_refused() {
    let coordinator = Arc::new(WorkflowCoordinator::new(&CoordinatorConfig::new("p1")));
    let plane = ControlPlane::new(
        coordinator,
        ControlConfig {
            poll_interval: Duration::ZERO,
            ..ControlConfig::default()
        },
    );

    let result = tokio::time::timeout(Duration::from_secs(2), plane.run())
        .await
        .expect("run did not return");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn ready_workflows_are_dispatched_once() {
    let coordinator = Arc::new(WorkflowCoordinator::new(&CoordinatorConfig::new("p1")));
    let id = coordinator
        .submit_workflow(&WorkflowRecord::new("build"), 1.0)
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let plane = ControlPlane::new(Arc::clone(&coordinator), fast()).with_dispatch(tx);
    let runner = plane.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let task = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("nothing dispatched")
        .unwrap();
    assert_eq!(task.workflow_id, id);
    assert_eq!(task.status, WorkflowStatus::Assigned);

    // Several more ticks pass while the task is still waiting to start.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(rx.try_recv().is_err());

    plane.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_persists_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let config = CoordinatorConfig::new("p1").state_path(&path);
    let coordinator = Arc::new(WorkflowCoordinator::new(&config));
    coordinator
        .submit_workflow(&WorkflowRecord::new("build"), 1.0)
        .unwrap();

    let plane = ControlPlane::new(
        Arc::clone(&coordinator),
        ControlConfig {
            poll_interval: Duration::from_secs(3600),
            persist_each_tick: false,
        },
    );
    let runner = plane.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    plane.shutdown();
    handle.await.unwrap().unwrap();

    let loaded = WorkflowCoordinator::load(&config).unwrap();
    assert_eq!(loaded.list_workflows(&WorkflowFilter::default()).len(), 1);
}
