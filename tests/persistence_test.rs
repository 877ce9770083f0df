//! Integration tests for saving and loading coordinator state.

use std::path::Path;

use serde_json::{Value, json};
use workmesh::coordinator::persist::{self, STATE_VERSION};
use workmesh::coordinator::{CoordinatorConfig, WorkflowCoordinator};
use workmesh::error::Error;
use workmesh::model::*;

fn config(path: &Path) -> CoordinatorConfig {
    CoordinatorConfig::new("p1").state_path(path).peer("p2")
}

fn record(name: &str) -> WorkflowRecord {
    WorkflowRecord::new(name).tag("ci").inputs(json!({ "step": name }))
}

/// A coordinator with one task in each of several states, saved to `path`.
fn populated(path: &Path) -> WorkflowCoordinator {
    let coord = WorkflowCoordinator::new(&config(path));
    let started = coord.submit_workflow(&record("started"), 1.0).unwrap();
    coord.assign_workflows();
    if coord.get_workflow_status(&started).unwrap().assigned_peer == Some(PeerId::from("p1")) {
        coord
            .update_workflow_status(&started, WorkflowStatus::InProgress, None, None)
            .unwrap();
    }
    coord.submit_workflow(&record("waiting-a"), 2.5).unwrap();
    coord.submit_workflow(&record("waiting-b"), 0.5).unwrap();
    coord.save().unwrap();
    coord
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_restores_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let original = populated(&path);

    let loaded = WorkflowCoordinator::load(&config(&path)).unwrap();

    let all = WorkflowFilter::default();
    assert_eq!(loaded.list_workflows(&all), original.list_workflows(&all));
    assert_eq!(loaded.clock_head(), original.clock_head());
    assert_eq!(loaded.peers(), original.peers());
    assert_eq!(loaded.pending_queue(), original.pending_queue());
    loaded.verify_clock().unwrap();
}

#[test]
fn loaded_queue_keeps_working() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);

    let loaded = WorkflowCoordinator::load(&config(&path)).unwrap();
    let pending = loaded.pending_queue();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].1, 0.5);

    let report = loaded.assign_workflows();
    assert_eq!(report.assigned.len(), 2);
    assert_eq!(report.assigned[0].workflow_id, pending[0].0);
    assert!(loaded.pending_queue().is_empty());
}

#[test]
fn loaded_state_still_deduplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let original = populated(&path);
    let waiting = original
        .list_workflows(&WorkflowFilter::default().status(WorkflowStatus::Pending))
        .into_iter()
        .find(|t| t.name == "waiting-a")
        .unwrap();

    let loaded = WorkflowCoordinator::load(&config(&path)).unwrap();
    let again = loaded.submit_workflow(&record("waiting-a"), 2.5).unwrap();
    assert_eq!(again, waiting.workflow_id);
}

#[test]
fn file_layout_is_versioned_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);

    let json = read_json(&path);
    assert_eq!(json["version"], json!(STATE_VERSION));
    assert_eq!(json["peer_id"], json!("p1"));
    assert_eq!(json["merkle_clock"]["logical_clock"], json!(3));
    assert_eq!(json["merkle_clock"]["events"].as_array().unwrap().len(), 3);
    assert_eq!(json["workflows"].as_array().unwrap().len(), 3);
    assert!(json["workflows"][0]["task_hash"].is_string());
    assert!(!dir.path().join("state.json.tmp").exists());
}

#[test]
fn save_replaces_leftover_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let tmp = dir.path().join("state.json.tmp");
    // A crash between create and rename leaves a partial temp file behind.
    std::fs::write(&tmp, "{ \"version\": 1, \"peer").unwrap();

    let original = populated(&path);

    assert!(!tmp.exists());
    let loaded = WorkflowCoordinator::load(&config(&path)).unwrap();
    assert_eq!(loaded.clock_head(), original.clock_head());
}

#[test]
fn repeated_saves_overwrite_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let coord = populated(&path);
    coord.submit_workflow(&record("later"), 3.0).unwrap();
    coord.save().unwrap();

    let json = read_json(&path);
    assert_eq!(json["workflows"].as_array().unwrap().len(), 4);
    assert_eq!(json["merkle_clock"]["logical_clock"], json!(4));
}

#[test]
fn save_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("state.json");
    populated(&path);
    assert!(path.exists());
}

#[test]
fn close_persists_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let coord = WorkflowCoordinator::new(&config(&path));
    let id = coord.submit_workflow(&record("build"), 1.0).unwrap();
    coord.close().unwrap();

    let loaded = WorkflowCoordinator::load(&config(&path)).unwrap();
    assert!(loaded.get_workflow_status(&id).is_ok());
}

#[test]
fn save_without_path_is_a_config_error() {
    let coord = WorkflowCoordinator::new(&CoordinatorConfig::new("p1"));
    assert!(matches!(coord.save(), Err(Error::Config(_))));
    coord.close().unwrap();
}

// ---------------------------------------------------------------------------
// Corruption
// ---------------------------------------------------------------------------

/// Flip the lowest bit of the first data byte of event `index`.
fn flip_event_bit(path: &Path, index: usize) {
    let mut json = read_json(path);
    let data = json["merkle_clock"]["events"][index]["data"]
        .as_str()
        .unwrap()
        .to_string();
    let mut bytes = hex::decode(data).unwrap();
    bytes[0] ^= 0x01;
    json["merkle_clock"]["events"][index]["data"] = json!(hex::encode(bytes));
    write_json(path, &json);
}

#[test]
fn flipped_bit_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    flip_event_bit(&path, 1);

    let err = WorkflowCoordinator::load(&config(&path)).unwrap_err();
    assert!(matches!(err, Error::CorruptState(_)));
    assert!(err.is_fatal());
}

#[test]
fn open_quarantines_corrupt_file_and_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    flip_event_bit(&path, 0);

    let opened = WorkflowCoordinator::open(&config(&path)).unwrap();

    assert!(matches!(opened.corruption, Some(Error::CorruptState(_))));
    let moved = opened.quarantined.unwrap();
    assert_eq!(moved, dir.path().join("state.json.corrupt"));
    assert!(moved.exists());
    assert!(!path.exists());

    let coord = opened.coordinator;
    assert_eq!(coord.clock_head().logical_clock, 0);
    assert!(coord.list_workflows(&WorkflowFilter::default()).is_empty());
    assert_eq!(
        coord.peers(),
        vec![PeerId::from("p1"), PeerId::from("p2")]
    );
}

#[test]
fn open_quarantines_unparseable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let opened = WorkflowCoordinator::open(&config(&path)).unwrap();
    assert!(opened.corruption.is_some());
    assert!(opened.quarantined.is_some());
}

#[test]
fn open_missing_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let opened = WorkflowCoordinator::open(&config(&path)).unwrap();
    assert!(opened.corruption.is_none());
    assert!(opened.quarantined.is_none());
    assert_eq!(opened.coordinator.clock_head().logical_clock, 0);
}

#[test]
fn open_loads_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let original = populated(&path);

    let opened = WorkflowCoordinator::open(&config(&path)).unwrap();
    assert!(opened.corruption.is_none());
    assert_eq!(opened.coordinator.clock_head(), original.clock_head());
}

#[test]
fn edited_task_row_still_loads() {
    // Task rows are not part of the chain; only the clock is verified.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    json["workflows"][0]["priority"] = json!(9.0);
    write_json(&path, &json);

    assert!(WorkflowCoordinator::load(&config(&path)).is_ok());
}

#[test]
fn state_for_another_peer_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);

    let other = CoordinatorConfig::new("p2").state_path(&path);
    assert!(matches!(
        WorkflowCoordinator::load(&other),
        Err(Error::CorruptState(_))
    ));
}

#[test]
fn duplicate_workflow_rows_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    let first = json["workflows"][0].clone();
    json["workflows"].as_array_mut().unwrap().push(first);
    write_json(&path, &json);

    assert!(matches!(
        WorkflowCoordinator::load(&config(&path)),
        Err(Error::CorruptState(_))
    ));
}

/// Index of the first persisted row with `status`.
fn row_with_status(json: &Value, status: &str) -> usize {
    json["workflows"]
        .as_array()
        .unwrap()
        .iter()
        .position(|row| row["status"] == json!(status))
        .unwrap()
}

fn assert_load_corrupt(path: &Path) {
    assert!(matches!(
        WorkflowCoordinator::load(&config(path)),
        Err(Error::CorruptState(_))
    ));
}

#[test]
fn two_active_rows_for_one_task_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    let pending = row_with_status(&json, "pending");
    let mut twin = json["workflows"][pending].clone();
    twin["workflow_id"] = json!("wf-twin");
    json["workflows"].as_array_mut().unwrap().push(twin);
    write_json(&path, &json);

    assert_load_corrupt(&path);
}

#[test]
fn finished_row_may_share_a_task_hash() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    let pending = row_with_status(&json, "pending");
    let mut earlier = json["workflows"][pending].clone();
    earlier["workflow_id"] = json!("wf-earlier");
    earlier["status"] = json!("cancelled");
    json["workflows"].as_array_mut().unwrap().push(earlier);
    write_json(&path, &json);

    assert!(WorkflowCoordinator::load(&config(&path)).is_ok());
}

#[test]
fn assigned_row_without_owner_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    let pending = row_with_status(&json, "pending");
    json["workflows"][pending]["status"] = json!("assigned");
    write_json(&path, &json);

    assert_load_corrupt(&path);
}

#[test]
fn running_row_without_owner_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    let pending = row_with_status(&json, "pending");
    json["workflows"][pending]["status"] = json!("in_progress");
    write_json(&path, &json);

    assert_load_corrupt(&path);
}

#[test]
fn pending_row_with_owner_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    let pending = row_with_status(&json, "pending");
    json["workflows"][pending]["assigned_peer"] = json!("p2");
    write_json(&path, &json);

    assert_load_corrupt(&path);

    let opened = WorkflowCoordinator::open(&config(&path)).unwrap();
    assert!(matches!(opened.corruption, Some(Error::CorruptState(_))));
    assert!(opened.quarantined.is_some());
}

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

#[test]
fn unknown_version_is_refused_not_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    populated(&path);
    let mut json = read_json(&path);
    json["version"] = json!(2);
    write_json(&path, &json);

    assert!(matches!(
        persist::read_state(&path),
        Err(Error::UnsupportedStateVersion(2))
    ));
    assert!(matches!(
        WorkflowCoordinator::open(&config(&path)),
        Err(Error::UnsupportedStateVersion(2))
    ));
    assert!(path.exists());
}

#[test]
fn missing_version_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    write_json(&path, &json!({ "peer_id": "p1" }));

    assert!(matches!(
        persist::read_state(&path),
        Err(Error::CorruptState(_))
    ));
}
