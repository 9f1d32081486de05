//! Unit tests for session registry lifecycle and the session lock.

use std::path::PathBuf;
use std::sync::Arc;

use acp_bridge::config::GuardLimits;
use acp_bridge::guard::ResourceGuard;
use acp_bridge::session::model::PermissionMode;
use acp_bridge::session::SessionManager;
use acp_bridge::AppError;

fn manager(max_sessions: usize) -> SessionManager {
    let guard = Arc::new(ResourceGuard::new(GuardLimits {
        max_concurrent_sessions: max_sessions,
        max_concurrent_operations: 50,
        memory_warning_mib: 1_000_000,
        memory_critical_mib: 2_000_000,
    }));
    SessionManager::new(guard, PermissionMode::Default)
}

#[test]
fn create_generates_unique_stable_ids() {
    let manager = manager(10);
    let a = manager.create(PathBuf::from("/w"), Vec::new()).expect("a");
    let b = manager.create(PathBuf::from("/w"), Vec::new()).expect("b");
    assert_ne!(a.id, b.id);
    assert_eq!(manager.get(&a.id).expect("lookup").id, a.id);
}

#[test]
fn create_fails_when_session_limit_reached() {
    let manager = manager(1);
    manager.create(PathBuf::from("/w"), Vec::new()).expect("first");
    let err = manager.create(PathBuf::from("/w"), Vec::new()).unwrap_err();
    assert!(matches!(err, AppError::Resource(_)), "{err}");
}

#[test]
fn adopt_returns_existing_entry_for_known_id() {
    let manager = manager(10);
    let created = manager.create(PathBuf::from("/w"), Vec::new()).expect("create");
    let adopted = manager
        .adopt(&created.id, PathBuf::from("/elsewhere"), Vec::new())
        .expect("adopt");
    assert!(Arc::ptr_eq(&created, &adopted));
}

#[test]
fn adopt_creates_fresh_session_for_unknown_id() {
    let manager = manager(10);
    let adopted = manager
        .adopt("host-chosen-id", PathBuf::from("/w"), Vec::new())
        .expect("adopt");
    assert_eq!(adopted.id, "host-chosen-id");
    assert_eq!(manager.get("host-chosen-id").expect("lookup").id, adopted.id);
}

#[test]
fn get_unknown_session_is_not_found() {
    let manager = manager(10);
    let err = manager.get("missing").unwrap_err();
    assert!(matches!(err, AppError::SessionNotFound(_)), "{err}");
    assert_eq!(err.json_rpc_code(), -32001);
}

#[test]
fn cancel_is_idempotent_and_ignores_unknown_ids() {
    let manager = manager(10);
    let entry = manager.create(PathBuf::from("/w"), Vec::new()).expect("create");

    // No turn in flight: nothing to fire, no panic.
    manager.cancel(&entry.id);
    manager.cancel(&entry.id);
    manager.cancel("missing");
}

#[test]
fn cancel_fires_the_turn_token() {
    let manager = manager(10);
    let entry = manager.create(PathBuf::from("/w"), Vec::new()).expect("create");

    let token = entry.begin_turn();
    assert!(!token.is_cancelled());
    manager.cancel(&entry.id);
    assert!(token.is_cancelled());
}

#[test]
fn dispose_cancels_and_frees_the_slot() {
    let manager = manager(1);
    let entry = manager.create(PathBuf::from("/w"), Vec::new()).expect("create");
    let token = entry.begin_turn();

    manager.dispose(&entry.id);
    assert!(token.is_cancelled());
    assert!(manager.get(&entry.id).is_err());

    // The slot is free again.
    manager.create(PathBuf::from("/w"), Vec::new()).expect("recreate");
}

#[test]
fn dispose_all_empties_the_registry() {
    let manager = manager(10);
    manager.create(PathBuf::from("/w"), Vec::new()).expect("a");
    manager.create(PathBuf::from("/w"), Vec::new()).expect("b");
    assert_eq!(manager.len(), 2);

    manager.dispose_all();
    assert!(manager.is_empty());
}

#[tokio::test]
async fn session_lock_try_lock_fails_while_held() {
    let manager = manager(10);
    let entry = manager.create(PathBuf::from("/w"), Vec::new()).expect("create");

    let held = entry.lock.try_lock().expect("first lock");
    assert!(entry.lock.try_lock().is_err(), "second lock must fail");
    drop(held);
    assert!(entry.lock.try_lock().is_ok(), "freed after drop");
}

#[test]
fn begin_turn_tracks_in_flight_state() {
    let manager = manager(10);
    let entry = manager.create(PathBuf::from("/w"), Vec::new()).expect("create");

    assert!(!entry.turn_in_flight());
    let _token = entry.begin_turn();
    assert!(entry.turn_in_flight());
    entry.end_turn();
    assert!(!entry.turn_in_flight());
}
