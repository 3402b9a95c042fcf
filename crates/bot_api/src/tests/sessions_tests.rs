use super::*;

async fn store() -> SessionStore {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    SessionStore::load(storage).await.expect("sessions")
}

#[tokio::test]
async fn new_users_start_idle_without_history() {
    let sessions = store().await;
    let session = sessions.snapshot(UserId(1));
    assert_eq!(session, UserSession::default());
    assert!(!sessions.is_busy(UserId(1)));
    assert!(sessions.retry_target(UserId(1)).is_none());
}

#[tokio::test]
async fn try_set_busy_is_exclusive_per_user() {
    let sessions = store().await;
    assert!(sessions.try_set_busy(UserId(1)).await.expect("first"));
    assert!(!sessions.try_set_busy(UserId(1)).await.expect("second"));
    assert!(sessions.try_set_busy(UserId(2)).await.expect("other user"));

    sessions.set_idle(UserId(1)).await.expect("idle");
    assert!(!sessions.is_busy(UserId(1)));
    assert!(sessions.is_busy(UserId(2)));
}

#[tokio::test]
async fn guard_release_and_drop_both_clear_busy() {
    let sessions = store().await;
    let guard = sessions
        .try_acquire(UserId(1))
        .await
        .expect("acquire")
        .expect("guard");
    assert!(sessions.try_acquire(UserId(1)).await.expect("again").is_none());
    guard.release().await.expect("release");
    assert!(!sessions.is_busy(UserId(1)));

    {
        let _guard = sessions
            .try_acquire(UserId(1))
            .await
            .expect("acquire")
            .expect("guard");
        assert!(sessions.is_busy(UserId(1)));
    }
    assert!(!sessions.is_busy(UserId(1)));
}

#[tokio::test]
async fn outcome_is_recorded_and_elapsed_can_be_cleared() {
    let sessions = store().await;
    sessions
        .record_render_outcome(UserId(9), Duration::from_millis(2500), "🏠 1")
        .await
        .expect("record");
    let session = sessions.snapshot(UserId(9));
    assert_eq!(session.last_elapsed, Some(2.5));
    assert_eq!(sessions.retry_target(UserId(9)).as_deref(), Some("🏠 1"));

    sessions.clear_elapsed(UserId(9)).await.expect("clear");
    let session = sessions.snapshot(UserId(9));
    assert!(session.last_elapsed.is_none());
    assert_eq!(session.last_command.as_deref(), Some("🏠 1"));
}

#[tokio::test]
async fn state_survives_a_restart_without_stale_busy_flags() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}",
        dir.path().join("bot.db").to_string_lossy().replace('\\', "/")
    );

    let storage = Storage::new(&url).await.expect("db");
    let sessions = SessionStore::load(storage.clone()).await.expect("sessions");
    sessions
        .record_render_outcome(UserId(5), Duration::from_secs(3), "🌻 2")
        .await
        .expect("record");
    assert!(sessions.try_set_busy(UserId(5)).await.expect("busy"));
    storage.pool().close().await;
    drop(sessions);

    let reopened = Storage::new(&url).await.expect("reopen");
    let restored = SessionStore::load(reopened).await.expect("reload");
    let session = restored.snapshot(UserId(5));
    assert!(!session.busy);
    assert_eq!(session.last_command.as_deref(), Some("🌻 2"));
    assert_eq!(session.last_elapsed, Some(3.0));
}
