use sessionhub_client::{
    CombinedMode, FetchOutcome, KeyValueStore, LoadPhase, MemoryStore, SessionHubClient,
    ToggleError,
};
use sessionhub_core::testing::{FakeBackend, combined_page, context_info, project, session};
use sessionhub_core::{ServiceError, SessionKey};
use sessionhub_runtime_config::RuntimeConfig;
use std::collections::BTreeSet;
use std::sync::Arc;

type Harness = (Arc<FakeBackend>, Arc<MemoryStore>, SessionHubClient);

fn client_with(contexts: &[(&str, &str)]) -> Harness {
    let fake = Arc::new(FakeBackend::with_contexts(
        contexts
            .iter()
            .map(|(id, root)| context_info(id, root))
            .collect(),
    ));
    let kv = Arc::new(MemoryStore::new());
    let config = RuntimeConfig::default();
    let client = SessionHubClient::new(
        &config,
        fake.clone(),
        fake.clone(),
        Arc::new(config.clone()),
        kv.clone(),
    );
    (fake, kv, client)
}

async fn two_contexts() -> Harness {
    let (fake, kv, client) = client_with(&[("local", "laptop"), ("remote:gpu", "gpu")]);
    client.bootstrap().await.unwrap();
    fake.clear_calls();
    (fake, kv, client)
}

#[tokio::test]
async fn single_context_toggle_is_a_noop_without_calls() {
    let (fake, _, client) = client_with(&[("local", "laptop")]);
    client.bootstrap().await.unwrap();
    fake.clear_calls();

    let err = client.combined().toggle().await.unwrap_err();
    assert!(matches!(err, ToggleError::NotEnoughContexts { known: 1 }));
    assert_eq!(client.store().read(|s| s.combined.mode), CombinedMode::Disabled);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn first_page_is_mirrored_exactly() {
    let (fake, kv, client) = two_contexts().await;
    let s1 = session("remote:gpu", "train", "s1", 10);
    fake.push_combined(Ok(combined_page(vec![s1.clone()], Some("c1"), true)));
    client.store().update(|s| {
        s.multi_select.insert(SessionKey {
            context_id: s1.context_id.clone(),
            project_id: "train".into(),
            session_id: "s1".into(),
        });
    });

    assert!(client.combined().toggle().await.unwrap());

    let state = client.store().snapshot();
    assert_eq!(state.combined.mode, CombinedMode::Enabled(LoadPhase::Idle));
    assert_eq!(state.combined.sessions, vec![s1]);
    assert_eq!(state.combined.next_cursor.as_deref(), Some("c1"));
    assert!(state.combined.has_more);
    assert!(state.multi_select.is_empty());
    assert!(fake.combined_watchers());
    assert_eq!(
        kv.get("ui:combined-sessions").unwrap().as_deref(),
        Some("true")
    );
}

#[tokio::test]
async fn empty_page_claiming_more_stops_paging() {
    let (fake, _, client) = two_contexts().await;
    fake.push_combined(Ok(combined_page(
        vec![session("local", "app", "s1", 10)],
        Some("c1"),
        true,
    )));
    client.combined().toggle().await.unwrap();

    fake.push_combined(Ok(combined_page(Vec::new(), Some("c2"), true)));
    let outcome = client.combined().fetch_more().await.unwrap();

    assert_eq!(outcome, FetchOutcome::Applied { added: 0 });
    assert!(!client.store().read(|s| s.combined.has_more));
    assert_eq!(
        client.combined().fetch_more().await.unwrap(),
        FetchOutcome::Skipped
    );
    assert_eq!(
        fake.combined_requests().last().cloned(),
        Some((Some("c1".to_string()), 50))
    );
}

#[tokio::test]
async fn appended_duplicates_never_grow_the_list() {
    let (fake, _, client) = two_contexts().await;
    let a = session("local", "app", "a", 30);
    let b = session("remote:gpu", "app", "a", 20);
    fake.push_combined(Ok(combined_page(vec![a.clone(), b.clone()], Some("c1"), true)));
    client.combined().toggle().await.unwrap();

    let c = session("local", "lib", "a", 10);
    fake.push_combined(Ok(combined_page(vec![b, a, c.clone()], None, false)));
    let outcome = client.combined().fetch_more().await.unwrap();

    assert_eq!(outcome, FetchOutcome::Applied { added: 1 });
    let held = client.store().read(|s| s.combined.sessions.clone());
    assert_eq!(held.len(), 3);
    assert_eq!(held[2], c);
    let keys: BTreeSet<_> = held.iter().map(|s| s.key()).collect();
    assert_eq!(keys.len(), held.len());
}

#[tokio::test]
async fn superseded_first_page_is_dropped() {
    let (fake, _, client) = two_contexts().await;
    client.combined().toggle().await.unwrap();

    let gate = fake.push_combined_gated(Ok(combined_page(
        vec![session("local", "app", "old", 1)],
        None,
        false,
    )));
    fake.push_combined(Ok(combined_page(
        vec![session("local", "app", "new", 2)],
        None,
        false,
    )));

    let (slow, fast) = tokio::join!(client.combined().fetch_first_page(), async {
        let outcome = client.combined().refresh_in_place().await;
        let _ = gate.send(());
        outcome
    });

    assert_eq!(fast.unwrap(), FetchOutcome::Applied { added: 1 });
    assert_eq!(slow.unwrap(), FetchOutcome::Stale);
    let state = client.store().snapshot();
    assert_eq!(state.combined.sessions[0].id, "new");
    assert_eq!(state.combined.mode, CombinedMode::Enabled(LoadPhase::Idle));
}

#[tokio::test]
async fn page_arriving_after_disable_is_dropped() {
    let (fake, _, client) = two_contexts().await;
    fake.push_combined(Ok(combined_page(
        vec![session("local", "app", "s1", 10)],
        Some("c1"),
        true,
    )));
    client.combined().toggle().await.unwrap();

    let gate = fake.push_combined_gated(Ok(combined_page(
        vec![session("local", "app", "s2", 5)],
        None,
        false,
    )));
    let (more, toggled) = tokio::join!(client.combined().fetch_more(), async {
        let toggled = client.combined().toggle().await;
        let _ = gate.send(());
        toggled
    });

    assert!(!toggled.unwrap());
    assert_eq!(more.unwrap(), FetchOutcome::Stale);
    let state = client.store().snapshot();
    assert_eq!(state.combined.mode, CombinedMode::Disabled);
    assert!(state.combined.sessions.is_empty());
}

#[tokio::test]
async fn failed_enable_rolls_everything_back() {
    let (fake, kv, client) = two_contexts().await;
    fake.set_projects("local", vec![project("app")]);
    fake.set_sessions("local", "app", vec![session("local", "app", "s1", 1)]);
    client.select_project("app").await.unwrap();
    let before = client.store().read(|s| s.workspace.sessions.clone());
    fake.push_combined(Err(ServiceError::Unavailable("remote scan failed".into())));

    let err = client.combined().toggle().await.unwrap_err();

    assert!(matches!(err, ToggleError::Backend(ServiceError::Unavailable(_))));
    let state = client.store().snapshot();
    assert_eq!(state.combined.mode, CombinedMode::Disabled);
    assert!(state.combined.sessions.is_empty());
    assert_eq!(state.combined.error.as_deref(), Some("remote scan failed"));
    assert_eq!(state.workspace.sessions, before);
    assert!(!fake.combined_watchers());
    assert_eq!(
        kv.get("ui:combined-sessions").unwrap().as_deref(),
        Some("false")
    );
}
