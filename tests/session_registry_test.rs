use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use proptest::prelude::*;
use serde_json::json;
use shopmcp::mcp::{spawn_idle_sweeper, ResponseMode, SessionRegistry};
use shopmcp::ServerConfig;

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_creations_never_share_an_id() -> Result<()> {
    let registry = Arc::new(SessionRegistry::new(10_000));

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut ids = Vec::with_capacity(32);
                for _ in 0..32 {
                    ids.push(registry.create(ResponseMode::Json).await.id().to_string());
                }
                ids
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await? {
            assert!(seen.insert(id.clone()), "duplicate session id {id}");
        }
    }
    assert_eq!(seen.len(), 64 * 32);
    assert_eq!(registry.len(), 64 * 32);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_respect_capacity() -> Result<()> {
    let registry = Arc::new(SessionRegistry::new(16));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    registry.create(ResponseMode::Json).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await?;
    }

    assert_eq!(registry.len(), 16);
    Ok(())
}

#[tokio::test]
async fn idle_sweeper_evicts_sessions_and_releases_browser_state() -> Result<()> {
    let mut config = ServerConfig::default();
    config.sessions.idle_timeout = Duration::from_millis(100);
    config.sessions.sweep_interval = Duration::from_millis(25);
    let server = start_test_server(config.clone(), Fakes::default()).await?;
    let client = reqwest::Client::new();
    let session_id = initialize(&client, &server).await?;

    let sweeper = spawn_idle_sweeper(
        server.sessions.clone(),
        config.sessions.idle_timeout,
        config.sessions.sweep_interval,
    )
    .expect("sweeper enabled");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!server.sessions.contains(&session_id));
    assert_eq!(*server.executor.released.lock(), vec![session_id.clone()]);

    let (status, body) =
        post_on_session(&client, &server, &session_id, &rpc(1, "ping", json!({}))).await?;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32000);

    sweeper.abort();
    Ok(())
}

#[test]
fn zero_idle_timeout_disables_the_sweeper() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let registry = Arc::new(SessionRegistry::new(4));
        assert!(spawn_idle_sweeper(registry, Duration::ZERO, Duration::from_secs(1)).is_none());
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn created_ids_are_unique_and_all_resolvable(count in 1usize..200) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let registry = SessionRegistry::new(count);
        let ids: Vec<String> = rt.block_on(async {
            let sessions = futures::future::join_all(
                (0..count).map(|_| registry.create(ResponseMode::Json)),
            )
            .await;
            sessions.iter().map(|s| s.id().to_string()).collect()
        });

        let unique: HashSet<&String> = ids.iter().collect();
        prop_assert_eq!(unique.len(), count);
        for id in &ids {
            prop_assert!(registry.lookup(id).is_ok());
        }
    }
}
