//! End-to-end sync pass tests against mocked hosting and registry APIs

mod common;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use depsentry::sync::{DependencyOutcome, RepositoryOutcome, SkipReason};
use depsentry::{Store, SyncError};

async fn mount_listing(server: &MockServer, repos: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repos))
        .mount(server)
        .await;
}

#[tokio::test]
async fn forced_pass_mirrors_repositories_and_dependencies() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a"), repo_json("b")])).await;

    // acme/a declares left-pad 1.0.0; acme/b has no manifest
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.0.0"}))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/b/contents/package.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.0.0")))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let summary = engine.run_sync(true).await.unwrap();

    assert_eq!(summary.repositories_listed, 2);
    assert_eq!(summary.repositories_processed, 2);
    assert_eq!(summary.repositories_failed, 0);
    assert_eq!(summary.dependencies_reconciled, 1);

    let repos = store.repositories().await.unwrap();
    assert_eq!(repos.len(), 2);
    assert_eq!(repos[0].full_name, "acme/a");
    assert_eq!(repos[1].full_name, "acme/b");
    assert_eq!(repos[0].owner, "acme");
    assert_eq!(repos[0].html_url, "https://github.com/acme/a");

    let deps_a = store.dependencies_for(repos[0].id).await.unwrap();
    assert_eq!(deps_a.len(), 1);
    assert_eq!(deps_a[0].name, "left-pad");
    assert_eq!(deps_a[0].current_version, "1.0.0");
    assert_eq!(deps_a[0].latest_version, Some("1.0.0".to_string()));
    assert!(!deps_a[0].outdated);

    // Manifest-less repository contributes zero dependencies
    let deps_b = store.dependencies_for(repos[1].id).await.unwrap();
    assert!(deps_b.is_empty());
}

#[tokio::test]
async fn outdated_flag_set_when_latest_differs() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a")])).await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.0.0"}))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.2.0")))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    engine.run_sync(true).await.unwrap();

    let repos = store.repositories().await.unwrap();
    let deps = store.dependencies_for(repos[0].id).await.unwrap();
    assert_eq!(deps[0].latest_version, Some("1.2.0".to_string()));
    assert!(deps[0].outdated);
}

#[tokio::test]
async fn pass_is_idempotent() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a")])).await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.0.0"}))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.0.0")))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());

    engine.run_sync(true).await.unwrap();
    let repos_after_first = store.repositories().await.unwrap();
    let deps_after_first = store
        .dependencies_for(repos_after_first[0].id)
        .await
        .unwrap();

    engine.run_sync(true).await.unwrap();
    let repos_after_second = store.repositories().await.unwrap();
    let deps_after_second = store
        .dependencies_for(repos_after_second[0].id)
        .await
        .unwrap();

    // No duplicates, same identities, same field values
    assert_eq!(repos_after_second.len(), 1);
    assert_eq!(deps_after_second.len(), 1);
    assert_eq!(repos_after_first[0].id, repos_after_second[0].id);
    assert_eq!(repos_after_first[0].full_name, repos_after_second[0].full_name);
    assert_eq!(deps_after_first[0].id, deps_after_second[0].id);
    assert_eq!(
        deps_after_first[0].current_version,
        deps_after_second[0].current_version
    );
    assert_eq!(
        deps_after_first[0].latest_version,
        deps_after_second[0].latest_version
    );
    assert_eq!(deps_after_first[0].outdated, deps_after_second[0].outdated);

    // Second pass refreshed existing records rather than creating new ones
    let summary = engine.run_sync(true).await.unwrap();
    assert_matches!(
        &summary.outcomes[0],
        RepositoryOutcome::Processed { dependencies, .. } => {
            assert_matches!(
                &dependencies[0],
                DependencyOutcome::Reconciled { action, .. }
                    if *action == depsentry::sync::ReconcileAction::Updated
            );
        }
    );
}

#[tokio::test]
async fn gating_skips_repositories_without_recent_activity() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a")])).await;

    // No commits inside the lookback window
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // A gated repository must trigger no manifest fetch at all
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.0.0"}))),
        )
        .expect(0)
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let summary = engine.run_sync(false).await.unwrap();

    assert_eq!(summary.repositories_skipped, 1);
    assert_eq!(summary.repositories_processed, 0);
    assert_matches!(
        &summary.outcomes[0],
        RepositoryOutcome::Skipped { reason, .. } if *reason == SkipReason::NoRecentActivity
    );

    // Stored state untouched
    assert!(store.repositories().await.unwrap().is_empty());
}

#[tokio::test]
async fn gating_processes_repositories_with_recent_activity() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a")])).await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/a/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commits_json()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.0.0"}))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.0.0")))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let summary = engine.run_sync(false).await.unwrap();

    assert_eq!(summary.repositories_processed, 1);
    assert_eq!(summary.dependencies_reconciled, 1);
    assert_eq!(store.repositories().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_activity_check_soft_skips_repository() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a"), repo_json("b")])).await;

    // acme/a's probe fails; acme/b has fresh commits
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/commits"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/b/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commits_json()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/b/contents/package.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let summary = engine.run_sync(false).await.unwrap();

    // Fail-closed: the repository is skipped, the pass succeeds
    assert_eq!(summary.repositories_skipped, 1);
    assert_eq!(summary.repositories_processed, 1);
    assert_matches!(
        &summary.outcomes[0],
        RepositoryOutcome::Skipped { reason, .. }
            if matches!(reason, SkipReason::ActivityCheckFailed(_))
    );

    let repos = store.repositories().await.unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].full_name, "acme/b");
}

#[tokio::test]
async fn unparseable_manifest_does_not_block_other_repositories() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a"), repo_json("b")])).await;

    // acme/a is processed first and fails to parse; acme/b must still be
    // fully reconciled in the same pass
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(garbled_manifest_json()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/b/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.0.0"}))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.0.0")))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let summary = engine.run_sync(true).await.unwrap();

    assert_eq!(summary.repositories_failed, 1);
    assert_eq!(summary.repositories_processed, 1);
    assert_eq!(summary.dependencies_reconciled, 1);

    // The failed repository's record was still upserted (it precedes the
    // manifest fetch), but it owns no dependencies
    let repos = store.repositories().await.unwrap();
    assert_eq!(repos.len(), 2);
    assert!(store.dependencies_for(repos[0].id).await.unwrap().is_empty());
    assert_eq!(store.dependencies_for(repos[1].id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn registry_failure_skips_only_that_dependency() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a")])).await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(manifest_json(
            json!({"left-pad": "1.0.0", "lodash": "4.17.0"}),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.0.0")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/lodash"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let summary = engine.run_sync(true).await.unwrap();

    assert_eq!(summary.dependencies_reconciled, 1);
    assert_eq!(summary.dependencies_skipped, 1);

    // Only the resolvable dependency was written; no record carries a
    // meaningless outdated flag
    let repos = store.repositories().await.unwrap();
    let deps = store.dependencies_for(repos[0].id).await.unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].name, "left-pad");
}

#[tokio::test]
async fn stale_dependencies_are_retained() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a")])).await;

    // First pass sees two dependencies, second pass only one. The removed
    // dependency stays in the store: history retention, not an oversight.
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(manifest_json(
            json!({"left-pad": "1.0.0", "lodash": "4.17.0"}),
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.1.0"}))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.1.0")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/lodash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("4.17.0")))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());

    engine.run_sync(true).await.unwrap();
    engine.run_sync(true).await.unwrap();

    let repos = store.repositories().await.unwrap();
    let deps = store.dependencies_for(repos[0].id).await.unwrap();

    assert_eq!(deps.len(), 2);
    let left_pad = deps.iter().find(|d| d.name == "left-pad").unwrap();
    let lodash = deps.iter().find(|d| d.name == "lodash").unwrap();

    // left-pad was refreshed by the second pass
    assert_eq!(left_pad.current_version, "1.1.0");
    assert!(!left_pad.outdated);
    // lodash is stale but retained with its last observed state
    assert_eq!(lodash.current_version, "4.17.0");
}

#[tokio::test]
async fn listing_failure_aborts_pass() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let result = engine.run_sync(true).await;

    assert_matches!(result, Err(SyncError::UpstreamUnavailable(_)));
    assert!(store.repositories().await.unwrap().is_empty());
}

#[tokio::test]
async fn non_list_listing_payload_aborts_pass() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "rate limit exceeded"})),
        )
        .mount(&server)
        .await;

    let (engine, _store) = test_engine(&server.uri());
    let result = engine.run_sync(true).await;

    assert_matches!(result, Err(SyncError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn excluded_repositories_are_skipped_before_gating() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("sandbox"), repo_json("a")])).await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.github.exclude_patterns = vec!["sandbox".to_string()];

    let store = std::sync::Arc::new(depsentry::SqliteStore::open_in_memory().unwrap());
    let engine = depsentry::SyncEngine::new(
        config,
        store.clone() as std::sync::Arc<dyn depsentry::Store>,
    )
    .unwrap();

    let summary = engine.run_sync(true).await.unwrap();

    assert_eq!(summary.repositories_skipped, 1);
    assert_matches!(
        &summary.outcomes[0],
        RepositoryOutcome::Skipped { reason, .. } if *reason == SkipReason::Excluded
    );

    let repos = store.repositories().await.unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].full_name, "acme/a");
}

#[tokio::test]
async fn registry_failure_leaves_existing_record_untouched() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a")])).await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(manifest_json(json!({"left-pad": "1.0.0"}))),
        )
        .mount(&server)
        .await;

    // First pass resolves the latest release; the registry is down for the
    // second pass
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registry_json("1.2.0")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/npm/left-pad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());

    engine.run_sync(true).await.unwrap();
    let repos = store.repositories().await.unwrap();
    let before = store.dependencies_for(repos[0].id).await.unwrap();
    assert_eq!(before.len(), 1);
    assert!(before[0].outdated);

    let summary = engine.run_sync(true).await.unwrap();
    assert_eq!(summary.dependencies_reconciled, 0);
    assert_eq!(summary.dependencies_skipped, 1);

    // The record from the first pass survives the outage unchanged: no
    // refreshed versions, no cleared outdated flag, no touched timestamp
    let after = store.dependencies_for(repos[0].id).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[0].current_version, "1.0.0");
    assert_eq!(after[0].latest_version, Some("1.2.0".to_string()));
    assert!(after[0].outdated);
    assert_eq!(after[0].updated_at, before[0].updated_at);
}

#[tokio::test]
async fn malformed_contents_envelope_fails_repository() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([repo_json("a"), repo_json("b")])).await;

    // acme/a's contents fetch succeeds but the payload is not a file
    // envelope; acme/b simply has no manifest
    Mock::given(method("GET"))
        .and(path("/repos/acme/a/contents/package.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "rate limit exceeded"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/b/contents/package.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (engine, store) = test_engine(&server.uri());
    let summary = engine.run_sync(true).await.unwrap();

    // A fetched-but-unreadable manifest is a repository failure, visible in
    // the summary, while a missing manifest stays a normal zero-dependency
    // outcome
    assert_eq!(summary.repositories_failed, 1);
    assert_eq!(summary.repositories_processed, 1);
    assert_matches!(
        &summary.outcomes[0],
        RepositoryOutcome::Failed { full_name, .. } if full_name == "acme/a"
    );

    let repos = store.repositories().await.unwrap();
    assert_eq!(repos.len(), 2);
    assert!(store.dependencies_for(repos[0].id).await.unwrap().is_empty());
}
