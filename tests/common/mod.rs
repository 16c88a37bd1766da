/// Common test fixtures for sync integration tests
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;

use depsentry::{Config, SqliteStore, Store, SyncEngine};

/// Config pointing both upstream APIs at a mock server
pub fn test_config(api_url: &str) -> Config {
    let mut config = Config::default();
    config.github.api_url = api_url.to_string();
    config.github.org = "acme".to_string();
    config.registry.api_url = api_url.to_string();
    config.sync.timeout = 5;
    config
}

/// Engine over an in-memory store; returns the store for assertions
pub fn test_engine(api_url: &str) -> (SyncEngine, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().expect("in-memory store"));
    let engine =
        SyncEngine::new(test_config(api_url), store.clone() as Arc<dyn Store>).expect("engine");
    (engine, store)
}

/// Listing entry for one repository owned by acme
pub fn repo_json(name: &str) -> Value {
    json!({
        "name": name,
        "full_name": format!("acme/{}", name),
        "html_url": format!("https://github.com/acme/{}", name),
        "description": format!("{} repository", name),
        "language": "JavaScript",
        "owner": { "login": "acme" }
    })
}

/// Contents-endpoint payload for a manifest declaring the given dependencies
pub fn manifest_json(dependencies: Value) -> Value {
    let manifest = json!({
        "name": "fixture",
        "version": "0.0.1",
        "dependencies": dependencies
    });
    json!({
        "content": BASE64.encode(manifest.to_string().as_bytes()),
        "encoding": "base64"
    })
}

/// Contents-endpoint payload that is not valid base64
pub fn garbled_manifest_json() -> Value {
    json!({
        "content": "!!! not base64 !!!",
        "encoding": "base64"
    })
}

/// Registry payload reporting a latest release
pub fn registry_json(latest: &str) -> Value {
    json!({
        "name": "fixture",
        "platform": "NPM",
        "latest_release_number": latest
    })
}

/// A single-commit response (activity present)
pub fn commits_json() -> Value {
    json!([{ "sha": "abc123", "commit": { "message": "update" } }])
}
