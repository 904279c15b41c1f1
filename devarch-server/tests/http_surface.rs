use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use devarch_core::config::Settings;
use devarch_core::error::Result;
use devarch_core::runtime::{
    ComposeOptions, ContainerRuntime, ContainerState, ContainerStats, ExecOutput, NetworkInfo,
    RuntimeKind,
};
use devarch_core::store::{Store, TemplateSpec};
use devarch_core::types::EffectiveConfig;
use devarch_server::{routes, AppState};

/// Just enough engine for handler tests: everything exists nowhere and
/// every operation succeeds.
struct NullRuntime;

#[async_trait]
impl ContainerRuntime for NullRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
    async fn inspect(&self, _name: &str) -> Result<Option<ContainerState>> {
        Ok(None)
    }
    async fn create(&self, _config: &EffectiveConfig, _network: &str) -> Result<()> {
        Ok(())
    }
    async fn start(&self, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn stop(&self, _name: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }
    async fn remove(&self, _name: &str, _force: bool) -> Result<()> {
        Ok(())
    }
    async fn exec(&self, _name: &str, _cmd: &[String]) -> Result<ExecOutput> {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
    async fn logs(&self, _name: &str, _tail: usize) -> Result<String> {
        Ok(String::new())
    }
    async fn stats(&self, _name: &str) -> Result<ContainerStats> {
        Ok(ContainerStats {
            cpu_percent: 0.0,
            memory_bytes: 0,
            memory_limit_bytes: 0,
            rx_bytes: 0,
            tx_bytes: 0,
        })
    }
    async fn network_create(&self, _name: &str, _labels: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }
    async fn network_inspect(&self, _name: &str) -> Result<Option<NetworkInfo>> {
        Ok(None)
    }
    async fn network_list(&self) -> Result<Vec<NetworkInfo>> {
        Ok(vec![])
    }
    async fn network_remove(&self, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn compose_up(&self, _opts: &ComposeOptions) -> Result<()> {
        Ok(())
    }
    async fn compose_down(&self, _opts: &ComposeOptions) -> Result<()> {
        Ok(())
    }
}

async fn test_state(dir: &std::path::Path) -> AppState {
    let mut settings = Settings::default();
    settings.compose_root = dir.join("compose").to_string_lossy().into_owned();
    settings.database_path = dir.join("devarch.db").to_string_lossy().into_owned();

    let store = Store::new(&settings.database_path).await.unwrap();
    store
        .seed_template(
            "php",
            TemplateSpec {
                image: "php:8.3-fpm".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    AppState::new(store, Arc::new(NullRuntime), settings)
}

#[tokio::test]
async fn stack_crud_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let api = routes(test_state(dir.path()).await);

    let res = warp::test::request()
        .method("POST")
        .path("/stacks")
        .json(&serde_json::json!({"name": "a", "description": "demo"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 201);

    let res = warp::test::request().path("/stacks/a").reply(&api).await;
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["network"], "devarch-a-net");

    let res = warp::test::request().path("/stacks/nope").reply(&api).await;
    assert_eq!(res.status(), 404);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["kind"], "not-found");
}

#[tokio::test]
async fn validation_errors_carry_field_and_suggestion() {
    let dir = tempfile::tempdir().unwrap();
    let api = routes(test_state(dir.path()).await);

    let res = warp::test::request()
        .method("POST")
        .path("/stacks")
        .json(&serde_json::json!({"name": "Bad Name"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["field"], "stack");
    assert_eq!(body["suggestion"], "bad-name");
}

#[tokio::test]
async fn override_sets_replace_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let api = routes(test_state(dir.path()).await);

    warp::test::request()
        .method("POST")
        .path("/stacks")
        .json(&serde_json::json!({"name": "a"}))
        .reply(&api)
        .await;
    let res = warp::test::request()
        .method("POST")
        .path("/stacks/a/instances")
        .json(&serde_json::json!({"instance": "web", "template": "php"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 201);

    let res = warp::test::request()
        .method("PUT")
        .path("/stacks/a/instances/web/ports")
        .json(&serde_json::json!([{"host": 8080, "container": 80}]))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);

    let res = warp::test::request()
        .method("PUT")
        .path("/stacks/a/instances/web/scalars")
        .json(&serde_json::json!({"image": "php:8.4-fpm", "user": "www-data"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);

    let res = warp::test::request()
        .path("/stacks/a/instances/web/effective")
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["ports"][0]["host"], 8080);
    assert_eq!(body["image"], "php:8.4-fpm");
    assert_eq!(body["user"], "www-data");
    assert_eq!(body["labels"]["devarch.stack_id"], "a");

    let res = warp::test::request()
        .method("DELETE")
        .path("/stacks/a/instances/web/scalars")
        .reply(&api)
        .await;
    assert_eq!(res.status(), 204);

    let res = warp::test::request()
        .path("/stacks/a/instances/web/effective")
        .reply(&api)
        .await;
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["image"], "php:8.3-fpm");

    let res = warp::test::request()
        .method("DELETE")
        .path("/stacks/a/instances/web/ports")
        .reply(&api)
        .await;
    assert_eq!(res.status(), 204);

    let res = warp::test::request()
        .method("PUT")
        .path("/stacks/a/instances/web/nonsense")
        .json(&serde_json::json!([]))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn reserved_labels_rejected_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let api = routes(test_state(dir.path()).await);

    warp::test::request()
        .method("POST")
        .path("/stacks")
        .json(&serde_json::json!({"name": "a"}))
        .reply(&api)
        .await;
    warp::test::request()
        .method("POST")
        .path("/stacks/a/instances")
        .json(&serde_json::json!({"instance": "web", "template": "php"}))
        .reply(&api)
        .await;

    let res = warp::test::request()
        .method("PUT")
        .path("/stacks/a/instances/web/labels")
        .json(&serde_json::json!({"devarch.stack_id": "forged"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn plan_then_stale_apply_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let api = routes(test_state(dir.path()).await);

    warp::test::request()
        .method("POST")
        .path("/stacks")
        .json(&serde_json::json!({"name": "x"}))
        .reply(&api)
        .await;
    warp::test::request()
        .method("POST")
        .path("/stacks/x/instances")
        .json(&serde_json::json!({"instance": "api", "template": "php"}))
        .reply(&api)
        .await;

    let res = warp::test::request()
        .method("POST")
        .path("/stacks/x/plan")
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);
    let plan: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert!(plan["fingerprint"].as_str().unwrap().len() == 64);

    // Mutate, then apply the stale fingerprint.
    warp::test::request()
        .method("PUT")
        .path("/stacks/x/instances/api/env")
        .json(&serde_json::json!([{"key": "K", "value": "v", "secret": false}]))
        .reply(&api)
        .await;

    let res = warp::test::request()
        .method("POST")
        .path("/stacks/x/apply")
        .json(&serde_json::json!({"fingerprint": plan["fingerprint"]}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 409);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["kind"], "plan-stale");
}

#[tokio::test]
async fn export_and_import_round_trip_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let api = routes(test_state(dir.path()).await);

    warp::test::request()
        .method("POST")
        .path("/stacks")
        .json(&serde_json::json!({"name": "s", "description": "demo"}))
        .reply(&api)
        .await;
    warp::test::request()
        .method("POST")
        .path("/stacks/s/instances")
        .json(&serde_json::json!({"instance": "web", "template": "php"}))
        .reply(&api)
        .await;

    let res = warp::test::request().path("/stacks/s/export").reply(&api).await;
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    let manifest = body["manifest"].as_str().unwrap().to_string();
    assert!(manifest.contains("template: php"));
    assert!(body["lockfile"].as_str().unwrap().contains("instances: {}"));

    let res = warp::test::request()
        .method("POST")
        .path("/stacks/import")
        .json(&serde_json::json!({"manifest": manifest}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);
    let report: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(report["created_stack"], false);
    assert_eq!(report["updated_instances"][0], "web");
}

#[tokio::test]
async fn healthz_reports_engine_and_store() {
    let dir = tempfile::tempdir().unwrap();
    let api = routes(test_state(dir.path()).await);

    let res = warp::test::request().path("/healthz").reply(&api).await;
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["engine"], "docker");
}
