use std::path::Path;
use std::sync::Arc;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use serde_json::json;
use sqlx::sqlite::SqlitePool;

use coderun::database as db;
use coderun::queue::UsageQueue;
use coderun::reporter::{NO_OUTPUT_PLACEHOLDER, Reporter, UsageRecord};
use coderun::routes::{
    get_executions_handler, health_handler, json_error_handler, post_execute_handler,
};
use coderun::sandbox::{
    CommandTemplate, Pipeline, ProcessRunner, Registry, SourceNaming, ToolchainDescriptor,
};

fn test_pipeline(root: &Path) -> Arc<Pipeline> {
    let registry = Registry::new(vec![ToolchainDescriptor {
        name: "shell".to_string(),
        aliases: vec!["sh".to_string()],
        extension: "sh".to_string(),
        naming: SourceNaming::default(),
        compile: None,
        run: CommandTemplate::new("sh", &["%INPUT%"]),
    }]);
    Arc::new(Pipeline::new(
        Arc::new(registry),
        root.to_path_buf(),
        ProcessRunner::default(),
    ))
}

// Each test gets its own database file inside its own temp dir
async fn create_test_db(dir: &Path) -> Arc<SqlitePool> {
    Arc::new(db::init_db(dir.join("usage.sqlite3")).await.unwrap())
}

macro_rules! init_app {
    ($pipeline:expr, $queue:expr, $pool:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($pipeline))
                .app_data(web::Data::new(Reporter::new($queue)))
                .app_data(web::Data::from($pool))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(post_execute_handler)
                .service(get_executions_handler)
                .service(health_handler),
        )
        .await
    };
}

#[actix_web::test]
async fn test_execute_success() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let queue = Arc::new(UsageQueue::new());
    let app = init_app!(
        test_pipeline(root.path()),
        queue.clone(),
        create_test_db(dir.path()).await
    );

    let req = test::TestRequest::post()
        .uri("/api/execute")
        .insert_header(("X-User-Id", "uid-123"))
        .set_json(json!({ "code": "echo hi", "language": "Shell" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body.clone(),
        expected: json!({
            "output": "hi\n",
            "error": null,
            "language": "shell",
            "success": true
        })
    );
    assert!(body["executionTimeSeconds"].as_f64().unwrap() >= 0.0);

    let records = queue.drain();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].caller, "uid-123");
    assert_eq!(records[0].code_excerpt, "echo hi");
    assert!(records[0].success);
}

#[actix_web::test]
async fn test_execute_with_input_and_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let queue = Arc::new(UsageQueue::new());
    let app = init_app!(
        test_pipeline(root.path()),
        queue.clone(),
        create_test_db(dir.path()).await
    );

    let req = test::TestRequest::post()
        .uri("/api/execute")
        .set_json(json!({ "code": "read x", "language": "sh", "input": "ignored\n" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["output"], NO_OUTPUT_PLACEHOLDER);
    assert_eq!(queue.drain()[0].caller, "anonymous");
}

#[actix_web::test]
async fn test_execute_unsupported_language() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let queue = Arc::new(UsageQueue::new());
    let app = init_app!(
        test_pipeline(root.path()),
        queue.clone(),
        create_test_db(dir.path()).await
    );

    let req = test::TestRequest::post()
        .uri("/api/execute")
        .set_json(json!({ "code": "DISPLAY 'HI'.", "language": "COBOL" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body,
        expected: json!({
            "success": false,
            "output": "",
            "error": "Unsupported language: cobol",
            "language": "cobol",
            "executionTimeSeconds": 0.0
        })
    );
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    assert_eq!(queue.drain()[0].outcome, "unsupported_language");
}

#[actix_web::test]
async fn test_execute_runtime_failure() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let app = init_app!(
        test_pipeline(root.path()),
        Arc::new(UsageQueue::new()),
        create_test_db(dir.path()).await
    );

    let req = test::TestRequest::post()
        .uri("/api/execute")
        .set_json(json!({ "code": "echo partial; echo oops >&2; exit 1", "language": "shell" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_json_include!(
        actual: body,
        expected: json!({ "success": false, "output": "partial\n", "error": "oops\n" })
    );
}

#[actix_web::test]
async fn test_execute_silent_failure_has_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let app = init_app!(
        test_pipeline(root.path()),
        Arc::new(UsageQueue::new()),
        create_test_db(dir.path()).await
    );

    let req = test::TestRequest::post()
        .uri("/api/execute")
        .set_json(json!({ "code": "exit 4", "language": "shell" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_ne!(body["output"], NO_OUTPUT_PLACEHOLDER);
    assert_json_include!(
        actual: body,
        expected: json!({
            "success": false,
            "output": "",
            "error": "Process exited with code 4"
        })
    );
}

#[actix_web::test]
async fn test_execute_invalid_body() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let app = init_app!(
        test_pipeline(root.path()),
        Arc::new(UsageQueue::new()),
        create_test_db(dir.path()).await
    );

    let req = test::TestRequest::post()
        .uri("/api/execute")
        .set_json(json!({ "language": "shell" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "reason": "ERR_INVALID_ARGUMENT", "code": 1 }));
}

#[actix_web::test]
async fn test_health_lists_languages() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let app = init_app!(
        test_pipeline(root.path()),
        Arc::new(UsageQueue::new()),
        create_test_db(dir.path()).await
    );

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body, json!({ "status": "healthy", "languages": ["shell"] }));
}

#[actix_web::test]
async fn test_get_executions_filters_by_caller() {
    let dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let pool = create_test_db(dir.path()).await;

    for (caller, success) in [("alice", true), ("bob", false), ("alice", false)] {
        let record = UsageRecord {
            caller: caller.to_string(),
            language: "shell".to_string(),
            code_excerpt: "echo".to_string(),
            success,
            outcome: if success { "succeeded" } else { "runtime_failed" }.to_string(),
            execution_time_seconds: 0.01,
            created_time: coderun::create_timestamp(),
        };
        db::save_usage(&record, pool.clone()).await.unwrap();
    }

    let app = init_app!(
        test_pipeline(root.path()),
        Arc::new(UsageQueue::new()),
        pool.clone()
    );

    let req = test::TestRequest::get()
        .uri("/api/executions?caller=alice&success=false")
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_json_include!(
        actual: records[0].clone(),
        expected: json!({ "caller": "alice", "success": false, "outcome": "runtime_failed" })
    );
}
