use std::sync::Arc;
use std::time::Duration;

use loglens_ai::FallbackExplanationProvider;
use loglens_api::app::{build_app_with, services::AppServices};
use loglens_infra::PipelineConfig;
use reqwest::StatusCode;
use serde_json::Value;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory services, bound to an ephemeral port.
        let config = PipelineConfig {
            poll_interval: Duration::from_millis(10),
            ..PipelineConfig::default()
        }
        .with_throttle(Duration::ZERO);
        let services = AppServices::in_memory(config, Arc::new(FallbackExplanationProvider));
        let app = build_app_with(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn submit(client: &reqwest::Client, base_url: &str, filename: &str, body: &str) -> Value {
    let res = client
        .post(format!("{}/v2/process?filename={}", base_url, filename))
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    res.json().await.unwrap()
}

async fn status_eventually(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    wanted: &str,
) -> Value {
    // Processing runs in the background; poll briefly until it settles.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/v2/status/{}", base_url, job_id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {job_id} did not reach {wanted} within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn process_then_status_results_and_reports() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let accepted = submit(
        &client,
        &server.base_url,
        "app.log",
        "INFO boot\nERROR failed unauthorized access\nINFO ready",
    )
    .await;
    assert_eq!(accepted["status"], "processing");
    assert_eq!(accepted["total_chunks"], 1);
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    let status = status_eventually(&client, &server.base_url, &job_id, "completed").await;
    assert_eq!(status["chunks_processed"], 1);
    assert_eq!(status["anomalies_found"], 1);
    assert_eq!(status["progress"], 1.0);
    assert!(status["error_message"].is_null());

    let results: Value = client
        .get(format!("{}/v2/results/{}", server.base_url, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let anomalies = results[0]["anomalies"].as_array().unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0]["log_entry"], "ERROR failed unauthorized access");
    assert!(!anomalies[0]["explanation"].as_str().unwrap().is_empty());

    let reports: Value = client
        .get(format!("{}/v2/reports?limit=5", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reports.as_array().unwrap().len(), 1);
    assert_eq!(reports[0]["filename"], "app.log");
    assert_eq!(reports[0]["total_lines"], 3);
}

#[tokio::test]
async fn stream_of_finished_job_replays_state_and_closes() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let accepted = submit(&client, &server.base_url, "app.log", "ERROR timeout talking to db").await;
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    status_eventually(&client, &server.base_url, &job_id, "completed").await;

    let res = client
        .get(format!("{}/v2/results/{}/stream", server.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = tokio::time::timeout(Duration::from_secs(5), res.text())
        .await
        .expect("stream of a finished job must close")
        .unwrap();
    assert!(body.contains("event: state"));
    assert!(body.contains("\"completed\""));
}

#[tokio::test]
async fn rejects_bad_input_and_unknown_jobs() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/v2/process?filename=empty.log", server.base_url))
        .body("   \n")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .post(format!("{}/v2/process", server.base_url))
        .body("INFO no filename")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/v2/status/not-a-uuid", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/v2/status/{}", server.base_url, uuid::Uuid::now_v7()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn completed_job_cannot_be_cancelled() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let accepted = submit(&client, &server.base_url, "app.log", "INFO ok").await;
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    status_eventually(&client, &server.base_url, &job_id, "completed").await;

    let res = client
        .post(format!("{}/v2/cancel/{}", server.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_state");

    let res = client
        .post(format!("{}/v2/resume/{}", server.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}
