mod common;

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use common::{TestServer, training_table};

async fn get_json(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let res = client.get(url).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

async fn upload(client: &reqwest::Client, base_url: &str, bytes: Vec<u8>) -> String {
    let (status, ticket) = get_json(client, format!("{}/upload", base_url)).await;
    assert_eq!(status, StatusCode::OK);

    let res = client
        .put(ticket["url"].as_str().unwrap())
        .body(bytes)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    ticket["id"].as_str().unwrap().to_string()
}

async fn status_eventually(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    wanted: &str,
) -> Value {
    for _ in 0..500 {
        let (status, body) = get_json(client, format!("{}/status?id={}", base_url, id)).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {wanted}");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn(0).await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn upload_issues_a_put_url_for_the_dataset() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let (status, ticket) = get_json(&client, format!("{}/upload", srv.base_url)).await;
    assert_eq!(status, StatusCode::OK);
    let id = ticket["id"].as_str().unwrap();
    let url = ticket["url"].as_str().unwrap();
    assert!(url.starts_with(&format!("{}/blobs/datasets/{}?token=", srv.base_url, id)));

    let res = client.put(url).body("a,b\n1,2\n").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let stored = srv
        .services
        .blobs
        .read(&mlq_core::BlobKey::new(mlq_core::Bucket::Datasets, id))
        .unwrap();
    assert_eq!(stored, b"a,b\n1,2\n");

    // A PUT grant does not allow reading.
    let res = client.get(url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn blob_proxy_rejects_bad_tokens_and_paths() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = client
        .put(format!("{}/blobs/datasets/abc", srv.base_url))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(format!("{}/blobs/datasets/abc?token=made-up", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");

    let res = client
        .get(format!("{}/blobs/secrets/abc?token=made-up", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_and_malformed_parameters_are_bad_requests() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = client.post(format!("{}/fit", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_param");

    let res = client
        .post(format!("{}/predict?dataset_id={}", srv.base_url, mlq_core::DatasetId::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_param");
    assert!(body["message"].as_str().unwrap().contains("model_id"));

    let res = client
        .post(format!("{}/fit?id=not-a-dataset", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_param");

    let (status, body) = get_json(&client, format!("{}/status", srv.base_url)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_param");
}

#[tokio::test]
async fn unknown_job_ids_are_bad_requests() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    for id in [mlq_core::JobId::new().to_string(), "garbage".to_string()] {
        let (status, body) = get_json(&client, format!("{}/status?id={}", srv.base_url, id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "not_found");

        let (status, _) = get_json(&client, format!("{}/result?id={}", srv.base_url, id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn queued_job_reports_status_but_no_result() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let dataset_id = upload(&client, &srv.base_url, training_table().to_bytes().unwrap()).await;
    let res = client
        .post(format!("{}/fit?id={}", srv.base_url, dataset_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created: Value = res.json().await.unwrap();
    let job_id = created["id"].as_str().unwrap().to_string();

    let (status, body) = get_json(&client, format!("{}/status?id={}", srv.base_url, job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert!(body["enqueued_at"].as_f64().unwrap() > 0.0);
    assert!(body["started_at"].is_null());
    assert!(body["ended_at"].is_null());

    let (status, body) = get_json(&client, format!("{}/result?id={}", srv.base_url, job_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn fit_runs_to_completion_over_http() {
    let srv = TestServer::spawn(2).await;
    let client = reqwest::Client::new();

    let dataset_id = upload(&client, &srv.base_url, training_table().to_bytes().unwrap()).await;
    let res = client
        .post(format!("{}/fit?id={}", srv.base_url, dataset_id))
        .send()
        .await
        .unwrap();
    let created: Value = res.json().await.unwrap();
    let job_id = created["id"].as_str().unwrap().to_string();

    let body = status_eventually(&client, &srv.base_url, &job_id, "finished").await;
    let started_at = body["started_at"].as_f64().unwrap();
    let ended_at = body["ended_at"].as_f64().unwrap();
    assert!(body["enqueued_at"].as_f64().unwrap() <= started_at);
    assert!(started_at <= ended_at);

    let (status, body) = get_json(&client, format!("{}/result?id={}", srv.base_url, job_id)).await;
    assert_eq!(status, StatusCode::OK);
    let url = body["url"].as_str().unwrap();
    assert!(url.contains(&format!("/blobs/models/{}", job_id)));

    let res = client.get(url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!res.bytes().await.unwrap().is_empty());
}
