mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::time::Duration;

use common::stub::{Recorded, StubServer, closed_url, json, status};
use registry_replicator::ReplicationError;
use registry_replicator::job::{JobDescriptor, JobKind, JobServiceClient, TaskRunner};
use registry_replicator::model::Resource;

const TIMEOUT: Duration = Duration::from_secs(5);

fn transfer_job() -> JobDescriptor {
    let src = Resource::image("library/nginx", &["1.25"]);
    let dst = Resource::image("mirror/nginx", &["1.25"]);
    JobDescriptor::for_resources(JobKind::Transfer, &src, &dst, "http://core/service/notifications/tasks/1").unwrap()
}

fn jobservice(req: &Recorded) -> axum::response::Response {
    match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/api/v1/jobs") => json(
            StatusCode::ACCEPTED,
            json!({"job": {"id": "a1b2c3", "name": "IMAGE_TRANSFER", "status": "Pending"}}),
        ),
        ("POST", "/api/v1/jobs/a1b2c3") => status(StatusCode::NO_CONTENT),
        _ => status(StatusCode::NOT_FOUND),
    }
}

#[tokio::test]
async fn test_submit_posts_job_with_secret() {
    let server = StubServer::start(jobservice).await;
    let client = JobServiceClient::new(&format!("{}/", server.url), "s3cret", TIMEOUT).unwrap();

    let job_id = client.submit(&transfer_job()).await.unwrap();
    assert_eq!(job_id, "a1b2c3");

    let requests = server.requests_to(Method::POST, "/api/v1/jobs");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("authorization"), Some("Harbor-Secret s3cret"));
    let body = requests[0].json_body();
    assert_eq!(body["job"]["name"], json!("IMAGE_TRANSFER"));
    assert_eq!(body["job"]["metadata"]["kind"], json!("Generic"));
    assert_eq!(body["job"]["status_hook"], json!("http://core/service/notifications/tasks/1"));
    assert!(body["job"]["parameters"]["dst_resource"].as_str().unwrap().contains("mirror/nginx"));
}

#[tokio::test]
async fn test_cancel_requests_stop() {
    let server = StubServer::start(jobservice).await;
    let client = JobServiceClient::new(&server.url, "", TIMEOUT).unwrap();

    client.cancel("a1b2c3").await.unwrap();
    let requests = server.requests_to(Method::POST, "/api/v1/jobs/a1b2c3");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].json_body(), json!({"action": "stop"}));
    assert_eq!(requests[0].header("authorization"), None);

    let err = client.cancel("unknown").await.unwrap_err();
    assert!(matches!(err, ReplicationError::Submission(_)));
}

#[tokio::test]
async fn test_submit_failures_are_submission_errors() {
    let server = StubServer::start(|_: &Recorded| status(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let client = JobServiceClient::new(&server.url, "s3cret", TIMEOUT).unwrap();
    let err = client.submit(&transfer_job()).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Submission(_)));

    let server = StubServer::start(|_: &Recorded| json(StatusCode::OK, json!({"unexpected": true}))).await;
    let client = JobServiceClient::new(&server.url, "s3cret", TIMEOUT).unwrap();
    let err = client.submit(&transfer_job()).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Submission(_)));

    let client = JobServiceClient::new(&closed_url().await, "s3cret", TIMEOUT).unwrap();
    let err = client.submit(&transfer_job()).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Submission(_)));
}
