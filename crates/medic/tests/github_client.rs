//! GitHub REST client against a mock server.

use medic::github::{GitHubClient, GitHubError, NewIssue, PutFile, RepoRef, RunQuery, WorkflowHost};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repo() -> RepoRef {
    RepoRef::new("octo", "hello")
}

async fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::with_base_url(&server.uri(), "ghp_test").expect("client")
}

#[tokio::test]
async fn test_list_workflow_runs_with_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/actions/runs"))
        .and(query_param("per_page", "10"))
        .and(query_param("created", ">=2026-03-01T10:00:00Z"))
        .and(header("authorization", "Bearer ghp_test"))
        .and(header("x-github-api-version", "2022-11-28"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "workflow_runs": [{
                "id": 7,
                "name": "CI",
                "status": "completed",
                "conclusion": "failure",
                "created_at": "2026-03-01T11:00:00Z",
                "path": ".github/workflows/ci.yml"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runs = client(&server)
        .await
        .list_workflow_runs(
            &repo(),
            RunQuery {
                per_page: 10,
                created_since: Some("2026-03-01T10:00:00Z".parse().expect("timestamp")),
            },
        )
        .await
        .expect("runs");

    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, 7);
    assert!(runs[0].concluded("failure"));
    assert_eq!(runs[0].path.as_deref(), Some(".github/workflows/ci.yml"));
}

#[tokio::test]
async fn test_api_error_carries_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/actions/runs/9/jobs"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .list_run_jobs(&repo(), 9)
        .await
        .expect_err("unauthorized");

    match err {
        GitHubError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Bad credentials");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_fetch_job_logs_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/actions/jobs/71/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("line 1\nError: boom\n"))
        .mount(&server)
        .await;

    let logs = client(&server)
        .await
        .fetch_job_logs(&repo(), 71)
        .await
        .expect("logs");
    assert_eq!(logs, "line 1\nError: boom\n");
}

#[tokio::test]
async fn test_get_file_decodes_and_handles_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/contents/.github/workflows/ci.yml"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "file",
            "path": ".github/workflows/ci.yml",
            "sha": "abc123",
            "encoding": "base64",
            "content": "bmFtZTogQ0kK\nb246IHB1c2gK\n"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/contents/.github/workflows/gone.yml"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&server)
        .await;

    let client = client(&server).await;
    let file = client
        .get_file(&repo(), ".github/workflows/ci.yml")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(file.sha, "abc123");
    assert_eq!(file.content, "name: CI\non: push\n");

    let missing = client
        .get_file(&repo(), ".github/workflows/gone.yml")
        .await
        .expect("get");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_list_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/contents/.github/workflows"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "ci.yml", "path": ".github/workflows/ci.yml", "type": "file", "sha": "a"},
            {"name": "shared", "path": ".github/workflows/shared", "type": "dir", "sha": "b"}
        ])))
        .mount(&server)
        .await;

    let entries = client(&server)
        .await
        .list_directory(&repo(), ".github/workflows")
        .await
        .expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].kind, "dir");
}

#[tokio::test]
async fn test_put_file_sends_sha_and_base64() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/repos/octo/hello/contents/.github/workflows/ci.yml"))
        .and(body_partial_json(json!({
            "message": "Fix workflow failure: YAML syntax",
            "content": "bmFtZTogQ0kK",
            "sha": "abc123"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": {"sha": "newblob"},
            "commit": {"sha": "deadbeef"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sha = client(&server)
        .await
        .put_file(
            &repo(),
            PutFile {
                path: ".github/workflows/ci.yml",
                message: "Fix workflow failure: YAML syntax",
                content: "name: CI\n",
                sha: Some("abc123"),
            },
        )
        .await
        .expect("put");
    assert_eq!(sha, "deadbeef");
}

#[tokio::test]
async fn test_create_issue_returns_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/hello/issues"))
        .and(body_partial_json(json!({
            "title": "Workflow Failure: Build failure",
            "labels": ["ci-failure"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "number": 12,
            "html_url": "https://github.com/octo/hello/issues/12"
        })))
        .mount(&server)
        .await;

    let labels = vec!["ci-failure".to_string()];
    let url = client(&server)
        .await
        .create_issue(
            &repo(),
            NewIssue {
                title: "Workflow Failure: Build failure",
                body: "body",
                labels: &labels,
            },
        )
        .await
        .expect("issue");
    assert_eq!(url, "https://github.com/octo/hello/issues/12");
}
