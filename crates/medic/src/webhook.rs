//! GitHub webhook payload decoding.
//!
//! GitHub delivers `workflow_run` / `workflow_job` events either as JSON or as
//! a form body whose `payload` field holds the JSON document.

use serde::Deserialize;
use serde_json::Value;

/// Events that can start a triage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    WorkflowRun,
    WorkflowJob,
}

impl WebhookEvent {
    /// Parse the `X-GitHub-Event` header value.
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "workflow_run" => Some(Self::WorkflowRun),
            "workflow_job" => Some(Self::WorkflowJob),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowRun => "workflow_run",
            Self::WorkflowJob => "workflow_job",
        }
    }
}

/// Problems with a delivery's body.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid JSON payload")]
    InvalidJson,

    #[error("No payload found in form data")]
    MissingFormPayload,

    #[error("Invalid form data")]
    InvalidForm,

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("No payload data")]
    Empty,

    #[error("Could not extract repository information")]
    MissingRepository,
}

/// Decode the body according to its content type.
///
/// # Errors
///
/// Returns a [`PayloadError`] describing why the body is unusable.
pub fn decode_payload(content_type: &str, body: &[u8]) -> Result<Value, PayloadError> {
    let payload: Value = if content_type.contains("application/json") {
        serde_json::from_slice(body).map_err(|_| PayloadError::InvalidJson)?
    } else if content_type.contains("application/x-www-form-urlencoded") {
        let raw = url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "payload")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or(PayloadError::MissingFormPayload)?;
        serde_json::from_str(&raw).map_err(|_| PayloadError::InvalidForm)?
    } else {
        return Err(PayloadError::UnsupportedContentType(content_type.to_string()));
    };

    match &payload {
        Value::Null => Err(PayloadError::Empty),
        Value::Object(map) if map.is_empty() => Err(PayloadError::Empty),
        _ => Ok(payload),
    }
}

#[derive(Debug, Default, Deserialize)]
struct Owner {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Default, Deserialize)]
struct PayloadRepository {
    #[serde(default)]
    name: String,
    #[serde(default)]
    owner: Owner,
}

#[derive(Debug, Default, Deserialize)]
struct Execution {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delivery {
    #[serde(default)]
    repository: PayloadRepository,
    #[serde(default)]
    workflow_run: Option<Execution>,
    #[serde(default)]
    workflow_job: Option<Execution>,
}

/// What the server needs from a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSummary {
    pub owner: String,
    pub name: String,
    /// The run or job reached `completed`.
    pub completed: bool,
    pub conclusion: Option<String>,
}

/// Extract repository identity and completion state for `event`.
///
/// # Errors
///
/// Returns [`PayloadError::MissingRepository`] when the owner or name is absent.
pub fn summarize(event: WebhookEvent, payload: Value) -> Result<WebhookSummary, PayloadError> {
    let delivery: Delivery =
        serde_json::from_value(payload).map_err(|_| PayloadError::MissingRepository)?;

    let Delivery {
        repository,
        workflow_run,
        workflow_job,
    } = delivery;
    if repository.owner.login.is_empty() || repository.name.is_empty() {
        return Err(PayloadError::MissingRepository);
    }

    let execution = match event {
        WebhookEvent::WorkflowRun => workflow_run,
        WebhookEvent::WorkflowJob => workflow_job,
    }
    .unwrap_or_default();

    Ok(WebhookSummary {
        owner: repository.owner.login,
        name: repository.name,
        completed: execution.status.as_deref() == Some("completed"),
        conclusion: execution.conclusion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_payload(status: &str) -> Value {
        json!({
            "action": "completed",
            "repository": {"name": "hello", "owner": {"login": "octo"}},
            "workflow_run": {"status": status, "conclusion": "failure"}
        })
    }

    #[test]
    fn test_event_header() {
        assert_eq!(WebhookEvent::from_header("workflow_run"), Some(WebhookEvent::WorkflowRun));
        assert_eq!(WebhookEvent::from_header("workflow_job"), Some(WebhookEvent::WorkflowJob));
        assert_eq!(WebhookEvent::from_header("push"), None);
    }

    #[test]
    fn test_decode_json() {
        let body = run_payload("completed").to_string();
        let payload = decode_payload("application/json; charset=utf-8", body.as_bytes()).expect("json");
        assert_eq!(payload["repository"]["name"], "hello");
    }

    #[test]
    fn test_decode_form() {
        let encoded: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("payload", &run_payload("completed").to_string())
            .finish();
        let payload =
            decode_payload("application/x-www-form-urlencoded", encoded.as_bytes()).expect("form");
        assert_eq!(payload["repository"]["owner"]["login"], "octo");

        assert_eq!(
            decode_payload("application/x-www-form-urlencoded", b"other=1"),
            Err(PayloadError::MissingFormPayload)
        );
        assert_eq!(
            decode_payload("application/x-www-form-urlencoded", b"payload=%7Bnope"),
            Err(PayloadError::InvalidForm)
        );
    }

    #[test]
    fn test_decode_rejections() {
        assert_eq!(
            decode_payload("application/json", b"{not json"),
            Err(PayloadError::InvalidJson)
        );
        assert_eq!(decode_payload("application/json", b"{}"), Err(PayloadError::Empty));
        assert_eq!(
            decode_payload("text/plain", b"hi"),
            Err(PayloadError::UnsupportedContentType("text/plain".to_string()))
        );
    }

    #[test]
    fn test_summarize_run_and_job() {
        let summary = summarize(WebhookEvent::WorkflowRun, run_payload("completed")).expect("summary");
        assert_eq!(summary.owner, "octo");
        assert_eq!(summary.name, "hello");
        assert!(summary.completed);
        assert_eq!(summary.conclusion.as_deref(), Some("failure"));

        let queued = summarize(WebhookEvent::WorkflowRun, run_payload("queued")).expect("summary");
        assert!(!queued.completed);

        // workflow_job events look at the job object, not the run
        let job = summarize(WebhookEvent::WorkflowJob, run_payload("completed")).expect("summary");
        assert!(!job.completed);
    }

    #[test]
    fn test_summarize_missing_repository() {
        let payload = json!({"workflow_run": {"status": "completed"}});
        assert_eq!(
            summarize(WebhookEvent::WorkflowRun, payload),
            Err(PayloadError::MissingRepository)
        );
    }
}
