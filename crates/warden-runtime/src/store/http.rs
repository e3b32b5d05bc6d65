//! JSON REST gateway to the remote guardrail service.
//!
//! ## Security
//!
//! The API key is held in an [`ApiCredential`] and only exposed when the
//! `Authorization` header is set.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use warden_core::{PolicyRequest, PolicyResource, PolicySummary};

use super::secrets::ApiCredential;
use super::{InvokeRequest, InvokeResponse, PolicyBinding, PolicyStore, StoreError};
use crate::config::StoreConfig;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "WARDEN_API_KEY";

const GUARDRAIL_ID_HEADER: &str = "x-amzn-bedrock-guardrailidentifier";
const GUARDRAIL_VERSION_HEADER: &str = "x-amzn-bedrock-guardrailversion";
const INTERVENTION_FIELD: &str = "amazon-bedrock-guardrailAction";
const INTERVENED: &str = "INTERVENED";
const INTERVENTION_ERROR_TYPE: &str = "guardrail_intervened";

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    guardrails: Vec<PolicySummary>,

    #[serde(default)]
    next_token: Option<String>,
}

/// Which failures a request may be sent again after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resend {
    /// Exactly one attempt.
    Never,

    /// Only after a 429, which the service rejects before processing.
    WhenThrottled,

    /// After any transient failure. Idempotent requests only.
    WhenTransient,
}

impl Resend {
    fn allows(self, err: &StoreError) -> bool {
        match self {
            Resend::Never => false,
            Resend::WhenThrottled => matches!(err, StoreError::Throttled { .. }),
            Resend::WhenTransient => err.is_retryable(),
        }
    }
}

/// Body of a successful attempt and how long that attempt took.
struct Exchange {
    body: JsonValue,
    elapsed: Duration,
}

/// Policy store over HTTP.
pub struct HttpPolicyStore {
    credential: ApiCredential,
    base_url: Url,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: usize,
    retry_delay: Duration,
}

impl std::fmt::Debug for HttpPolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPolicyStore")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url.as_str())
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl HttpPolicyStore {
    pub fn new(
        endpoint: &str,
        credential: ApiCredential,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base_url = Url::parse(endpoint).map_err(|e| {
            StoreError::NotConfigured(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::NotConfigured(format!(
                "endpoint '{}' cannot be used as a base URL",
                endpoint
            )));
        }
        if credential.is_empty() {
            return Err(StoreError::NotConfigured(format!(
                "{} is empty",
                credential.name()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::HttpError(e.to_string()))?;

        Ok(Self {
            credential,
            base_url,
            client,
            timeout,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Build from the `store` config section, falling back to
    /// [`API_KEY_ENV`] for the key.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            StoreError::NotConfigured("store endpoint required: set store.endpoint".to_string())
        })?;
        let credential = ApiCredential::from_config_or_env(
            config.api_key.as_deref(),
            API_KEY_ENV,
            "Guardrail API key",
        )?;
        tracing::debug!(source = ?credential.source(), "Loaded guardrail API key");

        Ok(Self::new(endpoint, credential, config.timeout)?
            .with_max_retries(config.max_retries)
            .with_retry_delay(config.retry_delay))
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// First backoff delay. A `Retry-After` from the service takes precedence.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request, re-sending it after the failures `resend` allows.
    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<&JsonValue>,
        binding: Option<&PolicyBinding>,
        resend: Resend,
    ) -> Result<Exchange, StoreError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_max_times(self.max_retries);

        (|| self.send(method.clone(), url.clone(), body, binding))
            .retry(backoff)
            .when(|err| resend.allows(err))
            .adjust(|err, delay| delay.map(|delay| err.retry_after().unwrap_or(delay)))
            .notify(|err, retry_in| {
                tracing::warn!(error = %err, retry_in = ?retry_in, "Retrying policy store call");
            })
            .await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&JsonValue>,
        binding: Option<&PolicyBinding>,
    ) -> Result<Exchange, StoreError> {
        tracing::debug!(method = %method, url = %url, "Policy store request");

        // Only expose the credential here, at the point of use
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(self.credential.expose());
        if let Some(binding) = binding {
            request = request
                .header(GUARDRAIL_ID_HEADER, &binding.policy_id)
                .header(GUARDRAIL_VERSION_HEADER, &binding.version);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(self.timeout)
            } else {
                StoreError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::HttpError(e.to_string()))?;
        let elapsed = started.elapsed();

        if !status.is_success() {
            let body = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));
            return Err(classify_error_response(status, retry_after, &body, binding));
        }

        let body = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).map_err(|e| StoreError::ParseError(e.to_string()))?
        };
        Ok(Exchange { body, elapsed })
    }
}

/// Map a non-success response to a typed error.
pub(crate) fn classify_error_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &JsonValue,
    binding: Option<&PolicyBinding>,
) -> StoreError {
    let message = body
        .get("message")
        .and_then(JsonValue::as_str)
        .or_else(|| body.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error"))
        .to_string();

    if body.get("type").and_then(JsonValue::as_str) == Some(INTERVENTION_ERROR_TYPE) {
        return StoreError::Blocked {
            policy_id: binding.map(|b| b.policy_id.clone()).unwrap_or_default(),
            message,
        };
    }

    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::AuthError(message),
        StatusCode::TOO_MANY_REQUESTS => StoreError::Throttled { retry_after },
        _ => StoreError::ApiError {
            status: status.as_u16(),
            message,
        },
    }
}

/// Whether a successful invocation body reports a policy intervention.
pub(crate) fn is_intervention(body: &JsonValue) -> bool {
    body.get(INTERVENTION_FIELD).and_then(JsonValue::as_str) == Some(INTERVENED)
}

fn parse<T: serde::de::DeserializeOwned>(body: JsonValue) -> Result<T, StoreError> {
    serde_json::from_value(body).map_err(|e| StoreError::ParseError(e.to_string()))
}

#[async_trait]
impl PolicyStore for HttpPolicyStore {
    /// A create the service committed before the connection dropped would
    /// produce a duplicate if sent again, so only a 429 is retried.
    async fn create_policy(&self, request: &PolicyRequest) -> Result<String, StoreError> {
        let body = serde_json::to_value(request).map_err(|e| StoreError::ParseError(e.to_string()))?;
        let url = self.url(&["guardrails"]);
        let reply = self
            .call(Method::POST, url, Some(&body), None, Resend::WhenThrottled)
            .await?;
        Ok(parse::<IdResponse>(reply.body)?.id)
    }

    async fn update_policy(&self, id: &str, request: &PolicyRequest) -> Result<String, StoreError> {
        let body = serde_json::to_value(request).map_err(|e| StoreError::ParseError(e.to_string()))?;
        let url = self.url(&["guardrails", id]);
        let reply = self
            .call(Method::PUT, url, Some(&body), None, Resend::WhenTransient)
            .await?;
        Ok(parse::<IdResponse>(reply.body)?.id)
    }

    /// Sent once; the reconciler's poll loop decides what a failure means.
    async fn get_policy(&self, id: &str) -> Result<PolicyResource, StoreError> {
        let url = self.url(&["guardrails", id]);
        let reply = self.call(Method::GET, url, None, None, Resend::Never).await?;
        parse(reply.body)
    }

    async fn list_policies(&self) -> Result<Vec<PolicySummary>, StoreError> {
        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut url = self.url(&["guardrails"]);
            if let Some(token) = &next_token {
                url.query_pairs_mut().append_pair("nextToken", token);
            }

            let reply = self
                .call(Method::GET, url, None, None, Resend::WhenTransient)
                .await?;
            let page: ListPage = parse(reply.body)?;
            summaries.extend(page.guardrails);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(summaries)
    }

    async fn invoke_model(&self, request: &InvokeRequest) -> Result<InvokeResponse, StoreError> {
        let url = self.url(&["model", &request.model_id, "invoke"]);
        let reply = self
            .call(
                Method::POST,
                url,
                Some(&request.body),
                request.binding.as_ref(),
                Resend::WhenTransient,
            )
            .await?;

        if is_intervention(&reply.body) {
            return Err(StoreError::Blocked {
                policy_id: request
                    .binding
                    .as_ref()
                    .map(|b| b.policy_id.clone())
                    .unwrap_or_default(),
                message: "guardrail intervened".to_string(),
            });
        }
        Ok(InvokeResponse {
            body: reply.body,
            latency: reply.elapsed,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::secrets::CredentialSource;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn store(endpoint: &str) -> HttpPolicyStore {
        HttpPolicyStore::new(
            endpoint,
            ApiCredential::new("wk-test", CredentialSource::Programmatic, "key"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn policy_request() -> PolicyRequest {
        PolicyRequest {
            name: "prod".to_string(),
            description: String::new(),
            blocked_input_messaging: "no".to_string(),
            blocked_outputs_messaging: "no".to_string(),
            content_policy_config: None,
            topic_policy_config: None,
            sensitive_information_policy_config: None,
        }
    }

    /// What the loopback responder does with one request.
    enum Reply {
        Json {
            status: u16,
            headers: Vec<(&'static str, String)>,
            body: String,
        },
        /// Read the request, then close the socket without answering.
        Hangup,
    }

    impl Reply {
        fn json(status: u16, body: JsonValue) -> Self {
            Reply::Json {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            }
        }

        fn with_header(mut self, name: &'static str, value: &str) -> Self {
            if let Reply::Json { headers, .. } = &mut self {
                headers.push((name, value.to_string()));
            }
            self
        }
    }

    /// One-connection-per-request HTTP/1.1 server on a loopback port.
    struct Responder {
        endpoint: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Responder {
        async fn start<F>(reply: F) -> Self
        where
            F: Fn(usize, &str) -> Reply + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let endpoint = format!("http://{}", listener.local_addr().unwrap());
            let seen = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&seen);

            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let Some(head) = read_request(&mut socket).await else {
                        continue;
                    };
                    let index = {
                        let mut log = log.lock();
                        log.push(head.clone());
                        log.len() - 1
                    };

                    match reply(index, &head) {
                        Reply::Hangup => drop(socket),
                        Reply::Json {
                            status,
                            headers,
                            body,
                        } => {
                            let mut response = format!(
                                "HTTP/1.1 {status} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                                body.len()
                            );
                            for (name, value) in headers {
                                response.push_str(&format!("{name}: {value}\r\n"));
                            }
                            response.push_str("\r\n");
                            response.push_str(&body);
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        }
                    }
                }
            });

            Self { endpoint, seen }
        }

        /// Request heads in arrival order.
        fn requests(&self) -> Vec<String> {
            self.seen.lock().clone()
        }

        fn store(&self) -> HttpPolicyStore {
            store(&self.endpoint).with_retry_delay(Duration::from_millis(10))
        }
    }

    /// Read one full request and return its head.
    async fn read_request(socket: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let head_end = loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let body_len = head
            .lines()
            .find_map(|line| {
                let line = line.to_ascii_lowercase();
                line.strip_prefix("content-length:")
                    .and_then(|v| v.trim().parse::<usize>().ok())
            })
            .unwrap_or(0);

        while buf.len() < head_end + body_len {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Some(head)
    }

    #[tokio::test]
    async fn test_create_is_not_resent_after_dropped_connection() {
        let responder = Responder::start(|index, _| {
            if index == 0 {
                Reply::Hangup
            } else {
                Reply::json(200, json!({ "id": "gr-2" }))
            }
        })
        .await;

        let err = responder
            .store()
            .create_policy(&policy_request())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::HttpError(_)));
        assert_eq!(responder.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_create_retries_after_throttling() {
        let responder = Responder::start(|index, _| {
            if index == 0 {
                Reply::json(429, json!({ "message": "slow down" })).with_header("retry-after", "0")
            } else {
                Reply::json(200, json!({ "id": "gr-1" }))
            }
        })
        .await;

        let id = responder.store().create_policy(&policy_request()).await.unwrap();

        assert_eq!(id, "gr-1");
        let requests = responder.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.starts_with("POST /guardrails ")));
    }

    #[tokio::test]
    async fn test_get_policy_is_sent_once() {
        let responder = Responder::start(|_, head| {
            if head.starts_with("GET /guardrails/gr-missing ") {
                Reply::json(404, json!({ "message": "no such guardrail" }))
            } else {
                Reply::json(503, json!({ "message": "unavailable" }))
            }
        })
        .await;
        let store = responder.store();

        let missing = store.get_policy("gr-missing").await.unwrap_err();
        assert!(missing.is_not_found());

        let unavailable = store.get_policy("gr-0001").await.unwrap_err();
        assert_eq!(
            unavailable,
            StoreError::ApiError {
                status: 503,
                message: "unavailable".into()
            }
        );

        assert_eq!(responder.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_get_policy_parses_resource() {
        let responder = Responder::start(|_, _| {
            Reply::json(
                200,
                json!({ "id": "gr-0001", "status": "FAILED", "failureReasons": ["bad topic"] }),
            )
        })
        .await;

        let resource = responder.store().get_policy("gr-0001").await.unwrap();

        assert_eq!(resource.status, warden_core::PolicyStatus::Failed);
        assert_eq!(resource.failure_reasons, vec!["bad topic".to_string()]);
    }

    #[tokio::test]
    async fn test_list_follows_next_token() {
        let responder = Responder::start(|_, head| {
            if head.contains("nextToken=page-2") {
                Reply::json(200, json!({ "guardrails": [{ "id": "gr-2", "name": "staging" }] }))
            } else {
                Reply::json(
                    200,
                    json!({
                        "guardrails": [{ "id": "gr-1", "name": "prod" }],
                        "nextToken": "page-2"
                    }),
                )
            }
        })
        .await;

        let summaries = responder.store().list_policies().await.unwrap();

        assert_eq!(
            summaries,
            vec![
                PolicySummary {
                    id: "gr-1".into(),
                    name: "prod".into()
                },
                PolicySummary {
                    id: "gr-2".into(),
                    name: "staging".into()
                },
            ]
        );

        let requests = responder.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].starts_with("GET /guardrails?nextToken=page-2 "));
        assert!(requests[0]
            .to_ascii_lowercase()
            .contains("authorization: bearer wk-test"));
    }

    #[tokio::test]
    async fn test_intervention_body_is_blocked() {
        let responder = Responder::start(|_, _| {
            Reply::json(
                200,
                json!({
                    "amazon-bedrock-guardrailAction": "INTERVENED",
                    "completion": "I cannot process this request."
                }),
            )
        })
        .await;

        let err = responder
            .store()
            .invoke_model(&InvokeRequest {
                model_id: "anthropic.claude-v2".into(),
                body: json!({ "prompt": "\n\nHuman: hi\n\nAssistant:" }),
                binding: Some(PolicyBinding::new("gr-0001", "DRAFT")),
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::Blocked {
                policy_id: "gr-0001".into(),
                message: "guardrail intervened".into()
            }
        );

        let head = responder.requests()[0].to_ascii_lowercase();
        assert!(head.starts_with("post /model/anthropic.claude-v2/invoke "));
        assert!(head.contains("x-amzn-bedrock-guardrailidentifier: gr-0001"));
        assert!(head.contains("x-amzn-bedrock-guardrailversion: draft"));
    }

    #[tokio::test]
    async fn test_invoke_latency_excludes_retry_wait() {
        let responder = Responder::start(|index, _| {
            if index == 0 {
                Reply::json(429, json!({ "message": "slow down" })).with_header("retry-after", "1")
            } else {
                Reply::json(200, json!({ "completion": "Happy to help." }))
            }
        })
        .await;
        let started = Instant::now();

        let response = responder
            .store()
            .invoke_model(&InvokeRequest {
                model_id: "anthropic.claude-v2".into(),
                body: json!({ "prompt": "\n\nHuman: hi\n\nAssistant:" }),
                binding: None,
            })
            .await
            .unwrap();

        // The service's Retry-After wins over the 10ms configured backoff.
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(response.latency < Duration::from_millis(500));
        assert_eq!(response.body["completion"], "Happy to help.");
        assert_eq!(responder.requests().len(), 2);
    }

    #[test]
    fn test_urls_encode_model_ids() {
        let store = store("https://guardrails.example.com/v1/");
        assert_eq!(
            store.url(&["model", "anthropic.claude-v2:1", "invoke"]).as_str(),
            "https://guardrails.example.com/v1/model/anthropic.claude-v2:1/invoke"
        );
        assert_eq!(
            store.url(&["guardrails", "a b"]).as_str(),
            "https://guardrails.example.com/v1/guardrails/a%20b"
        );
    }

    #[test]
    fn test_invalid_endpoint_is_not_configured() {
        let err = HttpPolicyStore::new(
            "not a url",
            ApiCredential::new("k", CredentialSource::Programmatic, "key"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::NotConfigured(_)));

        let err = HttpPolicyStore::new(
            "https://guardrails.example.com",
            ApiCredential::new("", CredentialSource::Config, "Guardrail API key"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(
            err,
            StoreError::NotConfigured("Guardrail API key is empty".into())
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", store("https://guardrails.example.com"));
        assert!(!debug.contains("wk-test"));
    }

    #[test]
    fn test_classify_status_codes() {
        let body = json!({ "message": "no such guardrail" });
        assert_eq!(
            classify_error_response(StatusCode::NOT_FOUND, None, &body, None),
            StoreError::NotFound("no such guardrail".into())
        );
        assert!(matches!(
            classify_error_response(StatusCode::FORBIDDEN, None, &body, None),
            StoreError::AuthError(_)
        ));
        assert_eq!(
            classify_error_response(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(2)),
                &body,
                None
            ),
            StoreError::Throttled {
                retry_after: Some(Duration::from_secs(2))
            }
        );

        let server = classify_error_response(
            StatusCode::BAD_GATEWAY,
            None,
            &JsonValue::String(String::new()),
            None,
        );
        assert_eq!(
            server,
            StoreError::ApiError {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
        assert!(server.is_retryable());
    }

    #[test]
    fn test_intervention_error_type_is_blocked() {
        let binding = PolicyBinding::new("gr-0001", "DRAFT");
        let body = json!({ "type": "guardrail_intervened", "message": "denied topic" });

        let err = classify_error_response(StatusCode::BAD_REQUEST, None, &body, Some(&binding));
        assert_eq!(
            err,
            StoreError::Blocked {
                policy_id: "gr-0001".into(),
                message: "denied topic".into()
            }
        );
    }

    #[test]
    fn test_intervention_field_on_success_body() {
        assert!(is_intervention(&json!({
            "amazon-bedrock-guardrailAction": "INTERVENED",
            "completion": "I cannot process this request."
        })));
        assert!(!is_intervention(&json!({
            "amazon-bedrock-guardrailAction": "NONE",
            "completion": "Sure."
        })));
        assert!(!is_intervention(&json!({ "completion": "Sure." })));
    }
}
