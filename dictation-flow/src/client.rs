//! Outbound calls to the interpretation, submission and report services.
//!
//! Each service sits behind its own trait so a session can be driven by the HTTP
//! client in production and by scripted fakes in tests. All three endpoints take
//! a JSON POST with no authentication; any non-2xx status is a failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::record::{Record, RecordDelta};
use crate::transcript::Transcript;

/// Body of an interpretation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretRequest {
    pub user_message: String,
    pub current_record: Record,
    pub chat_history: Transcript,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextPrompt {
    #[serde(default)]
    pub prompt: String,
}

/// What the interpreter made of the latest utterance. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpretationResult {
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_record: Option<RecordDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_insert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_prompt: Option<NextPrompt>,
}

impl InterpretationResult {
    /// Decode a response body, rejecting anything that is not a JSON object of
    /// the expected shape.
    pub fn from_value(value: Value) -> Result<Self, ClientError> {
        if !value.is_object() {
            return Err(ClientError::InvalidResponse(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }
        serde_json::from_value(value).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    record: &'a Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: Option<String>,
}

/// Messages are shown to the operator verbatim; anything that is not a string
/// is rendered as JSON text rather than failing the whole response.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest<'a> {
    current_record: &'a Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    #[serde(default)]
    pub field_report: Option<String>,
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(&self, request: &InterpretRequest)
    -> Result<InterpretationResult, ClientError>;
}

#[async_trait]
pub trait RecordSubmitter: Send + Sync {
    async fn submit(&self, record: &Record) -> Result<SubmitResponse, ClientError>;
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate_report(&self, record: &Record) -> Result<ReportResponse, ClientError>;
}

/// The three collaborators a session talks to.
#[derive(Clone)]
pub struct Services {
    pub interpreter: Arc<dyn Interpreter>,
    pub submitter: Arc<dyn RecordSubmitter>,
    pub reporter: Arc<dyn ReportGenerator>,
}

impl Services {
    pub fn new(
        interpreter: Arc<dyn Interpreter>,
        submitter: Arc<dyn RecordSubmitter>,
        reporter: Arc<dyn ReportGenerator>,
    ) -> Self {
        Self {
            interpreter,
            submitter,
            reporter,
        }
    }

    /// All three services backed by one shared HTTP client.
    pub fn http(client: Arc<DictationHttpClient>) -> Self {
        Self {
            interpreter: client.clone(),
            submitter: client.clone(),
            reporter: client,
        }
    }
}

/// reqwest-backed client for the remote functions.
#[derive(Debug, Clone)]
pub struct DictationHttpClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl DictationHttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Value, ClientError> {
        debug!(url = %url, "posting to remote function");

        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "remote function returned an error status");
            return Err(ClientError::HttpStatus(status.as_u16()));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout(self.config.timeout)
            } else {
                ClientError::InvalidResponse(e.to_string())
            }
        })
    }

    async fn post_for<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let value = self.post_json(url, body).await?;
        serde_json::from_value(value).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

fn request_error(error: reqwest::Error, timeout: Duration) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout(timeout)
    } else {
        ClientError::Transport(error.to_string())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl Interpreter for DictationHttpClient {
    async fn interpret(
        &self,
        request: &InterpretRequest,
    ) -> Result<InterpretationResult, ClientError> {
        let value = self.post_json(&self.config.interpret_url, request).await?;
        let result = InterpretationResult::from_value(value)?;
        info!(
            has_message = result.message.is_some(),
            delta_fields = result.updated_record.as_ref().map_or(0, RecordDelta::len),
            ready_to_insert = result.ready_to_insert.unwrap_or(false),
            "interpretation received"
        );
        Ok(result)
    }
}

#[async_trait]
impl RecordSubmitter for DictationHttpClient {
    async fn submit(&self, record: &Record) -> Result<SubmitResponse, ClientError> {
        let value = self
            .post_json(&self.config.submit_url, &SubmitRequest { record })
            .await?;
        // A 2xx means the record is stored; an odd body must not turn that into a failure.
        let response = serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "unexpected submission response body");
            SubmitResponse::default()
        });
        info!("record submitted");
        Ok(response)
    }
}

#[async_trait]
impl ReportGenerator for DictationHttpClient {
    async fn generate_report(&self, record: &Record) -> Result<ReportResponse, ClientError> {
        self.post_for(
            &self.config.report_url,
            &ReportRequest {
                current_record: record,
            },
        )
        .await
    }
}
