use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use dictation_flow::{
    ClientConfig, DictationHttpClient, InMemorySessionStorage, Input, SessionConfig, SessionError,
    SessionStorage, Services, SharedSession, create_session,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::models::{ChatRequest, EventsResponse, SessionView, SpeechRequest};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn conflict_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn session_error(error: SessionError, id: &str) -> ApiError {
    match error {
        SessionError::Busy(_) => conflict_error(&error.to_string(), id),
        SessionError::NotReady => conflict_error(&error.to_string(), id),
        SessionError::SessionNotFound(_) => not_found_error("Session not found", id),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub session_storage: Arc<dyn SessionStorage>,
    pub services: Services,
    pub session_config: SessionConfig,
}

impl AppState {
    /// State backed by the remote functions named in the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let client_config = ClientConfig::from_env()?;
        let session_config = SessionConfig::from_env()?;

        info!(
            interpret_url = %client_config.interpret_url,
            submit_url = %client_config.submit_url,
            report_url = %client_config.report_url,
            timeout_secs = client_config.timeout.as_secs(),
            speech_available = session_config.speech_available,
            "configured remote functions"
        );

        let client = DictationHttpClient::new(client_config)?;
        Ok(Self {
            session_storage: Arc::new(InMemorySessionStorage::new()),
            services: Services::http(Arc::new(client)),
            session_config,
        })
    }
}

pub fn create_app() -> anyhow::Result<Router> {
    Ok(build_router(AppState::from_env()?))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        .route("/session/{session_id}", get(get_session).delete(delete_session))
        .route("/session/{session_id}/speech", post(speech))
        .route("/session/{session_id}/submit", post(submit))
        .route("/session/{session_id}/report", post(report))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<EventsResponse> {
    info!(
        session_id = ?request.session_id,
        content_length = request.content.len(),
        "Processing chat request"
    );

    let Some(session_id) = request.session_id else {
        return start_session(&state, request.content).await;
    };

    let session = load_session(&state, &session_id).await?;
    run_input(session, &session_id, Input::Utterance(request.content))
        .await
        .map(Json)
}

/// Open a new session, greet, and handle the first utterance if there is one.
async fn start_session(state: &AppState, content: String) -> ApiResult<EventsResponse> {
    let session = create_session(
        state.session_storage.as_ref(),
        state.services.clone(),
        state.session_config,
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to create session");
        internal_error("Failed to create session", &e.to_string())
    })?;

    let (session_id, mut events) = {
        let guard = session.lock().await;
        (guard.id().to_string(), guard.start())
    };
    info!(session_id = %session_id, "Created new session");

    let mut response = run_input(session, &session_id, Input::Utterance(content)).await?;
    events.append(&mut response.events);
    response.events = events;
    Ok(Json(response))
}

async fn speech(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SpeechRequest>,
) -> ApiResult<EventsResponse> {
    let session = load_session(&state, &session_id).await?;
    run_input(session, &session_id, request.into()).await.map(Json)
}

async fn submit(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<EventsResponse> {
    let session = load_session(&state, &session_id).await?;
    run_input(session, &session_id, Input::Submit).await.map(Json)
}

async fn report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<EventsResponse> {
    let session = load_session(&state, &session_id).await?;
    run_input(session, &session_id, Input::GenerateReport)
        .await
        .map(Json)
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionView> {
    let session = load_session(&state, &session_id).await?;
    let guard = session.lock().await;
    Ok(Json(SessionView::of(&guard)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_session_id(&session_id)?;
    state
        .session_storage
        .delete(&session_id)
        .await
        .map_err(|e| session_error(e, &session_id))?;
    info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if Uuid::parse_str(session_id).is_err() {
        warn!(session_id = %session_id, "Invalid session ID format");
        return Err(bad_request_error("Invalid session ID format"));
    }
    Ok(())
}

async fn load_session(state: &AppState, session_id: &str) -> Result<SharedSession, ApiError> {
    validate_session_id(session_id)?;
    match state.session_storage.get(session_id).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => {
            info!(session_id = %session_id, "Session not found");
            Err(not_found_error("Session not found", session_id))
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to get session");
            Err(internal_error("Failed to load session", &e.to_string()))
        }
    }
}

/// Feed one input to a session.
///
/// The session is locked without waiting: a request arriving while another one
/// holds the session gets 409. The work runs in its own task so a client that
/// disconnects mid-call cannot leave the session stuck in a waiting state.
async fn run_input(
    session: SharedSession,
    session_id: &str,
    input: Input,
) -> Result<EventsResponse, ApiError> {
    let mut guard = session.try_lock_owned().map_err(|_| {
        warn!(session_id = %session_id, "Session is busy");
        conflict_error("A request is already in flight for this session", session_id)
    })?;

    let task = tokio::spawn(
        async move {
            let events = guard.handle(input).await;
            (guard.state(), events)
        }
        .in_current_span(),
    );

    let (session_state, events) = task.await.map_err(|e| {
        error!(session_id = %session_id, error = %e, "Session task failed");
        internal_error("Session task failed", &e.to_string())
    })?;
    let events = events.map_err(|e| session_error(e, session_id))?;

    info!(
        session_id = %session_id,
        state = ?session_state,
        events = events.len(),
        "Request completed successfully"
    );

    Ok(EventsResponse {
        session_id: session_id.to_string(),
        state: session_state,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use dictation_flow::{
        ClientError, InterpretRequest, InterpretationResult, Interpreter, Record, RecordDelta,
        RecordSubmitter, ReportGenerator, ReportResponse, SectionKind, SubmitResponse,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Interpreter that records the patient's name and flags the record ready
    /// whenever the utterance contains "done".
    struct EchoFunctions;

    #[async_trait]
    impl Interpreter for EchoFunctions {
        async fn interpret(
            &self,
            request: &InterpretRequest,
        ) -> Result<InterpretationResult, ClientError> {
            Ok(InterpretationResult {
                message: Some(format!("Heard: {}", request.user_message)),
                updated_record: Some(RecordDelta::new().with(
                    SectionKind::Patient,
                    "name",
                    request.user_message.clone(),
                )),
                ready_to_insert: Some(request.user_message.contains("done")),
                next_prompt: None,
            })
        }
    }

    #[async_trait]
    impl RecordSubmitter for EchoFunctions {
        async fn submit(&self, _record: &Record) -> Result<SubmitResponse, ClientError> {
            Ok(SubmitResponse {
                message: Some("stored".to_string()),
            })
        }
    }

    #[async_trait]
    impl ReportGenerator for EchoFunctions {
        async fn generate_report(&self, _record: &Record) -> Result<ReportResponse, ClientError> {
            Ok(ReportResponse {
                field_report: Some("draft".to_string()),
            })
        }
    }

    fn test_state() -> (AppState, Arc<InMemorySessionStorage>) {
        let storage = Arc::new(InMemorySessionStorage::new());
        let functions = Arc::new(EchoFunctions);
        let state = AppState {
            session_storage: storage.clone(),
            services: Services::new(functions.clone(), functions.clone(), functions),
            session_config: SessionConfig::default(),
        };
        (state, storage)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn open_session(router: &Router) -> String {
        let (status, body) = call(router, "POST", "/chat", Some(json!({"content": ""}))).await;
        assert_eq!(status, StatusCode::OK);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn first_chat_creates_session_and_greets() {
        let (state, storage) = test_state();
        let router = build_router(state);

        let (status, body) =
            call(&router, "POST", "/chat", Some(json!({"content": "Jane Doe"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(Uuid::parse_str(body["session_id"].as_str().unwrap()).is_ok());
        assert_eq!(body["state"], "idle");
        let events = body["events"].as_array().unwrap();
        assert_eq!(events[0]["type"], "assistant_message");
        assert!(events[0]["data"].as_str().unwrap().starts_with("Welcome!"));
        assert!(events.iter().any(|e| e["data"] == "Heard: Jane Doe"));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn unknown_or_malformed_session_ids_are_rejected() {
        let (state, _) = test_state();
        let router = build_router(state);

        let (status, _) = call(
            &router,
            "POST",
            "/chat",
            Some(json!({"session_id": Uuid::new_v4().to_string(), "content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &router,
            "POST",
            "/chat",
            Some(json!({"session_id": "not-a-uuid", "content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn overlapping_request_is_rejected_with_conflict() {
        let (state, storage) = test_state();
        let router = build_router(state);
        let session_id = open_session(&router).await;

        let session = storage.get(&session_id).await.unwrap().unwrap();
        let _in_flight = session.lock().await;

        let (status, body) = call(
            &router,
            "POST",
            "/chat",
            Some(json!({"session_id": session_id, "content": "age 45"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["session_id"], session_id.as_str());
    }

    #[tokio::test]
    async fn submit_requires_ready_record_then_resets_it() {
        let (state, _) = test_state();
        let router = build_router(state);
        let session_id = open_session(&router).await;
        let submit_uri = format!("/session/{session_id}/submit");

        let (status, _) = call(&router, "POST", &submit_uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = call(
            &router,
            "POST",
            "/chat",
            Some(json!({"session_id": session_id, "content": "Jane Doe done"})),
        )
        .await;
        assert_eq!(body["state"], "ready_to_submit");
        assert!(body["events"].as_array().unwrap().iter().any(|e| e["type"] == "submit_available"));

        let (status, body) = call(&router, "POST", &submit_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["events"][0]["data"], "stored");

        let (_, view) = call(&router, "GET", &format!("/session/{session_id}"), None).await;
        assert_eq!(view["record"]["patient"]["name"], "");
        assert_eq!(view["chat_history"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn session_view_exposes_record_completion_and_history() {
        let (state, _) = test_state();
        let router = build_router(state);
        let session_id = open_session(&router).await;
        call(
            &router,
            "POST",
            "/chat",
            Some(json!({"session_id": session_id, "content": "Jane Doe"})),
        )
        .await;

        let (status, view) = call(&router, "GET", &format!("/session/{session_id}"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["record"]["patient"]["name"], "Jane Doe");
        assert_eq!(view["completion"]["sections"][0]["label"], "Patient Info");
        assert_eq!(view["completion"]["sections"][0]["completed"], 1);
        assert_eq!(
            view["chat_history"],
            json!([
                {"role": "user", "content": "Jane Doe"},
                {"role": "assistant", "content": "Heard: Jane Doe"}
            ])
        );
        assert_eq!(view["listening"], false);
    }

    #[tokio::test]
    async fn speech_toggle_without_speech_support_hides_control() {
        let (state, _) = test_state();
        let router = build_router(state);
        let session_id = open_session(&router).await;

        let (status, body) = call(
            &router,
            "POST",
            &format!("/session/{session_id}/speech"),
            Some(json!({"event": "toggle"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["events"], json!([{"type": "speech_unavailable"}]));
    }

    #[tokio::test]
    async fn report_returns_draft_event() {
        let (state, _) = test_state();
        let router = build_router(state);
        let session_id = open_session(&router).await;

        let (_, body) = call(&router, "POST", &format!("/session/{session_id}/report"), None).await;

        assert_eq!(body["events"][0], json!({"type": "draft_ready", "data": "draft"}));
    }

    #[tokio::test]
    async fn deleted_session_is_gone() {
        let (state, _) = test_state();
        let router = build_router(state);
        let session_id = open_session(&router).await;
        let uri = format!("/session/{session_id}");

        let (status, _) = call(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
