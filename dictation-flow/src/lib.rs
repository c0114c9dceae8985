pub mod client;
pub mod completion;
pub mod config;
pub mod error;
pub mod record;
pub mod session;
pub mod storage;
pub mod transcript;

// Re-export commonly used types
pub use client::{
    DictationHttpClient, InterpretRequest, InterpretationResult, Interpreter, NextPrompt,
    RecordSubmitter, ReportGenerator, ReportResponse, Services, SubmitResponse,
};
pub use completion::{
    CompletionSnapshot, FieldCompletion, SectionCompletion, SectionProgress, field_display_value,
    is_field_complete, section_progress,
};
pub use config::{ClientConfig, SessionConfig};
pub use error::{ClientError, ConfigError, Result, SessionError};
pub use record::{CodedItem, FieldValue, ListItem, Record, RecordDelta, Section, SectionKind};
pub use session::{Input, SessionController, SessionEvent, SessionState};
pub use storage::{InMemorySessionStorage, SessionStorage, SharedSession, create_session};
pub use transcript::{Role, Transcript, Turn};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Stub of the remote functions: the interpreter fills the patient section on
    /// the first call and flags the record ready on the second.
    fn remote_functions() -> Router {
        Router::new()
            .route(
                "/interpret",
                post(|Json(body): Json<Value>| async move {
                    let turns = body["chatHistory"].as_array().map_or(0, Vec::len);
                    if turns == 1 {
                        Json(json!({
                            "message": "Recorded Jane Doe, 45.",
                            "updated_record": {"patient": {"name": "Jane Doe", "age": 45, "sex": "F"}}
                        }))
                    } else {
                        Json(json!({
                            "message": "Everything required is captured.",
                            "updated_record": {
                                "coding": {"cpt": [{"code": "44970", "description": "Laparoscopic appendectomy"}]}
                            },
                            "ready_to_insert": true
                        }))
                    }
                }),
            )
            .route(
                "/submit",
                post(|| async { Json(json!({"message": "Record successfully inserted"})) }),
            )
            .route(
                "/report",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
            )
    }

    #[tokio::test]
    async fn capture_submit_and_start_over_over_http() {
        let base = serve(remote_functions()).await;
        let client = DictationHttpClient::new(ClientConfig::new(
            format!("{base}/interpret"),
            format!("{base}/submit"),
            format!("{base}/report"),
        ))
        .unwrap();
        let mut session = SessionController::new(
            "e2e",
            Services::http(Arc::new(client)),
            SessionConfig::default(),
        );

        session
            .handle(Input::Utterance("Jane Doe, 45, female".to_string()))
            .await
            .unwrap();
        let patient = session.completion().section(SectionKind::Patient).cloned().unwrap();
        assert_eq!(patient.percent, 100.0);

        let events = session
            .handle(Input::Utterance("Laparoscopic appendectomy".to_string()))
            .await
            .unwrap();
        assert!(events.contains(&SessionEvent::SubmitAvailable));
        assert_eq!(session.state(), SessionState::ReadyToSubmit);

        let events = session.handle(Input::GenerateReport).await.unwrap();
        assert_eq!(
            events,
            vec![SessionEvent::AssistantMessage(
                "Error generating field report: HTTP error! status: 503".to_string()
            )]
        );

        session.handle(Input::Submit).await.unwrap();
        assert_eq!(session.record(), &Record::new());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.transcript().len(), 4);
    }
}
